//! Wrappers around the [k256] key agreement primitives.
//!
//! See the [crypto module] documentation since this is a private module anyways.
//!
//! [k256]: https://docs.rs/k256/
//! [crypto module]: crate::crypto

use k256::{ecdh::diffie_hellman, elliptic_curve::sec1::ToEncodedPoint, PublicKey, SecretKey};
use rand::rngs::OsRng;

/// Length in bytes of a `secp256k1` scalar.
const SCALAR_LENGTH: usize = 32;

/// Length in bytes of an uncompressed `secp256k1` point: the tag byte followed by `x` and `y`.
const UNCOMPRESSED_POINT_LENGTH: usize = 65;

/// SEC1 tag of an uncompressed point.
const UNCOMPRESSED_TAG: &str = "04";

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
/// An error related to the decoding of key material or to the key agreement.
pub enum KeyError {
    #[error("invalid key encoding: {0}")]
    InvalidKeyEncoding(&'static str),
    #[error("invalid peer public key")]
    InvalidPeerKey,
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A `secp256k1` key pair for the Diffie-Hellman key agreement.
pub struct EcdhKeyPair {
    /// The `secp256k1` public key. This part is published on-chain when joining a project.
    pub public: PublicEcdhKey,
    /// The `secp256k1` secret key. It never leaves the process.
    pub secret: SecretEcdhKey,
}

impl EcdhKeyPair {
    /// Generates a new random `secp256k1` key pair.
    pub fn generate() -> Self {
        SecretEcdhKey(SecretKey::random(&mut OsRng)).into()
    }
}

impl From<SecretEcdhKey> for EcdhKeyPair {
    fn from(secret: SecretEcdhKey) -> Self {
        Self {
            public: secret.public_key(),
            secret,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
/// A `secp256k1` secret scalar.
pub struct SecretEcdhKey(SecretKey);

impl SecretEcdhKey {
    /// Parses a secret scalar from its hex encoding.
    ///
    /// Shorter encodings are left-padded with zeros, since some peers drop the leading zeros of
    /// the scalar.
    ///
    /// # Errors
    /// Fails if the string is not hex, is longer than a scalar, or does not encode a scalar in
    /// the range `[1, n)`.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        if hex_str.len() > 2 * SCALAR_LENGTH {
            return Err(KeyError::InvalidKeyEncoding("secret key is too long"));
        }
        let padded = format!("{:0>width$}", hex_str, width = 2 * SCALAR_LENGTH);
        let bytes =
            hex::decode(padded).map_err(|_| KeyError::InvalidKeyEncoding("secret key is not hex"))?;
        SecretKey::from_slice(&bytes)
            .map(Self)
            .map_err(|_| KeyError::InvalidKeyEncoding("secret key is out of range"))
    }

    /// Encodes the scalar as a fixed-width, lowercase hex string of 64 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    /// Computes the corresponding public key for this secret key.
    pub fn public_key(&self) -> PublicEcdhKey {
        PublicEcdhKey(self.0.public_key())
    }

    /// Computes the raw shared secret with the peer's public key.
    ///
    /// The secret is the `x` coordinate of the product. No key derivation function is applied:
    /// the protocol uses the raw value directly as an AES-256 key.
    pub fn shared_secret(&self, peer: &PublicEcdhKey) -> SharedSecret {
        let shared = diffie_hellman(self.0.to_nonzero_scalar(), peer.0.as_affine());
        SharedSecret(shared.raw_secret_bytes().to_vec())
    }

    /// Computes the raw shared secret with a peer public key that has not been validated yet.
    ///
    /// # Errors
    /// Returns [`KeyError::InvalidKeyEncoding`] if the key is not an uncompressed hex point, and
    /// [`KeyError::InvalidPeerKey`] if it is the identity or not on the curve.
    pub fn shared_secret_with_hex(&self, peer_hex: &str) -> Result<SharedSecret, KeyError> {
        let bytes = decode_uncompressed(peer_hex)?;
        let peer = PublicKey::from_sec1_bytes(&bytes).map_err(|_| KeyError::InvalidPeerKey)?;
        Ok(self.shared_secret(&PublicEcdhKey(peer)))
    }
}

impl std::fmt::Debug for SecretEcdhKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SecretEcdhKey").field(&"<redacted>").finish()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// A `secp256k1` public point. It is always a valid, non-identity point of the curve.
pub struct PublicEcdhKey(PublicKey);

impl PublicEcdhKey {
    /// Parses a public key from its uncompressed hex encoding (`04 || x || y`).
    ///
    /// # Errors
    /// Fails if the prefix or the length is wrong, or if the point is not on the curve.
    pub fn from_hex(hex_str: &str) -> Result<Self, KeyError> {
        let bytes = decode_uncompressed(hex_str)?;
        PublicKey::from_sec1_bytes(&bytes)
            .map(Self)
            .map_err(|_| KeyError::InvalidKeyEncoding("public key is not on the curve"))
    }

    /// Encodes the point as an uncompressed hex string of 130 characters.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0.to_encoded_point(false).as_bytes())
    }
}

fn decode_uncompressed(hex_str: &str) -> Result<Vec<u8>, KeyError> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    if !hex_str.starts_with(UNCOMPRESSED_TAG) {
        return Err(KeyError::InvalidKeyEncoding(
            "public key must be uncompressed (starts with '04')",
        ));
    }
    let bytes =
        hex::decode(hex_str).map_err(|_| KeyError::InvalidKeyEncoding("public key is not hex"))?;
    if bytes.len() != UNCOMPRESSED_POINT_LENGTH {
        return Err(KeyError::InvalidKeyEncoding("public key has an invalid length"));
    }
    Ok(bytes)
}

#[derive(Clone, PartialEq, Eq)]
/// The raw output of the key agreement.
///
/// It is identical on both sides of the exchange and lives as long as the project membership.
/// It is never written to durable storage.
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SharedSecret").field(&"<redacted>").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const G: &str = "0479be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798\
                     483ada7726a3c4655da4fbfc0e1108a8fd17b448a68554199c47d08ffb10d4b8";
    const TWO_G: &str = "04c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5\
                         1ae168fea63dc339a3c58419466ceaeef7f632653266d0e1236431a950cfe52a";

    fn scalar(value: u8) -> SecretEcdhKey {
        SecretEcdhKey::from_hex(&format!("{:02x}", value)).unwrap()
    }

    #[test]
    fn test_fixed_scalar_gives_known_point() {
        assert_eq!(scalar(1).public_key().to_hex(), G);
        assert_eq!(scalar(2).public_key().to_hex(), TWO_G);
    }

    #[test]
    fn test_secret_hex_is_fixed_width() {
        let hex = scalar(1).to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(hex, format!("{:0>64}", "1"));
        assert_eq!(SecretEcdhKey::from_hex(&hex).unwrap(), scalar(1));
    }

    #[test]
    fn test_known_shared_secret() {
        let expected = hex::decode(
            "c6047f9441ed7d6d3045406e95c07cd85c778e4b8cef3ca7abac09b95c709ee5",
        )
        .unwrap();
        let pub_g = PublicEcdhKey::from_hex(G).unwrap();
        let pub_2g = PublicEcdhKey::from_hex(TWO_G).unwrap();
        assert_eq!(scalar(1).shared_secret(&pub_2g).as_slice(), expected.as_slice());
        assert_eq!(scalar(2).shared_secret(&pub_g).as_slice(), expected.as_slice());
    }

    #[test]
    fn test_shared_secret_is_symmetric() {
        for _ in 0..8 {
            let a = EcdhKeyPair::generate();
            let b = EcdhKeyPair::generate();
            let ab = a.secret.shared_secret(&b.public);
            assert_eq!(ab, b.secret.shared_secret(&a.public));
            assert_eq!(ab.as_slice().len(), 32);
        }
    }

    #[test]
    fn test_public_key_hex_roundtrip() {
        let keys = EcdhKeyPair::generate();
        let hex = keys.public.to_hex();
        assert_eq!(hex.len(), 130);
        assert!(hex.starts_with("04"));
        assert_eq!(PublicEcdhKey::from_hex(&hex).unwrap(), keys.public);
    }

    #[test]
    fn test_public_key_must_be_uncompressed() {
        let compressed = "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798";
        assert!(matches!(
            PublicEcdhKey::from_hex(compressed),
            Err(KeyError::InvalidKeyEncoding(_))
        ));
        assert!(matches!(
            PublicEcdhKey::from_hex(&G[..128]),
            Err(KeyError::InvalidKeyEncoding(_))
        ));
    }

    #[test]
    fn test_off_curve_point() {
        // flip the last byte of y
        let off_curve = format!("{}b9", &G[..128]);
        assert!(matches!(
            PublicEcdhKey::from_hex(&off_curve),
            Err(KeyError::InvalidKeyEncoding(_))
        ));
        assert_eq!(
            scalar(1).shared_secret_with_hex(&off_curve),
            Err(KeyError::InvalidPeerKey)
        );
        assert!(matches!(
            scalar(1).shared_secret_with_hex("deadbeef"),
            Err(KeyError::InvalidKeyEncoding(_))
        ));
    }

    #[test]
    fn test_invalid_secret_keys() {
        assert!(SecretEcdhKey::from_hex("00").is_err());
        assert!(SecretEcdhKey::from_hex("zz").is_err());
        assert!(SecretEcdhKey::from_hex(&"f".repeat(64)).is_err());
        assert!(SecretEcdhKey::from_hex(&"1".repeat(65)).is_err());
    }

    #[test]
    fn test_hex_prefix_is_stripped_once() {
        assert_eq!(SecretEcdhKey::from_hex("0x01").unwrap(), scalar(1));
        assert!(SecretEcdhKey::from_hex("0x0x01").is_err());
        assert!(PublicEcdhKey::from_hex(&format!("0x{}", G)).is_ok());
        assert!(matches!(
            PublicEcdhKey::from_hex(&format!("0x0x{}", G)),
            Err(KeyError::InvalidKeyEncoding(_))
        ));
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let keys = EcdhKeyPair::from(scalar(1));
        assert!(!format!("{:?}", keys.secret).contains("0001"));
        let shared = keys.secret.shared_secret(&keys.public);
        assert_eq!(format!("{:?}", shared), "SharedSecret(\"<redacted>\")");
    }
}
