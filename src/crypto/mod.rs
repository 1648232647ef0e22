//! Wrappers around the [k256] and [aes] primitives used by the protocol.
//!
//! The wrappers provide methods defined on structs instead of free functions. This is done for the
//! `secp256k1` key agreement key pair and its derived shared secret, and for the `AES-ECB` cipher
//! that protects session keys and model artifacts.
//!
//! # Examples
//! ## Key agreement
//! ```
//! # use fedledger_client::crypto::EcdhKeyPair;
//! let alice = EcdhKeyPair::generate();
//! let bob = EcdhKeyPair::generate();
//! assert_eq!(
//!     alice.secret.shared_secret(&bob.public),
//!     bob.secret.shared_secret(&alice.public),
//! );
//! ```
//!
//! ## Encryption of payloads
//! ```
//! # use fedledger_client::crypto::{decrypt, encrypt};
//! let key = [7_u8; 32];
//! let cipher = encrypt(b"Hello world!", &key).unwrap();
//! assert_eq!(b"Hello world!".to_vec(), decrypt(&cipher, &key).unwrap());
//! ```
//!
//! [k256]: https://docs.rs/k256/
//! [aes]: https://docs.rs/aes/

pub(crate) mod cipher;
pub(crate) mod ecdh;

pub use self::{
    cipher::{decrypt, encrypt, CipherError, BLOCK_SIZE},
    ecdh::{EcdhKeyPair, KeyError, PublicEcdhKey, SecretEcdhKey, SharedSecret},
};

/// Key material for one round's artifacts.
///
/// It is delivered through the ledger, encrypted under the [`SharedSecret`], and replaced every
/// time the participant joins a new round.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey(Vec<u8>);

impl SessionKey {
    /// Recovers a session key from the `encryptedKey` field of a key delivery event.
    ///
    /// The aggregator encrypts the hex encoding of the key, so the plaintext is hex decoded
    /// after decryption.
    ///
    /// # Errors
    /// Fails if the ciphertext cannot be decrypted, if the plaintext is not valid hex, or if the
    /// key is not an AES key of 16, 24 or 32 bytes.
    pub fn recover(encrypted_key: &str, shared: &SharedSecret) -> Result<Self, SessionKeyError> {
        let plaintext = decrypt(encrypted_key, shared.as_slice())?;
        let text = std::str::from_utf8(&plaintext).map_err(|_| SessionKeyError::Encoding)?;
        let raw = hex::decode(text.trim()).map_err(|_| SessionKeyError::Encoding)?;
        match raw.len() {
            16 | 24 | 32 => Ok(Self(raw)),
            len => Err(SessionKeyError::InvalidLength(len)),
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl From<Vec<u8>> for SessionKey {
    fn from(raw: Vec<u8>) -> Self {
        Self(raw)
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionKey").field(&"<redacted>").finish()
    }
}

#[derive(thiserror::Error, Debug)]
/// An error related to the recovery of a session key.
pub enum SessionKeyError {
    #[error("failed to decrypt the session key: {0}")]
    Cipher(#[from] CipherError),
    #[error("the decrypted session key is not a hex string")]
    Encoding,
    #[error("invalid session key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidLength(usize),
}
