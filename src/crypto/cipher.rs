//! Symmetric encryption of session keys and model artifacts.
//!
//! See the [crypto module] documentation since this is a private module anyways.
//!
//! # Wire format
//!
//! Payloads are padded with PKCS#7 to the AES block size, encrypted with AES in electronic
//! codebook mode and base64 encoded. The AES variant is selected by the key length: 16, 24 or 32
//! bytes for AES-128, AES-192 or AES-256.
//!
//! **Known weakness**: ECB uses no initialization vector, so identical plaintext blocks encrypted
//! under the same key produce identical ciphertext blocks. This leaks patterns of the plaintext
//! to anyone reading the public store. Peers running the protocol expect exactly this scheme, so
//! switching to a randomized mode would break wire compatibility with them.
//!
//! [crypto module]: crate::crypto

use aes::{Aes128, Aes192, Aes256};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ecb::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyInit};

/// The AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
/// An error related to the symmetric encryption layer.
pub enum CipherError {
    #[error("ciphertext is not valid base64")]
    Decode,
    #[error("invalid padding")]
    Padding,
    #[error("invalid key length: {0} bytes (expected 16, 24 or 32)")]
    InvalidKeyLength(usize),
}

/// Pads, encrypts and base64 encodes `plaintext` under `key`.
///
/// See the [module documentation](self) for the weaknesses of this scheme.
///
/// # Errors
/// Fails if the key is not 16, 24 or 32 bytes long.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<String, CipherError> {
    let ciphertext = match key.len() {
        16 => seal::<ecb::Encryptor<Aes128>>(plaintext, key),
        24 => seal::<ecb::Encryptor<Aes192>>(plaintext, key),
        32 => seal::<ecb::Encryptor<Aes256>>(plaintext, key),
        len => Err(CipherError::InvalidKeyLength(len)),
    }?;
    Ok(STANDARD.encode(ciphertext))
}

/// Base64 decodes, decrypts and unpads `ciphertext` under `key`.
///
/// # Errors
/// Fails if the ciphertext is not base64, if it is not a non-empty sequence of blocks, if the
/// padding is invalid, or if the key is not 16, 24 or 32 bytes long.
pub fn decrypt(ciphertext: &str, key: &[u8]) -> Result<Vec<u8>, CipherError> {
    let raw = STANDARD
        .decode(ciphertext.trim())
        .map_err(|_| CipherError::Decode)?;
    if raw.is_empty() || raw.len() % BLOCK_SIZE != 0 {
        return Err(CipherError::Padding);
    }
    match key.len() {
        16 => open::<ecb::Decryptor<Aes128>>(&raw, key),
        24 => open::<ecb::Decryptor<Aes192>>(&raw, key),
        32 => open::<ecb::Decryptor<Aes256>>(&raw, key),
        len => Err(CipherError::InvalidKeyLength(len)),
    }
}

fn seal<M>(plaintext: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError>
where
    M: KeyInit + BlockEncryptMut,
{
    let mode = M::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength(key.len()))?;
    Ok(mode.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
}

fn open<M>(ciphertext: &[u8], key: &[u8]) -> Result<Vec<u8>, CipherError>
where
    M: KeyInit + BlockDecryptMut,
{
    let mode = M::new_from_slice(key).map_err(|_| CipherError::InvalidKeyLength(key.len()))?;
    mode.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CipherError::Padding)
}
