//! Encryption of secrets stored in the configuration file.
//!
//! XChaCha20-Poly1305 with a fixed application key. The stored form is the
//! hex encoding of the 24-byte nonce followed by the ciphertext and tag.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use thiserror::Error;
use tracing::info;

/// Application key shared by the encrypt helper and the service.
pub const CONFIG_KEY: &str = "32-characters-long-secure-key-12";

const NONCE_LEN: usize = 24;

#[derive(Debug, Error)]
pub enum CryptError {
    #[error("Invalid key size: expected 32 bytes, got {0}")]
    InvalidKeySize(usize),

    #[error("Value is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error("Encrypted value is too short")]
    TooShort,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed")]
    DecryptionFailed,

    #[error("Decrypted value is not UTF-8")]
    NotUtf8,
}

fn cipher(key: &str) -> Result<XChaCha20Poly1305, CryptError> {
    XChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| CryptError::InvalidKeySize(key.len()))
}

/// Encrypt `plaintext` with a fresh random nonce.
pub fn encrypt(plaintext: &str, key: &str) -> Result<String, CryptError> {
    let cipher = cipher(key)?;
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| CryptError::EncryptionFailed)?;

    let mut stored = nonce.to_vec();
    stored.extend_from_slice(&ciphertext);
    Ok(hex::encode(stored))
}

/// Decrypt a value produced by [`encrypt`].
pub fn decrypt(stored: &str, key: &str) -> Result<String, CryptError> {
    let cipher = cipher(key)?;
    let bytes = hex::decode(stored.trim())?;
    if bytes.len() < NONCE_LEN {
        return Err(CryptError::TooShort);
    }

    let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptError::DecryptionFailed)?;
    String::from_utf8(plaintext).map_err(|_| CryptError::NotUtf8)
}

/// Decrypt with the application key, or return the value unchanged.
///
/// Plain-text values are accepted so unencrypted configs keep working.
pub fn decrypt_or_plain(value: &str) -> String {
    match decrypt(value, CONFIG_KEY) {
        Ok(plain) => plain,
        Err(e) => {
            info!(error = %e, "Decryption doesn't work, using the value as is");
            value.to_string()
        }
    }
}
