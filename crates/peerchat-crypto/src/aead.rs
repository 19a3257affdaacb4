//! AES-256-GCM authenticated encryption.
//!
//! Wire and storage format: `nonce (12B) ‖ ciphertext ‖ tag (16B)`.
//! The nonce is freshly generated from OS entropy on every call and
//! must never be reused with the same key.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use peerchat_types::{PeerchatError, Result};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::CryptoParams;

/// Encrypts `plaintext` under `key`, returning `nonce ‖ ciphertext`.
///
/// # Errors
///
/// - [`PeerchatError::InvalidInput`] on a wrong-length key.
/// - [`PeerchatError::AuthenticationFailure`] if the cipher fails.
pub fn encrypt_with_key(
    key: &[u8],
    plaintext: &[u8],
    params: &CryptoParams,
) -> Result<Vec<u8>> {
    if key.len() != params.argon_key_len {
        return Err(PeerchatError::InvalidInput {
            reason: format!(
                "encryption key must be {} bytes, got {}",
                params.argon_key_len,
                key.len()
            ),
        });
    }

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut nonce_bytes = vec![0u8; params.nonce_len];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| PeerchatError::AuthenticationFailure {
            reason: format!("AES-256-GCM encryption failed: {e}"),
        })?;

    let mut out = nonce_bytes;
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts `nonce ‖ ciphertext` produced by [`encrypt_with_key`].
///
/// # Errors
///
/// - [`PeerchatError::InvalidInput`] on a wrong-length key or an
///   input too short to contain the nonce.
/// - [`PeerchatError::AuthenticationFailure`] if the tag does not
///   verify. The reason does not distinguish a wrong key from a
///   tampered ciphertext.
pub fn decrypt_with_key(
    key: &[u8],
    ciphertext_with_nonce: &[u8],
    params: &CryptoParams,
) -> Result<Vec<u8>> {
    if key.len() != params.argon_key_len {
        return Err(PeerchatError::InvalidInput {
            reason: format!(
                "decryption key must be {} bytes, got {}",
                params.argon_key_len,
                key.len()
            ),
        });
    }
    if ciphertext_with_nonce.len() < params.nonce_len {
        return Err(PeerchatError::InvalidInput {
            reason: "ciphertext too short to contain nonce".into(),
        });
    }

    let (nonce_bytes, ciphertext) = ciphertext_with_nonce.split_at(params.nonce_len);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| PeerchatError::AuthenticationFailure {
            reason: "AES-256-GCM authentication failed".into(),
        })
}

/// Generates a fresh 32-byte symmetric key from OS entropy.
pub fn generate_symmetric_key() -> Vec<u8> {
    let mut key = vec![0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}
