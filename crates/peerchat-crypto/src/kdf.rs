//! Argon2id key derivation.
//!
//! Derives a 256-bit key from a user password and a random salt. The
//! same derivation (with different salts) produces the key-encryption
//! key for the node key file and the at-rest data key.

use argon2::{Algorithm, Argon2, Params, Version};
use peerchat_types::{PeerchatError, Result};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::CryptoParams;

// ---------------------------------------------------------------------------
// DerivedKey
// ---------------------------------------------------------------------------

/// 256-bit key derived by Argon2id.
///
/// Zeroized on drop so key material does not linger in freed memory.
/// Deliberately neither `Clone` nor `Debug`.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; 32]);

impl DerivedKey {
    /// Fixed byte length of the derived key.
    pub const LEN: usize = 32;

    /// Wraps raw key bytes. Used when the key arrives from outside
    /// the KDF (e.g. a received group key).
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key material.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Derives a 256-bit key from `password` and `salt` using Argon2id.
///
/// # Errors
///
/// - [`PeerchatError::InvalidInput`] if the password is empty or the
///   salt has the wrong length.
/// - [`PeerchatError::AuthenticationFailure`] if the Argon2
///   computation itself fails (parameter rejection).
pub fn derive_key_from_password(
    password: &[u8],
    salt: &[u8],
    params: &CryptoParams,
) -> Result<DerivedKey> {
    if password.is_empty() {
        return Err(PeerchatError::InvalidInput {
            reason: "password cannot be empty".into(),
        });
    }
    if salt.len() != params.salt_len {
        return Err(PeerchatError::InvalidInput {
            reason: format!("salt must be {} bytes, got {}", params.salt_len, salt.len()),
        });
    }

    let argon_params = Params::new(
        params.argon_memory,
        params.argon_time,
        params.argon_threads,
        Some(params.argon_key_len),
    )
    .map_err(|e| PeerchatError::AuthenticationFailure {
        reason: format!("invalid Argon2 parameters: {e}"),
    })?;

    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut out = [0u8; 32];
    argon
        .hash_password_into(password, salt, &mut out)
        .map_err(|e| PeerchatError::AuthenticationFailure {
            reason: format!("Argon2id derivation failed: {e}"),
        })?;

    Ok(DerivedKey(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_CRYPTO_PARAMS;

    #[test]
    fn derivation_is_deterministic() {
        let salt = [7u8; 16];
        let a = derive_key_from_password(b"hunter2", &salt, &DEFAULT_CRYPTO_PARAMS).unwrap();
        let b = derive_key_from_password(b"hunter2", &salt, &DEFAULT_CRYPTO_PARAMS).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_salts_give_different_keys() {
        let a = derive_key_from_password(b"hunter2", &[1u8; 16], &DEFAULT_CRYPTO_PARAMS).unwrap();
        let b = derive_key_from_password(b"hunter2", &[2u8; 16], &DEFAULT_CRYPTO_PARAMS).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn different_passwords_give_different_keys() {
        let salt = [3u8; 16];
        let a = derive_key_from_password(b"hunter2", &salt, &DEFAULT_CRYPTO_PARAMS).unwrap();
        let b = derive_key_from_password(b"hunter3", &salt, &DEFAULT_CRYPTO_PARAMS).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn empty_password_is_rejected() {
        let result = derive_key_from_password(b"", &[0u8; 16], &DEFAULT_CRYPTO_PARAMS);
        assert!(matches!(result, Err(PeerchatError::InvalidInput { .. })));
    }

    #[test]
    fn wrong_salt_length_is_rejected() {
        let result = derive_key_from_password(b"pw", &[0u8; 8], &DEFAULT_CRYPTO_PARAMS);
        assert!(matches!(result, Err(PeerchatError::InvalidInput { .. })));
    }
}
