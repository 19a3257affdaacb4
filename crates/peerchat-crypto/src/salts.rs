//! On-disk salt files.
//!
//! The data key is derived from the user password and a salt stored
//! in a sibling file of the key file (`dbfield.salt`). The salt is
//! generated once and then read verbatim on every unlock.

use std::path::{Path, PathBuf};

use peerchat_types::{PeerchatError, Result};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::CryptoParams;

/// File name of the salt used for database-field encryption.
pub const DATABASE_FIELD_SALT_FILE: &str = "dbfield.salt";

/// Generates a fresh random salt of the configured length.
pub fn random_salt(params: &CryptoParams) -> Vec<u8> {
    let mut salt = vec![0u8; params.salt_len];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Loads the salt from `dir/<name>`, generating and persisting a
/// fresh one on first use.
///
/// # Errors
///
/// - [`PeerchatError::PersistenceFailure`] on any filesystem error.
/// - [`PeerchatError::AuthenticationFailure`] if an existing file has
///   the wrong length (a truncated salt would silently derive a
///   different key).
pub fn ensure_salt_file(dir: &Path, name: &str, params: &CryptoParams) -> Result<Vec<u8>> {
    std::fs::create_dir_all(dir).map_err(|e| PeerchatError::PersistenceFailure {
        reason: format!("could not create app data directory {}: {e}", dir.display()),
    })?;

    let path: PathBuf = dir.join(name);

    if !path.exists() {
        tracing::info!(path = %path.display(), "salt file not found, generating");
        let mut salt = vec![0u8; params.salt_len];
        OsRng.fill_bytes(&mut salt);
        std::fs::write(&path, &salt).map_err(|e| PeerchatError::PersistenceFailure {
            reason: format!("failed to write salt file {}: {e}", path.display()),
        })?;
        return Ok(salt);
    }

    let salt = std::fs::read(&path).map_err(|e| PeerchatError::PersistenceFailure {
        reason: format!("failed to read salt file {}: {e}", path.display()),
    })?;

    if salt.len() != params.salt_len {
        return Err(PeerchatError::AuthenticationFailure {
            reason: format!(
                "salt file {} has wrong length: got {}, want {}",
                path.display(),
                salt.len(),
                params.salt_len
            ),
        });
    }

    Ok(salt)
}

/// Loads (or creates) the database-field salt under `dir`.
pub fn database_field_salt(dir: &Path, params: &CryptoParams) -> Result<Vec<u8>> {
    ensure_salt_file(dir, DATABASE_FIELD_SALT_FILE, params)
}
