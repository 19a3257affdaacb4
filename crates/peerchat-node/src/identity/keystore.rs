//! Encrypted node key store.
//!
//! # File layout (`private-key.key`)
//!
//! ```text
//! Offset  Size  Field
//! ------  ----  -----
//!   0      16   Argon2id salt
//!  16      12   AES-GCM nonce
//!  28     var   ciphertext ‖ tag; plaintext is the protobuf-encoded
//!               Ed25519 keypair
//! ```
//!
//! The data key is derived separately from the password and the
//! `dbfield.salt` file in the same directory; it never touches disk.

use std::path::PathBuf;
use std::sync::RwLock;

use libp2p_identity::{Keypair, PeerId};
use zeroize::Zeroizing;

use peerchat_crypto::{aead, kdf, salts, DEFAULT_CRYPTO_PARAMS};
use peerchat_types::{PeerchatError, Result};

struct Unlocked {
    keypair: Keypair,
    data_key: Zeroizing<Vec<u8>>,
}

/// Owns the node identity and the derived data key.
///
/// Loaded once at unlock (or generation) and never mutated after.
pub struct KeyStore {
    key_path: PathBuf,
    data_dir: PathBuf,
    unlocked: RwLock<Option<Unlocked>>,
}

impl KeyStore {
    /// `key_path` is the encrypted key file; `data_dir` holds the
    /// sibling salt file.
    pub fn new(key_path: PathBuf, data_dir: PathBuf) -> Self {
        Self {
            key_path,
            data_dir,
            unlocked: RwLock::new(None),
        }
    }

    /// Whether the encrypted key file exists on disk.
    pub fn key_exists(&self) -> bool {
        self.key_path.is_file()
    }

    /// Generates a fresh Ed25519 identity, writes the encrypted key
    /// file, and derives the data key. The store is unlocked
    /// afterwards.
    ///
    /// # Errors
    ///
    /// [`PeerchatError::KeyGenerationFailed`] if the file already
    /// exists or cannot be written.
    pub fn generate_and_save(&self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(PeerchatError::InvalidInput {
                reason: "password cannot be empty".into(),
            });
        }
        if self.key_exists() {
            return Err(PeerchatError::KeyGenerationFailed {
                reason: format!("key file already exists at {}", self.key_path.display()),
            });
        }

        tracing::info!(path = %self.key_path.display(), "generating new node key");
        let keypair = Keypair::generate_ed25519();

        let key_bytes = Zeroizing::new(keypair.to_protobuf_encoding().map_err(|e| {
            PeerchatError::KeyGenerationFailed {
                reason: format!("failed to encode keypair: {e}"),
            }
        })?);

        let salt = salts::random_salt(&DEFAULT_CRYPTO_PARAMS);

        let kek = kdf::derive_key_from_password(
            password.as_bytes(),
            &salt,
            &DEFAULT_CRYPTO_PARAMS,
        )?;
        let sealed = aead::encrypt_with_key(kek.as_bytes(), &key_bytes, &DEFAULT_CRYPTO_PARAMS)?;

        let mut file_bytes = salt;
        file_bytes.extend_from_slice(&sealed);

        if let Some(parent) = self.key_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PeerchatError::KeyGenerationFailed {
                reason: format!("failed to create key directory: {e}"),
            })?;
        }
        if let Err(e) = std::fs::write(&self.key_path, &file_bytes) {
            let _ = std::fs::remove_file(&self.key_path);
            return Err(PeerchatError::KeyGenerationFailed {
                reason: format!("failed to write key file: {e}"),
            });
        }

        let data_key = self.derive_data_key(password)?;
        self.install(keypair, data_key);
        Ok(())
    }

    /// Loads and decrypts the key file, then derives the data key.
    /// The store is unlocked afterwards.
    ///
    /// # Errors
    ///
    /// [`PeerchatError::KeyLoadingFailed`] on any decryption problem.
    /// A wrong password and a corrupted file are indistinguishable.
    pub fn load_and_decrypt(&self, password: &str) -> Result<()> {
        if password.is_empty() {
            return Err(PeerchatError::InvalidInput {
                reason: "password cannot be empty".into(),
            });
        }

        let file_bytes = std::fs::read(&self.key_path).map_err(|e| {
            tracing::warn!(path = %self.key_path.display(), %e, "cannot read key file");
            PeerchatError::KeyLoadingFailed
        })?;

        let params = DEFAULT_CRYPTO_PARAMS;
        if file_bytes.len() <= params.salt_len + params.nonce_len {
            tracing::warn!("key file truncated");
            return Err(PeerchatError::KeyLoadingFailed);
        }

        let (salt, sealed) = file_bytes.split_at(params.salt_len);
        let kek = kdf::derive_key_from_password(password.as_bytes(), salt, &params)
            .map_err(|_| PeerchatError::KeyLoadingFailed)?;

        let key_bytes = Zeroizing::new(
            aead::decrypt_with_key(kek.as_bytes(), sealed, &params)
                .map_err(|_| PeerchatError::KeyLoadingFailed)?,
        );

        let keypair = Keypair::from_protobuf_encoding(&key_bytes)
            .map_err(|_| PeerchatError::KeyLoadingFailed)?;

        let data_key = self.derive_data_key(password)?;

        tracing::info!(path = %self.key_path.display(), "node key unlocked");
        self.install(keypair, data_key);
        Ok(())
    }

    /// The unlocked signing keypair.
    ///
    /// # Errors
    ///
    /// [`PeerchatError::NotReady`] before unlock.
    pub fn keypair(&self) -> Result<Keypair> {
        self.read(|unlocked| unlocked.keypair.clone())
    }

    /// The node's peer ID.
    pub fn peer_id(&self) -> Result<PeerId> {
        self.read(|unlocked| PeerId::from(unlocked.keypair.public()))
    }

    /// The derived at-rest data key.
    pub fn data_key(&self) -> Result<Zeroizing<Vec<u8>>> {
        self.read(|unlocked| unlocked.data_key.clone())
    }

    fn derive_data_key(&self, password: &str) -> Result<Zeroizing<Vec<u8>>> {
        let salt = salts::database_field_salt(&self.data_dir, &DEFAULT_CRYPTO_PARAMS)?;
        let key = kdf::derive_key_from_password(
            password.as_bytes(),
            &salt,
            &DEFAULT_CRYPTO_PARAMS,
        )?;
        Ok(Zeroizing::new(key.as_bytes().to_vec()))
    }

    fn install(&self, keypair: Keypair, data_key: Zeroizing<Vec<u8>>) {
        let mut guard = match self.unlocked.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(Unlocked { keypair, data_key });
    }

    fn read<T>(&self, f: impl FnOnce(&Unlocked) -> T) -> Result<T> {
        let guard = match self.unlocked.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.as_ref().map(f).ok_or(PeerchatError::NotReady {
            reason: "node key is locked".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &std::path::Path) -> KeyStore {
        KeyStore::new(dir.join("private-key.key"), dir.to_path_buf())
    }

    #[test]
    fn generate_then_unlock_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(!store.key_exists());

        store.generate_and_save("hunter2").unwrap();
        assert!(store.key_exists());
        let peer_id = store.peer_id().unwrap();

        // A fresh store over the same files unlocks to the same
        // identity and the same data key.
        let reopened = store_in(dir.path());
        reopened.load_and_decrypt("hunter2").unwrap();
        assert_eq!(reopened.peer_id().unwrap(), peer_id);
        assert_eq!(*reopened.data_key().unwrap(), *store.data_key().unwrap());
    }

    #[test]
    fn wrong_password_is_a_single_error_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.generate_and_save("hunter2").unwrap();

        let reopened = store_in(dir.path());
        let err = reopened.load_and_decrypt("wrong").unwrap_err();
        assert!(matches!(err, PeerchatError::KeyLoadingFailed));
        // Still locked.
        assert!(matches!(
            reopened.peer_id().unwrap_err(),
            PeerchatError::NotReady { .. }
        ));
    }

    #[test]
    fn corrupted_file_is_the_same_error_kind() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.generate_and_save("hunter2").unwrap();

        // Flip one ciphertext byte.
        let path = dir.path().join("private-key.key");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        std::fs::write(&path, &bytes).unwrap();

        let reopened = store_in(dir.path());
        let err = reopened.load_and_decrypt("hunter2").unwrap_err();
        assert!(matches!(err, PeerchatError::KeyLoadingFailed));
    }

    #[test]
    fn second_generate_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.generate_and_save("hunter2").unwrap();

        let err = store.generate_and_save("other").unwrap_err();
        assert!(matches!(err, PeerchatError::KeyGenerationFailed { .. }));
    }

    #[test]
    fn file_layout_is_salt_nonce_ciphertext() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        store.generate_and_save("hunter2").unwrap();

        let bytes = std::fs::read(dir.path().join("private-key.key")).unwrap();
        // 16B salt + 12B nonce + ciphertext(protobuf keypair) + 16B tag.
        assert!(bytes.len() > 16 + 12 + 16);
    }

    #[test]
    fn empty_password_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path());
        assert!(matches!(
            store.generate_and_save("").unwrap_err(),
            PeerchatError::InvalidInput { .. }
        ));
    }
}
