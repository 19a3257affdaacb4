//! Per-group symmetric keys.
//!
//! The creator generates a fresh 32-byte key per group and ships it
//! to each member inside the invitation stream. All group traffic on
//! the topic is AES-256-GCM under this key with a fresh prepended
//! nonce.

use chrono::Utc;

use peerchat_crypto::{aead, DEFAULT_CRYPTO_PARAMS};
use peerchat_storage::KeyRepository;
use peerchat_types::{GroupKey, Result};

/// Manages group keys via the key repository.
#[derive(Clone)]
pub struct GroupKeyStore {
    key_repo: KeyRepository,
}

impl GroupKeyStore {
    pub fn new(key_repo: KeyRepository) -> Self {
        Self { key_repo }
    }

    /// Generates and persists a fresh key for a new group.
    pub fn generate_new_key(&self, group_id: &str, name: &str) -> Result<Vec<u8>> {
        let key = aead::generate_symmetric_key();
        self.key_repo.store(&GroupKey {
            group_id: group_id.to_string(),
            key: key.clone(),
            name: name.to_string(),
            created_at: Utc::now(),
        })?;
        Ok(key)
    }

    /// Persists a key received in an invitation. Idempotent.
    pub fn store_received_key(&self, group_id: &str, name: &str, key: Vec<u8>) -> Result<()> {
        self.key_repo.store(&GroupKey {
            group_id: group_id.to_string(),
            key,
            name: name.to_string(),
            created_at: Utc::now(),
        })
    }

    /// The stored key bytes for a group.
    pub fn get_key(&self, group_id: &str) -> Result<Vec<u8>> {
        Ok(self.key_repo.get(group_id)?.key)
    }

    /// The stored display name of a group, if any.
    pub fn group_name(&self, group_id: &str) -> Result<Option<String>> {
        self.key_repo.group_name(group_id)
    }

    /// Encrypts a plaintext under the group key (nonce prepended).
    pub fn encrypt_for_group(&self, group_id: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let key = self.get_key(group_id)?;
        aead::encrypt_with_key(&key, plaintext, &DEFAULT_CRYPTO_PARAMS)
    }

    /// Decrypts a group ciphertext (nonce prepended).
    pub fn decrypt_for_group(&self, group_id: &str, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let key = self.get_key(group_id)?;
        aead::decrypt_with_key(&key, ciphertext, &DEFAULT_CRYPTO_PARAMS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerchat_storage::Database;

    fn store() -> GroupKeyStore {
        GroupKeyStore::new(KeyRepository::new(Database::open_in_memory().unwrap()))
    }

    #[test]
    fn generated_key_encrypts_and_decrypts() {
        let store = store();
        let key = store.generate_new_key("g1", "team").unwrap();
        assert_eq!(key.len(), 32);

        let ct = store.encrypt_for_group("g1", b"ping").unwrap();
        assert_eq!(store.decrypt_for_group("g1", &ct).unwrap(), b"ping");
    }

    #[test]
    fn received_key_matches_creator_key() {
        let creator = store();
        let member = store();

        let key = creator.generate_new_key("g1", "team").unwrap();
        member.store_received_key("g1", "team", key).unwrap();

        let ct = creator.encrypt_for_group("g1", b"hello group").unwrap();
        assert_eq!(member.decrypt_for_group("g1", &ct).unwrap(), b"hello group");
    }

    #[test]
    fn unknown_group_fails_encryption() {
        assert!(store().encrypt_for_group("nope", b"x").unwrap_err().is_not_found());
    }

    #[test]
    fn wrong_group_key_fails_decryption() {
        let store = store();
        store.generate_new_key("g1", "one").unwrap();
        store.generate_new_key("g2", "two").unwrap();

        let ct = store.encrypt_for_group("g1", b"secret").unwrap();
        assert!(store.decrypt_for_group("g2", &ct).is_err());
    }
}
