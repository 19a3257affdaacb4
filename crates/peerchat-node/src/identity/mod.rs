//! Node identity and group key management.

pub mod group_keys;
pub mod keystore;

pub use group_keys::GroupKeyStore;
pub use keystore::KeyStore;
