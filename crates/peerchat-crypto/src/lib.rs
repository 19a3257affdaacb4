//! Cryptographic primitives for the peerchat daemon.
//!
//! - [`kdf`] — Argon2id password key derivation
//! - [`aead`] — AES-256-GCM with a prepended 12-byte nonce
//! - [`salts`] — on-disk salt file bootstrap
//!
//! The parameter values in [`CryptoParams`] are part of the on-disk
//! format (key file and encrypted database fields) and must match
//! exactly on read.

pub mod aead;
pub mod kdf;
pub mod salts;

pub use kdf::{derive_key_from_password, DerivedKey};

// ---------------------------------------------------------------------------
// CryptoParams
// ---------------------------------------------------------------------------

/// Parameters for key derivation and authenticated encryption.
#[derive(Clone, Copy, Debug)]
pub struct CryptoParams {
    /// Argon2id passes.
    pub argon_time: u32,
    /// Argon2id memory in KiB.
    pub argon_memory: u32,
    /// Argon2id parallelism.
    pub argon_threads: u32,
    /// Derived key length in bytes (32 for AES-256).
    pub argon_key_len: usize,
    /// Salt length in bytes.
    pub salt_len: usize,
    /// AES-GCM nonce length in bytes.
    pub nonce_len: usize,
}

/// The fixed parameter set. These values are baked into every key
/// file and encrypted row ever written, so they are constants rather
/// than configuration.
pub const DEFAULT_CRYPTO_PARAMS: CryptoParams = CryptoParams {
    argon_time: 1,
    argon_memory: 64 * 1024, // 64 MiB
    argon_threads: 4,
    argon_key_len: 32,
    salt_len: 16,
    nonce_len: 12,
};
