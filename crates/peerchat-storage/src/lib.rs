//! Encrypted-at-rest SQLite persistence for the peerchat daemon.
//!
//! Message bodies are stored as ciphertext under the data key (the
//! caller encrypts before handing bytes to a repository); metadata
//! stays in cleartext so it can be queried. The schema is applied as
//! an idempotent DDL batch on every open.
//!
//! - [`db`] — connection lifecycle, pragmas, schema
//! - [`message_repository`] — direct and group messages
//! - [`relationship_repository`] — friendship rows
//! - [`key_repository`] — per-group symmetric keys
//! - [`group_member_repository`] — group membership
//! - [`display_name_repository`] — custom display names

pub mod db;
pub mod display_name_repository;
pub mod group_member_repository;
pub mod key_repository;
pub mod message_repository;
pub mod relationship_repository;

pub use db::Database;
pub use display_name_repository::DisplayNameRepository;
pub use group_member_repository::GroupMemberRepository;
pub use key_repository::KeyRepository;
pub use message_repository::MessageRepository;
pub use relationship_repository::RelationshipRepository;
