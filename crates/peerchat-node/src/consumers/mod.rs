//! Event-bus consumers.
//!
//! Each consumer owns one long-running task draining its
//! subscription queue.

pub mod appstate;
pub mod chat;
pub mod profile;

pub use appstate::spawn_app_state_consumer;
pub use chat::spawn_chat_consumer;
pub use profile::spawn_profile_consumer;
