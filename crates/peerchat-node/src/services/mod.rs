//! The daemon's protocol-facing services.

pub mod chat;
pub mod presence;
pub mod profile;
pub mod pubsub;

pub use chat::ChatService;
pub use presence::PresenceService;
pub use profile::ProfileService;
pub use pubsub::PubSubService;
