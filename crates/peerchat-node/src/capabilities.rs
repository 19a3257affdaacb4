//! Narrow capability traits between services.
//!
//! Each service accepts only the methods it actually calls instead
//! of a sibling service handle, which keeps the dependency graph
//! acyclic. The coordinator wires the concrete implementations.

use async_trait::async_trait;

use peerchat_types::Result;

/// Chat's view of the profile service: may this peer message us?
pub trait FriendshipGate: Send + Sync {
    /// True when the stored relationship with `peer_id` is Approved.
    fn is_friend(&self, peer_id: &str) -> bool;
}

/// Chat's view of the pub/sub service.
#[async_trait]
pub trait GroupTopics: Send + Sync {
    /// Joins the group's topic and starts consuming it.
    async fn join_topic(&self, group_id: &str) -> Result<()>;

    /// Publishes an already-encrypted payload to the group's topic,
    /// waiting for topic readiness first.
    async fn publish(&self, group_id: &str, data: Vec<u8>) -> Result<()>;
}

/// The API's view of the presence service.
pub trait OnlineStatus: Send + Sync {
    /// Last probed liveness of a peer; unknown peers are offline.
    fn is_online(&self, peer_id: &str) -> bool;
}
