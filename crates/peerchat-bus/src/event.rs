//! The closed set of daemon events.
//!
//! Events carry plain data only — never key material or overlay
//! handles. The unlocked identity lives in the key store; consumers
//! that need it read it there after `KeyGenerated` or
//! `UserAuthenticated` fires.

use chrono::{DateTime, Utc};
use peerchat_types::{ChatMessage, FriendStatus, GroupChatMessage, OnlineStatusChange};

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// Everything that can happen on the bus.
#[derive(Clone, Debug)]
pub enum Event {
    /// Generating or saving the node key failed.
    KeyGenerationFailed { error: String },
    /// Loading or decrypting the node key failed (bad password or
    /// corrupt file; deliberately not distinguished).
    KeyLoadingFailed { error: String },
    /// A fresh node key was generated and saved; the key store now
    /// holds the unlocked identity.
    KeyGenerated,
    /// The existing node key was unlocked; the key store now holds
    /// the identity and the data key.
    UserAuthenticated,
    /// The local control interface is accepting requests.
    ApiStarted,
    /// The overlay node is up.
    HostInitialized {
        peer_id: String,
        listen_addrs: Vec<String>,
    },
    /// The DHT has been created and bootstrapped.
    DhtCreated,
    /// The full startup sequence finished.
    SetupCompleted,

    /// A direct message was sent by this node.
    MessageSent { message: ChatMessage },
    /// A direct message was received from a friend.
    MessageReceived { message: ChatMessage },
    /// A group message was published by this node.
    GroupChatMessageSent { message: GroupChatMessage },
    /// A group message was received and authenticated.
    GroupChatMessageReceived { message: GroupChatMessage },

    /// A signed friendship request passed verification.
    FriendRequestReceived {
        sender_peer_id: String,
        timestamp: String,
    },
    /// We sent a friendship request.
    FriendRequestSent {
        receiver_peer_id: String,
        timestamp: DateTime<Utc>,
    },
    /// A friendship response (streamed or polled) was received.
    FriendResponseReceived {
        sender_peer_id: String,
        status: FriendStatus,
        timestamp: String,
    },
    /// We answered a pending friendship request locally.
    FriendResponseSent {
        peer_id: String,
        is_accepted: bool,
    },

    /// A friend's liveness probe outcome changed.
    FriendOnlineStatusChanged { change: OnlineStatusChange },

    /// A UI WebSocket connection was established.
    WsConnectionEstablished,
}

// ---------------------------------------------------------------------------
// EventKind
// ---------------------------------------------------------------------------

/// Payload-free discriminant of [`Event`], used for subscriptions.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EventKind {
    KeyGenerationFailed,
    KeyLoadingFailed,
    KeyGenerated,
    UserAuthenticated,
    ApiStarted,
    HostInitialized,
    DhtCreated,
    SetupCompleted,
    MessageSent,
    MessageReceived,
    GroupChatMessageSent,
    GroupChatMessageReceived,
    FriendRequestReceived,
    FriendRequestSent,
    FriendResponseReceived,
    FriendResponseSent,
    FriendOnlineStatusChanged,
    WsConnectionEstablished,
}

impl Event {
    /// The kind this event is dispatched under.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::KeyGenerationFailed { .. } => EventKind::KeyGenerationFailed,
            Self::KeyLoadingFailed { .. } => EventKind::KeyLoadingFailed,
            Self::KeyGenerated => EventKind::KeyGenerated,
            Self::UserAuthenticated => EventKind::UserAuthenticated,
            Self::ApiStarted => EventKind::ApiStarted,
            Self::HostInitialized { .. } => EventKind::HostInitialized,
            Self::DhtCreated => EventKind::DhtCreated,
            Self::SetupCompleted => EventKind::SetupCompleted,
            Self::MessageSent { .. } => EventKind::MessageSent,
            Self::MessageReceived { .. } => EventKind::MessageReceived,
            Self::GroupChatMessageSent { .. } => EventKind::GroupChatMessageSent,
            Self::GroupChatMessageReceived { .. } => EventKind::GroupChatMessageReceived,
            Self::FriendRequestReceived { .. } => EventKind::FriendRequestReceived,
            Self::FriendRequestSent { .. } => EventKind::FriendRequestSent,
            Self::FriendResponseReceived { .. } => EventKind::FriendResponseReceived,
            Self::FriendResponseSent { .. } => EventKind::FriendResponseSent,
            Self::FriendOnlineStatusChanged { .. } => EventKind::FriendOnlineStatusChanged,
            Self::WsConnectionEstablished => EventKind::WsConnectionEstablished,
        }
    }
}
