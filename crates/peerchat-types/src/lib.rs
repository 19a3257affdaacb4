//! Core shared types for the peerchat daemon.
//!
//! This crate defines all fundamental types used across the workspace.
//! No other crate should define shared types — everything lives here.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, PeerchatError>;

// ---------------------------------------------------------------------------
// DaemonState
// ---------------------------------------------------------------------------

/// Lifecycle states of the daemon.
///
/// The state is advanced only by the app-state event consumer; every
/// other component reads it to gate operations on "node is networked".
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DaemonState {
    /// Process started, key file presence not yet checked.
    Initializing,
    /// No key file on disk; waiting for `create-key` via the API.
    WaitingForKey,
    /// Key file exists; waiting for `unlock-key` via the API.
    WaitingForPassword,
    /// Key available; overlay node and DHT are being brought up.
    InitializingP2p,
    /// Fully networked; all protocol handlers registered.
    Running,
    /// Shutdown sequence in progress.
    ShuttingDown,
    /// A fatal startup error occurred; see the recorded last error.
    Error,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "Initializing",
            Self::WaitingForKey => "WaitingForKey",
            Self::WaitingForPassword => "WaitingForPassword",
            Self::InitializingP2p => "InitializingP2P",
            Self::Running => "Running",
            Self::ShuttingDown => "ShuttingDown",
            Self::Error => "Error",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// FriendStatus
// ---------------------------------------------------------------------------

/// Local view of a friendship relation.
///
/// Transitions happen only through the wire protocols or the local
/// accept/reject action, never spontaneously.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum FriendStatus {
    /// No relation recorded.
    None,
    /// We sent a request and are waiting for the peer's decision.
    Sent,
    /// The peer sent a request and is waiting for our decision.
    Pending,
    /// Both sides agreed; direct messaging is permitted.
    Approved,
    /// The request was rejected.
    Rejected,
}

impl FriendStatus {
    /// Stable single-digit code used in the `relationships.status`
    /// column. Matches the historical on-disk encoding, so databases
    /// written by older daemons keep reading correctly.
    pub fn as_db_code(&self) -> &'static str {
        match self {
            Self::None => "0",
            Self::Sent => "1",
            Self::Pending => "2",
            Self::Approved => "3",
            Self::Rejected => "4",
        }
    }

    /// Parses a `relationships.status` column value. Unknown codes
    /// map to `None` rather than erroring so a corrupt row cannot
    /// wedge a list query.
    pub fn from_db_code(code: &str) -> Self {
        match code {
            "1" => Self::Sent,
            "2" => Self::Pending,
            "3" => Self::Approved,
            "4" => Self::Rejected,
            _ => Self::None,
        }
    }
}

impl fmt::Display for FriendStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "None",
            Self::Sent => "Sent",
            Self::Pending => "Pending",
            Self::Approved => "Approved",
            Self::Rejected => "Rejected",
        };
        f.write_str(s)
    }
}

impl FromStr for FriendStatus {
    type Err = PeerchatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "None" => Ok(Self::None),
            "Sent" => Ok(Self::Sent),
            "Pending" => Ok(Self::Pending),
            "Approved" => Ok(Self::Approved),
            "Rejected" => Ok(Self::Rejected),
            other => Err(PeerchatError::InvalidInput {
                reason: format!("unknown friend status '{other}'"),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Relationship
// ---------------------------------------------------------------------------

/// A friendship relation row, keyed by the remote peer ID.
///
/// Invariants: at most one row per peer; `Approved` implies
/// `approved_at` is set; `Sent`/`Pending` imply `requested_at` is set.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Relationship {
    pub peer_id: String,
    pub status: FriendStatus,
    pub requested_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
}

/// A friend entry as returned by the friends-list API: the stored
/// relation enriched with live presence and any custom display name.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FriendInfo {
    pub peer_id: String,
    pub status: FriendStatus,
    pub requested_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub is_online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Direct messages
// ---------------------------------------------------------------------------

/// An in-flight direct chat message, plaintext, as carried on the
/// event bus. `recipient_peer_id` is the conversation partner from
/// the local node's point of view.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender_peer_id: String,
    pub recipient_peer_id: String,
    pub content: String,
    pub send_time: DateTime<Utc>,
    pub is_outgoing: bool,
}

/// A direct message row as persisted: the body is ciphertext under
/// the data key, the metadata stays queryable.
#[derive(Clone, Debug)]
pub struct StoredMessage {
    pub id: i64,
    pub sender_peer_id: String,
    pub recipient_peer_id: String,
    pub send_time: DateTime<Utc>,
    pub ciphertext: Vec<u8>,
    pub is_outgoing: bool,
}

// ---------------------------------------------------------------------------
// Group messages
// ---------------------------------------------------------------------------

/// A group chat message in plaintext form, as carried on the event
/// bus and returned by the messages API.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupChatMessage {
    pub group_id: String,
    pub sender_peer_id: String,
    pub message: String,
    pub time: DateTime<Utc>,
}

/// A group message row as persisted (body encrypted under the data
/// key, not the group key — the group key protected it on the wire).
#[derive(Clone, Debug)]
pub struct StoredGroupMessage {
    pub id: i64,
    pub group_id: String,
    pub sender_peer_id: String,
    pub encrypted_content: Vec<u8>,
    pub sent_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// A per-group symmetric key row.
#[derive(Clone, Debug)]
pub struct GroupKey {
    pub group_id: String,
    pub key: Vec<u8>,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A group with its member set, as returned by the group-list API.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupInfo {
    pub group_id: String,
    pub members: Vec<String>,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Display names
// ---------------------------------------------------------------------------

/// Entity kinds a display name can be attached to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Friend,
    Group,
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Friend => f.write_str("friend"),
            Self::Group => f.write_str("group"),
        }
    }
}

impl FromStr for EntityType {
    type Err = PeerchatError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "friend" => Ok(Self::Friend),
            "group" => Ok(Self::Group),
            other => Err(PeerchatError::InvalidInput {
                reason: format!("entity_type must be 'friend' or 'group', got '{other}'"),
            }),
        }
    }
}

/// A custom display name row, unique per `(entity_id, entity_type)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DisplayName {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Outcome of a single presence probe, carried on the status-change
/// event. `rtt` is `None` when the friend is offline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OnlineStatusChange {
    pub peer_id: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt: Option<Duration>,
}

// ---------------------------------------------------------------------------
// PeerchatError
// ---------------------------------------------------------------------------

/// Workspace-wide error type.
///
/// Variants are the error *kinds* the core distinguishes; callers
/// match on the variant (never on the reason text) to pick recovery
/// behaviour or an HTTP status.
#[derive(Debug, Error)]
pub enum PeerchatError {
    /// Operation not valid in the current lifecycle state.
    #[error("state conflict: {reason}")]
    StateConflict {
        /// Which state blocked the operation, and which was required.
        reason: String,
    },

    /// Malformed peer ID, empty password, missing field.
    #[error("invalid input: {reason}")]
    InvalidInput {
        /// Human-readable description of the rejected input.
        reason: String,
    },

    /// KDF/AEAD authentication failed, or a signature did not verify.
    #[error("authentication failure: {reason}")]
    AuthenticationFailure {
        /// Description safe to log locally. Never sent to a peer.
        reason: String,
    },

    /// Generating or writing the node key file failed, or the file
    /// already exists.
    #[error("key generation failed: {reason}")]
    KeyGenerationFailed { reason: String },

    /// The key file could not be loaded and decrypted. Deliberately a
    /// single kind: a wrong password and a corrupted file are
    /// indistinguishable to the caller.
    #[error("key loading failed")]
    KeyLoadingFailed,

    /// No known addresses, connect timeout, or stream-open failure.
    #[error("peer unreachable: {reason}")]
    PeerUnreachable { reason: String },

    /// Mid-stream read/write failure; the stream is reset.
    #[error("transport failure: {reason}")]
    TransportFailure { reason: String },

    /// A database operation failed. Not retried automatically.
    #[error("persistence failure: {reason}")]
    PersistenceFailure { reason: String },

    /// A repository lookup matched no row.
    #[error("not found: {reason}")]
    NotFound { reason: String },

    /// The node is not yet in the `Running` state.
    #[error("node not ready: {reason}")]
    NotReady { reason: String },
}

impl PeerchatError {
    /// True if this error is the distinguished "no such row" kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
