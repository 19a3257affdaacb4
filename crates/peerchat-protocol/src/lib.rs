//! Wire protocol definitions for the peerchat daemon.
//!
//! - [`canonical`] — deterministic JSON used as the signing byte source
//! - [`wire`] — payloads of the five stream protocols
//! - [`timeutil`] — tolerant wire-timestamp parsing
//!
//! Protocol IDs are multiplexed over the overlay's authenticated,
//! encrypted connections. Direct chat uses a 4-byte big-endian length
//! prefix; every other protocol carries a single JSON document and
//! the sender closes its write side to signal the end.

pub mod canonical;
pub mod timeutil;
pub mod wire;

// ---------------------------------------------------------------------------
// Protocol IDs
// ---------------------------------------------------------------------------

/// Direct plaintext chat message. Request-only.
pub const CHAT_PROTOCOL: &str = "/p2p-chat-daemon/chat/1.0.0";

/// Group-creation invitation. Request-only.
pub const GROUP_CHAT_PROTOCOL: &str = "/p2p-chat-daemon/group-chat/1.0.0";

/// Signed friendship request. Request-only.
pub const FRIEND_REQUEST_PROTOCOL: &str = "/p2p-chat-daemon/friends-request/1.0.0";

/// Signed friendship response. Request-only.
pub const FRIEND_RESPONSE_PROTOCOL: &str = "/p2p-chat-daemon/friends-response/1.0.0";

/// Pull the responder's current relationship row. Request/response.
pub const FRIEND_RESPONSE_POLL_PROTOCOL: &str = "/p2p-chat-daemon/friends-response-poll/1.0.0";

/// Prefix of the per-group pub/sub topic; the group UUID is appended.
pub const GROUP_TOPIC_PREFIX: &str = "/p2p-chat-daemon/group-chat/1.0.0/";

/// Builds the pub/sub topic name for a group.
pub fn group_topic(group_id: &str) -> String {
    format!("{GROUP_TOPIC_PREFIX}{group_id}")
}

/// Extracts the group ID from a pub/sub topic name, if it is a group
/// topic.
pub fn group_id_from_topic(topic: &str) -> Option<&str> {
    topic.strip_prefix(GROUP_TOPIC_PREFIX)
}

/// Upper bound on a direct chat frame. Anything larger is treated as
/// a corrupt length prefix and the stream is reset.
pub const MAX_CHAT_FRAME_LEN: u32 = 64 * 1024;

/// Upper bound on a JSON protocol document.
pub const MAX_WIRE_DOCUMENT_LEN: usize = 256 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_topic_round_trip() {
        let topic = group_topic("deadbeef-0000-4000-8000-000000000000");
        assert_eq!(
            topic,
            "/p2p-chat-daemon/group-chat/1.0.0/deadbeef-0000-4000-8000-000000000000"
        );
        assert_eq!(
            group_id_from_topic(&topic),
            Some("deadbeef-0000-4000-8000-000000000000")
        );
    }

    #[test]
    fn non_group_topics_are_ignored() {
        assert_eq!(group_id_from_topic("/p2p-chat-daemon/chat/1.0.0"), None);
    }
}
