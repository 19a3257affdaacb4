//! Wire framing for the five stream protocols.
//!
//! One [`request_response::Codec`] serves all protocols; the codec
//! dispatches on the negotiated protocol ID:
//!
//! - `/chat/1.0.0` — `u32_BE(len) ‖ UTF-8 bytes`, response empty.
//! - `/group-chat/1.0.0`, `/friends-request/1.0.0`,
//!   `/friends-response/1.0.0` — a single JSON document, read to EOF,
//!   response empty.
//! - `/friends-response-poll/1.0.0` — the requester's peer ID as raw
//!   bytes; the response is the responder's relationship row as JSON.
//!
//! The empty responses act as delivery acknowledgements so outbound
//! failures surface through the behaviour.

use std::io;

use futures::prelude::*;
use libp2p::request_response;
use libp2p::StreamProtocol;

use peerchat_protocol::wire::{FriendRequest, FriendResponse, GroupInvite};
use peerchat_protocol::{
    CHAT_PROTOCOL, FRIEND_REQUEST_PROTOCOL, FRIEND_RESPONSE_POLL_PROTOCOL,
    FRIEND_RESPONSE_PROTOCOL, GROUP_CHAT_PROTOCOL, MAX_CHAT_FRAME_LEN, MAX_WIRE_DOCUMENT_LEN,
};
use peerchat_types::Relationship;

/// The five stream protocols, in registration order.
pub fn wire_protocols() -> Vec<StreamProtocol> {
    [
        CHAT_PROTOCOL,
        GROUP_CHAT_PROTOCOL,
        FRIEND_REQUEST_PROTOCOL,
        FRIEND_RESPONSE_PROTOCOL,
        FRIEND_RESPONSE_POLL_PROTOCOL,
    ]
    .into_iter()
    .map(StreamProtocol::new)
    .collect()
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// An outbound or inbound wire request, one variant per protocol.
#[derive(Clone, Debug)]
pub enum WireRequest {
    /// Direct chat message body.
    Chat(String),
    /// Group-creation invitation.
    GroupInvite(GroupInvite),
    /// Signed friendship request document.
    FriendRequest(FriendRequest),
    /// Signed friendship response document.
    FriendResponse(FriendResponse),
    /// Relationship poll; carries the requester's peer ID string.
    ResponsePoll { requester: String },
}

impl WireRequest {
    /// The protocol this request travels on.
    pub fn protocol(&self) -> &'static str {
        match self {
            Self::Chat(_) => CHAT_PROTOCOL,
            Self::GroupInvite(_) => GROUP_CHAT_PROTOCOL,
            Self::FriendRequest(_) => FRIEND_REQUEST_PROTOCOL,
            Self::FriendResponse(_) => FRIEND_RESPONSE_PROTOCOL,
            Self::ResponsePoll { .. } => FRIEND_RESPONSE_POLL_PROTOCOL,
        }
    }
}

/// Response frame. Everything but the poll acknowledges with an
/// empty frame.
#[derive(Clone, Debug)]
pub enum WireResponse {
    Ack,
    /// The responder's current relationship row for the requester.
    /// Status `None` means no row exists yet.
    PollResult(Relationship),
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// Shared codec for all five wire protocols.
#[derive(Clone, Default)]
pub struct WireCodec;

impl WireCodec {
    fn protocol_mismatch(expected: &str) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("request does not belong on protocol {expected}"),
        )
    }
}

#[async_trait::async_trait]
impl request_response::Codec for WireCodec {
    type Protocol = StreamProtocol;
    type Request = WireRequest;
    type Response = WireResponse;

    async fn read_request<T>(
        &mut self,
        protocol: &StreamProtocol,
        io: &mut T,
    ) -> io::Result<Self::Request>
    where
        T: AsyncRead + Unpin + Send,
    {
        match protocol.as_ref() {
            CHAT_PROTOCOL => {
                let mut len_bytes = [0u8; 4];
                io.read_exact(&mut len_bytes).await?;
                let len = u32::from_be_bytes(len_bytes);
                if len > MAX_CHAT_FRAME_LEN {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("chat frame length {len} exceeds maximum"),
                    ));
                }

                let mut body = vec![0u8; len as usize];
                io.read_exact(&mut body).await?;
                let content = String::from_utf8(body).map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("non-UTF-8 chat body: {e}"))
                })?;
                Ok(WireRequest::Chat(content))
            }
            GROUP_CHAT_PROTOCOL => {
                let invite: GroupInvite = read_json_document(io).await?;
                Ok(WireRequest::GroupInvite(invite))
            }
            FRIEND_REQUEST_PROTOCOL => {
                let request: FriendRequest = read_json_document(io).await?;
                Ok(WireRequest::FriendRequest(request))
            }
            FRIEND_RESPONSE_PROTOCOL => {
                let response: FriendResponse = read_json_document(io).await?;
                Ok(WireRequest::FriendResponse(response))
            }
            FRIEND_RESPONSE_POLL_PROTOCOL => {
                let bytes = read_to_limit(io).await?;
                let requester = String::from_utf8(bytes).map_err(|e| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("non-UTF-8 peer id: {e}"))
                })?;
                Ok(WireRequest::ResponsePoll { requester })
            }
            other => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unknown protocol {other}"),
            )),
        }
    }

    async fn read_response<T>(
        &mut self,
        protocol: &StreamProtocol,
        io: &mut T,
    ) -> io::Result<Self::Response>
    where
        T: AsyncRead + Unpin + Send,
    {
        match protocol.as_ref() {
            FRIEND_RESPONSE_POLL_PROTOCOL => {
                let relationship: Relationship = read_json_document(io).await?;
                Ok(WireResponse::PollResult(relationship))
            }
            _ => {
                // Drain the (empty) acknowledgement frame.
                read_to_limit(io).await?;
                Ok(WireResponse::Ack)
            }
        }
    }

    async fn write_request<T>(
        &mut self,
        protocol: &StreamProtocol,
        io: &mut T,
        request: Self::Request,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        match (protocol.as_ref(), request) {
            (CHAT_PROTOCOL, WireRequest::Chat(content)) => {
                let body = content.as_bytes();
                if body.len() > MAX_CHAT_FRAME_LEN as usize {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "chat message exceeds frame limit",
                    ));
                }
                io.write_all(&(body.len() as u32).to_be_bytes()).await?;
                io.write_all(body).await?;
                io.flush().await
            }
            (GROUP_CHAT_PROTOCOL, WireRequest::GroupInvite(invite)) => {
                write_json_document(io, &invite).await
            }
            (FRIEND_REQUEST_PROTOCOL, WireRequest::FriendRequest(request)) => {
                write_json_document(io, &request).await
            }
            (FRIEND_RESPONSE_PROTOCOL, WireRequest::FriendResponse(response)) => {
                write_json_document(io, &response).await
            }
            (FRIEND_RESPONSE_POLL_PROTOCOL, WireRequest::ResponsePoll { requester }) => {
                io.write_all(requester.as_bytes()).await?;
                io.flush().await
            }
            (expected, _) => Err(Self::protocol_mismatch(expected)),
        }
    }

    async fn write_response<T>(
        &mut self,
        protocol: &StreamProtocol,
        io: &mut T,
        response: Self::Response,
    ) -> io::Result<()>
    where
        T: AsyncWrite + Unpin + Send,
    {
        match (protocol.as_ref(), response) {
            (FRIEND_RESPONSE_POLL_PROTOCOL, WireResponse::PollResult(relationship)) => {
                write_json_document(io, &relationship).await
            }
            (FRIEND_RESPONSE_POLL_PROTOCOL, WireResponse::Ack) => Err(Self::protocol_mismatch(
                FRIEND_RESPONSE_POLL_PROTOCOL,
            )),
            // Empty acknowledgement frame.
            (_, WireResponse::Ack) => io.flush().await,
            (expected, _) => Err(Self::protocol_mismatch(expected)),
        }
    }
}

// ---------------------------------------------------------------------------
// Framing helpers
// ---------------------------------------------------------------------------

async fn read_to_limit<T>(io: &mut T) -> io::Result<Vec<u8>>
where
    T: AsyncRead + Unpin + Send,
{
    let mut buffer = Vec::new();
    io.take(MAX_WIRE_DOCUMENT_LEN as u64 + 1)
        .read_to_end(&mut buffer)
        .await?;
    if buffer.len() > MAX_WIRE_DOCUMENT_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "wire document exceeds size limit",
        ));
    }
    Ok(buffer)
}

async fn read_json_document<T, D>(io: &mut T) -> io::Result<D>
where
    T: AsyncRead + Unpin + Send,
    D: serde::de::DeserializeOwned,
{
    let bytes = read_to_limit(io).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("bad JSON document: {e}")))
}

async fn write_json_document<T, S>(io: &mut T, value: &S) -> io::Result<()>
where
    T: AsyncWrite + Unpin + Send,
    S: serde::Serialize,
{
    let bytes = serde_json::to_vec(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("JSON encoding: {e}")))?;
    io.write_all(&bytes).await?;
    io.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::io::Cursor;
    use request_response::Codec as _;

    fn proto(id: &'static str) -> StreamProtocol {
        StreamProtocol::new(id)
    }

    #[tokio::test]
    async fn chat_frame_round_trip() {
        let mut codec = WireCodec;
        let mut buffer = Vec::new();
        codec
            .write_request(
                &proto(CHAT_PROTOCOL),
                &mut buffer,
                WireRequest::Chat("hello".into()),
            )
            .await
            .unwrap();

        // 4-byte big-endian length prefix followed by the raw bytes.
        assert_eq!(&buffer[..4], &5u32.to_be_bytes());
        assert_eq!(&buffer[4..], b"hello");

        let mut reader = Cursor::new(buffer);
        match codec
            .read_request(&proto(CHAT_PROTOCOL), &mut reader)
            .await
            .unwrap()
        {
            WireRequest::Chat(content) => assert_eq!(content, "hello"),
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_chat_length_prefix_is_rejected() {
        let mut codec = WireCodec;
        let mut frame = Vec::new();
        frame.extend_from_slice(&(MAX_CHAT_FRAME_LEN + 1).to_be_bytes());
        frame.extend_from_slice(b"x");

        let mut reader = Cursor::new(frame);
        let err = codec
            .read_request(&proto(CHAT_PROTOCOL), &mut reader)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn truncated_chat_frame_is_an_error() {
        let mut codec = WireCodec;
        let mut frame = Vec::new();
        frame.extend_from_slice(&100u32.to_be_bytes());
        frame.extend_from_slice(b"only a few bytes");

        let mut reader = Cursor::new(frame);
        assert!(codec
            .read_request(&proto(CHAT_PROTOCOL), &mut reader)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn group_invite_round_trip() {
        let mut codec = WireCodec;
        let invite = GroupInvite {
            member_peers: vec!["a".into(), "b".into()],
            key: vec![7u8; 32],
            name: "team".into(),
            id: "gid".into(),
        };

        let mut buffer = Vec::new();
        codec
            .write_request(
                &proto(GROUP_CHAT_PROTOCOL),
                &mut buffer,
                WireRequest::GroupInvite(invite.clone()),
            )
            .await
            .unwrap();

        let mut reader = Cursor::new(buffer);
        match codec
            .read_request(&proto(GROUP_CHAT_PROTOCOL), &mut reader)
            .await
            .unwrap()
        {
            WireRequest::GroupInvite(decoded) => {
                assert_eq!(decoded.key, invite.key);
                assert_eq!(decoded.member_peers, invite.member_peers);
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[tokio::test]
    async fn poll_response_carries_relationship_row() {
        let mut codec = WireCodec;
        let row = Relationship {
            peer_id: "asker".into(),
            status: peerchat_types::FriendStatus::Approved,
            requested_at: None,
            approved_at: None,
        };

        let mut buffer = Vec::new();
        codec
            .write_response(
                &proto(FRIEND_RESPONSE_POLL_PROTOCOL),
                &mut buffer,
                WireResponse::PollResult(row),
            )
            .await
            .unwrap();

        let mut reader = Cursor::new(buffer);
        match codec
            .read_response(&proto(FRIEND_RESPONSE_POLL_PROTOCOL), &mut reader)
            .await
            .unwrap()
        {
            WireResponse::PollResult(decoded) => {
                assert_eq!(decoded.peer_id, "asker");
                assert_eq!(decoded.status, peerchat_types::FriendStatus::Approved);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[tokio::test]
    async fn malformed_json_is_invalid_data() {
        let mut codec = WireCodec;
        let mut reader = Cursor::new(b"{not json".to_vec());
        let err = codec
            .read_request(&proto(FRIEND_REQUEST_PROTOCOL), &mut reader)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn request_on_wrong_protocol_is_rejected() {
        let mut codec = WireCodec;
        let mut buffer = Vec::new();
        let err = codec
            .write_request(
                &proto(GROUP_CHAT_PROTOCOL),
                &mut buffer,
                WireRequest::Chat("misrouted".into()),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
