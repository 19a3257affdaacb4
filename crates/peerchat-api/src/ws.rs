//! The UI push channel.
//!
//! Exactly one WebSocket is tracked at a time; a second upgrade
//! replaces the first. Server→client frames carry received and sent
//! messages; client→server frames dispatch the corresponding send
//! operation.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use peerchat_bus::{Event, EventBus, EventKind};
use peerchat_types::{ChatMessage, GroupChatMessage};

use crate::server::ApiContext;

/// Frame type for direct messages, both directions.
pub const WS_TYPE_DIRECT_MESSAGE: &str = "DIRECT_MESSAGE";

/// Frame type for group messages, both directions.
pub const WS_TYPE_GROUP_MESSAGE: &str = "GROUP_MESSAGE";

/// Incoming frames larger than this are ignored.
const MAX_FRAME_SIZE: usize = 4096;

// ---------------------------------------------------------------------------
// Frame shapes
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize)]
struct WsFrame {
    #[serde(rename = "type")]
    frame_type: String,
    payload: serde_json::Value,
}

#[derive(Serialize)]
struct DirectMessagePayload<'a> {
    target_peer_id: &'a str,
    sender_peer_id: &'a str,
    message: &'a str,
}

#[derive(Serialize)]
struct GroupMessagePayload<'a> {
    group_id: &'a str,
    sender_peer_id: &'a str,
    message: &'a str,
}

#[derive(Deserialize)]
struct DirectSendPayload {
    target_peer_id: String,
    message: String,
}

#[derive(Deserialize)]
struct GroupSendPayload {
    group_id: String,
    message: String,
}

// ---------------------------------------------------------------------------
// Upgrade and connection handling
// ---------------------------------------------------------------------------

/// `GET /api/ws`
pub async fn websocket_upgrade(
    State(ctx): State<ApiContext>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| handle_socket(ctx, socket))
}

async fn handle_socket(ctx: ApiContext, socket: WebSocket) {
    tracing::info!("WebSocket connection established");

    let (mut sink, mut stream) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<String>();

    // Install as the single tracked socket; the previous sender (if
    // any) is dropped, ending the previous connection's write task.
    {
        let mut slot = ctx.ws_slot.write().await;
        if slot.is_some() {
            tracing::info!("replacing existing WebSocket connection");
        }
        *slot = Some(frame_tx);
    }
    ctx.bus.publish(Event::WsConnectionEstablished);

    // Writer: drains queued frames into the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // Reader: dispatches send frames until the peer goes away.
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(%e, "WebSocket read error");
                break;
            }
        };

        match message {
            Message::Text(text) => {
                if text.len() > MAX_FRAME_SIZE {
                    tracing::warn!(len = text.len(), "oversized WebSocket frame ignored");
                    continue;
                }
                dispatch_send_frame(&ctx, text.as_str()).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    tracing::info!("WebSocket connection closed");
}

/// Parses a client frame and performs the matching send operation.
/// Failures are logged; there is no error frame back to the UI.
async fn dispatch_send_frame(ctx: &ApiContext, raw: &str) {
    let frame: WsFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(%e, "undecodable WebSocket frame");
            return;
        }
    };

    match frame.frame_type.as_str() {
        WS_TYPE_DIRECT_MESSAGE => {
            let payload: DirectSendPayload = match serde_json::from_value(frame.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(%e, "bad direct message payload");
                    return;
                }
            };
            if let Err(e) = ctx
                .chat
                .send_message(&payload.target_peer_id, &payload.message)
                .await
            {
                tracing::warn!(%e, "WebSocket-initiated send failed");
            }
        }
        WS_TYPE_GROUP_MESSAGE => {
            let payload: GroupSendPayload = match serde_json::from_value(frame.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(%e, "bad group message payload");
                    return;
                }
            };
            if let Err(e) = ctx
                .chat
                .send_group_message(&payload.group_id, &payload.message)
                .await
            {
                tracing::warn!(%e, "WebSocket-initiated group send failed");
            }
        }
        other => {
            tracing::warn!(frame_type = %other, "unknown WebSocket frame type");
        }
    }
}

// ---------------------------------------------------------------------------
// Bus → WebSocket consumer
// ---------------------------------------------------------------------------

/// Spawns the consumer that forwards message events to the active
/// WebSocket.
pub fn spawn_ws_consumer(ctx: &ApiContext, mut shutdown: watch::Receiver<bool>) {
    let mut events = ctx.bus.subscribe(&[
        EventKind::MessageReceived,
        EventKind::MessageSent,
        EventKind::GroupChatMessageReceived,
        EventKind::GroupChatMessageSent,
    ]);
    let ws_slot = ctx.ws_slot.clone();

    tokio::spawn(async move {
        tracing::debug!("WebSocket consumer started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::debug!("WebSocket consumer stopping");
                        return;
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else { return };
                    let frame = match &event {
                        Event::MessageReceived { message }
                        | Event::MessageSent { message } => direct_frame(message),
                        Event::GroupChatMessageReceived { message }
                        | Event::GroupChatMessageSent { message } => group_frame(message),
                        _ => continue,
                    };

                    let Some(frame) = frame else { continue };
                    let slot = ws_slot.read().await;
                    match slot.as_ref() {
                        Some(sender) => {
                            if sender.send(frame).is_err() {
                                tracing::debug!("WebSocket writer gone; frame dropped");
                            }
                        }
                        None => tracing::debug!("no WebSocket connection; frame dropped"),
                    }
                }
            }
        }
    });
}

fn direct_frame(message: &ChatMessage) -> Option<String> {
    encode_frame(
        WS_TYPE_DIRECT_MESSAGE,
        &DirectMessagePayload {
            target_peer_id: &message.recipient_peer_id,
            sender_peer_id: &message.sender_peer_id,
            message: &message.content,
        },
    )
}

fn group_frame(message: &GroupChatMessage) -> Option<String> {
    encode_frame(
        WS_TYPE_GROUP_MESSAGE,
        &GroupMessagePayload {
            group_id: &message.group_id,
            sender_peer_id: &message.sender_peer_id,
            message: &message.message,
        },
    )
}

fn encode_frame<T: Serialize>(frame_type: &str, payload: &T) -> Option<String> {
    let payload = match serde_json::to_value(payload) {
        Ok(payload) => payload,
        Err(e) => {
            tracing::error!(%e, "failed to encode WebSocket payload");
            return None;
        }
    };
    let frame = WsFrame {
        frame_type: frame_type.to_string(),
        payload,
    };
    match serde_json::to_string(&frame) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::error!(%e, "failed to encode WebSocket frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn direct_frame_shape() {
        let frame = direct_frame(&ChatMessage {
            sender_peer_id: "sender".into(),
            recipient_peer_id: "target".into(),
            content: "hello".into(),
            send_time: Utc::now(),
            is_outgoing: false,
        })
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "DIRECT_MESSAGE");
        assert_eq!(value["payload"]["sender_peer_id"], "sender");
        assert_eq!(value["payload"]["target_peer_id"], "target");
        assert_eq!(value["payload"]["message"], "hello");
    }

    #[test]
    fn group_frame_shape() {
        let frame = group_frame(&GroupChatMessage {
            group_id: "g1".into(),
            sender_peer_id: "sender".into(),
            message: "ping".into(),
            time: Utc::now(),
        })
        .unwrap();

        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["type"], "GROUP_MESSAGE");
        assert_eq!(value["payload"]["group_id"], "g1");
    }
}
