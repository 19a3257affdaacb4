//! Direct chat endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use peerchat_node::services::chat::ConversationMessage;

use crate::error::ApiError;
use crate::server::ApiContext;

/// Matches the WebSocket send frame: `{type, payload}`.
#[derive(Deserialize)]
pub struct SendMessageRequest {
    #[serde(rename = "type")]
    pub _type: Option<String>,
    pub payload: SendMessagePayload,
}

#[derive(Deserialize)]
pub struct SendMessagePayload {
    pub target_peer_id: String,
    pub message: String,
}

#[derive(Deserialize)]
pub struct GetMessagesRequest {
    pub peer_id: String,
}

/// `POST /api/chat/send`
pub async fn send_message(
    State(ctx): State<ApiContext>,
    Json(request): Json<SendMessageRequest>,
) -> Result<StatusCode, ApiError> {
    ctx.chat
        .send_message(&request.payload.target_peer_id, &request.payload.message)
        .await?;
    Ok(StatusCode::OK)
}

/// `POST /api/chat/messages`
pub async fn get_messages(
    State(ctx): State<ApiContext>,
    Json(request): Json<GetMessagesRequest>,
) -> Result<Json<Vec<ConversationMessage>>, ApiError> {
    let messages = ctx.chat.get_messages(&request.peer_id)?;
    Ok(Json(messages))
}
