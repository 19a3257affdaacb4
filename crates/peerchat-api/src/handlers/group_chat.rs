//! Group chat endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use peerchat_types::{GroupChatMessage, GroupInfo};

use crate::error::ApiError;
use crate::server::ApiContext;

#[derive(Deserialize)]
pub struct CreateGroupRequest {
    pub member_peers: Vec<String>,
    pub name: String,
}

#[derive(Serialize)]
pub struct CreateGroupResponse {
    pub group_id: String,
}

#[derive(Deserialize)]
pub struct SendGroupMessageRequest {
    pub group_id: String,
    pub message: String,
}

#[derive(Deserialize)]
pub struct GetGroupMessagesRequest {
    pub group_id: String,
}

/// `POST /api/group-chat`
pub async fn create_group(
    State(ctx): State<ApiContext>,
    Json(request): Json<CreateGroupRequest>,
) -> Result<Json<CreateGroupResponse>, ApiError> {
    let group_id = ctx
        .chat
        .create_group(&request.member_peers, &request.name)
        .await?;
    Ok(Json(CreateGroupResponse { group_id }))
}

/// `GET /api/group-chats`
pub async fn get_groups(
    State(ctx): State<ApiContext>,
) -> Result<Json<Vec<GroupInfo>>, ApiError> {
    Ok(Json(ctx.chat.get_groups()?))
}

/// `POST /api/group-chat/send`
pub async fn send_message(
    State(ctx): State<ApiContext>,
    Json(request): Json<SendGroupMessageRequest>,
) -> Result<StatusCode, ApiError> {
    ctx.chat
        .send_group_message(&request.group_id, &request.message)
        .await?;
    Ok(StatusCode::OK)
}

/// `POST /api/group-chat/messages`
pub async fn get_messages(
    State(ctx): State<ApiContext>,
    Json(request): Json<GetGroupMessagesRequest>,
) -> Result<Json<Vec<GroupChatMessage>>, ApiError> {
    Ok(Json(ctx.chat.get_group_messages(&request.group_id)?))
}
