//! Friendship endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use peerchat_types::{EntityType, FriendInfo, Relationship};

use crate::error::ApiError;
use crate::server::ApiContext;

#[derive(Deserialize)]
pub struct FriendRequestBody {
    pub receiver_peer_id: String,
}

#[derive(Deserialize)]
pub struct FriendResponseBody {
    pub peer_id: String,
    pub is_accepted: bool,
}

/// `POST /api/profile/friend/request`
pub async fn friend_request(
    State(ctx): State<ApiContext>,
    Json(request): Json<FriendRequestBody>,
) -> Result<StatusCode, ApiError> {
    ctx.profile
        .send_friend_request(&request.receiver_peer_id)
        .await?;
    Ok(StatusCode::OK)
}

/// `PATCH /api/profile/friend/response`
pub async fn friend_response(
    State(ctx): State<ApiContext>,
    Json(request): Json<FriendResponseBody>,
) -> Result<StatusCode, ApiError> {
    ctx.profile
        .respond_to_friend_request(&request.peer_id, request.is_accepted)
        .await?;
    Ok(StatusCode::OK)
}

/// `GET /api/profile/friends`
///
/// The stored rows enriched with live online status and any custom
/// display name.
pub async fn get_friends(
    State(ctx): State<ApiContext>,
) -> Result<Json<Vec<FriendInfo>>, ApiError> {
    let friends = ctx.profile.get_friends()?;

    let mut result = Vec::with_capacity(friends.len());
    for friend in friends {
        let display_name = match ctx
            .display_names
            .get_by_entity(&friend.peer_id, EntityType::Friend)
        {
            Ok(row) => Some(row.display_name),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                tracing::error!(peer_id = %friend.peer_id, %e, "display name lookup failed");
                None
            }
        };

        result.push(FriendInfo {
            is_online: ctx.presence.is_online(&friend.peer_id),
            display_name,
            peer_id: friend.peer_id,
            status: friend.status,
            requested_at: friend.requested_at,
            approved_at: friend.approved_at,
        });
    }
    Ok(Json(result))
}

/// `GET /api/profile/friendRequests`
pub async fn get_friend_requests(
    State(ctx): State<ApiContext>,
) -> Result<Json<Vec<Relationship>>, ApiError> {
    let requests = ctx.profile.get_friend_requests()?;
    Ok(Json(requests))
}
