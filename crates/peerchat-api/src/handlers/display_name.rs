//! Display-name endpoints.
//!
//! Lookups never 404: a missing row yields a deterministic fallback
//! computed from the entity ID.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use peerchat_types::EntityType;

use crate::error::ApiError;
use crate::server::ApiContext;

#[derive(Deserialize)]
pub struct SetDisplayNameRequest {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub display_name: String,
}

#[derive(Deserialize)]
pub struct EntityRef {
    pub entity_id: String,
    pub entity_type: EntityType,
}

#[derive(Serialize)]
pub struct GetDisplayNameResponse {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub display_name: String,
    pub is_custom_name: bool,
}

/// Deterministic fallback for entities without a custom name:
/// `"<first 2>*<last 6>"` for peer IDs of length ≥ 8, a generic
/// label for groups, the raw ID otherwise.
fn fallback_display_name(entity_id: &str, entity_type: EntityType) -> String {
    if entity_id.is_empty() {
        return "Unknown".to_string();
    }
    if entity_type == EntityType::Group {
        return "Group Chat".to_string();
    }
    if entity_id.len() >= 8 {
        let first2 = &entity_id[..2];
        let last6 = &entity_id[entity_id.len() - 6..];
        return format!("{first2}*{last6}");
    }
    entity_id.to_string()
}

/// `POST /api/profile/display-name`
pub async fn set_display_name(
    State(ctx): State<ApiContext>,
    Json(request): Json<SetDisplayNameRequest>,
) -> Result<StatusCode, ApiError> {
    if request.entity_id.is_empty() || request.display_name.is_empty() {
        return Err(peerchat_types::PeerchatError::InvalidInput {
            reason: "entity_id and display_name are required".into(),
        }
        .into());
    }

    ctx.display_names.store(
        &request.entity_id,
        request.entity_type,
        &request.display_name,
    )?;
    Ok(StatusCode::OK)
}

/// `POST /api/profile/display-name/get` — never returns 404.
pub async fn get_display_name(
    State(ctx): State<ApiContext>,
    Json(request): Json<EntityRef>,
) -> Result<Json<GetDisplayNameResponse>, ApiError> {
    if request.entity_id.is_empty() {
        return Err(peerchat_types::PeerchatError::InvalidInput {
            reason: "entity_id is required".into(),
        }
        .into());
    }

    let response = match ctx
        .display_names
        .get_by_entity(&request.entity_id, request.entity_type)
    {
        Ok(row) => GetDisplayNameResponse {
            entity_id: request.entity_id,
            entity_type: request.entity_type,
            display_name: row.display_name,
            is_custom_name: true,
        },
        Err(e) => {
            if !e.is_not_found() {
                // Even a database error falls back rather than
                // leaving the UI without a label.
                tracing::error!(%e, entity_id = %request.entity_id, "display name lookup failed");
            }
            GetDisplayNameResponse {
                display_name: fallback_display_name(&request.entity_id, request.entity_type),
                entity_id: request.entity_id,
                entity_type: request.entity_type,
                is_custom_name: false,
            }
        }
    };
    Ok(Json(response))
}

/// `DELETE /api/profile/display-name/delete`
///
/// Deleting a name that does not exist is success: the entity is
/// already on its fallback.
pub async fn delete_display_name(
    State(ctx): State<ApiContext>,
    Json(request): Json<EntityRef>,
) -> Result<StatusCode, ApiError> {
    match ctx
        .display_names
        .delete(&request.entity_id, request.entity_type)
    {
        Ok(()) => Ok(StatusCode::OK),
        Err(e) if e.is_not_found() => Ok(StatusCode::OK),
        Err(e) => Err(e.into()),
    }
}
