//! Status and key setup endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use peerchat_bus::Event;
use peerchat_types::{DaemonState, PeerchatError};

use crate::error::ApiError;
use crate::server::ApiContext;

#[derive(Serialize)]
pub struct StatusResponse {
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub listen_addrs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Deserialize)]
pub struct SetupRequest {
    pub password: String,
}

/// `GET /api/status`
pub async fn status(State(ctx): State<ApiContext>) -> Json<StatusResponse> {
    let snapshot = ctx.app_state.snapshot();
    Json(StatusResponse {
        state: snapshot.state.to_string(),
        peer_id: snapshot.peer_id,
        listen_addrs: snapshot.listen_addrs,
        last_error: snapshot.last_error,
    })
}

/// `POST /api/setup/create-key`
pub async fn create_key(
    State(ctx): State<ApiContext>,
    Json(request): Json<SetupRequest>,
) -> Result<StatusCode, ApiError> {
    require_state(&ctx, DaemonState::WaitingForKey, "creating a key")?;
    require_password(&request)?;

    // Argon2id at 64 MiB is deliberately slow; keep it off the
    // async workers.
    let keystore = ctx.keystore.clone();
    let password = request.password;
    let result = tokio::task::spawn_blocking(move || keystore.generate_and_save(&password))
        .await
        .map_err(|e| PeerchatError::KeyGenerationFailed {
            reason: format!("key generation task failed: {e}"),
        })?;

    match result {
        Ok(()) => {
            tracing::info!("node key created");
            ctx.bus.publish(Event::KeyGenerated);
            Ok(StatusCode::CREATED)
        }
        Err(e) => {
            ctx.bus.publish(Event::KeyGenerationFailed {
                error: e.to_string(),
            });
            Err(e.into())
        }
    }
}

/// `POST /api/setup/unlock-key`
pub async fn unlock_key(
    State(ctx): State<ApiContext>,
    Json(request): Json<SetupRequest>,
) -> Result<StatusCode, ApiError> {
    require_state(&ctx, DaemonState::WaitingForPassword, "unlocking the key")?;
    require_password(&request)?;

    let keystore = ctx.keystore.clone();
    let password = request.password;
    let result = tokio::task::spawn_blocking(move || keystore.load_and_decrypt(&password))
        .await
        .map_err(|_| PeerchatError::KeyLoadingFailed)?;

    match result {
        Ok(()) => {
            tracing::info!("node key unlocked");
            ctx.bus.publish(Event::UserAuthenticated);
            Ok(StatusCode::OK)
        }
        Err(e) => {
            ctx.bus.publish(Event::KeyLoadingFailed {
                error: e.to_string(),
            });
            Err(e.into())
        }
    }
}

fn require_state(
    ctx: &ApiContext,
    expected: DaemonState,
    action: &str,
) -> Result<(), ApiError> {
    let state = ctx.app_state.state();
    if state != expected {
        return Err(PeerchatError::StateConflict {
            reason: format!("invalid state ({state}) for {action}"),
        }
        .into());
    }
    Ok(())
}

fn require_password(request: &SetupRequest) -> Result<(), ApiError> {
    if request.password.is_empty() {
        return Err(PeerchatError::InvalidInput {
            reason: "password cannot be empty".into(),
        }
        .into());
    }
    Ok(())
}
