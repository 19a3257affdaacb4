//! HTTP mapping of the workspace error kinds.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use peerchat_types::PeerchatError;

/// Error wrapper implementing `IntoResponse`; handlers return
/// `Result<_, ApiError>` and bubble service errors with `?`.
#[derive(Debug)]
pub struct ApiError(pub PeerchatError);

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl From<PeerchatError> for ApiError {
    fn from(err: PeerchatError) -> Self {
        Self(err)
    }
}

impl ApiError {
    /// The status code for each error kind.
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            PeerchatError::StateConflict { .. } => StatusCode::CONFLICT,
            PeerchatError::InvalidInput { .. } => StatusCode::BAD_REQUEST,
            PeerchatError::AuthenticationFailure { .. } | PeerchatError::KeyLoadingFailed => {
                StatusCode::UNAUTHORIZED
            }
            PeerchatError::KeyGenerationFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            PeerchatError::PeerUnreachable { .. } | PeerchatError::TransportFailure { .. } => {
                StatusCode::BAD_GATEWAY
            }
            PeerchatError::PersistenceFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            PeerchatError::NotFound { .. } => StatusCode::NOT_FOUND,
            PeerchatError::NotReady { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, "request rejected");
        }
        (
            status,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}
