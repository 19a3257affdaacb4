//! API server: shared context, router, listener, shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Method};
use axum::routing::{delete, get, patch, post};
use axum::Router;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tower_http::cors::{AllowOrigin, CorsLayer};

use peerchat_bus::EventBus;
use peerchat_node::capabilities::OnlineStatus;
use peerchat_node::identity::KeyStore;
use peerchat_node::services::{ChatService, ProfileService};
use peerchat_node::AppState;
use peerchat_storage::DisplayNameRepository;
use peerchat_types::{PeerchatError, Result};

use crate::handlers;
use crate::ws;

/// The single tracked WebSocket: a sender into the active
/// connection's write task. A new upgrade replaces it.
pub type WsSlot = Arc<RwLock<Option<mpsc::UnboundedSender<String>>>>;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct ApiContext {
    pub app_state: Arc<AppState>,
    pub bus: Arc<EventBus>,
    pub keystore: Arc<KeyStore>,
    pub chat: Arc<ChatService>,
    pub profile: Arc<ProfileService>,
    pub presence: Arc<dyn OnlineStatus>,
    pub display_names: DisplayNameRepository,
    pub ws_slot: WsSlot,
}

/// Builds the full API router.
pub fn build_router(ctx: ApiContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            origin
                .to_str()
                .map(is_local_origin)
                .unwrap_or(false)
        }))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE]);

    Router::new()
        .route("/api/status", get(handlers::setup::status))
        .route("/api/setup/create-key", post(handlers::setup::create_key))
        .route("/api/setup/unlock-key", post(handlers::setup::unlock_key))
        .route("/api/chat/send", post(handlers::chat::send_message))
        .route("/api/chat/messages", post(handlers::chat::get_messages))
        .route(
            "/api/profile/friend/request",
            post(handlers::profile::friend_request),
        )
        .route(
            "/api/profile/friend/response",
            patch(handlers::profile::friend_response),
        )
        .route("/api/profile/friends", get(handlers::profile::get_friends))
        .route(
            "/api/profile/friendRequests",
            get(handlers::profile::get_friend_requests),
        )
        .route("/api/group-chat", post(handlers::group_chat::create_group))
        .route("/api/group-chats", get(handlers::group_chat::get_groups))
        .route(
            "/api/group-chat/send",
            post(handlers::group_chat::send_message),
        )
        .route(
            "/api/group-chat/messages",
            post(handlers::group_chat::get_messages),
        )
        .route(
            "/api/profile/display-name",
            post(handlers::display_name::set_display_name),
        )
        .route(
            "/api/profile/display-name/get",
            post(handlers::display_name::get_display_name),
        )
        .route(
            "/api/profile/display-name/delete",
            delete(handlers::display_name::delete_display_name),
        )
        .route("/api/ws", get(ws::websocket_upgrade))
        .layer(cors)
        .with_state(ctx)
}

/// Binds the listener and serves until the shutdown signal fires.
///
/// Returns the bound address (the configured port may be 0) and the
/// server task handle. Also spawns the WebSocket push consumer.
pub async fn start_api_server(
    ctx: ApiContext,
    listen_addr: &str,
    shutdown: watch::Receiver<bool>,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    ws::spawn_ws_consumer(&ctx, shutdown.clone());

    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .map_err(|e| PeerchatError::TransportFailure {
            reason: format!("failed to bind API listener on {listen_addr}: {e}"),
        })?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| PeerchatError::TransportFailure {
            reason: format!("failed to read API listener address: {e}"),
        })?;

    let router = build_router(ctx);
    let mut shutdown = shutdown;

    let task = tokio::spawn(async move {
        let graceful = async move {
            loop {
                if shutdown.changed().await.is_err() {
                    return;
                }
                if *shutdown.borrow() {
                    return;
                }
            }
        };

        tracing::info!(%local_addr, "API server listening");
        if let Err(e) = axum::serve(listener, router)
            .with_graceful_shutdown(graceful)
            .await
        {
            tracing::error!(%e, "API server error");
        }
        tracing::info!("API server stopped");
    });

    Ok((local_addr, task))
}

fn is_local_origin(origin: &str) -> bool {
    origin.starts_with("http://localhost:")
        || origin.starts_with("http://127.0.0.1:")
        || origin == "http://localhost"
        || origin == "http://127.0.0.1"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_localhost_origins_are_allowed() {
        assert!(is_local_origin("http://localhost:5173"));
        assert!(is_local_origin("http://127.0.0.1:8080"));
        assert!(!is_local_origin("https://example.com"));
        assert!(!is_local_origin("http://localhost.evil.com"));
    }
}
