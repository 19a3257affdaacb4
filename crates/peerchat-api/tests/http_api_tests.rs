//! HTTP surface tests against the real router with in-memory
//! storage and no overlay.
//!
//! The overlay cell stays empty, so anything requiring the network
//! answers 503 — which is exactly what the UI sees between process
//! start and unlock.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::watch;
use tower::ServiceExt;

use peerchat_api::server::build_router;
use peerchat_api::ApiContext;
use peerchat_bus::{Event, EventBus};
use peerchat_network::OverlayCell;
use peerchat_node::capabilities::{FriendshipGate, GroupTopics, OnlineStatus};
use peerchat_node::consumers::{spawn_app_state_consumer, spawn_profile_consumer};
use peerchat_node::identity::{GroupKeyStore, KeyStore};
use peerchat_node::services::{ChatService, PresenceService, ProfileService, PubSubService};
use peerchat_node::AppState;
use peerchat_storage::{
    Database, DisplayNameRepository, GroupMemberRepository, KeyRepository, MessageRepository,
    RelationshipRepository,
};

struct TestDaemon {
    _dir: tempfile::TempDir,
    router: Router,
    bus: Arc<EventBus>,
    _shutdown: watch::Sender<bool>,
}

/// Wires the full daemon minus the overlay, the way the coordinator
/// does at startup.
fn test_daemon() -> TestDaemon {
    let dir = tempfile::tempdir().unwrap();
    let key_path = dir.path().join("private-key.key");

    let bus = Arc::new(EventBus::new());
    let app_state = Arc::new(AppState::new(key_path.clone()));
    let keystore = Arc::new(KeyStore::new(key_path, dir.path().to_path_buf()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_app_state_consumer(
        Arc::clone(&app_state),
        Arc::clone(&keystore),
        &bus,
        shutdown_rx.clone(),
    );

    let db = Database::open_in_memory().unwrap();
    let message_repo = MessageRepository::new(db.clone());
    let relationship_repo = RelationshipRepository::new(db.clone());
    let key_repo = KeyRepository::new(db.clone());
    let member_repo = GroupMemberRepository::new(db.clone());
    let display_names = DisplayNameRepository::new(db);

    spawn_profile_consumer(relationship_repo.clone(), &bus, shutdown_rx);

    let overlay_cell = OverlayCell::new();
    let group_keys = GroupKeyStore::new(key_repo);

    let profile = Arc::new(ProfileService::new(
        Arc::clone(&app_state),
        Arc::clone(&bus),
        overlay_cell.clone(),
        Arc::clone(&keystore),
        relationship_repo.clone(),
    ));
    let pubsub = Arc::new(PubSubService::new(
        overlay_cell.clone(),
        Arc::clone(&bus),
        group_keys.clone(),
        member_repo.clone(),
    ));
    let presence = Arc::new(PresenceService::new(
        overlay_cell.clone(),
        Arc::clone(&bus),
        relationship_repo,
    ));
    let chat = Arc::new(ChatService::new(
        Arc::clone(&app_state),
        Arc::clone(&bus),
        overlay_cell,
        Arc::clone(&keystore),
        group_keys,
        Arc::clone(&profile) as Arc<dyn FriendshipGate>,
        Arc::clone(&pubsub) as Arc<dyn GroupTopics>,
        member_repo,
        message_repo,
    ));

    let ctx = ApiContext {
        app_state,
        bus: Arc::clone(&bus),
        keystore,
        chat,
        profile,
        presence: presence as Arc<dyn OnlineStatus>,
        display_names,
        ws_slot: Arc::default(),
    };

    TestDaemon {
        _dir: dir,
        router: build_router(ctx),
        bus,
        _shutdown: shutdown_tx,
    }
}

async fn request(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    let request = match body {
        Some(value) => builder.body(Body::from(value.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
}

// ---------------------------------------------------------------------------
// Status and lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn status_reflects_waiting_for_key() {
    let daemon = test_daemon();
    daemon.bus.publish(Event::ApiStarted);
    settle().await;

    let (status, body) = request(&daemon.router, "GET", "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "WaitingForKey");
}

#[tokio::test]
async fn create_key_in_wrong_state_is_conflict() {
    let daemon = test_daemon();
    // No ApiStarted event yet: the daemon is still Initializing.
    let (status, _) = request(
        &daemon.router,
        "POST",
        "/api/setup/create-key",
        Some(json!({"password": "hunter2"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn create_key_then_state_advances() {
    let daemon = test_daemon();
    daemon.bus.publish(Event::ApiStarted);
    settle().await;

    let (status, _) = request(
        &daemon.router,
        "POST",
        "/api/setup/create-key",
        Some(json!({"password": "hunter2"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    settle().await;

    let (_, body) = request(&daemon.router, "GET", "/api/status", None).await;
    // Without an overlay the node stops at P2P bring-up, but it has
    // left the waiting state.
    assert_eq!(body["state"], "InitializingP2P");
}

#[tokio::test]
async fn empty_password_is_bad_request() {
    let daemon = test_daemon();
    daemon.bus.publish(Event::ApiStarted);
    settle().await;

    let (status, _) = request(
        &daemon.router,
        "POST",
        "/api/setup/create-key",
        Some(json!({"password": ""})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unlock_with_wrong_password_is_unauthorized() {
    let daemon = test_daemon();
    daemon.bus.publish(Event::ApiStarted);
    settle().await;

    // Create the key through the API, then simulate a restart by
    // rebuilding the daemon over the same directory.
    let (status, _) = request(
        &daemon.router,
        "POST",
        "/api/setup/create-key",
        Some(json!({"password": "hunter2"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let dir = daemon._dir;
    let restarted = restart_over(dir);
    restarted.bus.publish(Event::ApiStarted);
    settle().await;

    let (_, body) = request(&restarted.router, "GET", "/api/status", None).await;
    assert_eq!(body["state"], "WaitingForPassword");

    let (status, _) = request(
        &restarted.router,
        "POST",
        "/api/setup/unlock-key",
        Some(json!({"password": "wrong"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    settle().await;

    // State stays put; no peer was created.
    let (_, body) = request(&restarted.router, "GET", "/api/status", None).await;
    assert_eq!(body["state"], "WaitingForPassword");
    assert!(body["peer_id"].is_null());
}

/// Simulates a restart: a fresh daemon wired over the key material
/// of an existing data directory.
fn restart_over(dir: tempfile::TempDir) -> TestDaemon {
    let daemon = test_daemon();
    let old_key = dir.path().join("private-key.key");
    let old_salt = dir.path().join("dbfield.salt");
    let new_key = daemon._dir.path().join("private-key.key");
    let new_salt = daemon._dir.path().join("dbfield.salt");
    std::fs::copy(&old_key, &new_key).unwrap();
    if old_salt.exists() {
        std::fs::copy(&old_salt, &new_salt).unwrap();
    }
    daemon
}

// ---------------------------------------------------------------------------
// Not-ready gating
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chat_send_before_running_is_service_unavailable() {
    let daemon = test_daemon();
    daemon.bus.publish(Event::ApiStarted);
    settle().await;

    let target = libp2p_identity::PeerId::from(
        libp2p_identity::Keypair::generate_ed25519().public(),
    );
    let (status, _) = request(
        &daemon.router,
        "POST",
        "/api/chat/send",
        Some(json!({
            "type": "DIRECT_MESSAGE",
            "payload": {"target_peer_id": target.to_string(), "message": "hello"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn malformed_peer_id_is_bad_request() {
    let daemon = test_daemon();
    let (status, _) = request(
        &daemon.router,
        "POST",
        "/api/chat/send",
        Some(json!({
            "type": "DIRECT_MESSAGE",
            "payload": {"target_peer_id": "garbage", "message": "hello"}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Display names
// ---------------------------------------------------------------------------

#[tokio::test]
async fn display_name_lookup_never_404s() {
    let daemon = test_daemon();

    let (status, body) = request(
        &daemon.router,
        "POST",
        "/api/profile/display-name/get",
        Some(json!({"entity_id": "12D3KooWEXAMPLEabcdef", "entity_type": "friend"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["display_name"], "12*abcdef");
    assert_eq!(body["is_custom_name"], false);
}

#[tokio::test]
async fn display_name_set_get_delete_cycle() {
    let daemon = test_daemon();

    let (status, _) = request(
        &daemon.router,
        "POST",
        "/api/profile/display-name",
        Some(json!({
            "entity_id": "12D3KooWEXAMPLEabcdef",
            "entity_type": "friend",
            "display_name": "Alice"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = request(
        &daemon.router,
        "POST",
        "/api/profile/display-name/get",
        Some(json!({"entity_id": "12D3KooWEXAMPLEabcdef", "entity_type": "friend"})),
    )
    .await;
    assert_eq!(body["display_name"], "Alice");
    assert_eq!(body["is_custom_name"], true);

    let (status, _) = request(
        &daemon.router,
        "DELETE",
        "/api/profile/display-name/delete",
        Some(json!({"entity_id": "12D3KooWEXAMPLEabcdef", "entity_type": "friend"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = request(
        &daemon.router,
        "POST",
        "/api/profile/display-name/get",
        Some(json!({"entity_id": "12D3KooWEXAMPLEabcdef", "entity_type": "friend"})),
    )
    .await;
    assert_eq!(body["is_custom_name"], false);
}

#[tokio::test]
async fn group_fallback_name_is_generic() {
    let daemon = test_daemon();
    let (_, body) = request(
        &daemon.router,
        "POST",
        "/api/profile/display-name/get",
        Some(json!({"entity_id": "some-group-uuid", "entity_type": "group"})),
    )
    .await;
    assert_eq!(body["display_name"], "Group Chat");
}

// ---------------------------------------------------------------------------
// Friends listing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn friends_list_is_empty_initially() {
    let daemon = test_daemon();
    let (status, body) = request(&daemon.router, "GET", "/api/profile/friends", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn pending_request_appears_in_friend_requests() {
    let daemon = test_daemon();
    daemon.bus.publish(Event::FriendRequestReceived {
        sender_peer_id: "12D3KooWremotepeer".into(),
        timestamp: "2024-05-01T12:00:00Z".into(),
    });
    settle().await;

    let (status, body) =
        request(&daemon.router, "GET", "/api/profile/friendRequests", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["peer_id"], "12D3KooWremotepeer");
}
