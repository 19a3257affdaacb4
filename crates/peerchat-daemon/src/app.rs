//! Application coordinator.
//!
//! Wires the stores, services, event bus, control interface, and
//! overlay together, and runs the startup and shutdown sequences.
//!
//! # Startup
//!
//! 1. Event bus + app-state consumer.
//! 2. Database + repositories + persistence consumers.
//! 3. Control interface (so the UI can prompt for a password).
//! 4. `ApiStarted` → state becomes WaitingForKey/WaitingForPassword.
//! 5. Block on the key-ready signal.
//! 6. Overlay node → `HostInitialized`.
//! 7. DHT bootstrap → `DhtCreated`.
//! 8. Protocol handlers, presence, pub/sub, poll loop.
//! 9. `SetupCompleted` → Running.
//!
//! # Shutdown
//!
//! The watch channel flips; the API drains within a 5-second
//! deadline, then the overlay task, then the remaining consumers.
//! Failures are logged and never stop the sequence.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use peerchat_api::{start_api_server, ApiContext};
use peerchat_bus::{Event, EventBus};
use peerchat_network::{OverlayCell, OverlayService};
use peerchat_node::capabilities::{FriendshipGate, GroupTopics, OnlineStatus};
use peerchat_node::consumers::{
    spawn_app_state_consumer, spawn_chat_consumer, spawn_profile_consumer,
};
use peerchat_node::dispatch::spawn_overlay_dispatcher;
use peerchat_node::identity::{GroupKeyStore, KeyStore};
use peerchat_node::services::{ChatService, PresenceService, ProfileService, PubSubService};
use peerchat_node::AppState;
use peerchat_storage::{
    Database, DisplayNameRepository, GroupMemberRepository, KeyRepository, MessageRepository,
    RelationshipRepository,
};
use peerchat_types::{DaemonState, Result};

use crate::config::DaemonConfig;

/// Deadline for draining the HTTP server at shutdown.
const HTTP_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// Deadline for the remaining tasks at shutdown.
const TASK_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

/// The running application.
pub struct Application {
    app_state: Arc<AppState>,
    shutdown_tx: watch::Sender<bool>,
    api_addr: SocketAddr,
    api_task: JoinHandle<()>,
    p2p_task: JoinHandle<()>,
}

impl Application {
    /// Runs the startup sequence through step 4 and spawns the
    /// overlay bring-up, which blocks on the key-ready signal.
    pub async fn start(config: DaemonConfig) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // 1. Event bus and state machine.
        let bus = Arc::new(EventBus::new());
        let app_state = Arc::new(AppState::new(config.key_path()));
        let keystore = Arc::new(KeyStore::new(config.key_path(), config.data_dir.clone()));
        spawn_app_state_consumer(
            Arc::clone(&app_state),
            Arc::clone(&keystore),
            &bus,
            shutdown_rx.clone(),
        );

        // 2. Persistence.
        let db = Database::open(&config.db_path())?;
        let message_repo = MessageRepository::new(db.clone());
        let relationship_repo = RelationshipRepository::new(db.clone());
        let key_repo = KeyRepository::new(db.clone());
        let member_repo = GroupMemberRepository::new(db.clone());
        let display_names = DisplayNameRepository::new(db);

        spawn_chat_consumer(
            Arc::clone(&keystore),
            message_repo.clone(),
            &bus,
            shutdown_rx.clone(),
        );
        spawn_profile_consumer(relationship_repo.clone(), &bus, shutdown_rx.clone());

        // Services over a late-bound overlay.
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
            relationship_repo.clone(),
        ));
        let chat = Arc::new(ChatService::new(
            Arc::clone(&app_state),
            Arc::clone(&bus),
            overlay_cell.clone(),
            Arc::clone(&keystore),
            group_keys,
            Arc::clone(&profile) as Arc<dyn FriendshipGate>,
            Arc::clone(&pubsub) as Arc<dyn GroupTopics>,
            member_repo,
            message_repo,
        ));

        // 3. Control interface.
        let ctx = ApiContext {
            app_state: Arc::clone(&app_state),
            bus: Arc::clone(&bus),
            keystore: Arc::clone(&keystore),
            chat: Arc::clone(&chat),
            profile: Arc::clone(&profile),
            presence: Arc::clone(&presence) as Arc<dyn OnlineStatus>,
            display_names,
            ws_slot: Arc::default(),
        };
        let (api_addr, api_task) =
            start_api_server(ctx, &config.api_listen_addr, shutdown_rx.clone()).await?;

        // 4. The state consumer picks the waiting state.
        bus.publish(Event::ApiStarted);

        // 5.–9. run in the background once the key is ready.
        let p2p_task = tokio::spawn(initialize_p2p(
            config,
            Arc::clone(&app_state),
            Arc::clone(&bus),
            keystore,
            overlay_cell,
            chat,
            profile,
            pubsub,
            presence,
            shutdown_rx,
        ));

        tracing::info!(%api_addr, "daemon started; API and UI reachable");
        Ok(Self {
            app_state,
            shutdown_tx,
            api_addr,
            api_task,
            p2p_task,
        })
    }

    /// The bound address of the control interface.
    pub fn api_addr(&self) -> SocketAddr {
        self.api_addr
    }

    /// Blocks until Ctrl-C (or SIGTERM via the runtime's signal
    /// handling).
    pub async fn wait_for_shutdown_signal(&self) {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("shutdown signal received"),
            Err(e) => tracing::error!(%e, "cannot listen for shutdown signal"),
        }
    }

    /// Runs the shutdown sequence. Every step is best-effort.
    pub async fn stop(self) {
        tracing::info!("shutting down daemon");
        self.app_state.set_state(DaemonState::ShuttingDown);
        let _ = self.shutdown_tx.send(true);

        if tokio::time::timeout(HTTP_SHUTDOWN_DEADLINE, self.api_task)
            .await
            .is_err()
        {
            tracing::warn!("API server did not stop within the deadline");
        } else {
            tracing::info!("API server stopped");
        }

        if tokio::time::timeout(TASK_SHUTDOWN_DEADLINE, self.p2p_task)
            .await
            .is_err()
        {
            tracing::warn!("overlay did not stop within the deadline");
        } else {
            tracing::info!("overlay stopped");
        }

        // Consumers exit on the same watch signal; the database
        // closes when the last repository handle drops.
        tracing::info!("daemon shut down");
    }
}

/// Steps 5–9 of the startup sequence.
#[allow(clippy::too_many_arguments)]
async fn initialize_p2p(
    config: DaemonConfig,
    app_state: Arc<AppState>,
    bus: Arc<EventBus>,
    keystore: Arc<KeyStore>,
    overlay_cell: OverlayCell,
    chat: Arc<ChatService>,
    profile: Arc<ProfileService>,
    pubsub: Arc<PubSubService>,
    presence: Arc<PresenceService>,
    mut shutdown: watch::Receiver<bool>,
) {
    // 5. Wait for a key (generated or unlocked), or for shutdown.
    tokio::select! {
        _ = app_state.wait_key_ready() => {
            tracing::info!("key ready signal received");
        }
        _ = shutdown.changed() => {
            tracing::info!("shutdown before key was ready");
            return;
        }
    }

    let keypair = match keystore.keypair() {
        Ok(keypair) => keypair,
        Err(e) => {
            fail_startup(&app_state, format!("key ready but keystore is locked: {e}"));
            return;
        }
    };

    // 6. Overlay node.
    let (mut overlay, handle, overlay_events) =
        match OverlayService::new(keypair, config.network.clone()) {
            Ok(parts) => parts,
            Err(e) => {
                fail_startup(&app_state, format!("overlay creation failed: {e}"));
                return;
            }
        };
    overlay_cell.set(handle.clone());

    // 7. DHT bootstrap, then start the swarm task.
    overlay.bootstrap();
    let overlay_task = overlay.spawn(shutdown.clone());

    let listen_addrs = handle.listen_addrs().await.unwrap_or_default();
    bus.publish(Event::HostInitialized {
        peer_id: handle.local_peer_id().to_string(),
        listen_addrs,
    });
    bus.publish(Event::DhtCreated);

    // 8. Protocol handlers and background services.
    spawn_overlay_dispatcher(
        overlay_events,
        handle,
        chat,
        Arc::clone(&profile),
        Arc::clone(&pubsub),
    );
    pubsub.resume_group_topics().await;
    presence.spawn(shutdown.clone());
    profile.spawn_response_poll(shutdown);

    // 9. Running.
    bus.publish(Event::SetupCompleted);

    // Hold until the overlay winds down so shutdown can await one
    // handle for the whole P2P stack.
    let _ = overlay_task.await;
}

fn fail_startup(app_state: &AppState, error: String) {
    tracing::error!(%error, "P2P startup failed");
    app_state.record_error(error);
    app_state.set_state(DaemonState::Error);
}
