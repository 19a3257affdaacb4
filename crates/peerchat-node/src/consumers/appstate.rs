//! App-state machine consumer.
//!
//! The only component that mutates the lifecycle state. Subscribes
//! to the eight lifecycle events and advances the state machine:
//!
//! ```text
//! Initializing → {WaitingForKey | WaitingForPassword}
//!              → InitializingP2P → Running
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use peerchat_bus::{Event, EventBus, EventKind};
use peerchat_types::DaemonState;

use crate::identity::KeyStore;
use crate::state::AppState;

/// Spawns the state-machine consumer task.
pub fn spawn_app_state_consumer(
    app_state: Arc<AppState>,
    keystore: Arc<KeyStore>,
    bus: &EventBus,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut events = bus.subscribe(&[
        EventKind::KeyGenerationFailed,
        EventKind::KeyLoadingFailed,
        EventKind::KeyGenerated,
        EventKind::UserAuthenticated,
        EventKind::ApiStarted,
        EventKind::HostInitialized,
        EventKind::DhtCreated,
        EventKind::SetupCompleted,
    ]);

    tokio::spawn(async move {
        tracing::debug!("app state consumer started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::debug!("app state consumer stopping");
                        return;
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else { return };
                    handle_event(&app_state, &keystore, event);
                }
            }
        }
    })
}

fn handle_event(app_state: &AppState, keystore: &KeyStore, event: Event) {
    match event {
        Event::KeyGenerationFailed { error } => {
            tracing::error!(%error, "key generation failed");
            app_state.record_error(error);
            app_state.set_state(DaemonState::Error);
        }

        Event::KeyLoadingFailed { error } => {
            // A wrong password is not fatal; stay waiting.
            tracing::warn!(%error, "key unlock failed");
            app_state.record_error(error);
        }

        Event::KeyGenerated | Event::UserAuthenticated => {
            app_state.set_state(DaemonState::InitializingP2p);
            app_state.mark_key_ready();
        }

        Event::ApiStarted => {
            if keystore.key_exists() {
                tracing::info!("key file found, waiting for password via API");
                app_state.set_state(DaemonState::WaitingForPassword);
            } else {
                tracing::info!("no key file, waiting for key setup via API");
                app_state.set_state(DaemonState::WaitingForKey);
            }
        }

        Event::HostInitialized {
            peer_id,
            listen_addrs,
        } => {
            tracing::info!(%peer_id, "overlay host initialized");
            app_state.set_node_info(peer_id, listen_addrs);
        }

        Event::DhtCreated => {
            tracing::info!("DHT created and bootstrapping");
        }

        Event::SetupCompleted => {
            app_state.set_state(DaemonState::Running);
        }

        other => {
            tracing::trace!(?other, "ignoring event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fixture(dir: &std::path::Path) -> (Arc<AppState>, Arc<KeyStore>, Arc<EventBus>) {
        let key_path = dir.join("private-key.key");
        (
            Arc::new(AppState::new(key_path.clone())),
            Arc::new(KeyStore::new(key_path, dir.to_path_buf())),
            Arc::new(EventBus::new()),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn api_started_without_key_waits_for_key() {
        let dir = tempfile::tempdir().unwrap();
        let (app_state, keystore, bus) = fixture(dir.path());
        let (_tx, shutdown) = watch::channel(false);
        let _task = spawn_app_state_consumer(
            Arc::clone(&app_state),
            keystore,
            &bus,
            shutdown,
        );

        bus.publish(Event::ApiStarted);
        settle().await;
        assert_eq!(app_state.state(), DaemonState::WaitingForKey);
    }

    #[tokio::test]
    async fn api_started_with_key_waits_for_password() {
        let dir = tempfile::tempdir().unwrap();
        let (app_state, keystore, bus) = fixture(dir.path());
        keystore.generate_and_save("pw").unwrap();

        let (_tx, shutdown) = watch::channel(false);
        let _task = spawn_app_state_consumer(
            Arc::clone(&app_state),
            keystore,
            &bus,
            shutdown,
        );

        bus.publish(Event::ApiStarted);
        settle().await;
        assert_eq!(app_state.state(), DaemonState::WaitingForPassword);
    }

    #[tokio::test]
    async fn authentication_fires_key_ready_and_advances() {
        let dir = tempfile::tempdir().unwrap();
        let (app_state, keystore, bus) = fixture(dir.path());
        let (_tx, shutdown) = watch::channel(false);
        let _task = spawn_app_state_consumer(
            Arc::clone(&app_state),
            keystore,
            &bus,
            shutdown,
        );

        bus.publish(Event::UserAuthenticated);
        tokio::time::timeout(Duration::from_secs(1), app_state.wait_key_ready())
            .await
            .expect("key ready should fire");
        assert_eq!(app_state.state(), DaemonState::InitializingP2p);

        bus.publish(Event::SetupCompleted);
        settle().await;
        assert_eq!(app_state.state(), DaemonState::Running);
    }

    #[tokio::test]
    async fn unlock_failure_keeps_waiting_state() {
        let dir = tempfile::tempdir().unwrap();
        let (app_state, keystore, bus) = fixture(dir.path());
        keystore.generate_and_save("pw").unwrap();

        let (_tx, shutdown) = watch::channel(false);
        let _task = spawn_app_state_consumer(
            Arc::clone(&app_state),
            keystore,
            &bus,
            shutdown,
        );

        bus.publish(Event::ApiStarted);
        settle().await;
        bus.publish(Event::KeyLoadingFailed {
            error: "bad password".into(),
        });
        settle().await;

        assert_eq!(app_state.state(), DaemonState::WaitingForPassword);
        assert_eq!(app_state.snapshot().last_error.as_deref(), Some("bad password"));
    }
}
