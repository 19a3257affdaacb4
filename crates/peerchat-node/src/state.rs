//! Shared application state.
//!
//! One record, guarded by a mutex held only for field access — never
//! across I/O. Transitions are performed exclusively by the app-state
//! event consumer; everything else reads.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::Notify;

use peerchat_types::DaemonState;

/// Read-only snapshot for the status endpoint.
#[derive(Clone, Debug)]
pub struct StateSnapshot {
    pub state: DaemonState,
    pub peer_id: Option<String>,
    pub listen_addrs: Vec<String>,
    pub last_error: Option<String>,
}

struct Inner {
    state: DaemonState,
    peer_id: Option<String>,
    listen_addrs: Vec<String>,
    last_error: Option<String>,
}

/// Shared lifecycle state plus the one-shot "key ready" signal.
pub struct AppState {
    inner: Mutex<Inner>,
    key_path: PathBuf,
    key_ready: Notify,
    key_ready_fired: AtomicBool,
}

impl AppState {
    pub fn new(key_path: PathBuf) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: DaemonState::Initializing,
                peer_id: None,
                listen_addrs: Vec::new(),
                last_error: None,
            }),
            key_path,
            key_ready: Notify::new(),
            key_ready_fired: AtomicBool::new(false),
        }
    }

    /// Path of the encrypted node key file.
    pub fn key_path(&self) -> &PathBuf {
        &self.key_path
    }

    pub fn state(&self) -> DaemonState {
        self.lock().state
    }

    pub fn set_state(&self, state: DaemonState) {
        let mut inner = self.lock();
        tracing::info!(from = %inner.state, to = %state, "state transition");
        inner.state = state;
    }

    pub fn record_error(&self, error: String) {
        self.lock().last_error = Some(error);
    }

    pub fn set_node_info(&self, peer_id: String, listen_addrs: Vec<String>) {
        let mut inner = self.lock();
        inner.peer_id = Some(peer_id);
        inner.listen_addrs = listen_addrs;
    }

    pub fn peer_id(&self) -> Option<String> {
        self.lock().peer_id.clone()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let inner = self.lock();
        StateSnapshot {
            state: inner.state,
            peer_id: inner.peer_id.clone(),
            listen_addrs: inner.listen_addrs.clone(),
            last_error: inner.last_error.clone(),
        }
    }

    /// Fires the key-ready signal. Idempotent; waiters past and
    /// future all observe it.
    pub fn mark_key_ready(&self) {
        self.key_ready_fired.store(true, Ordering::SeqCst);
        self.key_ready.notify_waiters();
    }

    /// Waits until the key-ready signal has fired.
    pub async fn wait_key_ready(&self) {
        loop {
            if self.key_ready_fired.load(Ordering::SeqCst) {
                return;
            }
            let notified = self.key_ready.notified();
            if self.key_ready_fired.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn initial_state_is_initializing() {
        let state = AppState::new(PathBuf::from("/tmp/key"));
        assert_eq!(state.state(), DaemonState::Initializing);
        assert!(state.snapshot().peer_id.is_none());
    }

    #[tokio::test]
    async fn key_ready_wakes_existing_waiter() {
        let state = Arc::new(AppState::new(PathBuf::from("/tmp/key")));
        let waiter = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.wait_key_ready().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        state.mark_key_ready();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn key_ready_is_idempotent_and_sticky() {
        let state = AppState::new(PathBuf::from("/tmp/key"));
        state.mark_key_ready();
        state.mark_key_ready();
        // A waiter arriving after the fire returns immediately.
        tokio::time::timeout(Duration::from_millis(100), state.wait_key_ready())
            .await
            .expect("late waiter should not block");
    }
}
