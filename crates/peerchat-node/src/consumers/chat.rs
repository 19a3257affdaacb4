//! Chat persistence consumer.
//!
//! Encrypts message bodies under the data key and writes them to the
//! store. Subscribes to both directions of both message kinds, so
//! every message that crossed the wire ends up in history.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use peerchat_bus::{Event, EventBus, EventKind};
use peerchat_crypto::{aead, DEFAULT_CRYPTO_PARAMS};
use peerchat_storage::MessageRepository;
use peerchat_types::{ChatMessage, GroupChatMessage, StoredGroupMessage, StoredMessage};

use crate::identity::KeyStore;

/// Spawns the chat persistence consumer.
pub fn spawn_chat_consumer(
    keystore: Arc<KeyStore>,
    message_repo: MessageRepository,
    bus: &EventBus,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let mut events = bus.subscribe(&[
        EventKind::MessageSent,
        EventKind::MessageReceived,
        EventKind::GroupChatMessageSent,
        EventKind::GroupChatMessageReceived,
    ]);

    tokio::spawn(async move {
        tracing::debug!("chat consumer started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::debug!("chat consumer stopping");
                        return;
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else { return };
                    handle_event(&keystore, &message_repo, event);
                }
            }
        }
    })
}

fn handle_event(keystore: &KeyStore, message_repo: &MessageRepository, event: Event) {
    match event {
        Event::MessageSent { message } | Event::MessageReceived { message } => {
            save_direct_message(keystore, message_repo, &message);
        }
        Event::GroupChatMessageSent { message } | Event::GroupChatMessageReceived { message } => {
            save_group_message(keystore, message_repo, &message);
        }
        other => {
            tracing::trace!(?other, "ignoring event");
        }
    }
}

fn save_direct_message(
    keystore: &KeyStore,
    message_repo: &MessageRepository,
    message: &ChatMessage,
) {
    let ciphertext = match encrypt_body(keystore, message.content.as_bytes()) {
        Some(ciphertext) => ciphertext,
        None => return,
    };

    let result = message_repo.store(&StoredMessage {
        id: 0,
        sender_peer_id: message.sender_peer_id.clone(),
        recipient_peer_id: message.recipient_peer_id.clone(),
        send_time: message.send_time,
        ciphertext,
        is_outgoing: message.is_outgoing,
    });

    match result {
        Ok(id) => tracing::debug!(id, peer = %message.recipient_peer_id, "message stored"),
        Err(e) => tracing::error!(%e, "failed to store message"),
    }
}

fn save_group_message(
    keystore: &KeyStore,
    message_repo: &MessageRepository,
    message: &GroupChatMessage,
) {
    let ciphertext = match encrypt_body(keystore, message.message.as_bytes()) {
        Some(ciphertext) => ciphertext,
        None => return,
    };

    let result = message_repo.store_group_message(&StoredGroupMessage {
        id: 0,
        group_id: message.group_id.clone(),
        sender_peer_id: message.sender_peer_id.clone(),
        encrypted_content: ciphertext,
        sent_at: message.time,
    });

    if let Err(e) = result {
        tracing::error!(%e, group_id = %message.group_id, "failed to store group message");
    }
}

fn encrypt_body(keystore: &KeyStore, plaintext: &[u8]) -> Option<Vec<u8>> {
    let data_key = match keystore.data_key() {
        Ok(key) => key,
        Err(e) => {
            tracing::error!(%e, "no data key; dropping message instead of storing plaintext");
            return None;
        }
    };
    match aead::encrypt_with_key(&data_key, plaintext, &DEFAULT_CRYPTO_PARAMS) {
        Ok(ciphertext) => Some(ciphertext),
        Err(e) => {
            tracing::error!(%e, "failed to encrypt message body");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use peerchat_storage::Database;
    use std::time::Duration;

    #[tokio::test]
    async fn sent_message_is_persisted_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = Arc::new(KeyStore::new(
            dir.path().join("private-key.key"),
            dir.path().to_path_buf(),
        ));
        keystore.generate_and_save("pw").unwrap();

        let db = Database::open_in_memory().unwrap();
        let repo = MessageRepository::new(db);
        let bus = EventBus::new();
        let (_tx, shutdown) = watch::channel(false);
        let _task = spawn_chat_consumer(Arc::clone(&keystore), repo.clone(), &bus, shutdown);

        bus.publish(Event::MessageSent {
            message: ChatMessage {
                sender_peer_id: "me".into(),
                recipient_peer_id: "them".into(),
                content: "round trip".into(),
                send_time: Utc::now(),
                is_outgoing: true,
            },
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let rows = repo.messages_with_peer("them", 10).unwrap();
        assert_eq!(rows.len(), 1);
        // Stored body is ciphertext, not the plaintext...
        assert_ne!(rows[0].ciphertext, b"round trip");
        // ...and decrypts back to the original under the data key.
        let plaintext = aead::decrypt_with_key(
            &keystore.data_key().unwrap(),
            &rows[0].ciphertext,
            &DEFAULT_CRYPTO_PARAMS,
        )
        .unwrap();
        assert_eq!(plaintext, b"round trip");
    }

    #[tokio::test]
    async fn locked_keystore_drops_message() {
        let dir = tempfile::tempdir().unwrap();
        let keystore = Arc::new(KeyStore::new(
            dir.path().join("private-key.key"),
            dir.path().to_path_buf(),
        ));

        let db = Database::open_in_memory().unwrap();
        let repo = MessageRepository::new(db);
        let bus = EventBus::new();
        let (_tx, shutdown) = watch::channel(false);
        let _task = spawn_chat_consumer(keystore, repo.clone(), &bus, shutdown);

        bus.publish(Event::MessageReceived {
            message: ChatMessage {
                sender_peer_id: "them".into(),
                recipient_peer_id: "me".into(),
                content: "never stored in the clear".into(),
                send_time: Utc::now(),
                is_outgoing: false,
            },
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(repo.messages_with_peer("them", 10).unwrap().is_empty());
    }
}
