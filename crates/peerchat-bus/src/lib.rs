//! In-process typed publish/subscribe bus.
//!
//! Protocol handlers publish [`Event`]s; consumers (persistence, the
//! app-state machine, the UI push channel) subscribe by
//! [`EventKind`]. Publishing is non-blocking: each subscription has
//! its own unbounded queue, so a slow consumer cannot stall a
//! handler or another consumer. Delivery is FIFO per
//! (publisher, subscription) pair, at-least-once.

pub mod event;

pub use event::{Event, EventKind};

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Process-local event bus.
///
/// Cheap to share behind an `Arc`; `publish` takes `&self`.
#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<HashMap<EventKind, Vec<mpsc::UnboundedSender<Event>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription for the given event kinds and
    /// returns its delivery queue.
    pub fn subscribe(&self, kinds: &[EventKind]) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.lock();
        for kind in kinds {
            subscribers.entry(*kind).or_default().push(tx.clone());
        }
        rx
    }

    /// Publishes an event to every subscription registered for its
    /// kind. Best-effort per subscriber: a dropped receiver is
    /// pruned, and no send blocks the publisher.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        tracing::trace!(?kind, "publishing event");

        let mut subscribers = self.lock();
        if let Some(queues) = subscribers.get_mut(&kind) {
            queues.retain(|queue| queue.send(event.clone()).is_ok());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EventKind, Vec<mpsc::UnboundedSender<Event>>>> {
        match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use peerchat_types::ChatMessage;

    fn message_event(content: &str) -> Event {
        Event::MessageReceived {
            message: ChatMessage {
                sender_peer_id: "sender".into(),
                recipient_peer_id: "recipient".into(),
                content: content.into(),
                send_time: Utc::now(),
                is_outgoing: false,
            },
        }
    }

    #[tokio::test]
    async fn subscriber_receives_matching_kind() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(&[EventKind::MessageReceived]);

        bus.publish(message_event("hello"));

        match rx.recv().await.unwrap() {
            Event::MessageReceived { message } => assert_eq!(message.content, "hello"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn subscriber_does_not_receive_other_kinds() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(&[EventKind::SetupCompleted]);

        bus.publish(message_event("hello"));
        bus.publish(Event::SetupCompleted);

        // The first delivered event is the subscribed kind, not the
        // chat message published before it.
        assert!(matches!(rx.recv().await.unwrap(), Event::SetupCompleted));
    }

    #[tokio::test]
    async fn delivery_is_fifo_per_subscription() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(&[EventKind::MessageReceived]);

        for i in 0..10 {
            bus.publish(message_event(&format!("msg-{i}")));
        }

        for i in 0..10 {
            match rx.recv().await.unwrap() {
                Event::MessageReceived { message } => {
                    assert_eq!(message.content, format!("msg-{i}"));
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let rx_dropped = bus.subscribe(&[EventKind::MessageReceived]);
        let mut rx_alive = bus.subscribe(&[EventKind::MessageReceived]);

        drop(rx_dropped);
        bus.publish(message_event("still delivered"));

        match rx_alive.recv().await.unwrap() {
            Event::MessageReceived { message } => {
                assert_eq!(message.content, "still delivered");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn one_subscription_can_cover_many_kinds() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(&[EventKind::MessageSent, EventKind::MessageReceived]);

        bus.publish(message_event("a"));
        bus.publish(Event::MessageSent {
            message: ChatMessage {
                sender_peer_id: "me".into(),
                recipient_peer_id: "them".into(),
                content: "b".into(),
                send_time: Utc::now(),
                is_outgoing: true,
            },
        });

        assert!(matches!(rx.recv().await.unwrap(), Event::MessageReceived { .. }));
        assert!(matches!(rx.recv().await.unwrap(), Event::MessageSent { .. }));
    }
}
