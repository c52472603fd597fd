//! Identity-addressed event dispatch.
//!
//! The dispatcher is the write side of the live-notification surface:
//! business logic hands it an [`Event`] and it delivers the event to every
//! channel currently registered for the target identity. Delivery is
//! best-effort and at-most-once: no queue outlives the emit call, no retry
//! happens, and the emitter never learns whether a client was connected.
//!
//! A failed send means the channel's receiving task is gone (half-closed
//! socket, disconnect race); that channel is unregistered on the spot and
//! the remaining channels still receive the event. Because each channel
//! drains its own queue in its own socket task, a slow client never stalls
//! fan-out to the identity's other devices, and per-channel delivery order
//! matches emission order.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::registry::ConnectionRegistry;
use crate::types::Event;

/// Delivers events to every live channel of their target identity.
///
/// Cheap to clone; shares the registry.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl EventDispatcher {
    /// Creates a dispatcher over the given registry.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Emits an event to the target identity's channels.
    ///
    /// Returns the number of channels the event was queued on. Zero is not
    /// an error: an identity with no open channels simply misses the
    /// notification.
    pub fn emit(&self, event: Event) -> usize {
        let channels = self.registry.channels_for(&event.target_user_id);

        if channels.is_empty() {
            trace!(
                target = %event.target_user_id,
                kind = event.kind.as_str(),
                "No channels for target, event dropped"
            );
            return 0;
        }

        let mut delivered = 0;

        for (channel_id, sender) in channels {
            match sender.send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(_) => {
                    // The receiving task is gone; prune the channel and keep
                    // fanning out.
                    debug!(
                        target = %event.target_user_id,
                        %channel_id,
                        "Dropping dead channel during dispatch"
                    );
                    self.registry.unregister(channel_id);
                }
            }
        }

        trace!(
            target = %event.target_user_id,
            kind = event.kind.as_str(),
            delivered,
            "Event dispatched"
        );

        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::EventReceiver;
    use crate::types::EventKind;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn setup() -> (Arc<ConnectionRegistry>, EventDispatcher) {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = EventDispatcher::new(Arc::clone(&registry));
        (registry, dispatcher)
    }

    fn open_channel(registry: &ConnectionRegistry, user_id: &str) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(user_id, tx);
        rx
    }

    #[tokio::test]
    async fn emit_delivers_to_every_channel_of_the_target() {
        let (registry, dispatcher) = setup();
        let mut phone = open_channel(&registry, "user-1");
        let mut laptop = open_channel(&registry, "user-1");
        let mut other = open_channel(&registry, "user-2");

        let delivered = dispatcher.emit(Event::new_match("user-1", json!({"match_id": "m-1"})));
        assert_eq!(delivered, 2);

        // Both of user-1's devices observe the event exactly once.
        assert_eq!(phone.recv().await.unwrap().kind, EventKind::NewMatch);
        assert_eq!(laptop.recv().await.unwrap().kind, EventKind::NewMatch);
        assert!(phone.try_recv().is_err());
        assert!(laptop.try_recv().is_err());

        // A differently-identified channel sees nothing.
        assert!(other.try_recv().is_err());
    }

    #[tokio::test]
    async fn emit_to_identity_with_no_channels_is_silent() {
        let (_registry, dispatcher) = setup();

        let delivered = dispatcher.emit(Event::new_message("nobody", json!({})));
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn emit_prunes_dead_channels_and_still_delivers_to_live_ones() {
        let (registry, dispatcher) = setup();

        let dead_rx = open_channel(&registry, "user-1");
        let mut live_rx = open_channel(&registry, "user-1");
        assert_eq!(registry.connection_count(), 2);

        // Simulate a half-closed socket: the receiving task is gone.
        drop(dead_rx);

        let delivered = dispatcher.emit(Event::new_message("user-1", json!({"text": "hi"})));
        assert_eq!(delivered, 1);
        assert!(live_rx.recv().await.is_some());

        // The dead channel was unregistered during dispatch.
        assert_eq!(registry.connection_count(), 1);
    }

    #[tokio::test]
    async fn per_channel_delivery_order_matches_emission_order() {
        let (registry, dispatcher) = setup();
        let mut rx = open_channel(&registry, "user-1");

        for i in 0..5 {
            dispatcher.emit(Event::new_message("user-1", json!({"seq": i})));
        }

        for i in 0..5 {
            let event = rx.recv().await.unwrap();
            assert_eq!(event.payload["seq"], i);
        }
    }

    #[tokio::test]
    async fn events_carry_their_own_target() {
        let (registry, dispatcher) = setup();
        let mut rx = open_channel(&registry, "user-1");

        dispatcher.emit(Event::new_match("user-1", json!({})));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.target_user_id, "user-1");
    }

    /// The product scenario: a match between U1 (standard) and U2 (premium)
    /// produces one `new_match` per participant; each connected device
    /// receives exactly the event addressed to its own identity.
    #[tokio::test]
    async fn match_between_two_users_notifies_each_exactly_once() {
        let (registry, dispatcher) = setup();
        let mut u1 = open_channel(&registry, "u1");
        let mut u2 = open_channel(&registry, "u2");

        let payload = json!({"match_id": "m-7", "participants": ["u1", "u2"]});
        dispatcher.emit(Event::new_match("u1", payload.clone()));
        dispatcher.emit(Event::new_match("u2", payload));

        let e1 = u1.recv().await.unwrap();
        let e2 = u2.recv().await.unwrap();

        assert_eq!(e1.kind, EventKind::NewMatch);
        assert_eq!(e1.target_user_id, "u1");
        assert_eq!(e2.kind, EventKind::NewMatch);
        assert_eq!(e2.target_user_id, "u2");

        assert!(u1.try_recv().is_err());
        assert!(u2.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregistered_channel_receives_no_further_events() {
        let (registry, dispatcher) = setup();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = registry.register("user-1", tx);
        let mut still_open = open_channel(&registry, "user-1");

        dispatcher.emit(Event::new_message("user-1", json!({"seq": 0})));
        assert!(rx.recv().await.is_some());

        registry.unregister(id);
        dispatcher.emit(Event::new_message("user-1", json!({"seq": 1})));

        // The remaining channel still gets the second event.
        assert!(still_open.recv().await.is_some());
        assert!(still_open.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }
}
