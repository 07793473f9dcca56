//! In-process real-time listeners.
//!
//! The [`ListenerHub`] fans pushed `ShellOutput` events out to every
//! listener subscribed to a destination. Each listener has a bounded
//! channel; a full channel drops the event for that listener instead of
//! blocking the session's pump. A push that reaches nobody fails, and the
//! relay buffers the chunk instead.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use protocol::ShellOutput;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::session::{DeliveryError, OutputSink, PushError};

/// Unique identifier for a listener.
pub type ListenerId = String;

/// Default channel capacity for a listener.
pub const DEFAULT_LISTENER_CAPACITY: usize = 256;

/// Statistics about a listener's message handling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListenerStats {
    /// Total events delivered.
    pub messages_sent: u64,
    /// Events dropped because the listener was slow.
    pub messages_dropped: u64,
    /// Whether the listener is currently backpressured.
    pub is_backpressured: bool,
}

/// Why one listener did not take an event.
enum Refusal {
    Full,
    Closed,
}

/// One subscriber's end of the hub.
struct ListenerHandle {
    id: ListenerId,
    tx: mpsc::Sender<ShellOutput>,
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
    backpressured: AtomicBool,
}

impl ListenerHandle {
    fn stats(&self) -> ListenerStats {
        ListenerStats {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            is_backpressured: self.backpressured.load(Ordering::Relaxed),
        }
    }

    fn try_send(&self, event: ShellOutput) -> Result<(), Refusal> {
        match self.tx.try_send(event) {
            Ok(()) => {
                self.messages_sent.fetch_add(1, Ordering::Relaxed);
                if self.backpressured.swap(false, Ordering::Relaxed) {
                    tracing::debug!(listener_id = %self.id, "Listener recovered from backpressure");
                }
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.messages_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if !self.backpressured.swap(true, Ordering::Relaxed) {
                    tracing::warn!(
                        listener_id = %self.id,
                        dropped,
                        "Listener is backpressured, dropping events"
                    );
                }
                Err(Refusal::Full)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Refusal::Closed),
        }
    }
}

/// Fan-out of pushed shell output to subscribed listeners.
pub struct ListenerHub {
    destinations: DashMap<String, HashMap<ListenerId, ListenerHandle>>,
    capacity: usize,
}

impl ListenerHub {
    /// Creates a hub whose listeners buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        Self {
            destinations: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Subscribes a new listener to `destination`.
    pub fn subscribe(&self, destination: &str) -> (ListenerId, mpsc::Receiver<ShellOutput>) {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4().to_string();
        let handle = ListenerHandle {
            id: id.clone(),
            tx,
            messages_sent: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            backpressured: AtomicBool::new(false),
        };

        self.destinations
            .entry(destination.to_string())
            .or_default()
            .insert(id.clone(), handle);
        tracing::debug!(destination = %destination, listener_id = %id, "Listener subscribed");

        (id, rx)
    }

    /// Removes a listener. Returns its statistics if it existed.
    pub fn unsubscribe(&self, destination: &str, listener_id: &str) -> Option<ListenerStats> {
        let stats = {
            let mut listeners = self.destinations.get_mut(destination)?;
            listeners.remove(listener_id).map(|h| h.stats())
        };
        self.destinations
            .remove_if(destination, |_, listeners| listeners.is_empty());
        stats
    }

    /// Number of listeners subscribed to `destination`.
    pub fn listener_count(&self, destination: &str) -> usize {
        self.destinations
            .get(destination)
            .map(|listeners| listeners.len())
            .unwrap_or(0)
    }

    /// Statistics of one listener.
    pub fn stats(&self, destination: &str, listener_id: &str) -> Option<ListenerStats> {
        self.destinations
            .get(destination)?
            .get(listener_id)
            .map(|h| h.stats())
    }
}

impl Default for ListenerHub {
    fn default() -> Self {
        Self::new(DEFAULT_LISTENER_CAPACITY)
    }
}

impl OutputSink for ListenerHub {
    fn push(&self, event: ShellOutput) -> Result<(), PushError> {
        let (delivered, backpressured, now_empty) = {
            let Some(mut listeners) = self.destinations.get_mut(&event.destination) else {
                return Err(PushError::new(DeliveryError::NoListener, event));
            };
            if listeners.is_empty() {
                return Err(PushError::new(DeliveryError::NoListener, event));
            }

            let mut delivered = 0;
            let mut backpressured = false;
            listeners.retain(|_, handle| match handle.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(Refusal::Full) => {
                    backpressured = true;
                    true
                }
                Err(Refusal::Closed) => {
                    tracing::debug!(listener_id = %handle.id, "Removed closed listener");
                    false
                }
            });
            (delivered, backpressured, listeners.is_empty())
        };

        if now_empty {
            self.destinations
                .remove_if(&event.destination, |_, listeners| listeners.is_empty());
        }

        if delivered > 0 {
            Ok(())
        } else if backpressured {
            Err(PushError::new(DeliveryError::Backpressured, event))
        } else {
            Err(PushError::new(DeliveryError::Closed, event))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(payload: &str) -> ShellOutput {
        ShellOutput::new("g1:s1", payload)
    }

    fn refusal(result: Result<(), PushError>) -> Option<DeliveryError> {
        result.err().map(|e| e.reason)
    }

    #[test]
    fn test_push_without_listener() {
        let hub = ListenerHub::default();
        assert_eq!(refusal(hub.push(event("x"))), Some(DeliveryError::NoListener));
    }

    #[tokio::test]
    async fn test_push_reaches_every_listener() {
        let hub = ListenerHub::default();
        let (_a, mut rx_a) = hub.subscribe("g1:s1");
        let (_b, mut rx_b) = hub.subscribe("g1:s1");
        let (_other, mut rx_other) = hub.subscribe("g1:s2");

        hub.push(event("ok\n")).unwrap();

        assert_eq!(rx_a.recv().await.unwrap().payload, "ok\n");
        assert_eq!(rx_b.recv().await.unwrap().payload, "ok\n");
        assert!(rx_other.try_recv().is_err());
    }

    #[test]
    fn test_full_listener_is_backpressured() {
        let hub = ListenerHub::new(1);
        let (id, _rx) = hub.subscribe("g1:s1");

        hub.push(event("first")).unwrap();
        let err = hub.push(event("second")).unwrap_err();
        assert_eq!(err.reason, DeliveryError::Backpressured);
        assert_eq!(err.event.payload, "second");

        let stats = hub.stats("g1:s1", &id).unwrap();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.messages_dropped, 1);
        assert!(stats.is_backpressured);
    }

    #[test]
    fn test_closed_listener_is_removed() {
        let hub = ListenerHub::default();
        let (_id, rx) = hub.subscribe("g1:s1");
        drop(rx);

        assert_eq!(refusal(hub.push(event("x"))), Some(DeliveryError::Closed));
        assert_eq!(hub.listener_count("g1:s1"), 0);
    }

    #[test]
    fn test_one_slow_listener_does_not_fail_push() {
        let hub = ListenerHub::new(1);
        let (_slow, _slow_rx) = hub.subscribe("g1:s1");
        hub.push(event("fill")).unwrap();

        let (_fast, mut fast_rx) = hub.subscribe("g1:s1");
        assert_eq!(refusal(hub.push(event("next"))), None);
        assert_eq!(fast_rx.try_recv().unwrap().payload, "next");
    }

    #[test]
    fn test_unsubscribe() {
        let hub = ListenerHub::default();
        let (id, _rx) = hub.subscribe("g1:s1");
        assert_eq!(hub.listener_count("g1:s1"), 1);

        let stats = hub.unsubscribe("g1:s1", &id).unwrap();
        assert_eq!(stats, ListenerStats::default());
        assert_eq!(hub.listener_count("g1:s1"), 0);
        assert!(hub.unsubscribe("g1:s1", &id).is_none());
        assert_eq!(refusal(hub.push(event("x"))), Some(DeliveryError::NoListener));
    }
}
