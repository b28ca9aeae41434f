//! Lossy publish-subscribe bus for agent events
//!
//! Each subscriber owns an independent bounded buffer. Publishing never
//! blocks: a full subscriber simply misses the event. Subscribers that need
//! lossless delivery must drain promptly.

use crate::event::AgentEvent;
use std::sync::RwLock;
use tokio::sync::mpsc;

/// Buffer size handed to subscribers that don't specify one.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 100;

struct BusInner {
    subscribers: Vec<mpsc::Sender<AgentEvent>>,
    closed: bool,
}

/// Fan-out bus for [`AgentEvent`]s.
pub struct EventBus {
    inner: RwLock<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(BusInner {
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }

    /// Subscribe with a bounded buffer of `buffer` events.
    ///
    /// If the bus is already closed the returned receiver yields nothing.
    pub fn subscribe(&self, buffer: usize) -> mpsc::Receiver<AgentEvent> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        if let Ok(mut inner) = self.inner.write() {
            if !inner.closed {
                inner.subscribers.push(tx);
            }
        }
        rx
    }

    /// Publish an event to every subscriber, non-blocking.
    ///
    /// Subscribers with full buffers miss the event; disconnected
    /// subscribers are pruned.
    pub fn publish(&self, event: AgentEvent) {
        let Ok(mut inner) = self.inner.write() else {
            return;
        };
        if inner.closed {
            return;
        }
        inner.subscribers.retain(|tx| {
            match tx.try_send(event.clone()) {
                Ok(()) => true,
                // Full buffer: drop for this subscriber only.
                Err(mpsc::error::TrySendError::Full(_)) => true,
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Close the bus. Idempotent; drops all subscriber channels and turns
    /// further publishes into silent no-ops.
    pub fn close(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.closed = true;
            inner.subscribers.clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.read().map(|i| i.closed).unwrap_or(true)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.read().map(|i| i.subscribers.len()).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(8);

        bus.publish(AgentEvent::AgentStart);
        bus.publish(AgentEvent::TurnStart);

        assert!(matches!(rx.recv().await, Some(AgentEvent::AgentStart)));
        assert!(matches!(rx.recv().await, Some(AgentEvent::TurnStart)));
    }

    #[tokio::test]
    async fn slow_subscriber_loses_events_fast_one_does_not() {
        let bus = EventBus::new();
        let mut slow = bus.subscribe(1);
        let mut fast = bus.subscribe(16);

        for _ in 0..5 {
            bus.publish(AgentEvent::TurnStart);
        }

        // Slow buffer held exactly one event.
        assert!(slow.recv().await.is_some());
        assert!(slow.try_recv().is_err());

        let mut seen = 0;
        while fast.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, 5);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_silences_publish() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe(4);

        bus.close();
        bus.close();
        assert!(bus.is_closed());

        bus.publish(AgentEvent::AgentStart);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn subscribe_after_close_yields_nothing() {
        let bus = EventBus::new();
        bus.close();
        let mut rx = bus.subscribe(4);
        bus.publish(AgentEvent::AgentStart);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe(4);
        drop(rx);
        bus.publish(AgentEvent::AgentStart);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
