//! Fan-out of one produced stream to N independent live consumers.
//!
//! Each consumer gets its own unbounded channel; `publish` clones the value
//! to every live consumer and prunes the ones whose receiving side is gone,
//! so a disconnect never affects delivery to anyone else. Frames travel as
//! `Arc<FramePacket>`, so fan-out shares rather than copies the JPEG bytes.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub(crate) struct Broadcaster<T> {
    name: &'static str,
    inner: Arc<Mutex<Registry<T>>>,
}

struct Registry<T> {
    next_id: u64,
    consumers: Vec<Consumer<T>>,
    closed: bool,
}

struct Consumer<T> {
    id: u64,
    tx: UnboundedSender<T>,
}

/// Receiving side of one consumer's channel. Dropping it detaches the
/// consumer; the broadcaster prunes the dead sender on the next publish.
pub(crate) struct Subscription<T> {
    rx: UnboundedReceiver<T>,
}

impl<T> Subscription<T> {
    /// Next value, in production order. `None` once the broadcaster closes.
    pub(crate) async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Non-blocking variant for tests running without a runtime.
    #[cfg(test)]
    pub(crate) fn try_take(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> Broadcaster<T> {
    pub(crate) fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: Arc::new(Mutex::new(Registry {
                next_id: 0,
                consumers: Vec::new(),
                closed: false,
            })),
        }
    }

    /// Register a new consumer. Returns `None` once the channel has closed
    /// (pipeline ended); new connections then get an immediate clean close.
    pub(crate) fn subscribe(&self) -> Option<Subscription<T>> {
        let mut registry = self.lock();
        if registry.closed {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.consumers.push(Consumer { id, tx });
        tracing::debug!(
            "consumer #{id} joined {} ({} active)",
            self.name,
            registry.consumers.len()
        );
        self.record_gauge(registry.consumers.len());
        Some(Subscription { rx })
    }

    /// Deliver `value` to every live consumer, dropping the dead ones.
    pub(crate) fn publish(&self, value: T) {
        let mut registry = self.lock();
        let before = registry.consumers.len();
        registry
            .consumers
            .retain(|consumer| consumer.tx.send(value.clone()).is_ok());
        let dropped = before - registry.consumers.len();
        if dropped > 0 {
            tracing::debug!("pruned {dropped} disconnected consumer(s) from {}", self.name);
        }
        self.record_gauge(registry.consumers.len());
    }

    /// End the stream: every subscription sees end-of-channel and no new
    /// consumer can join.
    pub(crate) fn close(&self) {
        let mut registry = self.lock();
        registry.closed = true;
        registry.consumers.clear();
        self.record_gauge(0);
    }

    pub(crate) fn consumer_count(&self) -> usize {
        self.lock().consumers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_gauge(&self, count: usize) {
        metrics::gauge!("larva_broadcast_consumers", "channel" => self.name).set(count as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivers_in_production_order_to_every_consumer() {
        let broadcaster: Broadcaster<u32> = Broadcaster::new("test");
        let mut subs: Vec<_> = (0..3)
            .map(|_| broadcaster.subscribe().expect("open broadcaster"))
            .collect();

        for value in 1..=5 {
            broadcaster.publish(value);
        }

        for sub in &mut subs {
            for expected in 1..=5 {
                assert_eq!(sub.rx.try_recv().ok(), Some(expected));
            }
            assert!(sub.rx.try_recv().is_err());
        }
    }

    #[test]
    fn dropping_one_consumer_does_not_affect_the_rest() {
        let broadcaster: Broadcaster<u32> = Broadcaster::new("test");
        let mut keep_a = broadcaster.subscribe().expect("subscribe");
        let dropped = broadcaster.subscribe().expect("subscribe");
        let mut keep_b = broadcaster.subscribe().expect("subscribe");

        broadcaster.publish(1);
        drop(dropped);
        broadcaster.publish(2);
        broadcaster.publish(3);

        assert_eq!(broadcaster.consumer_count(), 2);
        for sub in [&mut keep_a, &mut keep_b] {
            for expected in 1..=3 {
                assert_eq!(sub.rx.try_recv().ok(), Some(expected));
            }
        }
    }

    #[test]
    fn close_ends_every_subscription_and_blocks_new_ones() {
        let broadcaster: Broadcaster<u32> = Broadcaster::new("test");
        let mut sub = broadcaster.subscribe().expect("subscribe");
        broadcaster.publish(9);
        broadcaster.close();

        assert_eq!(sub.rx.try_recv().ok(), Some(9));
        // Channel is disconnected, not merely empty.
        assert!(matches!(
            sub.rx.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(broadcaster.subscribe().is_none());
    }
}
