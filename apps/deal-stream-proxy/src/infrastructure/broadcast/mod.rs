//! Subscriber Fan-out
//!
//! Distributes relay payloads to every attached subscriber.
//!
//! # Architecture
//!
//! The `BroadcastHub` keeps the open set of subscribers plus the last
//! published payload of each kind:
//! - Price snapshots for tracked symbols
//! - Raw decoded messages for untracked symbols
//!
//! A newly attached subscriber immediately receives the last payload of each
//! kind. Delivery never blocks: a subscriber whose buffer is full misses
//! that payload, the failure is counted, and it stays registered. A closed
//! subscriber is detached.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;

use crate::application::ports::{DeliveryError, Payload, PayloadKind, SubscriberId, SubscriberSink};
use crate::infrastructure::config::BroadcastSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Channel Sink
// =============================================================================

impl SubscriberSink for mpsc::Sender<Arc<Payload>> {
    fn deliver(&self, payload: Arc<Payload>) -> Result<(), DeliveryError> {
        self.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Full,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Configuration for subscriber channels.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastConfig {
    /// Buffered payloads per channel subscriber.
    pub subscriber_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_capacity: 256,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            subscriber_capacity: settings.subscriber_capacity,
        }
    }
}

#[derive(Default)]
struct LastPayloads {
    snapshot: Option<Arc<Payload>>,
    raw: Option<Arc<Payload>>,
}

impl LastPayloads {
    fn remember(&mut self, payload: &Arc<Payload>) {
        match payload.kind() {
            PayloadKind::Snapshot => self.snapshot = Some(Arc::clone(payload)),
            PayloadKind::Raw => self.raw = Some(Arc::clone(payload)),
        }
    }

    fn iter(&self) -> impl Iterator<Item = &Arc<Payload>> {
        self.snapshot.iter().chain(self.raw.iter())
    }
}

/// Fan-out of relay payloads to attached subscribers.
///
/// # Example
///
/// ```rust
/// use deal_stream_proxy::infrastructure::broadcast::{BroadcastConfig, BroadcastHub};
///
/// let hub = BroadcastHub::new(BroadcastConfig::default());
///
/// // Attach a bounded channel subscriber
/// let (id, _rx) = hub.attach_channel(16);
///
/// // In the relay task, publish payloads
/// // hub.publish(Payload::Snapshot(store.snapshot()));
///
/// hub.detach(id);
/// ```
pub struct BroadcastHub {
    config: BroadcastConfig,
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn SubscriberSink>>>,
    last: RwLock<LastPayloads>,
    published: AtomicU64,
    delivery_failures: AtomicU64,
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("config", &self.config)
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl BroadcastHub {
    /// Create a hub with no subscribers.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            config,
            subscribers: RwLock::new(HashMap::new()),
            last: RwLock::new(LastPayloads::default()),
            published: AtomicU64::new(0),
            delivery_failures: AtomicU64::new(0),
        }
    }

    /// Create a hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    // =========================================================================
    // Subscribers
    // =========================================================================

    /// Register a subscriber and replay the last payload of each kind to it.
    pub fn attach(&self, sink: Arc<dyn SubscriberSink>) -> SubscriberId {
        let id = SubscriberId::new();

        // Lock order is `last` then `subscribers`, same as `publish`.
        let last = self.last.read();
        for payload in last.iter() {
            if let Err(e) = sink.deliver(Arc::clone(payload)) {
                self.count_failures(payload.kind(), 1);
                tracing::warn!(subscriber = %id, error = %e, "Replay to new subscriber failed");
            }
        }
        let count = {
            let mut subscribers = self.subscribers.write();
            subscribers.insert(id, sink);
            subscribers.len()
        };
        drop(last);
        metrics::set_subscribers(count);
        tracing::debug!(subscriber = %id, subscribers = count, "Subscriber attached");
        id
    }

    /// Attach a bounded channel subscriber.
    ///
    /// A capacity of zero uses the configured default.
    pub fn attach_channel(&self, capacity: usize) -> (SubscriberId, mpsc::Receiver<Arc<Payload>>) {
        let capacity = if capacity == 0 {
            self.config.subscriber_capacity
        } else {
            capacity
        };
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (self.attach(Arc::new(tx)), rx)
    }

    /// Remove a subscriber. Unknown ids are ignored.
    ///
    /// Returns whether the subscriber was registered.
    pub fn detach(&self, id: SubscriberId) -> bool {
        let (removed, count) = {
            let mut subscribers = self.subscribers.write();
            let removed = subscribers.remove(&id).is_some();
            (removed, subscribers.len())
        };
        if removed {
            metrics::set_subscribers(count);
            tracing::debug!(subscriber = %id, subscribers = count, "Subscriber detached");
        }
        removed
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Publish a payload to every subscriber and remember it as the last of
    /// its kind.
    ///
    /// Returns the number of subscribers that accepted it.
    pub fn publish(&self, payload: Payload) -> usize {
        let payload = Arc::new(payload);
        let kind = payload.kind();
        let subscribers: Vec<(SubscriberId, Arc<dyn SubscriberSink>)> = {
            let mut last = self.last.write();
            last.remember(&payload);
            self.subscribers
                .read()
                .iter()
                .map(|(id, sink)| (*id, Arc::clone(sink)))
                .collect()
        };

        let mut delivered = 0;
        let mut failed = 0_u64;
        let mut closed = Vec::new();
        for (id, sink) in subscribers {
            match sink.deliver(Arc::clone(&payload)) {
                Ok(()) => delivered += 1,
                Err(DeliveryError::Closed) => closed.push(id),
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        subscriber = %id,
                        kind = kind.as_str(),
                        error = %e,
                        "Delivery to subscriber failed"
                    );
                }
            }
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        metrics::record_payload_published(kind);
        if failed > 0 {
            self.count_failures(kind, failed);
        }
        if !closed.is_empty() {
            self.prune(&closed);
        }
        delivered
    }

    /// Drop subscribers whose consumer went away.
    fn prune(&self, closed: &[SubscriberId]) {
        let count = {
            let mut subscribers = self.subscribers.write();
            for id in closed {
                subscribers.remove(id);
            }
            subscribers.len()
        };
        metrics::set_subscribers(count);
        tracing::debug!(
            closed = closed.len(),
            subscribers = count,
            "Closed subscribers detached"
        );
    }

    fn count_failures(&self, kind: PayloadKind, count: u64) {
        self.delivery_failures.fetch_add(count, Ordering::Relaxed);
        metrics::record_delivery_failures(kind, count);
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current view for collaborators: the last snapshot if it tracks any
    /// symbol, else the last raw message.
    #[must_use]
    pub fn current_view(&self) -> Option<Arc<Payload>> {
        let last = self.last.read();
        let tracked_snapshot = last
            .snapshot
            .as_ref()
            .filter(|payload| payload.snapshot().is_some_and(|s| !s.prices.is_empty()));
        tracked_snapshot.or(last.raw.as_ref()).map(Arc::clone)
    }

    /// Last published snapshot payload.
    #[must_use]
    pub fn last_snapshot(&self) -> Option<Arc<Payload>> {
        self.last.read().snapshot.clone()
    }

    /// Get statistics about the hub.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            subscribers: self.subscriber_count(),
            published: self.published.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures.load(Ordering::Relaxed),
        }
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Statistics about the hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Attached subscribers.
    pub subscribers: usize,
    /// Payloads published.
    pub published: u64,
    /// Failed deliveries.
    pub delivery_failures: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::application::ports::RawMessage;
    use crate::domain::pricing::{PriceSnapshot, PriceStore};
    use crate::domain::streaming::DecodedWrapper;
    use crate::domain::subscription::SubscriptionSet;

    fn snapshot(symbols: &[&str]) -> Payload {
        let mut store = PriceStore::new();
        store.rebuild(&SubscriptionSet::from_raw(symbols.iter().copied()));
        Payload::Snapshot(store.snapshot())
    }

    fn raw(channel: &str) -> Payload {
        Payload::Raw(RawMessage::now(DecodedWrapper {
            channel: Some(channel.to_string()),
            ..Default::default()
        }))
    }

    #[derive(Default)]
    struct FullSink;

    impl SubscriberSink for FullSink {
        fn deliver(&self, _payload: Arc<Payload>) -> Result<(), DeliveryError> {
            Err(DeliveryError::Full)
        }
    }

    #[test]
    fn hub_creation() {
        let hub = BroadcastHub::with_defaults();
        assert_eq!(hub.subscriber_count(), 0);
        assert!(hub.current_view().is_none());
        assert_eq!(hub.stats(), BroadcastStats::default());
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let hub = BroadcastHub::with_defaults();
        let (_a, mut rx1) = hub.attach_channel(8);
        let (_b, mut rx2) = hub.attach_channel(8);

        assert_eq!(hub.publish(snapshot(&["BTCUSDT"])), 2);

        let r1 = rx1.recv().await.unwrap();
        let r2 = rx2.recv().await.unwrap();
        assert!(Arc::ptr_eq(&r1, &r2));
        assert_eq!(r1.kind(), PayloadKind::Snapshot);
    }

    #[tokio::test]
    async fn attach_replays_last_payload_of_each_kind() {
        let hub = BroadcastHub::with_defaults();
        hub.publish(raw("spot@a@XRPUSDT"));
        hub.publish(snapshot(&["BTCUSDT"]));
        hub.publish(raw("spot@a@DOGEUSDT"));

        let (_id, mut rx) = hub.attach_channel(8);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.kind(), PayloadKind::Snapshot);
        match second.as_ref() {
            Payload::Raw(message) => {
                assert_eq!(message.wrapper.channel.as_deref(), Some("spot@a@DOGEUSDT"));
            }
            Payload::Snapshot(_) => panic!("expected raw payload"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn failed_delivery_keeps_subscriber() {
        let hub = BroadcastHub::with_defaults();
        let id = hub.attach(Arc::new(FullSink));

        assert_eq!(hub.publish(snapshot(&["BTCUSDT"])), 0);
        assert_eq!(hub.publish(snapshot(&["BTCUSDT"])), 0);

        assert_eq!(hub.subscriber_count(), 1);
        let stats = hub.stats();
        assert_eq!(stats.published, 2);
        assert_eq!(stats.delivery_failures, 2);
        assert!(hub.detach(id));
    }

    #[test]
    fn dropped_receivers_are_detached() {
        let hub = BroadcastHub::with_defaults();
        let (_kept, mut rx) = hub.attach_channel(4);
        for _ in 0..100 {
            let (_id, dropped) = hub.attach_channel(4);
            drop(dropped);
        }
        assert_eq!(hub.subscriber_count(), 101);

        for _ in 0..10 {
            assert_eq!(hub.publish(raw("a")), 1);
            let _ = rx.try_recv();
        }

        let stats = hub.stats();
        assert_eq!(stats.subscribers, 1);
        assert_eq!(stats.delivery_failures, 0);
    }

    #[test]
    fn full_channel_reports_failure() {
        let hub = BroadcastHub::with_defaults();
        let (_id, _rx) = hub.attach_channel(1);

        assert_eq!(hub.publish(raw("a")), 1);
        assert_eq!(hub.publish(raw("b")), 0);
        assert_eq!(hub.stats().delivery_failures, 1);
    }

    #[test]
    fn detach_is_idempotent() {
        let hub = BroadcastHub::with_defaults();
        let (id, _rx) = hub.attach_channel(4);

        assert!(hub.detach(id));
        assert!(!hub.detach(id));
        assert!(!hub.detach(SubscriberId::new()));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn current_view_prefers_tracked_snapshot() {
        let hub = BroadcastHub::with_defaults();
        hub.publish(raw("spot@a@XRPUSDT"));
        hub.publish(Payload::Snapshot(PriceSnapshot {
            prices: std::collections::BTreeMap::new(),
            updated_at: Utc::now(),
        }));

        let view = hub.current_view().unwrap();
        assert_eq!(view.kind(), PayloadKind::Raw);

        hub.publish(snapshot(&["ETHUSDT"]));
        let view = hub.current_view().unwrap();
        assert_eq!(view.kind(), PayloadKind::Snapshot);
        assert!(view.snapshot().unwrap().tracks("ETH/USDT"));
    }

    #[test]
    fn zero_capacity_uses_configured_default() {
        let hub = BroadcastHub::new(BroadcastConfig {
            subscriber_capacity: 2,
        });
        let (_id, _rx) = hub.attach_channel(0);

        assert_eq!(hub.publish(raw("a")), 1);
        assert_eq!(hub.publish(raw("b")), 1);
        assert_eq!(hub.publish(raw("c")), 0);
    }
}
