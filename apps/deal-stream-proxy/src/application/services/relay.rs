//! Relay Aggregator
//!
//! Single task that owns the subscription set, the price store, and the
//! debounce timer. Upstream events, control events, and debounce expiry are
//! consumed in one `select!` loop, so every deal update and every apply runs
//! to completion before the next event is looked at.
//!
//! ```text
//! upstream session ──► UpstreamEvent ──┐
//!                                      ├──► Relay ──► BroadcastHub ──► subscribers
//! control session  ──► ControlEvent  ──┘      │
//!                                             └──► UpstreamPort (subscribe/unsubscribe)
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Payload, RawMessage, UpstreamPort};
use crate::application::services::SubscriptionReconciler;
use crate::domain::pricing::PriceStore;
use crate::domain::streaming::{Deal, DecodedWrapper};
use crate::domain::subscription::SubscriptionSet;
use crate::infrastructure::broadcast::BroadcastHub;
use crate::infrastructure::control::ControlEvent;
use crate::infrastructure::exchange::UpstreamEvent;
use crate::infrastructure::metrics;

/// The relay aggregator.
pub struct Relay<U> {
    upstream: U,
    hub: Arc<BroadcastHub>,
    reconciler: SubscriptionReconciler,
    store: PriceStore,
}

impl<U: UpstreamPort> Relay<U> {
    /// Create a relay tracking `initial` until the control feed says otherwise.
    #[must_use]
    pub fn new(
        upstream: U,
        hub: Arc<BroadcastHub>,
        debounce: Duration,
        initial: SubscriptionSet,
    ) -> Self {
        let mut store = PriceStore::new();
        store.rebuild(&initial);
        metrics::set_tracked_symbols(initial.len());
        Self {
            upstream,
            hub,
            reconciler: SubscriptionReconciler::new(debounce, initial),
            store,
        }
    }

    /// Currently applied subscription set.
    #[must_use]
    pub const fn subscriptions(&self) -> &SubscriptionSet {
        self.reconciler.current()
    }

    /// Latest known prices.
    #[must_use]
    pub const fn prices(&self) -> &PriceStore {
        &self.store
    }

    /// Consume events until cancelled or the upstream session goes away.
    ///
    /// A closed control channel only stops control handling.
    pub async fn run(
        mut self,
        mut upstream_rx: mpsc::Receiver<UpstreamEvent>,
        mut control_rx: mpsc::Receiver<ControlEvent>,
        cancel: CancellationToken,
    ) {
        self.publish_snapshot();
        let mut control_live = true;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Relay cancelled");
                    break;
                }
                event = upstream_rx.recv() => match event {
                    Some(event) => self.on_upstream_event(event).await,
                    None => {
                        tracing::info!("Upstream event channel closed, relay stopping");
                        break;
                    }
                },
                event = control_rx.recv(), if control_live => match event {
                    Some(event) => self.on_control_event(event),
                    None => {
                        tracing::debug!("Control event channel closed");
                        control_live = false;
                    }
                },
                desired = self.reconciler.due() => {
                    self.reconciler
                        .apply(desired, &self.upstream, &mut self.store)
                        .await;
                    self.publish_snapshot();
                }
            }
        }
    }

    async fn on_upstream_event(&mut self, event: UpstreamEvent) {
        match event {
            UpstreamEvent::Connecting => tracing::debug!("Upstream connecting"),
            UpstreamEvent::Opened => {
                let symbols = self.reconciler.current().to_vec();
                tracing::info!(symbols = symbols.len(), "Upstream open, restoring subscriptions");
                if let Err(e) = self.upstream.restore(&symbols).await {
                    tracing::warn!(error = %e, "Subscription restore failed");
                }
            }
            UpstreamEvent::Disconnected => tracing::warn!("Upstream disconnected"),
            UpstreamEvent::Reconnecting { attempt } => {
                tracing::info!(attempt, "Upstream reconnecting");
            }
            UpstreamEvent::Wrapper(wrapper) => self.on_wrapper(wrapper),
            UpstreamEvent::Acknowledged(ack) => {
                tracing::debug!(id = ?ack.id, code = ?ack.code, "Upstream acknowledged request");
            }
        }
    }

    fn on_control_event(&mut self, event: ControlEvent) {
        match event {
            ControlEvent::DesiredSet(desired) => self.reconciler.on_desired_set(desired),
            ControlEvent::Opened => tracing::info!("Control feed open"),
            ControlEvent::Disconnected => tracing::warn!("Control feed disconnected"),
            ControlEvent::Reconnecting { attempt } => {
                tracing::info!(attempt, "Control feed reconnecting");
            }
        }
    }

    /// Tracked symbols with deals update the store; everything else is
    /// forwarded raw.
    fn on_wrapper(&mut self, wrapper: DecodedWrapper) {
        if wrapper.has_deals() {
            let tracked = wrapper
                .resolved_symbol()
                .filter(|symbol| self.reconciler.current().contains(symbol));
            if let Some(symbol) = tracked {
                let price = wrapper.latest_deal().and_then(Deal::price_value);
                tracing::trace!(symbol = %symbol, ?price, "Deal price update");
                self.store.update(&symbol, price);
                self.publish_snapshot();
                return;
            }
        }
        self.hub.publish(Payload::Raw(RawMessage::now(wrapper)));
    }

    fn publish_snapshot(&self) {
        self.hub.publish(Payload::Snapshot(self.store.snapshot()));
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::{PayloadKind, UpstreamPortError};
    use crate::domain::subscription::Symbol;

    const DEBOUNCE: Duration = Duration::from_millis(750);

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Subscribe(Vec<Symbol>),
        Unsubscribe(Vec<Symbol>),
        Restore(Vec<Symbol>),
    }

    #[derive(Clone, Default)]
    struct FakeUpstream {
        calls: Arc<Mutex<Vec<Call>>>,
    }

    impl FakeUpstream {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl UpstreamPort for FakeUpstream {
        async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), UpstreamPortError> {
            self.calls.lock().push(Call::Subscribe(symbols.to_vec()));
            Ok(())
        }

        async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<(), UpstreamPortError> {
            self.calls.lock().push(Call::Unsubscribe(symbols.to_vec()));
            Ok(())
        }

        async fn restore(&self, symbols: &[Symbol]) -> Result<(), UpstreamPortError> {
            self.calls.lock().push(Call::Restore(symbols.to_vec()));
            Ok(())
        }
    }

    struct Harness {
        upstream: FakeUpstream,
        upstream_tx: mpsc::Sender<UpstreamEvent>,
        control_tx: mpsc::Sender<ControlEvent>,
        payloads: mpsc::Receiver<Arc<Payload>>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    impl Harness {
        fn start(initial: &[&str]) -> Self {
            let upstream = FakeUpstream::default();
            let hub = Arc::new(BroadcastHub::with_defaults());
            let (_id, payloads) = hub.attach_channel(64);
            let (upstream_tx, upstream_rx) = mpsc::channel(16);
            let (control_tx, control_rx) = mpsc::channel(16);
            let cancel = CancellationToken::new();

            let relay = Relay::new(
                upstream.clone(),
                hub,
                DEBOUNCE,
                SubscriptionSet::from_raw(initial.iter().copied()),
            );
            let task = tokio::spawn(relay.run(upstream_rx, control_rx, cancel.clone()));

            Self {
                upstream,
                upstream_tx,
                control_tx,
                payloads,
                cancel,
                task,
            }
        }

        async fn next_snapshot(&mut self) -> Arc<Payload> {
            loop {
                let payload = self.payloads.recv().await.unwrap();
                if payload.kind() == PayloadKind::Snapshot {
                    return payload;
                }
            }
        }

        async fn desire(&self, symbols: &[&str]) {
            self.control_tx
                .send(ControlEvent::DesiredSet(SubscriptionSet::from_raw(
                    symbols.iter().copied(),
                )))
                .await
                .unwrap();
        }

        async fn stop(self) {
            self.cancel.cancel();
            self.task.await.unwrap();
        }
    }

    fn deal_wrapper(symbol: &str, price: &str) -> DecodedWrapper {
        DecodedWrapper {
            channel: Some(format!("spot@public.aggre.deals.v3.api.pb@100ms@{symbol}")),
            deals: vec![Deal {
                price: price.to_string(),
                quantity: "0.5".to_string(),
                trade_type: 1,
                time: Some(1_700_000_000_000),
            }],
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tracked_deal_updates_snapshot() {
        let mut harness = Harness::start(&["BTCUSDT"]);
        let initial = harness.next_snapshot().await;
        assert!(initial.snapshot().unwrap().tracks("BTC/USDT"));
        assert_eq!(initial.snapshot().unwrap().price("BTC/USDT"), None);

        harness
            .upstream_tx
            .send(UpstreamEvent::Wrapper(deal_wrapper("BTCUSDT", "27000.12")))
            .await
            .unwrap();

        let updated = harness.next_snapshot().await;
        assert_eq!(updated.snapshot().unwrap().price("BTC/USDT"), Some(27_000.12));
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn untracked_deal_is_forwarded_raw() {
        let mut harness = Harness::start(&["BTCUSDT"]);
        harness.next_snapshot().await;

        harness
            .upstream_tx
            .send(UpstreamEvent::Wrapper(deal_wrapper("XRPUSDT", "0.52")))
            .await
            .unwrap();

        let payload = harness.payloads.recv().await.unwrap();
        match payload.as_ref() {
            Payload::Raw(message) => {
                assert_eq!(message.wrapper.resolved_symbol().as_deref(), Some("XRPUSDT"));
            }
            Payload::Snapshot(_) => panic!("expected raw payload"),
        }
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn switching_symbols_resubscribes_once() {
        let mut harness = Harness::start(&["BTCUSDT"]);
        harness.next_snapshot().await;

        harness.desire(&["ETHUSDT"]).await;
        let snapshot = harness.next_snapshot().await;

        assert_eq!(
            harness.upstream.calls(),
            vec![
                Call::Unsubscribe(vec!["BTCUSDT".to_string()]),
                Call::Subscribe(vec!["ETHUSDT".to_string()]),
            ]
        );
        let snapshot = snapshot.snapshot().unwrap();
        assert_eq!(snapshot.prices.len(), 1);
        assert!(snapshot.tracks("ETH/USDT"));
        assert_eq!(snapshot.price("ETH/USDT"), None);
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_desired_sets_applies_once() {
        let mut harness = Harness::start(&[]);
        harness.next_snapshot().await;

        for symbols in [&["BTCUSDT"][..], &["ETHUSDT"], &["BTCUSDT", "SOLUSDT"], &["SOLUSDT"]] {
            harness.desire(symbols).await;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let snapshot = harness.next_snapshot().await;
        assert_eq!(
            harness.upstream.calls(),
            vec![Call::Subscribe(vec!["SOLUSDT".to_string()])]
        );
        assert!(snapshot.snapshot().unwrap().tracks("SOL/USDT"));

        tokio::time::sleep(DEBOUNCE * 4).await;
        assert!(harness.payloads.try_recv().is_err());
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn open_restores_current_set() {
        let harness = Harness::start(&["ETHUSDT", "BTCUSDT"]);

        harness.upstream_tx.send(UpstreamEvent::Opened).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(
            harness.upstream.calls(),
            vec![Call::Restore(vec![
                "BTCUSDT".to_string(),
                "ETHUSDT".to_string()
            ])]
        );
        harness.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn relay_stops_when_upstream_goes_away() {
        let harness = Harness::start(&[]);
        drop(harness.upstream_tx);
        harness.task.await.unwrap();
    }
}
