//! Subscription Reconciler
//!
//! Turns a flapping stream of desired symbol sets into stable upstream
//! subscriptions. Each desired set replaces the pending one and restarts the
//! debounce countdown; only the last set of a burst is applied.

use std::time::Duration;

use crate::application::ports::{UpstreamPort, UpstreamPortError};
use crate::application::services::TimerSlot;
use crate::domain::pricing::PriceStore;
use crate::domain::subscription::{SubscriptionChanges, SubscriptionSet};
use crate::infrastructure::metrics;

/// Debounced owner of the current subscription set.
#[derive(Debug)]
pub struct SubscriptionReconciler {
    current: SubscriptionSet,
    pending: Option<SubscriptionSet>,
    debounce: TimerSlot,
    interval: Duration,
}

impl SubscriptionReconciler {
    /// Create a reconciler whose current set is `initial`.
    #[must_use]
    pub const fn new(interval: Duration, initial: SubscriptionSet) -> Self {
        Self {
            current: initial,
            pending: None,
            debounce: TimerSlot::new(),
            interval,
        }
    }

    /// The applied subscription set.
    #[must_use]
    pub const fn current(&self) -> &SubscriptionSet {
        &self.current
    }

    /// Whether an apply is waiting on the debounce timer.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Record a desired set, replacing any pending one and restarting the
    /// countdown.
    pub fn on_desired_set(&mut self, desired: SubscriptionSet) {
        tracing::debug!(
            symbols = desired.len(),
            replaced = self.pending.is_some(),
            "Desired set queued"
        );
        self.pending = Some(desired);
        self.debounce.replace(self.interval);
    }

    /// Wait for the debounce countdown and take the pending set.
    ///
    /// Pends forever while nothing is queued. Cancel safe.
    pub async fn due(&mut self) -> SubscriptionSet {
        loop {
            self.debounce.expired().await;
            if let Some(desired) = self.pending.take() {
                return desired;
            }
        }
    }

    /// Apply `desired`: send the delta upstream, rebuild the price store,
    /// and make it current.
    ///
    /// Upstream failures are logged; the next open restores the full set.
    pub async fn apply<U>(
        &mut self,
        desired: SubscriptionSet,
        upstream: &U,
        store: &mut PriceStore,
    ) -> SubscriptionChanges
    where
        U: UpstreamPort + ?Sized,
    {
        let changes = self.current.diff(&desired);

        let removed = changes.removed();
        if !removed.is_empty() {
            log_port_result("unsubscribe", upstream.unsubscribe(&removed).await);
        }
        let added = changes.added();
        if !added.is_empty() {
            log_port_result("subscribe", upstream.subscribe(&added).await);
        }

        store.rebuild(&desired);
        tracing::info!(
            added = added.len(),
            removed = removed.len(),
            tracked = desired.len(),
            "Subscription set applied"
        );
        self.current = desired;

        metrics::record_subscription_apply();
        metrics::set_tracked_symbols(self.current.len());
        changes
    }
}

fn log_port_result(action: &'static str, result: Result<(), UpstreamPortError>) {
    match result {
        Ok(()) => {}
        Err(UpstreamPortError::NotOpen) => {
            tracing::debug!(action, "Upstream not open, deferring to restore");
        }
        Err(e) => tracing::warn!(action, error = %e, "Upstream request failed"),
    }
}
