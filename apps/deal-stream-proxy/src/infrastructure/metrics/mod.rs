//! Prometheus Metrics Module
//!
//! Exposes relay metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Frames**: binary frames received and decode failures
//! - **Fan-out**: payloads published and failed deliveries by kind
//! - **Sessions**: connection state, errors, and reconnects per feed
//! - **Subscriptions**: tracked symbols, applies, and control requests
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::ports::PayloadKind;
use crate::infrastructure::exchange::messages::SubscriptionMethod;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Repeated calls return the handle installed by the first.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

/// Metrics initialization errors.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// The Prometheus recorder could not be installed.
    #[error("failed to install Prometheus recorder: {0}")]
    Install(#[from] BuildError),
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "deal_proxy_frames_received_total",
        "Total frames received per feed"
    );
    describe_counter!(
        "deal_proxy_decode_failures_total",
        "Total upstream frames no candidate could decode"
    );

    describe_counter!(
        "deal_proxy_payloads_published_total",
        "Total payloads published to subscribers by kind"
    );
    describe_counter!(
        "deal_proxy_delivery_failures_total",
        "Total failed subscriber deliveries by kind"
    );
    describe_gauge!("deal_proxy_subscribers", "Number of attached subscribers");

    describe_gauge!(
        "deal_proxy_session_open",
        "Whether a feed session is open (1) or not (0)"
    );
    describe_counter!(
        "deal_proxy_session_errors_total",
        "Total session errors by feed and type"
    );
    describe_counter!(
        "deal_proxy_reconnects_total",
        "Total reconnection attempts per feed"
    );

    describe_gauge!("deal_proxy_tracked_symbols", "Number of tracked symbols");
    describe_counter!(
        "deal_proxy_subscription_applies_total",
        "Total debounced subscription applies"
    );
    describe_counter!(
        "deal_proxy_control_requests_total",
        "Total subscribe/unsubscribe requests sent upstream"
    );
    describe_counter!(
        "deal_proxy_control_payloads_rejected_total",
        "Total control-feed payloads ignored as malformed"
    );

    describe_histogram!(
        "deal_proxy_frame_processing_seconds",
        "Time to decode an upstream frame"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Metric labels for feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedType {
    /// Exchange deal feed.
    Upstream,
    /// Desired-symbol control feed.
    Control,
}

impl FeedType {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Upstream => "upstream",
            Self::Control => "control",
        }
    }
}

/// Record a frame received on a feed.
pub fn record_frame_received(feed: FeedType) {
    counter!("deal_proxy_frames_received_total", "feed" => feed.as_str()).increment(1);
}

/// Record an undecodable upstream frame.
pub fn record_decode_failure() {
    counter!("deal_proxy_decode_failures_total").increment(1);
}

/// Record a published payload.
pub fn record_payload_published(kind: PayloadKind) {
    counter!("deal_proxy_payloads_published_total", "kind" => kind.as_str()).increment(1);
}

/// Record failed deliveries for one publish.
pub fn record_delivery_failures(kind: PayloadKind, count: u64) {
    counter!("deal_proxy_delivery_failures_total", "kind" => kind.as_str()).increment(count);
}

/// Update the subscriber count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscribers(count: usize) {
    gauge!("deal_proxy_subscribers").set(count as f64);
}

/// Update whether a feed session is open.
pub fn set_session_open(feed: FeedType, open: bool) {
    gauge!("deal_proxy_session_open", "feed" => feed.as_str()).set(if open { 1.0 } else { 0.0 });
}

/// Record a session error.
pub fn record_session_error(feed: FeedType, error_type: &'static str) {
    counter!(
        "deal_proxy_session_errors_total",
        "feed" => feed.as_str(),
        "error_type" => error_type
    )
    .increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect(feed: FeedType) {
    counter!("deal_proxy_reconnects_total", "feed" => feed.as_str()).increment(1);
}

/// Update the tracked symbol count.
#[allow(clippy::cast_precision_loss)]
pub fn set_tracked_symbols(count: usize) {
    gauge!("deal_proxy_tracked_symbols").set(count as f64);
}

/// Record a completed subscription apply.
pub fn record_subscription_apply() {
    counter!("deal_proxy_subscription_applies_total").increment(1);
}

/// Record a control request sent upstream.
pub fn record_control_request(method: SubscriptionMethod) {
    counter!("deal_proxy_control_requests_total", "method" => method.as_str()).increment(1);
}

/// Record a rejected control-feed payload.
pub fn record_control_payload_rejected() {
    counter!("deal_proxy_control_payloads_rejected_total").increment(1);
}

/// Record frame decode duration.
pub fn record_processing_duration(duration: Duration) {
    histogram!("deal_proxy_frame_processing_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_type_as_str() {
        assert_eq!(FeedType::Upstream.as_str(), "upstream");
        assert_eq!(FeedType::Control.as_str(), "control");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_frame_received(FeedType::Upstream);
        record_payload_published(PayloadKind::Snapshot);
        record_delivery_failures(PayloadKind::Raw, 2);
        set_session_open(FeedType::Control, true);
        record_control_request(SubscriptionMethod::Subscription);
    }
}
