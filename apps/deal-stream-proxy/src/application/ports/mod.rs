//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `UpstreamPort`: subscription control on the exchange deal feed
//! - `SubscriberSink`: delivery to one downstream consumer

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::pricing::PriceSnapshot;
use crate::domain::streaming::DecodedWrapper;
use crate::domain::subscription::Symbol;

// =============================================================================
// Payloads
// =============================================================================

/// A decoded wrapper for an untracked symbol, forwarded as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    /// The decoded frame.
    pub wrapper: DecodedWrapper,
    /// When the relay received it.
    pub received_at: DateTime<Utc>,
}

impl RawMessage {
    /// Stamp a wrapper with the current time.
    #[must_use]
    pub fn now(wrapper: DecodedWrapper) -> Self {
        Self {
            wrapper,
            received_at: Utc::now(),
        }
    }
}

/// What subscribers receive.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Payload {
    /// Latest prices for every tracked symbol.
    Snapshot(PriceSnapshot),
    /// Decoded wrapper for an untracked symbol.
    Raw(RawMessage),
}

impl Payload {
    /// Payload kind label.
    #[must_use]
    pub const fn kind(&self) -> PayloadKind {
        match self {
            Self::Snapshot(_) => PayloadKind::Snapshot,
            Self::Raw(_) => PayloadKind::Raw,
        }
    }

    /// The snapshot, if this is one.
    #[must_use]
    pub const fn snapshot(&self) -> Option<&PriceSnapshot> {
        match self {
            Self::Snapshot(snapshot) => Some(snapshot),
            Self::Raw(_) => None,
        }
    }
}

/// Payload kind, used for metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Price snapshot.
    Snapshot,
    /// Raw decoded message.
    Raw,
}

impl PayloadKind {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Raw => "raw",
        }
    }
}

// =============================================================================
// Subscriber Sink
// =============================================================================

/// Identifier of an attached subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Generate a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An open output channel to one downstream consumer.
///
/// Delivery must not block; the relay calls this from its event loop.
pub trait SubscriberSink: Send + Sync {
    /// Hand a payload to the consumer.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError` if the consumer cannot take the payload now.
    fn deliver(&self, payload: Arc<Payload>) -> Result<(), DeliveryError>;
}

/// Subscriber delivery errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Consumer buffer is full.
    #[error("subscriber buffer full")]
    Full,

    /// Consumer went away.
    #[error("subscriber closed")]
    Closed,
}

// =============================================================================
// Upstream Port
// =============================================================================

/// Subscription control on the upstream deal feed.
///
/// Requests are only sent while the feed is open; otherwise they fail with
/// [`UpstreamPortError::NotOpen`] and the caller relies on [`restore`] after
/// the next open.
///
/// [`restore`]: UpstreamPort::restore
#[async_trait]
pub trait UpstreamPort: Send + Sync {
    /// Subscribe to the deal topic of each symbol.
    async fn subscribe(&self, symbols: &[Symbol]) -> Result<(), UpstreamPortError>;

    /// Unsubscribe from the deal topic of each symbol.
    async fn unsubscribe(&self, symbols: &[Symbol]) -> Result<(), UpstreamPortError>;

    /// Re-establish the full subscription after an open.
    ///
    /// An empty set subscribes the default topic instead.
    async fn restore(&self, symbols: &[Symbol]) -> Result<(), UpstreamPortError>;
}

/// Upstream port errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamPortError {
    /// The feed is not open; the request was dropped.
    #[error("upstream feed not open")]
    NotOpen,

    /// The session task has stopped.
    #[error("upstream session stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_upstream_object_safe(_: &dyn UpstreamPort) {}
    fn _assert_sink_object_safe(_: &dyn SubscriberSink) {}

    #[test]
    fn payload_serializes_tagged() {
        let raw = Payload::Raw(RawMessage::now(DecodedWrapper {
            channel: Some("spot@x@ETHUSDT".to_string()),
            ..Default::default()
        }));
        let json = serde_json::to_value(&raw).unwrap();
        assert_eq!(json["type"], "raw");
        assert_eq!(json["data"]["wrapper"]["channel"], "spot@x@ETHUSDT");
        assert_eq!(raw.kind().as_str(), "raw");
    }

    #[test]
    fn subscriber_ids_are_unique() {
        assert_ne!(SubscriberId::new(), SubscriberId::new());
    }
}
