#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Deal Stream Proxy - Exchange Deal Relay
//!
//! Maintains one connection to an exchange's binary deal feed, recovers
//! trade events despite loose framing, follows a control feed for the set of
//! symbols to track, and republishes price snapshots to many downstream
//! subscribers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core streaming logic and data types
//!   - `streaming`: Decoded wrappers, deals, and price parsing
//!   - `symbol`: Symbol normalization and display keys
//!   - `subscription`: Subscription sets and delta computation
//!   - `pricing`: Latest price per tracked symbol
//!   - `session`: Feed session state machine
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Upstream subscription control, subscriber delivery
//!   - `services`: Relay aggregator, debounced reconciler, timers
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `exchange`: Deal feed session, wire schema, frame decoder
//!   - `control`: Desired-symbol control feed session
//!   - `broadcast`: Subscriber fan-out
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Exchange WS ──► FrameDecoder ──┐
//!                                ├──► Relay ──► BroadcastHub ──► Subscriber 1
//! Control WS ──► desired set ────┘      │                   ├──► Subscriber 2
//!                                       ▼                   └──► Subscriber N
//!                            subscribe / unsubscribe
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::pricing::{PriceSnapshot, PriceStore};
pub use domain::session::{FeedState, SessionState};
pub use domain::streaming::{Deal, DecodedWrapper};
pub use domain::subscription::{SubscriptionChanges, SubscriptionSet, Symbol};
pub use domain::symbol::SymbolKey;

// Ports and services
pub use application::ports::{
    DeliveryError, Payload, PayloadKind, RawMessage, SubscriberId, SubscriberSink, UpstreamPort,
    UpstreamPortError,
};
pub use application::services::{Relay, SubscriptionReconciler, TimerSlot};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, FeedSettings, RelayConfig, ServerSettings, TopicSettings,
};

// Feed sessions (for integration tests)
pub use infrastructure::control::{ControlEvent, ControlSession, ControlSessionError};
pub use infrastructure::exchange::{
    FrameDecoder, UpstreamEvent, UpstreamHandle, UpstreamSession, UpstreamSessionConfig,
    UpstreamSessionError,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Broadcast hub (for integration tests)
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastStats, SharedBroadcastHub,
};

// Metrics
pub use infrastructure::metrics::{FeedType as MetricsFeedType, init_metrics};

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
