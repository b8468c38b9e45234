//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for the upstream feed and downstream subscribers.
pub mod ports;

/// Relay aggregator, subscription reconciliation, and timers.
pub mod services;
