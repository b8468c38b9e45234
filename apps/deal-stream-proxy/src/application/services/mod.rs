//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `Relay`: Single-task aggregator of upstream and control events
//! - `SubscriptionReconciler`: Debounced desired-set application
//! - `TimerSlot`: Single-shot deadline used for debounce and backoff

pub mod reconciler;
pub mod relay;
pub mod timer;

pub use reconciler::SubscriptionReconciler;
pub use relay::Relay;
pub use timer::TimerSlot;
