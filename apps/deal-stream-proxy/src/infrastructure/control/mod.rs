//! Control Feed Adapter
//!
//! Receives the desired symbol list from a separate WebSocket feed.

pub mod messages;
pub mod session;

pub use messages::{ControlPayloadError, SymbolDescriptor, parse_desired_set};
pub use session::{ControlEvent, ControlSession, ControlSessionError};
