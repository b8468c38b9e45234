//! Exchange Deal Feed Adapter
//!
//! WebSocket session against the exchange's public deal stream:
//!
//! - **wire**: Protobuf push-wrapper schema
//! - **codec**: Multi-candidate frame decoder (framing, gzip, acks)
//! - **messages**: JSON subscribe/unsubscribe requests and topic templates
//! - **reconnect**: Reconnect delay policy and single-slot scheduler
//! - **session**: Connection loop, keepalive, and subscription commands

pub mod codec;
pub mod messages;
pub mod reconnect;
pub mod session;
pub mod wire;

pub use codec::{Decoded, DecodeFailure, FrameDecoder};
pub use messages::{
    ControlAck, SubscriptionMethod, SubscriptionRequest, TopicTemplate, TopicTemplateError,
};
pub use reconnect::{ReconnectConfig, ReconnectPolicy, ReconnectScheduler};
pub use session::{
    UpstreamCommand, UpstreamEvent, UpstreamHandle, UpstreamSession, UpstreamSessionConfig,
    UpstreamSessionError,
};
