//! Configuration Module
//!
//! Configuration loading for the relay service.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, DEFAULT_TOPIC_SYMBOL, FeedSettings, RelayConfig,
    ServerSettings, TopicSettings,
};
