//! Relay Configuration Settings
//!
//! Configuration types for the deal relay, loaded from environment variables.

use std::time::Duration;

use tokio_tungstenite::tungstenite::http::Uri;

use crate::domain::subscription::SubscriptionSet;
use crate::infrastructure::exchange::messages::{TopicTemplate, TopicTemplateError};

/// Symbol the default topic is built for when none is configured.
pub const DEFAULT_TOPIC_SYMBOL: &str = "BTCUSDT";

/// Connection settings for one websocket feed.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// Websocket URL (`ws://` or `wss://`).
    pub url: String,
    /// Interval between websocket pings.
    pub ping_interval: Duration,
    /// Silence after which the connection is treated as dead.
    pub idle_timeout: Duration,
    /// Delay before reconnecting after a close or error.
    pub reconnect_delay: Duration,
}

impl FeedSettings {
    /// Settings for `url` with default timings.
    #[must_use]
    pub const fn with_url(url: String) -> Self {
        Self {
            url,
            ping_interval: Duration::from_secs(20),
            idle_timeout: Duration::from_secs(60),
            reconnect_delay: Duration::from_millis(3000),
        }
    }
}

/// Upstream topic settings.
#[derive(Debug, Clone)]
pub struct TopicSettings {
    /// Per-symbol topic template.
    pub template: TopicTemplate,
    /// Topic subscribed when no symbols are tracked.
    pub default_topic: String,
}

impl Default for TopicSettings {
    fn default() -> Self {
        let template = TopicTemplate::default();
        let default_topic = template.topic(DEFAULT_TOPIC_SYMBOL);
        Self {
            template,
            default_topic,
        }
    }
}

/// Subscriber fan-out settings.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastSettings {
    /// Buffer capacity of each channel subscriber.
    pub subscriber_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            subscriber_capacity: 256,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Exchange deal feed.
    pub upstream: FeedSettings,
    /// Desired-symbol control feed; `None` tracks only the static symbols.
    pub control: Option<FeedSettings>,
    /// Topic construction.
    pub topics: TopicSettings,
    /// Symbols tracked from startup.
    pub static_symbols: SubscriptionSet,
    /// Quiet period before a desired-set change is applied.
    pub debounce: Duration,
    /// Subscriber fan-out.
    pub broadcast: BroadcastSettings,
    /// Server ports.
    pub server: ServerSettings,
}

impl RelayConfig {
    /// Default debounce interval.
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(750);

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvSource(lookup);

        let upstream_url = env
            .get("DEAL_PROXY_UPSTREAM_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("DEAL_PROXY_UPSTREAM_URL".to_string()))?;
        if upstream_url.is_empty() {
            return Err(ConfigError::EmptyValue(
                "DEAL_PROXY_UPSTREAM_URL".to_string(),
            ));
        }
        validate_ws_url("DEAL_PROXY_UPSTREAM_URL", &upstream_url)?;

        let control_url = env
            .get("DEAL_PROXY_CONTROL_URL")
            .filter(|url| !url.is_empty());
        if let Some(url) = &control_url {
            validate_ws_url("DEAL_PROXY_CONTROL_URL", url)?;
        }

        let defaults = FeedSettings::with_url(String::new());
        let feed = |url: String| FeedSettings {
            url,
            ping_interval: env.duration_secs("DEAL_PROXY_PING_INTERVAL_SECS", defaults.ping_interval),
            idle_timeout: env.duration_secs("DEAL_PROXY_IDLE_TIMEOUT_SECS", defaults.idle_timeout),
            reconnect_delay: env.duration_millis(
                "DEAL_PROXY_RECONNECT_DELAY_MS",
                defaults.reconnect_delay,
            ),
        };

        let template = match env.get("DEAL_PROXY_TOPIC_TEMPLATE") {
            Some(raw) => TopicTemplate::parse(&raw)?,
            None => TopicTemplate::default(),
        };
        let default_topic = env
            .get("DEAL_PROXY_DEFAULT_TOPIC")
            .filter(|topic| !topic.is_empty())
            .unwrap_or_else(|| template.topic(DEFAULT_TOPIC_SYMBOL));

        let static_symbols = env
            .get("DEAL_PROXY_SYMBOLS")
            .map(|raw| SubscriptionSet::from_raw(raw.split(',')))
            .unwrap_or_default();

        Ok(Self {
            upstream: feed(upstream_url),
            control: control_url.map(feed),
            topics: TopicSettings {
                template,
                default_topic,
            },
            static_symbols,
            debounce: env.duration_millis("DEAL_PROXY_DEBOUNCE_MS", Self::DEFAULT_DEBOUNCE),
            broadcast: BroadcastSettings {
                subscriber_capacity: env
                    .parse("DEAL_PROXY_SUBSCRIBER_CAPACITY")
                    .filter(|&capacity: &usize| capacity > 0)
                    .unwrap_or(BroadcastSettings::default().subscriber_capacity),
            },
            server: ServerSettings {
                health_port: env
                    .parse("DEAL_PROXY_HEALTH_PORT")
                    .unwrap_or(ServerSettings::default().health_port),
            },
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// URL is not a websocket URL.
    #[error("environment variable {0} is not a ws:// or wss:// URL: {1}")]
    InvalidUrl(String, String),
    /// Topic template is unusable.
    #[error(transparent)]
    InvalidTemplate(#[from] TopicTemplateError),
}

fn validate_ws_url(key: &str, url: &str) -> Result<(), ConfigError> {
    let invalid = || ConfigError::InvalidUrl(key.to_string(), url.to_string());
    let uri: Uri = url.parse().map_err(|_| invalid())?;

    match uri.scheme_str() {
        Some("ws" | "wss") if uri.host().is_some() => Ok(()),
        _ => Err(invalid()),
    }
}

struct EnvSource<F>(F);

impl<F> EnvSource<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).map(|v| v.trim().to_string())
    }

    fn parse<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    fn duration_secs(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key).map_or(default, Duration::from_secs)
    }

    fn duration_millis(&self, key: &str, default: Duration) -> Duration {
        self.parse::<u64>(key).map_or(default, Duration::from_millis)
    }
}
