//! Exchange Control Message Types
//!
//! JSON messages exchanged with the deal feed alongside the binary push
//! frames.
//!
//! # Outbound
//!
//! ```json
//! {"method":"SUBSCRIPTION","params":["spot@public.aggre.deals.v3.api.pb@100ms@BTCUSDT"],"id":1}
//! ```
//!
//! # Inbound
//!
//! Acknowledgements echo the request id:
//!
//! ```json
//! {"id":1,"code":0,"msg":"spot@public.aggre.deals.v3.api.pb@100ms@BTCUSDT"}
//! ```

use serde::{Deserialize, Serialize};

/// Placeholder substituted with the exchange symbol in topic templates.
pub const SYMBOL_PLACEHOLDER: &str = "{symbol}";

/// Default deal topic template.
pub const DEFAULT_TOPIC_TEMPLATE: &str = "spot@public.aggre.deals.v3.api.pb@100ms@{symbol}";

// =============================================================================
// Outbound
// =============================================================================

/// Subscription control method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SubscriptionMethod {
    /// Start receiving a topic.
    Subscription,
    /// Stop receiving a topic.
    Unsubscription,
}

impl SubscriptionMethod {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Subscription => "subscribe",
            Self::Unsubscription => "unsubscribe",
        }
    }
}

/// Subscribe or unsubscribe request for a single topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRequest {
    /// Control method.
    pub method: SubscriptionMethod,
    /// Topics; the relay always sends exactly one.
    pub params: Vec<String>,
    /// Request id, increasing per session.
    pub id: u64,
}

impl SubscriptionRequest {
    /// Build a request for one topic.
    #[must_use]
    pub fn new(method: SubscriptionMethod, topic: String, id: u64) -> Self {
        Self {
            method,
            params: vec![topic],
            id,
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Acknowledgement of a control request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlAck {
    /// Echoed request id.
    #[serde(default)]
    pub id: Option<u64>,
    /// Result code; zero on success.
    #[serde(default)]
    pub code: Option<i64>,
    /// Free-form message, usually the topic.
    #[serde(default)]
    pub msg: Option<String>,
}

impl ControlAck {
    /// Whether the exchange reported success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.code.unwrap_or(0) == 0
    }
}

// =============================================================================
// Topic Template
// =============================================================================

/// Topic template such as `spot@public.aggre.deals.v3.api.pb@100ms@{symbol}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicTemplate(String);

impl TopicTemplate {
    /// Validate a template string.
    ///
    /// # Errors
    ///
    /// Returns an error if the template does not contain `{symbol}`.
    pub fn parse(template: &str) -> Result<Self, TopicTemplateError> {
        let template = template.trim();
        if !template.contains(SYMBOL_PLACEHOLDER) {
            return Err(TopicTemplateError::MissingPlaceholder(template.to_string()));
        }
        Ok(Self(template.to_string()))
    }

    /// Topic for one exchange symbol.
    #[must_use]
    pub fn topic(&self, symbol: &str) -> String {
        self.0.replace(SYMBOL_PLACEHOLDER, symbol)
    }

    /// The raw template.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TopicTemplate {
    fn default() -> Self {
        Self(DEFAULT_TOPIC_TEMPLATE.to_string())
    }
}

/// Topic template errors.
#[derive(Debug, thiserror::Error)]
pub enum TopicTemplateError {
    /// Template lacks the symbol placeholder.
    #[error("topic template {0:?} has no {{symbol}} placeholder")]
    MissingPlaceholder(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_to_exchange_format() {
        let request = SubscriptionRequest::new(
            SubscriptionMethod::Subscription,
            "spot@public.aggre.deals.v3.api.pb@100ms@BTCUSDT".to_string(),
            7,
        );
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(
            json,
            r#"{"method":"SUBSCRIPTION","params":["spot@public.aggre.deals.v3.api.pb@100ms@BTCUSDT"],"id":7}"#
        );

        let unsub = SubscriptionRequest::new(SubscriptionMethod::Unsubscription, "t".into(), 8);
        assert!(
            serde_json::to_string(&unsub)
                .unwrap()
                .contains("\"UNSUBSCRIPTION\"")
        );
    }

    #[test]
    fn ack_parses_partial_fields() {
        let ack: ControlAck = serde_json::from_str(r#"{"id":3,"code":0,"msg":"ok"}"#).unwrap();
        assert_eq!(ack.id, Some(3));
        assert!(ack.is_success());

        let failed: ControlAck = serde_json::from_str(r#"{"code":100,"msg":"bad"}"#).unwrap();
        assert!(!failed.is_success());
    }

    #[test]
    fn template_requires_placeholder() {
        assert!(TopicTemplate::parse("spot@public.deals").is_err());

        let template = TopicTemplate::parse(" spot@x@{symbol} ").unwrap();
        assert_eq!(template.topic("ETHUSDT"), "spot@x@ETHUSDT");
        assert_eq!(
            TopicTemplate::default().topic("BTCUSDT"),
            "spot@public.aggre.deals.v3.api.pb@100ms@BTCUSDT"
        );
    }
}
