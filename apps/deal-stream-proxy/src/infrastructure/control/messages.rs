//! Control Feed Payloads
//!
//! The control feed publishes the desired symbol list as JSON, either as a
//! bare array or wrapped in an object:
//!
//! ```json
//! [{"symbol":"BTCUSDT"},{"base":"ETH","quote":"USDT"}]
//! {"symbols":[{"symbol":"btc-usdt"}]}
//! ```
//!
//! A payload is accepted or rejected as a whole.

use serde::Deserialize;

use crate::domain::subscription::SubscriptionSet;
use crate::domain::symbol::normalize_symbol;

/// One desired symbol.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum SymbolDescriptor {
    /// Exchange symbol in any spelling.
    Symbol {
        /// Symbol, e.g. `BTCUSDT` or `btc-usdt`.
        symbol: String,
    },
    /// Base and quote assets.
    Pair {
        /// Base asset, e.g. `BTC`.
        base: String,
        /// Quote asset, e.g. `USDT`.
        quote: String,
    },
}

impl SymbolDescriptor {
    /// Normalized exchange symbol.
    #[must_use]
    pub fn normalized(&self) -> String {
        match self {
            Self::Symbol { symbol } => normalize_symbol(symbol),
            Self::Pair { base, quote } => {
                let base = normalize_symbol(base);
                let quote = normalize_symbol(quote);
                if base.is_empty() || quote.is_empty() {
                    String::new()
                } else {
                    format!("{base}{quote}")
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ControlPayload {
    List(Vec<SymbolDescriptor>),
    Wrapped { symbols: Vec<SymbolDescriptor> },
}

/// Parse a control payload into the desired symbol set.
///
/// # Errors
///
/// Returns an error if the payload is not one of the accepted shapes or any
/// descriptor normalizes to an empty symbol.
pub fn parse_desired_set(payload: &str) -> Result<SubscriptionSet, ControlPayloadError> {
    let descriptors = match serde_json::from_str::<ControlPayload>(payload)? {
        ControlPayload::List(descriptors) | ControlPayload::Wrapped { symbols: descriptors } => {
            descriptors
        }
    };

    descriptors
        .iter()
        .enumerate()
        .map(|(index, descriptor)| {
            let symbol = descriptor.normalized();
            if symbol.is_empty() {
                Err(ControlPayloadError::EmptySymbol(index))
            } else {
                Ok(symbol)
            }
        })
        .collect()
}

/// Control payload errors.
#[derive(Debug, thiserror::Error)]
pub enum ControlPayloadError {
    /// Not a recognized payload shape.
    #[error("malformed control payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A descriptor normalized to nothing.
    #[error("descriptor {0} has no usable symbol")]
    EmptySymbol(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_both_shapes() {
        let cases = [
            r#"[{"symbol":"BTCUSDT"},{"base":"eth","quote":"usdt"}]"#,
            r#"{"symbols":[{"symbol":"btc-usdt"},{"base":"ETH","quote":"USDT"}]}"#,
        ];
        for payload in cases {
            let set = parse_desired_set(payload).unwrap();
            assert_eq!(set.to_vec(), vec!["BTCUSDT", "ETHUSDT"], "payload {payload}");
        }
    }

    #[test]
    fn empty_list_is_valid() {
        assert!(parse_desired_set("[]").unwrap().is_empty());
    }

    #[test]
    fn rejects_malformed_payloads() {
        let cases = [
            "",
            "not json",
            r#"{"symbol":"BTCUSDT"}"#,
            r#"[{"symbol":"BTCUSDT"},{"name":"ETHUSDT"}]"#,
            r#"[{"symbol":"BTCUSDT"},{"symbol":"--"}]"#,
            r#"[{"base":"BTC","quote":""}]"#,
            r#"["BTCUSDT"]"#,
        ];
        for payload in cases {
            assert!(
                parse_desired_set(payload).is_err(),
                "{payload:?} should be rejected"
            );
        }
    }
}
