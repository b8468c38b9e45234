//! Market Data Streaming Types
//!
//! Core domain types for exchange deal data. These types are codec-agnostic
//! and represent the canonical internal representation of a decoded push
//! frame, independent of how it was framed or compressed on the wire.

use serde::Serialize;

use crate::domain::subscription::Symbol;
use crate::domain::symbol::normalize_symbol;

// =============================================================================
// Deal
// =============================================================================

/// One trade event from the exchange.
///
/// Price and quantity stay in the decimal string form the exchange sent;
/// [`Deal::price_value`] derives the numeric price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deal {
    /// Trade price as a decimal string.
    pub price: String,
    /// Trade quantity as a decimal string.
    pub quantity: String,
    /// Side indicator (1 = buy, 2 = sell on the reference feed).
    pub trade_type: i32,
    /// Trade time in milliseconds since the Unix epoch.
    pub time: Option<i64>,
}

impl Deal {
    /// Parse the price into a finite number.
    ///
    /// Returns `None` for anything that does not parse to a finite value.
    #[must_use]
    pub fn price_value(&self) -> Option<f64> {
        parse_price(&self.price)
    }
}

/// Parse a decimal price string.
///
/// Unparseable, infinite and NaN inputs all map to `None`.
#[must_use]
pub fn parse_price(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

// =============================================================================
// Decoded Wrapper
// =============================================================================

/// Top-level decoded push frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedWrapper {
    /// Channel name the frame was published on.
    pub channel: Option<String>,
    /// Exchange-native symbol, when the feed includes it.
    pub symbol: Option<String>,
    /// Exchange-internal symbol id.
    pub symbol_id: Option<String>,
    /// Frame creation time (ms).
    pub create_time: Option<i64>,
    /// Frame send time (ms).
    pub send_time: Option<i64>,
    /// Event type of the deals payload.
    pub event_type: Option<String>,
    /// Deals in the order they appeared on the wire.
    pub deals: Vec<Deal>,
}

impl DecodedWrapper {
    /// Resolve the exchange-native symbol this frame belongs to.
    ///
    /// Prefers the explicit symbol field, falling back to the last `@`
    /// segment of the channel name.
    #[must_use]
    pub fn resolved_symbol(&self) -> Option<Symbol> {
        self.symbol
            .as_deref()
            .map(normalize_symbol)
            .filter(|s| !s.is_empty())
            .or_else(|| self.channel.as_deref().and_then(symbol_from_channel))
    }

    /// The most recent deal: greatest trade time, later entries winning ties.
    ///
    /// Deals without a time sort before any timed deal.
    #[must_use]
    pub fn latest_deal(&self) -> Option<&Deal> {
        self.deals
            .iter()
            .max_by_key(|deal| deal.time.unwrap_or(i64::MIN))
    }

    /// Whether the frame carries any deals.
    #[must_use]
    pub fn has_deals(&self) -> bool {
        !self.deals.is_empty()
    }
}

/// Extract the symbol from a channel such as
/// `spot@public.aggre.deals.v3.api.pb@100ms@BTCUSDT`.
#[must_use]
pub fn symbol_from_channel(channel: &str) -> Option<Symbol> {
    let (_, last) = channel.rsplit_once('@')?;
    let symbol = normalize_symbol(last);
    (!symbol.is_empty()).then_some(symbol)
}

// =============================================================================
// Tests
// =============================================================================
