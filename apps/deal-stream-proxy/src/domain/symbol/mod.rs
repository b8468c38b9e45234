//! Symbol Normalization and Display Keys
//!
//! Exchange symbols arrive in several spellings (`btc-usdt`, `BTC/USDT`,
//! `BTCUSDT`). Internally every symbol is upper-case alphanumerics only;
//! price snapshots are keyed by the `BASE/QUOTE` display form.

use std::fmt;

use serde::Serialize;

/// Known quote assets, longest first so `FDUSD` wins over `USD`.
const QUOTE_SUFFIXES: &[&str] = &[
    "FDUSD", "USDT", "USDC", "BUSD", "TUSD", "USDE", "USD1", "EUR", "TRY", "BRL", "USD", "BTC",
    "ETH", "BNB", "DAI",
];

/// Suffix length used when no known quote asset matches.
const FALLBACK_QUOTE_LEN: usize = 4;

/// Strip everything but ASCII alphanumerics and upper-case the rest.
#[must_use]
pub fn normalize_symbol(raw: &str) -> String {
    raw.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

// =============================================================================
// Symbol Key
// =============================================================================

/// `BASE/QUOTE` display key for a tracked symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct SymbolKey(String);

impl SymbolKey {
    /// Map an exchange-native symbol to its display key.
    ///
    /// Tries the known quote suffixes longest first, requiring a non-empty
    /// base. Otherwise splits off the last four characters. Symbols too short
    /// to split are kept as-is.
    #[must_use]
    pub fn from_symbol(symbol: &str) -> Self {
        let symbol = normalize_symbol(symbol);

        let known = QUOTE_SUFFIXES.iter().find_map(|quote| {
            symbol
                .strip_suffix(quote)
                .filter(|base| !base.is_empty())
                .map(|base| (base.to_string(), (*quote).to_string()))
        });

        match known {
            Some((base, quote)) => Self(format!("{base}/{quote}")),
            None if symbol.len() > FALLBACK_QUOTE_LEN => {
                let (base, quote) = symbol.split_at(symbol.len() - FALLBACK_QUOTE_LEN);
                Self(format!("{base}/{quote}"))
            }
            None => Self(symbol),
        }
    }

    /// Borrow the display string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SymbolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SymbolKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
