//! Price Store
//!
//! Latest known price per tracked symbol, keyed by display [`SymbolKey`].
//! Entries are born `None` when a symbol is subscribed and overwritten on
//! every decoded deal for it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::subscription::SubscriptionSet;
use crate::domain::symbol::SymbolKey;

// =============================================================================
// Snapshot
// =============================================================================

/// Point-in-time copy of the price store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    /// Latest price per symbol; `null` until a deal with a parseable price arrives.
    pub prices: BTreeMap<SymbolKey, Option<f64>>,
    /// When the snapshot was taken.
    pub updated_at: DateTime<Utc>,
}

impl PriceSnapshot {
    /// Price for a display key, flattening "unknown key" and "no price yet".
    #[must_use]
    pub fn price(&self, key: &str) -> Option<f64> {
        self.prices
            .iter()
            .find(|(k, _)| k.as_str() == key)
            .and_then(|(_, v)| *v)
    }

    /// Whether the snapshot tracks `key` at all.
    #[must_use]
    pub fn tracks(&self, key: &str) -> bool {
        self.prices.keys().any(|k| k.as_str() == key)
    }
}

// =============================================================================
// Store
// =============================================================================

/// Symbol key to latest price.
#[derive(Debug, Clone, Default)]
pub struct PriceStore {
    prices: BTreeMap<SymbolKey, Option<f64>>,
}

impl PriceStore {
    /// Create an empty store.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            prices: BTreeMap::new(),
        }
    }

    /// Rebuild the key set from `symbols`.
    ///
    /// Keys already present keep their value; new keys start as `None`;
    /// everything else is dropped.
    pub fn rebuild(&mut self, symbols: &SubscriptionSet) {
        let previous = std::mem::take(&mut self.prices);
        self.prices = symbols
            .iter()
            .map(|symbol| {
                let key = SymbolKey::from_symbol(symbol);
                let value = previous.get(&key).copied().flatten();
                (key, value)
            })
            .collect();
    }

    /// Record the latest price for `symbol`.
    ///
    /// An unparseable price still overwrites, leaving the entry `None`.
    pub fn update(&mut self, symbol: &str, price: Option<f64>) {
        self.prices.insert(SymbolKey::from_symbol(symbol), price);
    }

    /// Whether any symbols are tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    /// Number of tracked keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.prices.len()
    }

    /// Tracked keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &SymbolKey> {
        self.prices.keys()
    }

    /// Copy the store into a snapshot stamped now.
    #[must_use]
    pub fn snapshot(&self) -> PriceSnapshot {
        PriceSnapshot {
            prices: self.prices.clone(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(symbols: &[&str]) -> SubscriptionSet {
        SubscriptionSet::from_raw(symbols.iter().copied())
    }

    #[test]
    fn rebuild_seeds_none() {
        let mut store = PriceStore::new();
        store.rebuild(&set(&["BTCUSDT", "ETHUSDT"]));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.prices.len(), 2);
        assert!(snapshot.tracks("BTC/USDT"));
        assert_eq!(snapshot.price("BTC/USDT"), None);
    }

    #[test]
    fn rebuild_keeps_existing_and_drops_removed() {
        let mut store = PriceStore::new();
        store.rebuild(&set(&["BTCUSDT", "ETHUSDT"]));
        store.update("BTCUSDT", Some(27000.12));
        store.update("ETHUSDT", Some(1600.0));

        store.rebuild(&set(&["BTCUSDT", "SOLUSDT"]));

        let keys: Vec<&str> = store.keys().map(SymbolKey::as_str).collect();
        assert_eq!(keys, vec!["BTC/USDT", "SOL/USDT"]);
        let snapshot = store.snapshot();
        assert_eq!(snapshot.price("BTC/USDT"), Some(27000.12));
        assert_eq!(snapshot.price("SOL/USDT"), None);
    }

    #[test]
    fn update_with_none_clears_price() {
        let mut store = PriceStore::new();
        store.rebuild(&set(&["BTCUSDT"]));
        store.update("BTCUSDT", Some(1.0));
        store.update("BTCUSDT", None);

        let snapshot = store.snapshot();
        assert!(snapshot.tracks("BTC/USDT"));
        assert_eq!(snapshot.price("BTC/USDT"), None);
    }

    #[test]
    fn snapshot_serializes_null_prices() {
        let mut store = PriceStore::new();
        store.rebuild(&set(&["ETHUSDT"]));

        let json = serde_json::to_value(store.snapshot()).unwrap();
        assert_eq!(json["prices"]["ETH/USDT"], serde_json::Value::Null);
        assert!(json["updatedAt"].is_string());
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        fn symbols() -> impl Strategy<Value = Vec<&'static str>> {
            prop::collection::vec(
                prop::sample::select(vec![
                    "BTCUSDT", "ETHUSDT", "SOLUSDC", "ETHBTC", "BNBFDUSD", "PEPEEUR", "XYZ",
                ]),
                0..6,
            )
        }

        proptest! {
            #[test]
            fn keys_track_last_rebuild(history in prop::collection::vec(symbols(), 1..5)) {
                let mut store = PriceStore::new();
                for symbols in &history {
                    let desired = set(symbols);
                    store.rebuild(&desired);
                    for symbol in desired.iter() {
                        store.update(symbol, Some(1.0));
                    }
                }

                let expected: Vec<SymbolKey> = set(history.last().unwrap())
                    .iter()
                    .map(|symbol| SymbolKey::from_symbol(symbol))
                    .collect::<std::collections::BTreeSet<_>>()
                    .into_iter()
                    .collect();
                let actual: Vec<SymbolKey> = store.keys().cloned().collect();
                prop_assert_eq!(actual, expected);
            }
        }
    }
}
