//! Subscription Set Types
//!
//! Domain types for the set of exchange symbols the relay tracks upstream.
//!
//! # Design
//!
//! The tracked set is replaced wholesale on every reconcile. Each replacement
//! is expressed as a [`SubscriptionChanges`] delta against the current set:
//! - `unsubscribe` holds symbols leaving the set
//! - `subscribe` holds symbols entering it
//!
//! Both sides are kept sorted so the upstream sees a deterministic message
//! order.

use std::collections::BTreeSet;

use crate::domain::symbol::normalize_symbol;

// =============================================================================
// Types
// =============================================================================

/// An exchange-native symbol (uppercase, no separators), e.g. `BTCUSDT`.
pub type Symbol = String;

/// Set of exchange-native symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    symbols: BTreeSet<Symbol>,
}

impl SubscriptionSet {
    /// Create an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            symbols: BTreeSet::new(),
        }
    }

    /// Build a set from raw symbol strings, normalizing each one.
    ///
    /// Entries that normalize to an empty string are skipped.
    #[must_use]
    pub fn from_raw<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        raw.into_iter()
            .map(|s| normalize_symbol(s.as_ref()))
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Whether `symbol` is tracked.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.symbols.contains(symbol)
    }

    /// Number of tracked symbols.
    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Iterate symbols in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    /// Collect into a sorted vector.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Symbol> {
        self.symbols.iter().cloned().collect()
    }

    /// Compute the delta that turns `self` into `desired`.
    #[must_use]
    pub fn diff(&self, desired: &Self) -> SubscriptionChanges {
        SubscriptionChanges {
            subscribe: desired.symbols.difference(&self.symbols).cloned().collect(),
            unsubscribe: self.symbols.difference(&desired.symbols).cloned().collect(),
        }
    }
}

impl FromIterator<Symbol> for SubscriptionSet {
    fn from_iter<T: IntoIterator<Item = Symbol>>(iter: T) -> Self {
        Self {
            symbols: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a SubscriptionSet {
    type Item = &'a Symbol;
    type IntoIter = std::collections::btree_set::Iter<'a, Symbol>;

    fn into_iter(self) -> Self::IntoIter {
        self.symbols.iter()
    }
}

// =============================================================================
// Subscription Changes
// =============================================================================

/// Changes to upstream subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionChanges {
    /// Symbols to subscribe to.
    pub subscribe: BTreeSet<Symbol>,
    /// Symbols to unsubscribe from.
    pub unsubscribe: BTreeSet<Symbol>,
}

impl SubscriptionChanges {
    /// Check if there are any changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribe.is_empty() && self.unsubscribe.is_empty()
    }

    /// Symbols to subscribe, sorted.
    #[must_use]
    pub fn added(&self) -> Vec<Symbol> {
        self.subscribe.iter().cloned().collect()
    }

    /// Symbols to unsubscribe, sorted.
    #[must_use]
    pub fn removed(&self) -> Vec<Symbol> {
        self.unsubscribe.iter().cloned().collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
