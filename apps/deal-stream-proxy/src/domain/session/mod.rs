//! Feed Session State
//!
//! Connection lifecycle shared by the upstream and control sessions:
//!
//! ```text
//! Disconnected → Connecting → Open → (Closed | Errored) → Backoff → Connecting
//! ```
//!
//! [`FeedState`] records the live state of one session for the health
//! endpoint and for callers that must not send while the feed is down.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

// =============================================================================
// Session State
// =============================================================================

/// Lifecycle state of a feed session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Not connected and not trying to.
    Disconnected,
    /// Handshake in flight.
    Connecting,
    /// Connected and exchanging messages.
    Open,
    /// Closed by the peer.
    Closed,
    /// Failed with a transport or protocol error.
    Errored,
    /// Waiting for the reconnect timer.
    Backoff,
}

impl SessionState {
    /// Whether moving from `self` to `next` is a legal step.
    ///
    /// Any state may drop to `Disconnected` on shutdown.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (_, Self::Disconnected)
                | (Self::Disconnected | Self::Backoff, Self::Connecting)
                | (Self::Connecting, Self::Open | Self::Closed | Self::Errored)
                | (Self::Open, Self::Closed | Self::Errored)
                | (Self::Closed | Self::Errored, Self::Backoff)
        )
    }

    /// Stable lowercase name used in logs, metrics, and health output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Errored => "errored",
            Self::Backoff => "backoff",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Feed State
// =============================================================================

/// Shared, lock-light view of one session.
#[derive(Debug)]
pub struct FeedState {
    name: &'static str,
    state: RwLock<SessionState>,
    last_opened_at: RwLock<Option<DateTime<Utc>>>,
    error_message: RwLock<Option<String>>,
    reconnect_attempts: AtomicU32,
    messages_received: AtomicU64,
}

impl FeedState {
    /// Create a feed state in `Disconnected`.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            state: RwLock::new(SessionState::Disconnected),
            last_opened_at: RwLock::new(None),
            error_message: RwLock::new(None),
            reconnect_attempts: AtomicU32::new(0),
            messages_received: AtomicU64::new(0),
        }
    }

    /// Feed name (`upstream` or `control`).
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Move to `next` if the step is legal.
    ///
    /// Returns `false` and leaves the state untouched otherwise.
    pub fn transition(&self, next: SessionState) -> bool {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            return false;
        }
        *state = next;
        drop(state);

        if next == SessionState::Open {
            *self.last_opened_at.write() = Some(Utc::now());
            self.reconnect_attempts.store(0, Ordering::Relaxed);
            *self.error_message.write() = None;
        }
        true
    }

    /// Enter `Errored` with a message.
    pub fn set_error(&self, message: String) -> bool {
        let moved = self.transition(SessionState::Errored);
        *self.error_message.write() = Some(message);
        moved
    }

    /// Record a reconnect attempt.
    pub fn increment_reconnect_attempts(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a received frame.
    pub fn increment_messages(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Current state.
    #[must_use]
    pub fn get_state(&self) -> SessionState {
        *self.state.read()
    }

    /// Whether the session is `Open`.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.get_state() == SessionState::Open
    }

    /// Frames received since startup.
    #[must_use]
    pub fn get_messages_received(&self) -> u64 {
        self.messages_received.load(Ordering::Relaxed)
    }

    /// Reconnect attempts since the last successful open.
    #[must_use]
    pub fn get_reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Relaxed)
    }

    /// Last error message, cleared on open.
    #[must_use]
    pub fn get_error(&self) -> Option<String> {
        self.error_message.read().clone()
    }

    /// When the session last reached `Open`.
    #[must_use]
    pub fn get_last_opened_at(&self) -> Option<DateTime<Utc>> {
        *self.last_opened_at.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_transitions() {
        use SessionState::{Backoff, Closed, Connecting, Disconnected, Errored, Open};

        let legal = [
            (Disconnected, Connecting),
            (Connecting, Open),
            (Connecting, Errored),
            (Open, Closed),
            (Open, Errored),
            (Closed, Backoff),
            (Errored, Backoff),
            (Backoff, Connecting),
            (Open, Disconnected),
            (Backoff, Disconnected),
        ];
        for (from, to) in legal {
            assert!(from.can_transition_to(to), "{from} -> {to} should be legal");
        }

        let illegal = [
            (Disconnected, Open),
            (Open, Connecting),
            (Open, Backoff),
            (Backoff, Open),
            (Closed, Connecting),
            (Backoff, Backoff),
        ];
        for (from, to) in illegal {
            assert!(!from.can_transition_to(to), "{from} -> {to} should be illegal");
        }
    }

    #[test]
    fn feed_state_open_resets_attempts() {
        let feed = FeedState::new("upstream");
        assert!(feed.transition(SessionState::Connecting));
        assert!(feed.set_error("refused".to_string()));
        assert!(feed.transition(SessionState::Backoff));
        feed.increment_reconnect_attempts();
        assert_eq!(feed.get_reconnect_attempts(), 1);
        assert_eq!(feed.get_error().as_deref(), Some("refused"));

        assert!(feed.transition(SessionState::Connecting));
        assert!(feed.transition(SessionState::Open));
        assert!(feed.is_open());
        assert_eq!(feed.get_reconnect_attempts(), 0);
        assert!(feed.get_error().is_none());
        assert!(feed.get_last_opened_at().is_some());
    }

    #[test]
    fn feed_state_rejects_illegal_step() {
        let feed = FeedState::new("control");
        assert!(!feed.transition(SessionState::Open));
        assert_eq!(feed.get_state(), SessionState::Disconnected);
    }
}
