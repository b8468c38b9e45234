//! Reconnection Policy
//!
//! Delay computation and single-shot scheduling for session reconnects.
//! Both feed sessions default to a fixed delay; a multiplier and jitter can be
//! configured for backoff that grows between attempts.

use std::time::Duration;

use rand::Rng;

use crate::application::services::TimerSlot;
use crate::infrastructure::config::FeedSettings;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Ceiling for grown delays.
    pub max_delay: Duration,
    /// Growth factor per attempt; `1.0` keeps the delay fixed.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%).
    pub jitter_factor: f64,
    /// Maximum attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(3))
    }
}

impl ReconnectConfig {
    /// Fixed delay, no jitter, unlimited attempts.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    /// Build from feed settings.
    #[must_use]
    pub const fn from_feed_settings(settings: &FeedSettings) -> Self {
        Self::fixed(settings.reconnect_delay)
    }
}

/// Reconnection delay policy.
///
/// # Example
///
/// ```rust
/// use deal_stream_proxy::infrastructure::exchange::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::fixed(Duration::from_secs(3)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(3)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(3)));
///
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a new reconnection policy.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt.
    ///
    /// Returns `None` once max attempts have been used.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        let delay = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        Some(delay)
    }

    /// Reset after a successful open.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Single pending reconnect per session.
///
/// A schedule request while a reconnect is already pending is ignored, so a
/// close and an error reported for the same connection produce one attempt.
#[derive(Debug)]
pub struct ReconnectScheduler {
    policy: ReconnectPolicy,
    slot: TimerSlot,
}

impl ReconnectScheduler {
    /// Create a scheduler with no pending reconnect.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        Self {
            policy: ReconnectPolicy::new(config),
            slot: TimerSlot::new(),
        }
    }

    /// Arm the reconnect timer unless one is pending.
    ///
    /// Returns the attempt number and delay when a new timer was armed.
    pub fn schedule(&mut self) -> Option<(u32, Duration)> {
        if self.slot.is_pending() {
            return None;
        }
        let delay = self.policy.next_delay()?;
        self.slot.arm_if_idle(delay);
        Some((self.policy.attempt_count(), delay))
    }

    /// Whether a reconnect is pending.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.slot.is_pending()
    }

    /// Wait for the pending reconnect to fire.
    ///
    /// Never completes while nothing is scheduled.
    pub async fn fired(&mut self) {
        self.slot.expired().await;
    }

    /// Forget any pending reconnect and reset the delay after a successful open.
    pub fn reset(&mut self) {
        self.slot.cancel();
        self.policy.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_fixed() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(3));
        assert_eq!(config.max_delay, Duration::from_secs(3));
        assert!((config.multiplier - 1.0).abs() < f64::EPSILON);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 0);
    }

    #[test]
    fn fixed_policy_repeats_delay() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::fixed(Duration::from_millis(250)));
        for _ in 0..5 {
            assert_eq!(policy.next_delay(), Some(Duration::from_millis(250)));
        }
        assert_eq!(policy.attempt_count(), 5);
    }

    #[test]
    fn policy_exponential_backoff_capped() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(300),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        });

        let delays: Vec<u128> = (0..4)
            .filter_map(|_| policy.next_delay())
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 300, 300]);
    }

    #[test]
    fn policy_max_attempts() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig {
            max_attempts: 2,
            ..ReconnectConfig::fixed(Duration::from_millis(10))
        });

        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_none());
        assert!(!policy.should_retry());

        policy.reset();
        assert!(policy.should_retry());
    }

    #[test]
    fn policy_jitter_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor: 0.1,
                ..ReconnectConfig::fixed(Duration::from_millis(1000))
            });

            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms out of range");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn scheduling_twice_yields_one_reconnect() {
        let mut scheduler = ReconnectScheduler::new(ReconnectConfig::fixed(Duration::from_secs(3)));

        assert_eq!(scheduler.schedule(), Some((1, Duration::from_secs(3))));
        assert_eq!(scheduler.schedule(), None);
        assert!(scheduler.is_pending());

        let start = tokio::time::Instant::now();
        scheduler.fired().await;
        assert_eq!(start.elapsed(), Duration::from_secs(3));
        assert!(!scheduler.is_pending());

        // Nothing else is pending after the single reconnect fires.
        let second = tokio::time::timeout(Duration::from_secs(60), scheduler.fired()).await;
        assert!(second.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_pending_reconnect() {
        let mut scheduler = ReconnectScheduler::new(ReconnectConfig::fixed(Duration::from_secs(3)));
        assert!(scheduler.schedule().is_some());

        scheduler.reset();
        assert!(!scheduler.is_pending());
        assert_eq!(scheduler.schedule(), Some((1, Duration::from_secs(3))));
    }
}
