//! Single-shot timer slot.
//!
//! Holds at most one outstanding deadline. Callers pick the re-arm rule:
//! [`TimerSlot::replace`] restarts the countdown (debounce), while
//! [`TimerSlot::arm_if_idle`] keeps the existing deadline (backoff).

use std::time::Duration;

use tokio::time::{Instant, sleep_until};

/// At most one pending deadline.
#[derive(Debug, Default)]
pub struct TimerSlot {
    deadline: Option<Instant>,
}

impl TimerSlot {
    /// Create an idle slot.
    #[must_use]
    pub const fn new() -> Self {
        Self { deadline: None }
    }

    /// Arm the slot `after` from now, discarding any pending deadline.
    pub fn replace(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    /// Arm the slot only if nothing is pending.
    ///
    /// Returns whether a new deadline was set.
    pub fn arm_if_idle(&mut self, after: Duration) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(Instant::now() + after);
        true
    }

    /// Drop the pending deadline, if any.
    pub const fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Whether a deadline is pending.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// Pending deadline.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Resolve when the pending deadline passes, leaving the slot idle.
    ///
    /// Pends forever while idle, so it can sit in a `select!` arm
    /// unconditionally. Cancel safe: dropping the future keeps the deadline.
    pub async fn expired(&mut self) {
        match self.deadline {
            Some(deadline) => {
                sleep_until(deadline).await;
                self.deadline = None;
            }
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn replace_restarts_countdown() {
        let mut slot = TimerSlot::new();
        slot.replace(Duration::from_millis(750));
        tokio::time::advance(Duration::from_millis(500)).await;
        slot.replace(Duration::from_millis(750));

        let start = Instant::now();
        slot.expired().await;
        assert_eq!(start.elapsed(), Duration::from_millis(750));
        assert!(!slot.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn arm_if_idle_keeps_first_deadline() {
        let mut slot = TimerSlot::new();
        assert!(slot.arm_if_idle(Duration::from_secs(3)));
        let first = slot.deadline();

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!slot.arm_if_idle(Duration::from_secs(3)));
        assert_eq!(slot.deadline(), first);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_slot_never_fires() {
        let mut slot = TimerSlot::new();
        let mut expired = task::spawn(slot.expired());
        assert_pending!(expired.poll());

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_pending!(expired.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_clears_deadline() {
        let mut slot = TimerSlot::new();
        slot.replace(Duration::from_millis(10));
        slot.cancel();
        assert!(!slot.is_pending());

        slot.replace(Duration::from_millis(10));
        slot.expired().await;
        assert!(!slot.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_wait_keeps_deadline() {
        let mut slot = TimerSlot::new();
        slot.replace(Duration::from_secs(1));
        {
            let mut expired = task::spawn(slot.expired());
            assert_pending!(expired.poll());
        }
        assert!(slot.is_pending());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let mut expired = task::spawn(slot.expired());
        assert_ready!(expired.poll());
    }
}
