//! Exponential backoff scheduler for reconnect attempts.

use std::time::Duration;

use tokio::task::JoinHandle;

pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(2_000);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_millis(30_000);

/// Per-path retry pacing.
///
/// Every [`Backoff::schedule_retry`] doubles the next delay until it reaches
/// the cap; the attempt counter itself is never capped. [`Backoff::reset`]
/// goes back to the base delay and disarms any pending timer.
///
/// Scheduling spawns a tokio task, so it must be called from inside a runtime.
#[derive(Debug)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempts: u32,
    pending: Option<JoinHandle<()>>,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempts: 0,
            pending: None,
        }
    }

    /// `min(max, base * 2^attempt)`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }

    /// Arm a one-shot timer that runs `f` after the current backoff delay.
    ///
    /// Any previously armed timer is cancelled first. Returns the delay used.
    pub fn schedule_retry<F>(&mut self, f: F) -> Duration
    where
        F: FnOnce() + Send + 'static,
    {
        self.clear_pending();
        let delay = self.delay_for_attempt(self.attempts);
        self.attempts = self.attempts.saturating_add(1);
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        }));
        delay
    }

    pub fn clear_pending(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.clear_pending();
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// True while a retry timer is armed and has not fired yet.
    pub fn has_pending(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Backoff {
    fn drop(&mut self) {
        self.clear_pending();
    }
}
