//! Per-backend health cell.
//!
//! Each backend owns exactly one cell. Cells are independent, so there is no
//! lock that spans more than one backend.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Longest cooldown a cell will apply; longer ones are clamped.
pub const MAX_COOLDOWN: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Synchronized failure counter and DOWN deadline for a single backend.
#[derive(Debug, Default)]
pub struct HealthCell {
    inner: Mutex<CellState>,
}

#[derive(Debug, Default, Clone, Copy)]
struct CellState {
    /// Consecutive qualifying failures seen since the last success.
    consecutive_failures: u32,
    /// Backend is DOWN while `now < down_until`.
    down_until: Option<Instant>,
}

/// Result of recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    /// The backend was UP and this failure marked it DOWN.
    MarkedDown,
    /// No state change visible to routing.
    Unchanged,
}

impl HealthCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a failure; mark DOWN for `cooldown` once `threshold` is reached.
    ///
    /// The counter saturates at `threshold`. Failures observed while the
    /// backend is already DOWN leave the deadline untouched.
    pub(crate) fn record_failure(
        &self,
        threshold: u32,
        cooldown: Duration,
        now: Instant,
    ) -> HealthTransition {
        let mut state = self.inner.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        if state.consecutive_failures < threshold {
            return HealthTransition::Unchanged;
        }

        state.consecutive_failures = threshold;
        if is_down(state.down_until, now) {
            return HealthTransition::Unchanged;
        }

        state.down_until = now
            .checked_add(cooldown.min(MAX_COOLDOWN))
            .or_else(|| now.checked_add(MAX_COOLDOWN));
        HealthTransition::MarkedDown
    }

    /// Reset the failure counter. An active DOWN deadline is kept.
    pub(crate) fn record_success(&self) {
        self.inner.lock().consecutive_failures = 0;
    }

    pub fn is_up(&self, now: Instant) -> bool {
        !is_down(self.inner.lock().down_until, now)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Time left in the current cooldown, `None` when UP.
    pub fn remaining_cooldown(&self, now: Instant) -> Option<Duration> {
        self.inner
            .lock()
            .down_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }
}

fn is_down(down_until: Option<Instant>, now: Instant) -> bool {
    matches!(down_until, Some(until) if now < until)
}
