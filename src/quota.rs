//! Per-minute call quota tracking.
//!
//! The generation provider's free tier allows a fixed number of calls per
//! rolling 60-second window. [`QuotaTracker`] enforces that ceiling at
//! dispatch time: an acquire either succeeds (and counts) or reports how long
//! the caller must wait for the window to roll over.
//!
//! The window state sits behind a mutex so concurrent bulk runs sharing one
//! tracker cannot both observe headroom for the last slot. State is
//! process-local and lost on restart; the ceiling is advisory, not an external
//! contract.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Outcome of a single acquire attempt.
#[derive(Debug, Clone, Copy)]
pub struct QuotaDecision {
    pub allowed: bool,
    /// Remaining time in the current window when denied; zero when allowed.
    pub wait: Duration,
}

/// Caller-facing quota diagnostics.
#[derive(Debug, Clone, Copy)]
pub struct QuotaSnapshot {
    pub limit: u32,
    pub remaining: u32,
    pub reset_in: Duration,
}

struct WindowState {
    call_count: u32,
    window_started_at: Instant,
}

/// Tracks dispatches against a calls-per-window ceiling.
pub struct QuotaTracker {
    ceiling: u32,
    window: Duration,
    state: Mutex<WindowState>,
}

impl QuotaTracker {
    pub fn new(ceiling: u32) -> Self {
        Self::with_window(ceiling, Duration::from_secs(60))
    }

    /// Custom window span, used by tests to exercise rollover quickly.
    pub fn with_window(ceiling: u32, window: Duration) -> Self {
        Self {
            ceiling,
            window,
            state: Mutex::new(WindowState {
                call_count: 0,
                window_started_at: Instant::now(),
            }),
        }
    }

    /// Attempt to claim one dispatch slot. The count is incremented inside
    /// the same lock as the headroom check.
    pub fn try_acquire(&self) -> QuotaDecision {
        self.try_acquire_at(Instant::now())
    }

    fn try_acquire_at(&self, now: Instant) -> QuotaDecision {
        let mut state = self.state.lock().unwrap();

        let elapsed = now.duration_since(state.window_started_at);
        if elapsed >= self.window {
            state.call_count = 0;
            state.window_started_at = now;
        }

        if state.call_count >= self.ceiling {
            let elapsed = now.duration_since(state.window_started_at);
            return QuotaDecision {
                allowed: false,
                wait: self.window.saturating_sub(elapsed),
            };
        }

        state.call_count += 1;
        QuotaDecision {
            allowed: true,
            wait: Duration::ZERO,
        }
    }

    pub fn snapshot(&self) -> QuotaSnapshot {
        self.snapshot_at(Instant::now())
    }

    fn snapshot_at(&self, now: Instant) -> QuotaSnapshot {
        let state = self.state.lock().unwrap();

        let elapsed = now.duration_since(state.window_started_at);
        if elapsed >= self.window {
            // Window already rolled over; nothing has been dispatched in it.
            return QuotaSnapshot {
                limit: self.ceiling,
                remaining: self.ceiling,
                reset_in: self.window,
            };
        }

        QuotaSnapshot {
            limit: self.ceiling,
            remaining: self.ceiling.saturating_sub(state.call_count),
            reset_in: self.window.saturating_sub(elapsed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceiling_is_enforced_within_one_window() {
        let tracker = QuotaTracker::new(3);

        for _ in 0..3 {
            assert!(tracker.try_acquire().allowed);
        }

        // The (limit+1)-th dispatch must be denied with a positive wait.
        let denied = tracker.try_acquire();
        assert!(!denied.allowed);
        assert!(denied.wait > Duration::ZERO);
        assert!(denied.wait <= Duration::from_secs(60));
    }

    #[test]
    fn window_rollover_resets_the_count() {
        let tracker = QuotaTracker::with_window(2, Duration::from_millis(20));

        assert!(tracker.try_acquire().allowed);
        assert!(tracker.try_acquire().allowed);
        assert!(!tracker.try_acquire().allowed);

        std::thread::sleep(Duration::from_millis(25));

        assert!(tracker.try_acquire().allowed);
    }

    #[test]
    fn snapshot_reports_remaining_and_reset() {
        let tracker = QuotaTracker::new(5);

        tracker.try_acquire();
        tracker.try_acquire();

        let snap = tracker.snapshot();
        assert_eq!(snap.limit, 5);
        assert_eq!(snap.remaining, 3);
        assert!(snap.reset_in <= Duration::from_secs(60));
        assert!(snap.reset_in > Duration::ZERO);
    }

    #[test]
    fn snapshot_after_rollover_shows_full_headroom() {
        let tracker = QuotaTracker::with_window(2, Duration::from_millis(10));
        tracker.try_acquire();
        tracker.try_acquire();

        std::thread::sleep(Duration::from_millis(15));

        let snap = tracker.snapshot();
        assert_eq!(snap.remaining, 2);
    }
}
