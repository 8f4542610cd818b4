//! Reset-loop detection.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Resets within [`RESET_WINDOW`] that mean the device cannot be recovered.
pub const RESET_LOOP_COUNT: usize = 3;

/// Sliding window for [`RESET_LOOP_COUNT`].
pub const RESET_WINDOW: Duration = Duration::from_secs(5);

/// Remembers recent reset times.
#[derive(Debug, Default)]
pub struct ResetTracker {
    recent: VecDeque<Instant>,
}

impl ResetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a reset at `at`. Returns `true` when this reset completes a
    /// loop (too many resets inside the window).
    pub fn record(&mut self, at: Instant) -> bool {
        while let Some(&oldest) = self.recent.front() {
            if at.duration_since(oldest) >= RESET_WINDOW {
                self.recent.pop_front();
            } else {
                break;
            }
        }
        self.recent.push_back(at);
        self.recent.len() >= RESET_LOOP_COUNT
    }

    /// Number of resets inside the current window.
    pub fn recent(&self) -> usize {
        self.recent.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn three_quick_resets_are_a_loop() {
        let t0 = Instant::now();
        let mut tracker = ResetTracker::new();
        assert!(!tracker.record(t0));
        assert!(!tracker.record(t0 + secs(1)));
        assert!(tracker.record(t0 + secs(2)));
    }

    #[test]
    fn spaced_resets_are_not_a_loop() {
        let t0 = Instant::now();
        let mut tracker = ResetTracker::new();
        assert!(!tracker.record(t0));
        assert!(!tracker.record(t0 + secs(10)));
        assert_eq!(tracker.recent(), 1);
    }

    #[test]
    fn window_slides() {
        let t0 = Instant::now();
        let mut tracker = ResetTracker::new();
        assert!(!tracker.record(t0));
        assert!(!tracker.record(t0 + secs(4)));
        // t0 has left the window.
        assert!(!tracker.record(t0 + secs(6)));
        assert!(tracker.record(t0 + secs(8)));
    }
}
