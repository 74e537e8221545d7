//! Last-motion bookkeeping for the accelerometer path.

use std::time::{Duration, Instant};

/// Remembers when motion was last seen.
///
/// The timestamp only ever moves forward, so out-of-order readings cannot
/// shorten an idle period that has already been observed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionTracker {
    last_motion: Option<Instant>,
}

impl MotionTracker {
    /// Tracker that has not seen any reading yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// When motion was last recorded.
    pub fn last_motion(&self) -> Option<Instant> {
        self.last_motion
    }

    /// Start the idle clock at `now` if nothing was recorded yet.
    pub fn seed(&mut self, now: Instant) {
        if self.last_motion.is_none() {
            self.last_motion = Some(now);
        }
    }

    /// Record motion at `now`.
    pub fn record_motion(&mut self, now: Instant) {
        self.last_motion = Some(match self.last_motion {
            Some(last) => last.max(now),
            None => now,
        });
    }

    /// Restart the idle clock at `now`.
    ///
    /// Used on resume so a fresh still window must elapse before stillness
    /// can pause again.
    pub fn reset(&mut self, now: Instant) {
        self.record_motion(now);
    }

    /// Time since the last recorded motion, or `None` before the first reading.
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.last_motion
            .map(|last| now.saturating_duration_since(last))
    }
}
