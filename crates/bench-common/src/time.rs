//! Simulated experiment time.
//!
//! Experiment time is not wall-clock time: it starts at zero when an
//! experiment is started and advances by a fixed step on every running
//! control tick.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Milliseconds of simulated time since the experiment started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SimTime(pub u64);

impl SimTime {
    /// Experiment start.
    pub const ZERO: SimTime = SimTime(0);

    /// Create from milliseconds.
    #[must_use]
    pub const fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    /// Milliseconds since experiment start.
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    /// Time as carried in data frames: a 32-bit millisecond counter that wraps.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn wire_millis(self) -> u32 {
        self.0 as u32
    }

    /// Advance by `step`, saturating at `u64::MAX`.
    pub fn advance(&mut self, step: Duration) {
        let ms = u64::try_from(step.as_millis()).unwrap_or(u64::MAX);
        self.0 = self.0.saturating_add(ms);
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance() {
        let mut t = SimTime::ZERO;
        t.advance(Duration::from_millis(100));
        t.advance(Duration::from_millis(100));
        assert_eq!(t.as_millis(), 200);
        assert_eq!(t.to_string(), "200ms");
    }

    #[test]
    fn test_wire_millis_wraps() {
        let t = SimTime::from_millis(u64::from(u32::MAX) + 5);
        assert_eq!(t.wire_millis(), 4);
    }
}
