//! Piecewise-linear set-point ramp.
//!
//! A [`Ramp`] holds `start_value` until `start_time`, interpolates linearly
//! to `end_value` at `end_time`, and holds `end_value` afterwards:
//!
//! ```text
//! value
//!   v1 |                 +----------
//!      |                /
//!      |               /
//!   v0 |--------------+
//!      +--------------+--+---------- t
//!                   start end
//! ```
//!
//! # Example
//!
//! ```
//! use bench_common::trajectory::Ramp;
//!
//! let ramp = Ramp::new(0, 1000, 0.0, 10.0).unwrap();
//! assert_eq!(ramp.evaluate(500), 5.0);
//! assert_eq!(ramp.evaluate(1000), 10.0);
//! assert_eq!(ramp.evaluate(1500), 10.0);
//! ```

use crate::error::{BenchError, BenchResult};
use serde::{Deserialize, Serialize};

/// Linear ramp between two values over a time window in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Ramp {
    start_time: u64,
    end_time: u64,
    start_value: f64,
    end_value: f64,
}

impl Ramp {
    /// Create a ramp.
    ///
    /// A zero-length window (`start_time == end_time`) is accepted and acts
    /// as a step from `start_value` to `end_value` at `start_time`.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::InvalidTrajectory`] if `end_time < start_time`
    /// or either value is not finite.
    pub fn new(start_time: u64, end_time: u64, start_value: f64, end_value: f64) -> BenchResult<Self> {
        if end_time < start_time {
            return Err(BenchError::InvalidTrajectory(format!(
                "end time {end_time}ms precedes start time {start_time}ms"
            )));
        }
        if !start_value.is_finite() || !end_value.is_finite() {
            return Err(BenchError::InvalidTrajectory(format!(
                "non-finite boundary values ({start_value}, {end_value})"
            )));
        }

        Ok(Self {
            start_time,
            end_time,
            start_value,
            end_value,
        })
    }

    /// Start of the ramp window in milliseconds.
    #[must_use]
    pub fn start_time(&self) -> u64 {
        self.start_time
    }

    /// End of the ramp window in milliseconds.
    #[must_use]
    pub fn end_time(&self) -> u64 {
        self.end_time
    }

    /// Value held before the window.
    #[must_use]
    pub fn start_value(&self) -> f64 {
        self.start_value
    }

    /// Value held after the window.
    #[must_use]
    pub fn end_value(&self) -> f64 {
        self.end_value
    }

    /// Evaluate the ramp at time `t` (milliseconds).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn evaluate(&self, t: u64) -> f64 {
        if t < self.start_time {
            self.start_value
        } else if t < self.end_time {
            // start_time <= t < end_time, so the window is non-empty here
            let span = (self.end_time - self.start_time) as f64;
            let elapsed = (t - self.start_time) as f64;
            self.start_value + (self.end_value - self.start_value) * elapsed / span
        } else {
            self.end_value
        }
    }
}
