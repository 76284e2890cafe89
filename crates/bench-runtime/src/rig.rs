//! Test rig abstraction.
//!
//! A [`Rig`] receives the trajectory set-point each tick and reports back a
//! measurement. The control loop is written against the trait so hardware
//! backends can be added without touching it.

use bench_common::config::{RigConfig, RigKind};
use bench_common::error::{BenchError, BenchResult};
use std::time::Duration;
use tracing::{debug, info};

/// Test rig driven by the control loop.
pub trait Rig: Send {
    /// Bring the rig into an operational state.
    fn init(&mut self) -> BenchResult<()>;

    /// Drive the rig towards `setpoint` over `dt` of experiment time.
    fn apply(&mut self, setpoint: f64, dt: Duration) -> BenchResult<()>;

    /// Latest measured value.
    fn measure(&mut self) -> BenchResult<f64>;

    /// Move actuators to a safe resting state.
    ///
    /// Called when the experiment is reset because the client went away.
    fn safe_state(&mut self) -> BenchResult<()> {
        Ok(())
    }

    /// Release the rig.
    fn shutdown(&mut self) -> BenchResult<()>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// Rig without hardware: the measurement is the last set-point.
#[derive(Debug, Default)]
pub struct NullRig {
    last: f64,
}

impl NullRig {
    /// Create a null rig.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Rig for NullRig {
    fn init(&mut self) -> BenchResult<()> {
        self.last = 0.0;
        Ok(())
    }

    fn apply(&mut self, setpoint: f64, _dt: Duration) -> BenchResult<()> {
        self.last = setpoint;
        Ok(())
    }

    fn measure(&mut self) -> BenchResult<f64> {
        Ok(self.last)
    }

    fn safe_state(&mut self) -> BenchResult<()> {
        self.last = 0.0;
        Ok(())
    }

    fn shutdown(&mut self) -> BenchResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// First-order lag plant: `y += (u - y) * (1 - exp(-dt / tau))`.
#[derive(Debug)]
pub struct SimulatedRig {
    time_constant: Duration,
    value: f64,
    initialized: bool,
}

impl SimulatedRig {
    /// Create a simulated plant with time constant `tau`.
    #[must_use]
    pub fn new(time_constant: Duration) -> Self {
        Self {
            time_constant,
            value: 0.0,
            initialized: false,
        }
    }

    /// Current plant output.
    #[must_use]
    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Rig for SimulatedRig {
    fn init(&mut self) -> BenchResult<()> {
        if self.time_constant.is_zero() {
            return Err(BenchError::Config("rig.time_constant must be non-zero".into()));
        }
        self.value = 0.0;
        self.initialized = true;
        debug!(tau_ms = self.time_constant.as_millis(), "Simulated rig ready");
        Ok(())
    }

    fn apply(&mut self, setpoint: f64, dt: Duration) -> BenchResult<()> {
        if !self.initialized {
            return Err(BenchError::Io("simulated rig not initialized".into()));
        }
        let alpha = 1.0 - (-dt.as_secs_f64() / self.time_constant.as_secs_f64()).exp();
        self.value += (setpoint - self.value) * alpha;
        Ok(())
    }

    fn measure(&mut self) -> BenchResult<f64> {
        Ok(self.value)
    }

    fn safe_state(&mut self) -> BenchResult<()> {
        self.value = 0.0;
        Ok(())
    }

    fn shutdown(&mut self) -> BenchResult<()> {
        self.initialized = false;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

/// Build the rig selected in the configuration.
#[must_use]
pub fn create_rig(config: &RigConfig) -> Box<dyn Rig> {
    let rig: Box<dyn Rig> = match config.kind {
        RigKind::None => Box::new(NullRig::new()),
        RigKind::Simulated => Box::new(SimulatedRig::new(config.time_constant)),
    };
    info!(rig = rig.name(), "Rig selected");
    rig
}
