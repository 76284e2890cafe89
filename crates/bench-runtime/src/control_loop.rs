//! Trajectory evaluation and the periodic control tick.

use crate::rig::Rig;
use crate::scheduler::CycleTask;
use bench_common::config::ControlConfig;
use bench_common::error::BenchResult;
use bench_common::state::ExperimentState;
use bench_transport::{BenchData, LinkState, TrajectoryData, Transport};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Write the ramp value at the bench's current time into `traj.output`.
pub fn apply_trajectory(bench: &BenchData, traj: &mut TrajectoryData) {
    traj.output = traj.ramp.evaluate(bench.time.as_millis());
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// No experiment running.
    Idle,
    /// Time advanced and a sample was queued.
    Sampled,
    /// The running experiment was reset because the client disconnected.
    LinkLost,
    /// A sample was queued, then the experiment was reset because no frame
    /// arrived within the keepalive window.
    KeepaliveExpired,
}

fn lock(transport: &Mutex<Transport>) -> MutexGuard<'_, Transport> {
    transport
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Periodic control loop driving one transport and one rig.
pub struct ControlLoop {
    transport: Arc<Mutex<Transport>>,
    rig: Box<dyn Rig>,
    step: Duration,
    keepalive: Duration,
    handle_frames_in_tick: bool,
    stop_on_disconnect: bool,
    link: Option<LinkState>,
    ticks: u64,
}

impl ControlLoop {
    /// Create a control loop from the `[control]` configuration.
    #[must_use]
    pub fn new(transport: Arc<Mutex<Transport>>, rig: Box<dyn Rig>, config: &ControlConfig) -> Self {
        Self {
            transport,
            rig,
            step: config.step,
            keepalive: config.keepalive,
            handle_frames_in_tick: config.handle_frames_in_tick,
            stop_on_disconnect: config.stop_on_disconnect,
            link: None,
            ticks: 0,
        }
    }

    /// Watch `link` and reset a running experiment when it drops.
    #[must_use]
    pub fn with_link(mut self, link: LinkState) -> Self {
        self.link = Some(link);
        self
    }

    /// Initialize the rig and, if needed, the transport.
    ///
    /// # Errors
    ///
    /// Propagates rig and transport initialization failures.
    pub fn init(&mut self) -> BenchResult<()> {
        self.rig.init()?;
        let mut transport = lock(&self.transport);
        if transport.state() == ExperimentState::Uninitialized {
            transport.init()?;
        }
        info!(
            rig = self.rig.name(),
            step_ms = self.step.as_millis(),
            keepalive_ms = self.keepalive.as_millis(),
            "Control loop initialized"
        );
        Ok(())
    }

    /// Ticks executed so far.
    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one control tick.
    ///
    /// # Errors
    ///
    /// Propagates rig failures.
    pub fn tick(&mut self) -> BenchResult<TickOutcome> {
        self.ticks += 1;
        let mut transport = lock(&self.transport);

        if self.handle_frames_in_tick {
            transport.handle_frames();
        }

        if self.stop_on_disconnect && transport.run_exp() {
            if let Some(link) = &self.link {
                if !link.is_connected() {
                    warn!(time = %transport.bench_data.time, "Client link lost, resetting experiment");
                    transport.reset();
                    self.rig.safe_state()?;
                    return Ok(TickOutcome::LinkLost);
                }
            }
        }

        if !transport.run_exp() {
            return Ok(TickOutcome::Idle);
        }

        transport.bench_data.time.advance(self.step);

        let Transport {
            bench_data,
            traj_data,
            ..
        } = &mut *transport;
        apply_trajectory(bench_data, traj_data);

        self.rig.apply(traj_data.output, self.step)?;
        bench_data.measurement = self.rig.measure()?;
        trace!(
            time = %bench_data.time,
            setpoint = traj_data.output,
            measurement = bench_data.measurement,
            "Tick"
        );

        transport.send_data();

        if transport.keepalive_expired(self.keepalive) {
            warn!(
                time = %transport.bench_data.time,
                last_frame = %transport.keepalive_time,
                "Keepalive expired, resetting experiment"
            );
            transport.reset();
            self.rig.safe_state()?;
            return Ok(TickOutcome::KeepaliveExpired);
        }

        Ok(TickOutcome::Sampled)
    }

    /// Put the rig in its safe state and release it.
    ///
    /// # Errors
    ///
    /// Propagates rig failures.
    pub fn shutdown(&mut self) -> BenchResult<()> {
        debug!(ticks = self.ticks, "Control loop shutting down");
        self.rig.safe_state()?;
        self.rig.shutdown()
    }
}

impl CycleTask for ControlLoop {
    fn run(&mut self) -> BenchResult<()> {
        self.tick().map(|_| ())
    }

    fn shutdown(&mut self) -> BenchResult<()> {
        ControlLoop::shutdown(self)
    }
}

/// Task that services inbound frames between control ticks.
///
/// Used when frames are not handled at the start of each tick.
#[must_use]
pub fn link_task(transport: Arc<Mutex<Transport>>) -> impl CycleTask + 'static {
    move || -> BenchResult<()> {
        lock(&transport).run();
        Ok(())
    }
}
