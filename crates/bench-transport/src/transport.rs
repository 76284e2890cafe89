//! Experiment transport: bench state plus the inbound/outbound frame queues.
//!
//! The transport owns the data the control loop mutates each tick
//! ([`BenchData`], [`TrajectoryData`]) and translates between it and
//! frames. It performs no I/O itself; the TCP server moves frames between
//! the queues and the socket.

use crate::frame::Frame;
use crate::protocol::{BenchSample, Command};
use crate::queue::FrameQueue;
use bench_common::error::BenchResult;
use bench_common::state::{ExperimentState, StateMachine};
use bench_common::time::SimTime;
use bench_common::trajectory::Ramp;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Test-rig data advanced by the control loop.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BenchData {
    /// Elapsed experiment time.
    pub time: SimTime,
    /// Last value measured on the rig.
    pub measurement: f64,
}

/// Active trajectory and its latest output.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrajectoryData {
    /// Ramp parameters.
    pub ramp: Ramp,
    /// Set-point computed for the current tick.
    pub output: f64,
}

/// Frame counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Frames dispatched successfully.
    pub frames_handled: u64,
    /// Malformed or rejected frames.
    pub frames_rejected: u64,
    /// Frames with an identifier this server does not handle.
    pub frames_ignored: u64,
    /// Bench samples queued for sending.
    pub samples_sent: u64,
    /// Resets performed.
    pub resets: u64,
}

/// Experiment transport.
#[derive(Debug)]
pub struct Transport {
    input: FrameQueue,
    output: FrameQueue,
    state: StateMachine,
    stats: TransportStats,
    /// Test-rig data.
    pub bench_data: BenchData,
    /// Trajectory data.
    pub traj_data: TrajectoryData,
    /// Experiment time at which the last frame was received.
    pub keepalive_time: SimTime,
}

impl Transport {
    /// Create a transport over the given queues.
    #[must_use]
    pub fn new(input: FrameQueue, output: FrameQueue) -> Self {
        Self {
            input,
            output,
            state: StateMachine::new(),
            stats: TransportStats::default(),
            bench_data: BenchData::default(),
            traj_data: TrajectoryData::default(),
            keepalive_time: SimTime::ZERO,
        }
    }

    /// Initialize the transport and make it ready to accept a start command.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport was already initialized.
    pub fn init(&mut self) -> BenchResult<()> {
        self.state.transition(ExperimentState::Idle)?;
        self.bench_data = BenchData::default();
        self.traj_data = TrajectoryData::default();
        self.keepalive_time = SimTime::ZERO;
        info!("Transport initialized");
        Ok(())
    }

    /// Current experiment state.
    #[must_use]
    pub fn state(&self) -> ExperimentState {
        self.state.state()
    }

    /// Frame counters.
    #[must_use]
    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    /// True while an experiment is running.
    #[must_use]
    pub fn run_exp(&self) -> bool {
        self.state.state() == ExperimentState::Running
    }

    /// Process every frame waiting in the input queue.
    ///
    /// Every frame refreshes the keepalive timestamp. Malformed frames and
    /// invalid commands are logged and skipped. Returns the number of
    /// frames taken from the queue.
    pub fn handle_frames(&mut self) -> usize {
        let frames = self.input.drain();
        let count = frames.len();
        for frame in frames {
            self.keepalive_time = self.bench_data.time;
            self.dispatch(&frame);
        }
        count
    }

    /// Service the link outside the control tick.
    ///
    /// Equivalent to [`Self::handle_frames`] once initialized; frames stay
    /// queued until then.
    pub fn run(&mut self) -> usize {
        if self.state.state() == ExperimentState::Uninitialized {
            return 0;
        }
        self.handle_frames()
    }

    fn dispatch(&mut self, frame: &Frame) {
        match Command::decode(frame) {
            Ok(Some(Command::Experiment(true))) => self.start_experiment(),
            Ok(Some(Command::Experiment(false))) => self.stop_experiment(),
            Ok(Some(Command::Keepalive)) => {
                self.stats.frames_handled += 1;
            }
            Ok(Some(Command::Trajectory(params))) => match params.to_ramp() {
                Ok(ramp) => {
                    self.traj_data.ramp = ramp;
                    self.stats.frames_handled += 1;
                    info!(
                        start_time = ramp.start_time(),
                        end_time = ramp.end_time(),
                        start_value = ramp.start_value(),
                        end_value = ramp.end_value(),
                        "Trajectory updated"
                    );
                }
                Err(e) => {
                    self.stats.frames_rejected += 1;
                    warn!(error = %e, "Rejected trajectory parameters");
                }
            },
            Ok(None) => {
                self.stats.frames_ignored += 1;
                debug!(id = frame.id(), len = frame.payload().len(), "Ignoring frame with unknown id");
            }
            Err(e) => {
                self.stats.frames_rejected += 1;
                warn!(id = frame.id(), error = %e, "Malformed frame");
            }
        }
    }

    fn start_experiment(&mut self) {
        match self.state.transition(ExperimentState::Running) {
            Ok(()) => {
                self.bench_data = BenchData::default();
                self.keepalive_time = SimTime::ZERO;
                self.traj_data.output = self.traj_data.ramp.evaluate(0);
                self.stats.frames_handled += 1;
                info!("Experiment started");
            }
            Err(e) => {
                self.stats.frames_rejected += 1;
                warn!(error = %e, "Cannot start experiment");
            }
        }
    }

    fn stop_experiment(&mut self) {
        match self.state.transition(ExperimentState::Idle) {
            Ok(()) => {
                self.stats.frames_handled += 1;
                info!(time = %self.bench_data.time, "Experiment stopped");
            }
            Err(e) => {
                self.stats.frames_rejected += 1;
                warn!(error = %e, "Cannot stop experiment");
            }
        }
    }

    /// Queue a bench sample with the current data.
    pub fn send_data(&mut self) {
        let sample = BenchSample {
            time: self.bench_data.time.wire_millis(),
            setpoint: self.traj_data.output,
            measurement: self.bench_data.measurement,
            start_value: self.traj_data.ramp.start_value(),
            end_value: self.traj_data.ramp.end_value(),
        };
        self.output.push(sample.to_frame());
        self.stats.samples_sent += 1;
    }

    /// Stop any running experiment and return the bench data to its
    /// initial values. Trajectory parameters are kept; samples not yet sent
    /// are discarded.
    pub fn reset(&mut self) {
        if self.run_exp() {
            if let Err(e) = self.state.transition(ExperimentState::Idle) {
                warn!(error = %e, "Reset could not leave RUNNING");
            }
        }
        self.bench_data = BenchData::default();
        self.traj_data.output = 0.0;
        self.keepalive_time = SimTime::ZERO;
        self.output.clear();
        self.stats.resets += 1;
        info!("Transport reset");
    }

    /// True if no frame arrived within `window` of experiment time.
    /// A zero window disables the check.
    #[must_use]
    pub fn keepalive_expired(&self, window: Duration) -> bool {
        if window.is_zero() {
            return false;
        }
        let mut deadline = self.keepalive_time;
        deadline.advance(window);
        self.bench_data.time > deadline
    }
}
