//! Periodic task scheduler.
//!
//! Tasks are registered with a name and a period. Each cycle the scheduler:
//! 1. Sleeps until the earliest task deadline
//! 2. Runs every task whose deadline has passed
//! 3. Records execution time and checks for overruns
//! 4. Advances the task's deadline, skipping ticks it has fallen behind on
//!
//! Deadlines are absolute so jitter does not accumulate. On Linux the wait
//! is a `clock_nanosleep` with `TIMER_ABSTIME` on `CLOCK_MONOTONIC`, so an
//! interrupted or late sleep never shifts the wake-up time.

use bench_common::config::{OverrunPolicy, SchedulerConfig};
use bench_common::error::{BenchError, BenchResult};
use bench_common::metrics::{CycleMetrics, MetricsSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Longest single sleep, so a stop request is noticed promptly.
const MAX_SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Work executed periodically by the scheduler.
pub trait CycleTask: Send {
    /// Run one tick.
    ///
    /// # Errors
    ///
    /// An error faults the scheduler and stops it.
    fn run(&mut self) -> BenchResult<()>;

    /// Called once when the scheduler loop exits, whether stopped or faulted.
    fn shutdown(&mut self) -> BenchResult<()> {
        Ok(())
    }
}

impl<F> CycleTask for F
where
    F: FnMut() -> BenchResult<()> + Send,
{
    fn run(&mut self) -> BenchResult<()> {
        self()
    }
}

struct PeriodicTask {
    name: String,
    period: Duration,
    next_deadline: Option<Instant>,
    task: Box<dyn CycleTask>,
    metrics: CycleMetrics,
}

/// Outcome of one scheduler cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Names of the tasks that ran, in execution order.
    pub executed: Vec<String>,
    /// Names of the tasks that overran their period.
    pub overruns: Vec<String>,
}

/// Scheduler running named periodic tasks on one thread.
pub struct PeriodicScheduler {
    tasks: Vec<PeriodicTask>,
    on_overrun: OverrunPolicy,
    histogram_size: usize,
    stop: Arc<AtomicBool>,
    cycle_count: u64,
}

impl PeriodicScheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            tasks: Vec::new(),
            on_overrun: config.on_overrun,
            histogram_size: config.histogram_size,
            stop: Arc::new(AtomicBool::new(false)),
            cycle_count: 0,
        }
    }

    /// Register a task. Its first run is one `period` after the scheduler
    /// starts.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Config`] for a zero period or a duplicate name.
    pub fn add_task(
        &mut self,
        name: impl Into<String>,
        period: Duration,
        task: impl CycleTask + 'static,
    ) -> BenchResult<()> {
        let name = name.into();
        if period.is_zero() {
            return Err(BenchError::Config(format!("task '{name}' has a zero period")));
        }
        if self.tasks.iter().any(|t| t.name == name) {
            return Err(BenchError::Config(format!("task '{name}' already registered")));
        }

        debug!(task = %name, period_ms = period.as_millis(), "Task registered");
        self.tasks.push(PeriodicTask {
            metrics: CycleMetrics::new(self.histogram_size, period),
            name,
            period,
            next_deadline: None,
            task: Box::new(task),
        });
        Ok(())
    }

    /// Registered task names.
    #[must_use]
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    /// Metrics of a task by name.
    #[must_use]
    pub fn metrics(&self, name: &str) -> Option<&CycleMetrics> {
        self.tasks.iter().find(|t| t.name == name).map(|t| &t.metrics)
    }

    /// Snapshots of every task's metrics.
    #[must_use]
    pub fn snapshots(&self) -> Vec<(String, MetricsSnapshot)> {
        self.tasks
            .iter()
            .map(|t| (t.name.clone(), t.metrics.snapshot()))
            .collect()
    }

    /// Total cycles executed.
    #[must_use]
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Flag that stops [`Self::run`] when set.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    fn schedule_initial(&mut self, now: Instant) {
        for task in &mut self.tasks {
            if task.next_deadline.is_none() {
                task.next_deadline = Some(now + task.period);
            }
        }
    }

    /// Wait for the next deadline and run every due task.
    ///
    /// Returns `Ok(None)` if a stop was requested while waiting.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::TaskFault`] if a task fails, or overruns under
    /// [`OverrunPolicy::Fault`].
    pub fn run_cycle(&mut self) -> BenchResult<Option<CycleReport>> {
        if self.tasks.is_empty() {
            return Err(BenchError::Config("no tasks registered".into()));
        }
        self.schedule_initial(Instant::now());

        let Some(deadline) = self.tasks.iter().filter_map(|t| t.next_deadline).min() else {
            return Ok(Some(CycleReport::default()));
        };
        if !self.wait_until(deadline) {
            return Ok(None);
        }

        let mut report = CycleReport::default();
        let now = Instant::now();

        for task in &mut self.tasks {
            let Some(due) = task.next_deadline else { continue };
            if due > now {
                continue;
            }

            let start = Instant::now();
            let result = task.task.run();
            let execution = start.elapsed();

            let overrun = task.metrics.record(execution);
            report.executed.push(task.name.clone());

            // Next deadline strictly in the future; skipped ticks are counted
            let mut next = due + task.period;
            let mut missed = 0u64;
            while next <= now {
                next += task.period;
                missed += 1;
            }
            if missed > 0 {
                task.metrics.record_missed(missed);
                warn!(task = %task.name, missed, "Scheduler fell behind, skipping ticks");
            }
            task.next_deadline = Some(next);

            if let Err(e) = result {
                error!(task = %task.name, error = %e, "Task failed");
                return Err(BenchError::TaskFault {
                    task: task.name.clone(),
                    reason: e.to_string(),
                });
            }

            if overrun {
                report.overruns.push(task.name.clone());
                match self.on_overrun {
                    OverrunPolicy::Fault => {
                        error!(
                            task = %task.name,
                            execution_us = execution.as_micros(),
                            period_us = task.period.as_micros(),
                            "Task overran its period - faulting scheduler"
                        );
                        return Err(BenchError::TaskFault {
                            task: task.name.clone(),
                            reason: format!(
                                "execution took {}us, period is {}us",
                                execution.as_micros(),
                                task.period.as_micros()
                            ),
                        });
                    }
                    OverrunPolicy::Warn => warn!(
                        task = %task.name,
                        execution_us = execution.as_micros(),
                        period_us = task.period.as_micros(),
                        "Task overran its period"
                    ),
                    OverrunPolicy::Ignore => {}
                }
            }

            trace!(task = %task.name, execution_us = execution.as_micros(), "Task complete");
        }

        self.cycle_count += 1;
        Ok(Some(report))
    }

    /// Run cycles until the stop flag is set or a task faults.
    ///
    /// This blocks the current thread.
    ///
    /// # Errors
    ///
    /// Propagates the first task fault.
    pub fn run(&mut self) -> BenchResult<()> {
        info!(tasks = ?self.task_names(), "Entering scheduler loop");

        let result = self.run_loop();
        for task in &mut self.tasks {
            if let Err(e) = task.task.shutdown() {
                warn!(task = %task.name, error = %e, "Task shutdown failed");
            }
        }

        info!(cycles = self.cycle_count, "Scheduler loop exited");
        result
    }

    fn run_loop(&mut self) -> BenchResult<()> {
        while !self.stop.load(Ordering::Acquire) {
            if self.run_cycle()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    /// Move the scheduler onto its own thread.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Config`] if the thread cannot be spawned.
    pub fn spawn(mut self) -> BenchResult<SchedulerHandle> {
        let stop = self.stop_flag();
        let handle = thread::Builder::new()
            .name("bench-scheduler".into())
            .spawn(move || {
                let result = self.run();
                (self, result)
            })
            .map_err(|e| BenchError::Config(format!("Failed to spawn scheduler thread: {e}")))?;

        Ok(SchedulerHandle { stop, handle })
    }

    /// Sleep until `deadline` in slices, checking the stop flag.
    /// Returns false if a stop was requested.
    fn wait_until(&self, deadline: Instant) -> bool {
        let now = Instant::now();
        if deadline <= now {
            return !self.stop.load(Ordering::Acquire);
        }
        // Read after `now`, so the target is never earlier than `deadline`
        let target = monotonic_now() + (deadline - now);

        loop {
            if self.stop.load(Ordering::Acquire) {
                return false;
            }
            let now = monotonic_now();
            if target <= now {
                return true;
            }
            sleep_until(target.min(now + MAX_SLEEP_SLICE));
        }
    }
}

/// Current `CLOCK_MONOTONIC` reading.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn monotonic_now() -> Duration {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` is a valid, writable timespec.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    Duration::new(
        u64::try_from(ts.tv_sec).unwrap_or(0),
        u32::try_from(ts.tv_nsec).unwrap_or(0),
    )
}

/// Sleep until the monotonic clock reaches `target`.
#[cfg(target_os = "linux")]
#[allow(unsafe_code, clippy::cast_possible_wrap)]
fn sleep_until(target: Duration) {
    let ts = libc::timespec {
        tv_sec: target.as_secs() as libc::time_t,
        tv_nsec: target.subsec_nanos() as libc::c_long,
    };

    // SAFETY: `ts` is a valid timespec and the remainder pointer may be null.
    // With TIMER_ABSTIME an EINTR wake-up is simply retried to the same target.
    unsafe {
        while libc::clock_nanosleep(
            libc::CLOCK_MONOTONIC,
            libc::TIMER_ABSTIME,
            &ts,
            std::ptr::null_mut(),
        ) == libc::EINTR
        {}
    }
}

#[cfg(not(target_os = "linux"))]
fn monotonic_now() -> Duration {
    static EPOCH: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed()
}

#[cfg(not(target_os = "linux"))]
fn sleep_until(target: Duration) {
    thread::sleep(target.saturating_sub(monotonic_now()));
}

/// How a spawned scheduler ended.
pub struct SchedulerExit {
    /// The scheduler, with its final per-task metrics.
    pub scheduler: PeriodicScheduler,
    /// `Err` with the task fault that ended the loop, if any.
    pub result: BenchResult<()>,
}

impl SchedulerExit {
    /// The scheduler if the loop ended cleanly.
    ///
    /// # Errors
    ///
    /// Returns the task fault that ended the loop.
    pub fn into_result(self) -> BenchResult<PeriodicScheduler> {
        self.result.map(|()| self.scheduler)
    }
}

/// Handle to a scheduler running on its own thread.
pub struct SchedulerHandle {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<(PeriodicScheduler, BenchResult<()>)>,
}

impl SchedulerHandle {
    /// True once the scheduler thread has exited (stopped or faulted).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Request a stop, wait for the thread and return the scheduler with its
    /// final metrics and the way its loop ended. A task fault is reported in
    /// [`SchedulerExit::result`], the metrics are kept either way.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::TaskFault`] if the thread panicked.
    pub fn stop(self) -> BenchResult<SchedulerExit> {
        info!("Stopping scheduler");
        self.stop.store(true, Ordering::Release);
        let (scheduler, result) = self.handle.join().map_err(|_| BenchError::TaskFault {
            task: "bench-scheduler".into(),
            reason: "scheduler thread panicked".into(),
        })?;
        Ok(SchedulerExit { scheduler, result })
    }
}
