//! Testbench server entry point.
//!
//! Wires the TCP frame server, the experiment transport and the periodic
//! control loop together, then runs until Ctrl-C or a scheduler fault.

use anyhow::{Context, Result};
use bench_common::config::TestbenchConfig;
use bench_runtime::{create_rig, link_task, ControlLoop, PeriodicScheduler, SchedulerExit};
use bench_transport::{FrameQueue, LinkState, TcpServer, Transport};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

/// How often the main task checks whether the scheduler thread has exited.
const SCHEDULER_POLL: Duration = Duration::from_millis(100);

/// Testbench server command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "bench-server",
    about = "Testbench server - streams trajectory set-points and rig measurements over TCP",
    version,
    long_about = None
)]
struct Args {
    /// Path to a configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config file).
    #[arg(long, short = 'b', value_name = "ADDR")]
    bind: Option<SocketAddr>,

    /// Keepalive window, e.g. "500ms" (overrides config file, 0 disables).
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    keepalive: Option<Duration>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,

    /// Print the effective configuration as TOML and exit.
    #[arg(long)]
    print_config: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting testbench server");

    let result = run(&args);
    if let Err(e) = &result {
        error!(error = %format!("{e:#}"), "Server terminated with error");
    }
    result
}

/// Resolve configuration and run the server to completion.
fn run(args: &Args) -> Result<()> {
    let mut config = load_config(args)?;
    apply_overrides(&mut config, args);
    config.validate().context("Invalid configuration")?;

    if args.print_config {
        print!("{}", config.to_toml().context("Failed to render configuration")?);
        return Ok(());
    }

    info!(
        bind = %config.server.bind,
        period = ?config.control.period,
        step = ?config.control.step,
        keepalive = ?config.control.keepalive,
        rig = ?config.rig.kind,
        "Configuration loaded"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.worker_threads)
        .thread_name("bench-io")
        .enable_all()
        .build()
        .context("Failed to build async runtime")?;

    runtime.block_on(run_server(config))
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "bench_server={level},bench_runtime={level},bench_transport={level},bench_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `BENCH_CONFIG_PATH` environment variable
/// 3. `config/default.toml` (local development)
/// 4. Built-in defaults
fn load_config(args: &Args) -> Result<TestbenchConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return TestbenchConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("BENCH_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from BENCH_CONFIG_PATH");
            return TestbenchConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from BENCH_CONFIG_PATH={env_path:?}"));
        }
        warn!(
            path = %env_path,
            "BENCH_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return TestbenchConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {local_path:?}"));
    }

    info!("No config file found, using built-in defaults");
    Ok(TestbenchConfig::default())
}

fn apply_overrides(config: &mut TestbenchConfig, args: &Args) {
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(keepalive) = args.keepalive {
        config.control.keepalive = keepalive;
    }
}

/// Run the server until Ctrl-C or a scheduler fault.
async fn run_server(config: TestbenchConfig) -> Result<()> {
    let input = FrameQueue::new(config.server.queue_capacity);
    let output = FrameQueue::new(config.server.queue_capacity);
    let link = LinkState::new();
    let transport = Arc::new(Mutex::new(Transport::new(input.clone(), output.clone())));

    let server = TcpServer::bind(config.server.bind, input.clone(), output.clone(), link.clone())
        .await
        .context("Failed to start TCP server")?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(server.serve(shutdown_rx));

    let mut control = ControlLoop::new(
        Arc::clone(&transport),
        create_rig(&config.rig),
        &config.control,
    )
    .with_link(link);
    control.init().context("Failed to initialize control loop")?;

    let mut scheduler = PeriodicScheduler::new(&config.scheduler);
    scheduler.add_task("control", config.control.period, control)?;
    if !config.control.handle_frames_in_tick {
        scheduler.add_task(
            "link",
            config.control.link_poll_period,
            link_task(Arc::clone(&transport)),
        )?;
    }
    let scheduler = scheduler.spawn()?;
    info!("Testbench server running, press Ctrl-C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut poll = tokio::time::interval(SCHEDULER_POLL);
    loop {
        tokio::select! {
            signal = &mut ctrl_c => {
                match signal {
                    Ok(()) => info!("Shutdown signal received"),
                    Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
                }
                break;
            }
            _ = poll.tick() => {
                if scheduler.is_finished() {
                    error!("Scheduler stopped unexpectedly");
                    break;
                }
            }
        }
    }

    info!("Shutting down...");
    if shutdown_tx.send(true).is_err() {
        warn!("TCP server already stopped");
    }
    match server_task.await {
        Ok(Err(e)) => warn!(error = %e, "TCP server stopped with error"),
        Err(e) => warn!(error = %e, "TCP server task failed"),
        Ok(Ok(())) => {}
    }

    let stopped = tokio::task::spawn_blocking(move || scheduler.stop())
        .await
        .context("Scheduler thread join failed")?;

    let stats = {
        let transport = transport
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        transport.stats()
    };
    info!(
        frames_handled = stats.frames_handled,
        frames_rejected = stats.frames_rejected,
        samples_sent = stats.samples_sent,
        resets = stats.resets,
        dropped_frames = input.dropped() + output.dropped(),
        "Transport statistics"
    );

    let exit = stopped.context("Scheduler thread failed")?;
    report_scheduler_exit(exit)?;
    info!("Server shutdown complete");

    Ok(())
}

/// Log the final per-task metrics, then surface any task fault.
fn report_scheduler_exit(exit: SchedulerExit) -> Result<()> {
    let SchedulerExit { scheduler, result } = exit;
    for (task, snapshot) in scheduler.snapshots() {
        info!(
            task = %task,
            cycles = snapshot.total_cycles,
            mean_us = ?snapshot.mean_us,
            max_us = ?snapshot.max_us,
            p99_us = ?snapshot.p99_us,
            overruns = snapshot.overrun_count,
            missed_ticks = snapshot.missed_ticks,
            "Task statistics"
        );
    }
    info!(cycles = scheduler.cycle_count(), "Scheduler stopped");
    result.context("Scheduler faulted")
}
