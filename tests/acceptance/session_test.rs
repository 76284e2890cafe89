//! Client session acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - Samples follow the uploaded ramp with one step of experiment time each
//! - Stopping freezes the stream; restarting begins again at the first step
//! - Unknown frames are ignored without disturbing the session
//! - A client disconnect stops the running experiment
//! - A stop sent right before closing is still honoured

use super::common::{fast_control, standard_ramp, wait_for, Client, Testbench};
use bench_common::config::ControlConfig;
use bench_common::state::ExperimentState;
use bench_transport::protocol::Command;
use bench_transport::Frame;
use std::time::Duration;

#[tokio::test]
async fn test_ramp_session() {
    let bench = Testbench::start(fast_control()).await;
    let mut client = Client::connect(&bench).await;

    client.send(Command::Trajectory(standard_ramp())).await;
    client.send(Command::Experiment(true)).await;

    let samples = client.samples(12).await;
    for (i, sample) in samples.iter().enumerate() {
        let step = u32::try_from(i).unwrap() + 1;
        assert_eq!(sample.time, 100 * step);
        assert_eq!(sample.start_value, 0.0);
        assert_eq!(sample.end_value, 10.0);
        let expected = (f64::from(100 * step) / 100.0).min(10.0);
        assert!(
            (sample.setpoint - expected).abs() < 1e-9,
            "t={} setpoint={} expected={}",
            sample.time,
            sample.setpoint,
            expected
        );
        assert_eq!(sample.measurement, sample.setpoint);
    }
    assert_eq!(bench.state(), ExperimentState::Running);

    client.send(Command::Experiment(false)).await;
    assert!(wait_for(|| bench.state() == ExperimentState::Idle).await);

    let scheduler = bench.stop().await;
    assert!(scheduler.metrics("control").unwrap().total_cycles() >= 12);
}

#[tokio::test]
async fn test_restart_begins_at_first_step() {
    let bench = Testbench::start(fast_control()).await;
    let mut client = Client::connect(&bench).await;

    client.send(Command::Trajectory(standard_ramp())).await;
    client.send(Command::Experiment(true)).await;
    client.samples(3).await;

    client.send(Command::Experiment(false)).await;
    assert!(wait_for(|| bench.state() == ExperimentState::Idle).await);
    client.drain(Duration::from_millis(100)).await;

    client.send(Command::Experiment(true)).await;
    let first = client.samples(1).await[0];
    assert_eq!(first.time, 100);
    assert!((first.setpoint - 1.0).abs() < 1e-9);

    bench.stop().await;
}

#[tokio::test]
async fn test_unknown_frames_are_ignored() {
    let bench = Testbench::start(fast_control()).await;
    let mut client = Client::connect(&bench).await;

    client.send_raw(&Frame::new(33, vec![1, 2, 3]).unwrap().encode()).await;
    client.send(Command::Trajectory(standard_ramp())).await;
    client.send(Command::Experiment(true)).await;

    let samples = client.samples(2).await;
    assert_eq!(samples[0].time, 100);
    assert_eq!(bench.stats().frames_ignored, 1);

    bench.stop().await;
}

#[tokio::test]
async fn test_disconnect_stops_experiment() {
    let bench = Testbench::start(fast_control()).await;
    let mut client = Client::connect(&bench).await;

    client.send(Command::Trajectory(standard_ramp())).await;
    client.send(Command::Experiment(true)).await;
    client.samples(2).await;
    drop(client);

    assert!(wait_for(|| !bench.link.is_connected()).await);
    assert!(wait_for(|| bench.state() == ExperimentState::Idle).await);
    assert!(bench.stats().resets >= 1);

    // A new client can start a fresh experiment
    let mut client = Client::connect(&bench).await;
    client.send(Command::Experiment(true)).await;
    assert_eq!(client.samples(1).await[0].time, 100);

    bench.stop().await;
}

#[tokio::test]
async fn test_stop_then_close_is_handled() {
    let control = ControlConfig {
        period: Duration::from_millis(300),
        stop_on_disconnect: false,
        ..fast_control()
    };
    let bench = Testbench::start(control).await;
    let mut client = Client::connect(&bench).await;

    client.send(Command::Trajectory(standard_ramp())).await;
    client.send(Command::Experiment(true)).await;
    client.samples(1).await;

    client.send(Command::Experiment(false)).await;
    drop(client);

    assert!(wait_for(|| !bench.link.is_connected()).await);
    assert!(wait_for(|| bench.state() == ExperimentState::Idle).await);
    let stats = bench.stats();
    assert_eq!(stats.resets, 0);
    assert_eq!(stats.frames_handled, 3);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(bench.state(), ExperimentState::Idle);

    bench.stop().await;
}
