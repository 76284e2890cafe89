//! Keepalive acceptance tests.
//!
//! # Acceptance Criteria
//!
//! - A running experiment with no inbound frames for longer than the
//!   keepalive window is reset while the client stays connected
//! - Regular keepalive frames keep the experiment running indefinitely

use super::common::{fast_control, standard_ramp, wait_for, Client, Testbench};
use bench_common::config::ControlConfig;
use bench_common::state::ExperimentState;
use bench_transport::protocol::Command;
use std::time::Duration;

fn keepalive_control(window: Duration) -> ControlConfig {
    ControlConfig {
        keepalive: window,
        ..fast_control()
    }
}

#[tokio::test]
async fn test_silent_client_is_reset() {
    let bench = Testbench::start(keepalive_control(Duration::from_millis(300))).await;
    let mut client = Client::connect(&bench).await;

    client.send(Command::Trajectory(standard_ramp())).await;
    client.send(Command::Experiment(true)).await;
    let first = client.samples(1).await[0];

    assert!(wait_for(|| bench.state() == ExperimentState::Idle).await);
    assert_eq!(bench.stats().resets, 1);
    assert!(bench.link.is_connected());

    // Nothing past the keepalive window reaches the client
    let mut times = vec![first.time];
    while let Some(sample) = client.next_sample(Duration::from_millis(100)).await {
        times.push(sample.time);
    }
    assert!(times.windows(2).all(|w| w[1] == w[0] + 100), "samples: {times:?}");
    assert!(times.iter().all(|&t| t <= 400), "samples: {times:?}");

    bench.stop().await;
}

#[tokio::test]
async fn test_keepalive_frames_sustain_experiment() {
    let bench = Testbench::start(keepalive_control(Duration::from_millis(1000))).await;
    let mut client = Client::connect(&bench).await;

    client.send(Command::Trajectory(standard_ramp())).await;
    client.send(Command::Experiment(true)).await;

    // Twice the window of experiment time, answering every sample
    let mut last_time = 0;
    for _ in 0..20 {
        client.send(Command::Keepalive).await;
        let sample = client.samples(1).await[0];
        assert_eq!(sample.time, last_time + 100);
        last_time = sample.time;
    }
    assert_eq!(bench.state(), ExperimentState::Running);
    assert_eq!(bench.stats().resets, 0);

    bench.stop().await;
}
