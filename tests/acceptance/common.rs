//! Common utilities for acceptance tests.
//!
//! Provides helpers for:
//! - Starting a fully wired testbench on an ephemeral port
//! - Driving it from a TCP client speaking the frame protocol

#![allow(dead_code)] // Not every scenario uses every helper

use bench_common::config::{ControlConfig, SchedulerConfig};
use bench_common::error::BenchResult;
use bench_common::state::ExperimentState;
use bench_runtime::{ControlLoop, NullRig, PeriodicScheduler, SchedulerHandle};
use bench_transport::protocol::{Command, TrajectoryParams, BENCH_DATA_FRAME_ID};
use bench_transport::{BenchSample, FrameDecoder, FrameQueue, LinkState, TcpServer, Transport, TransportStats};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Control settings with 10 ms ticks of 100 ms experiment time.
pub fn fast_control() -> ControlConfig {
    ControlConfig {
        period: Duration::from_millis(10),
        step: Duration::from_millis(100),
        ..ControlConfig::default()
    }
}

/// Ramp from 0 to 10 between 0 and 1000 ms.
pub fn standard_ramp() -> TrajectoryParams {
    TrajectoryParams {
        start_value: 0.0,
        end_value: 10.0,
        start_time: 0,
        end_time: 1000,
    }
}

/// A running server, transport and control loop.
pub struct Testbench {
    pub addr: SocketAddr,
    pub link: LinkState,
    transport: Arc<Mutex<Transport>>,
    shutdown: watch::Sender<bool>,
    server: JoinHandle<BenchResult<()>>,
    scheduler: SchedulerHandle,
}

impl Testbench {
    /// Start the full stack with the given control settings.
    pub async fn start(control: ControlConfig) -> Self {
        let input = FrameQueue::new(256);
        let output = FrameQueue::new(256);
        let link = LinkState::new();
        let transport = Arc::new(Mutex::new(Transport::new(input.clone(), output.clone())));

        let server = TcpServer::bind("127.0.0.1:0".parse().unwrap(), input, output, link.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(server.serve(shutdown_rx));

        let mut control_loop = ControlLoop::new(Arc::clone(&transport), Box::new(NullRig::new()), &control)
            .with_link(link.clone());
        control_loop.init().unwrap();

        let mut scheduler = PeriodicScheduler::new(&SchedulerConfig::default());
        scheduler.add_task("control", control.period, control_loop).unwrap();
        let scheduler = scheduler.spawn().unwrap();

        Self {
            addr,
            link,
            transport,
            shutdown,
            server,
            scheduler,
        }
    }

    /// Current experiment state.
    pub fn state(&self) -> ExperimentState {
        self.transport.lock().unwrap().state()
    }

    /// Transport frame counters.
    pub fn stats(&self) -> TransportStats {
        self.transport.lock().unwrap().stats()
    }

    /// Stop the server and scheduler, returning the scheduler for metrics.
    pub async fn stop(self) -> PeriodicScheduler {
        self.shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), self.server)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
        self.scheduler.stop().unwrap().into_result().unwrap()
    }
}

/// TCP client speaking the frame protocol.
pub struct Client {
    stream: TcpStream,
    decoder: FrameDecoder,
}

impl Client {
    /// Connect and wait until the server registers the session.
    pub async fn connect(bench: &Testbench) -> Self {
        let sessions = bench.link.session_count();
        let stream = TcpStream::connect(bench.addr).await.unwrap();
        assert!(wait_for(|| bench.link.session_count() > sessions).await);
        Self {
            stream,
            decoder: FrameDecoder::new(),
        }
    }

    /// Send one command.
    pub async fn send(&mut self, command: Command) {
        self.stream.write_all(&command.to_frame().encode()).await.unwrap();
    }

    /// Send raw bytes.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Read and discard samples until the stream has been quiet for
    /// `quiet`.
    pub async fn drain(&mut self, quiet: Duration) -> usize {
        let mut count = 0;
        while self.next_sample(quiet).await.is_some() {
            count += 1;
        }
        count
    }

    /// Next bench sample, or `None` if nothing arrives within `timeout`
    /// or the server closes the connection.
    pub async fn next_sample(&mut self, timeout: Duration) -> Option<BenchSample> {
        let mut buf = [0u8; 512];
        loop {
            if let Some(frame) = self.decoder.next_frame().unwrap() {
                assert_eq!(frame.id(), BENCH_DATA_FRAME_ID);
                return Some(BenchSample::from_frame(&frame).unwrap());
            }
            let n = tokio::time::timeout(timeout, self.stream.read(&mut buf))
                .await
                .ok()?
                .ok()?;
            if n == 0 {
                return None;
            }
            self.decoder.extend(&buf[..n]);
        }
    }

    /// Collect `count` samples, failing the test if they do not arrive.
    pub async fn samples(&mut self, count: usize) -> Vec<BenchSample> {
        let mut samples = Vec::with_capacity(count);
        while samples.len() < count {
            let sample = self
                .next_sample(Duration::from_secs(2))
                .await
                .expect("sample stream stalled");
            samples.push(sample);
        }
        samples
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
