//! Frame transport for the testbench server.
//!
//! This crate provides:
//! - [`frame`]: the length-prefixed wire format and a streaming decoder
//! - [`protocol`]: frame identifiers and payload layouts
//! - [`queue`]: the bounded frame queue shared by server and transport
//! - [`transport`]: experiment state and data owned by the control loop
//! - [`tcp_server`]: the single-client async TCP server

pub mod frame;
pub mod protocol;
pub mod queue;
pub mod tcp_server;
pub mod transport;

pub use frame::{Frame, FrameDecoder};
pub use protocol::{BenchSample, Command, TrajectoryParams};
pub use queue::FrameQueue;
pub use tcp_server::{LinkState, TcpServer};
pub use transport::{BenchData, TrajectoryData, Transport, TransportStats};
