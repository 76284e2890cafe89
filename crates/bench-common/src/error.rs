use thiserror::Error;

/// Testbench error types covering configuration, protocol and loop failures.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BenchError {
    /// Configuration or initialization error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed frame or frame payload.
    #[error("frame error: {0}")]
    Frame(String),

    /// Trajectory parameters that cannot describe a ramp.
    #[error("invalid trajectory: {0}")]
    InvalidTrajectory(String),

    /// Invalid experiment state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// I/O operation error.
    #[error("I/O error: {0}")]
    Io(String),

    /// A scheduled task failed or overran its period.
    #[error("task '{task}' faulted: {reason}")]
    TaskFault {
        /// Name the task was registered under.
        task: String,
        /// Failure description.
        reason: String,
    },

    /// The component has been shut down.
    #[error("shut down")]
    Shutdown,
}

impl From<std::io::Error> for BenchError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Convenience type alias for testbench operations.
pub type BenchResult<T> = Result<T, BenchError>;
