//! Configuration structures for the testbench server.
//!
//! Supports TOML deserialization; every section and field has a default so
//! an empty file yields the desktop profile (1 s ticks, keepalive off).

use crate::error::{BenchError, BenchResult};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Default TCP port the server listens on.
pub const DEFAULT_PORT: u16 = 50007;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TestbenchConfig {
    /// TCP server settings.
    pub server: ServerConfig,
    /// Control loop settings.
    pub control: ControlConfig,
    /// Periodic scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Test rig settings.
    pub rig: RigConfig,
}

/// TCP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address.
    pub bind: SocketAddr,
    /// Number of async I/O worker threads.
    pub worker_threads: usize,
    /// Capacity of each frame queue (input and output).
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            worker_threads: 2,
            queue_capacity: 1024,
        }
    }
}

/// Control loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Wall-clock period of the control tick.
    #[serde(with = "humantime_serde")]
    pub period: Duration,

    /// Simulated time added per running tick.
    #[serde(with = "humantime_serde")]
    pub step: Duration,

    /// Reset the experiment if no frame arrived for this long
    /// (simulated time). Zero disables the check.
    #[serde(with = "humantime_serde")]
    pub keepalive: Duration,

    /// Handle inbound frames at the start of each tick. When false, a
    /// separate link task services the transport every `link_poll_period`.
    pub handle_frames_in_tick: bool,

    /// Period of the link task.
    #[serde(with = "humantime_serde")]
    pub link_poll_period: Duration,

    /// Reset the experiment when the client disconnects.
    pub stop_on_disconnect: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(1),
            step: Duration::from_secs(1),
            keepalive: Duration::ZERO,
            handle_frames_in_tick: true,
            link_poll_period: Duration::from_millis(10),
            stop_on_disconnect: true,
        }
    }
}

/// Policy for handling task executions that overrun their period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverrunPolicy {
    /// Stop the scheduler with a fault.
    Fault,
    /// Log a warning and continue.
    #[default]
    Warn,
    /// Silently continue.
    Ignore,
}

/// Periodic scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How to handle overruns.
    pub on_overrun: OverrunPolicy,
    /// Samples retained per task for percentile queries.
    pub histogram_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            on_overrun: OverrunPolicy::Warn,
            histogram_size: 1000,
        }
    }
}

/// Supported rig backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RigKind {
    /// No hardware; the measurement echoes the set-point.
    #[default]
    None,
    /// First-order lag plant model.
    Simulated,
}

/// Test rig configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    /// Rig backend.
    pub kind: RigKind,
    /// Time constant of the simulated plant.
    #[serde(with = "humantime_serde")]
    pub time_constant: Duration,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            kind: RigKind::None,
            time_constant: Duration::from_millis(200),
        }
    }
}

impl TestbenchConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check values that would make the server unusable.
    ///
    /// # Errors
    ///
    /// Returns [`BenchError::Config`] naming the offending field.
    pub fn validate(&self) -> BenchResult<()> {
        let zero = |name: &str| Err(BenchError::Config(format!("{name} must be non-zero")));

        if self.control.period.is_zero() {
            return zero("control.period");
        }
        if self.control.step.is_zero() {
            return zero("control.step");
        }
        if !self.control.handle_frames_in_tick && self.control.link_poll_period.is_zero() {
            return zero("control.link_poll_period");
        }
        if self.server.worker_threads == 0 {
            return zero("server.worker_threads");
        }
        if self.server.queue_capacity == 0 {
            return zero("server.queue_capacity");
        }
        if self.rig.kind == RigKind::Simulated && self.rig.time_constant.is_zero() {
            return zero("rig.time_constant");
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
