//! # Configuration Utilities
//!
//! Configuration structures for the dispatcher and the comparator worker, plus the
//! shared TOML loader.
//!
//! Every config type has a `validate()` step. A [`ConfigError`] is fatal at startup:
//! the dispatcher must not accept connections without at least one usable worker.

use std::fmt;
use std::fs;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::frame::DEFAULT_MAX_FRAME_BYTES;
use super::messages::{compare_request_size_bound, DEFAULT_MAX_RPC_BYTES};

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Arguments
/// - `path`: Path to the TOML configuration file
///
/// # Returns
/// - `Ok(T)`: Successfully loaded and parsed configuration
/// - `Err`: File I/O or parsing error
///
/// # Example
/// ```ignore
/// let config: DispatcherConfig = load_config("config/dispatcher.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)?;
    let config: T = toml::from_str(&content)?;
    Ok(config)
}

// ============================================================================
// WORKER ENDPOINTS
// ============================================================================

/// Network address of one comparator worker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerEndpoint {
    /// Hostname or IP address (e.g., "127.0.0.1")
    pub host: String,
    /// TCP port the worker listens on (e.g., 50051)
    pub port: u16,
}

impl WorkerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Address string accepted by `TcpStream::connect`.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() || self.port == 0 {
            return Err(ConfigError::InvalidEndpoint(self.address()));
        }
        Ok(())
    }
}

impl fmt::Display for WorkerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// Ordered list of comparator workers. Order is significant: shard `i` starts on
/// endpoint `i`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    pub endpoints: Vec<WorkerEndpoint>,
}

// ============================================================================
// DISPATCHER CONFIGURATION
// ============================================================================

/// Complete dispatcher configuration loaded from TOML.
///
/// # Example TOML
///
/// ```toml
/// [server]
/// address = "0.0.0.0:5000"
///
/// [dispatch]
/// call_timeout_ms = 5000
///
/// [[workers.endpoints]]
/// host = "127.0.0.1"
/// port = 50051
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Listener settings for client connections
    pub server: DispatcherInfo,
    /// Timeouts and message limits for worker calls
    #[serde(default)]
    pub dispatch: DispatchSettings,
    /// Comparator workers to fan out to
    pub workers: WorkersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherInfo {
    /// Address the dispatcher listens on for clients (e.g., "0.0.0.0:5000")
    pub address: String,
    /// Upper bound on sessions served at once; further clients wait in the accept backlog
    #[serde(default = "default_max_sessions")]
    pub max_concurrent_sessions: usize,
    /// Largest single image frame accepted from a client
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    /// How often dispatch statistics are logged (seconds)
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Budget for one worker call, connect included (milliseconds)
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
    /// Budget for establishing the TCP connection to a worker (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Largest RPC message sent to a worker. Shards that would exceed it are sent in
    /// several calls. Must not exceed any worker's `max_message_bytes`.
    #[serde(default = "default_max_rpc_bytes")]
    pub max_rpc_bytes: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            max_rpc_bytes: default_max_rpc_bytes(),
        }
    }
}

impl DispatchSettings {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.endpoints.is_empty() {
            return Err(ConfigError::NoWorkers);
        }
        for endpoint in &self.workers.endpoints {
            endpoint.validate()?;
        }
        require_positive("server.max_concurrent_sessions", self.server.max_concurrent_sessions as u64)?;
        require_positive("server.max_frame_bytes", self.server.max_frame_bytes as u64)?;
        require_positive("server.report_interval_secs", self.server.report_interval_secs)?;
        require_positive("dispatch.call_timeout_ms", self.dispatch.call_timeout_ms)?;
        require_positive("dispatch.connect_timeout_ms", self.dispatch.connect_timeout_ms)?;

        // Every call carries the reference plus at least one candidate.
        let smallest_call = compare_request_size_bound(
            self.server.max_frame_bytes,
            [self.server.max_frame_bytes],
        );
        if smallest_call > self.dispatch.max_rpc_bytes {
            return Err(ConfigError::InvalidValue {
                field: "dispatch.max_rpc_bytes",
                reason: format!(
                    "{} bytes cannot carry a reference and one candidate of {} bytes ({} needed)",
                    self.dispatch.max_rpc_bytes, self.server.max_frame_bytes, smallest_call
                ),
            });
        }
        Ok(())
    }
}

// ============================================================================
// WORKER CONFIGURATION
// ============================================================================

/// Comparator worker configuration loaded from TOML.
///
/// # Example TOML
///
/// ```toml
/// [worker]
/// address = "0.0.0.0:50051"
///
/// [comparison]
/// threshold = 0.9
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub worker: WorkerInfo,
    #[serde(default)]
    pub comparison: ComparisonConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    /// Address the worker listens on (e.g., "0.0.0.0:50051")
    pub address: String,
    /// Comparisons running at once on the blocking pool
    #[serde(default = "default_parallel_requests")]
    pub max_parallel_requests: usize,
    /// Largest RPC message accepted from the dispatcher
    #[serde(default = "default_max_rpc_bytes")]
    pub max_message_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonConfig {
    /// Histogram correlation a candidate must exceed to count as a match
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let threshold = self.comparison.threshold;
        if !(-1.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidValue {
                field: "comparison.threshold",
                reason: format!("{} is outside [-1, 1]", threshold),
            });
        }
        require_positive("worker.max_parallel_requests", self.worker.max_parallel_requests as u64)?;
        require_positive("worker.max_message_bytes", self.worker.max_message_bytes as u64)?;
        Ok(())
    }
}

fn require_positive(field: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            field,
            reason: "must be greater than zero".to_string(),
        });
    }
    Ok(())
}

fn default_max_sessions() -> usize {
    64
}

fn default_max_frame_bytes() -> usize {
    DEFAULT_MAX_FRAME_BYTES
}

fn default_max_rpc_bytes() -> usize {
    DEFAULT_MAX_RPC_BYTES
}

fn default_report_interval() -> u64 {
    30
}

fn default_call_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    1_000
}

fn default_parallel_requests() -> usize {
    10
}

fn default_threshold() -> f64 {
    0.9
}
