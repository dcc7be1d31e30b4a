//! Configuration for netframe
//!
//! Centralized configuration with sensible defaults.

use std::collections::HashMap;
use std::time::Duration;

/// Opaque application context handed to every server callback
#[derive(Debug, Clone, Default)]
pub struct Context {
    values: HashMap<String, String>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Address to bind the listen socket to
    pub listen_addr: String,

    /// Port to bind; 0 picks an ephemeral port
    pub port: u16,

    // -------------------------------------------------------------------------
    // Worker Configuration
    // -------------------------------------------------------------------------
    /// Number of worker processes sharing the listen socket
    pub worker_num: usize,

    /// How long a stopping worker waits for its connections to close
    pub graceful_shutdown_timeout: Duration,

    /// How long a half-closed connection may wait for the peer's EOF
    pub drain_timeout: Duration,

    /// Interval at which workers check the stop flag
    pub stop_poll_interval: Duration,

    // -------------------------------------------------------------------------
    // Application Configuration
    // -------------------------------------------------------------------------
    /// Context passed to every callback
    pub context: Context,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1".to_string(),
            port: 54314,
            worker_num: default_worker_num(),
            graceful_shutdown_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(5),
            stop_poll_interval: Duration::from_millis(100),
            context: Context::default(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// One worker per core, leaving one core for the parent
fn default_worker_num() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().saturating_sub(1))
        .unwrap_or(1)
        .max(1)
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the listen port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the number of worker processes
    pub fn worker_num(mut self, count: usize) -> Self {
        self.config.worker_num = count;
        self
    }

    /// Set the graceful shutdown timeout
    pub fn graceful_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.graceful_shutdown_timeout = timeout;
        self
    }

    /// Set the drain timeout for half-closed connections
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// Set the stop flag poll interval
    pub fn stop_poll_interval(mut self, interval: Duration) -> Self {
        self.config.stop_poll_interval = interval;
        self
    }

    /// Add a context entry
    pub fn context_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.context.insert(key, value);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Client bridge configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Messages the worker may hold between the outbound channel and the
    /// socket; `None` means unbounded. When bounded, a full queue blocks
    /// the caller's `send`.
    pub outbound_capacity: Option<usize>,

    /// How long the worker waits for its connection to close on shutdown
    pub graceful_shutdown_timeout: Duration,

    /// Interval at which the worker checks the stop flag
    pub stop_poll_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: None,
            graceful_shutdown_timeout: Duration::from_secs(5),
            stop_poll_interval: Duration::from_millis(100),
        }
    }
}

impl ClientConfig {
    /// Create a new client config builder
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }
}

/// Builder for ClientConfig
#[derive(Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Bound the outbound hand-off queue
    pub fn outbound_capacity(mut self, capacity: usize) -> Self {
        self.config.outbound_capacity = Some(capacity);
        self
    }

    /// Set the graceful shutdown timeout
    pub fn graceful_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.graceful_shutdown_timeout = timeout;
        self
    }

    /// Set the stop flag poll interval
    pub fn stop_poll_interval(mut self, interval: Duration) -> Self {
        self.config.stop_poll_interval = interval;
        self
    }

    pub fn build(self) -> ClientConfig {
        self.config
    }
}
