use crate::core::NodeAddress;
use std::time::Duration;

/// First port tried for a directory.
pub const DEFAULT_PORT: u16 = 1180;
/// Ports tried above the requested one, inclusive (1180..=1200).
pub const DEFAULT_PORT_ATTEMPTS: u16 = 21;

fn check_port_range(port: u16, attempts: u16) -> Result<(), String> {
    if attempts == 0 {
        return Err("port_attempts must be > 0".to_string());
    }
    if port.checked_add(attempts - 1).is_none() {
        return Err(format!("port range {}+{} overflows", port, attempts));
    }
    Ok(())
}

/// Coordinator ("query service") configuration
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Host the coordinator's directory is opened on
    pub host: String,

    /// First directory port to try
    pub port: u16,

    /// How many successive ports to try before giving up
    pub port_attempts: u16,

    /// Bound on each remote call the coordinator makes (ping, service-start push, terminate)
    pub call_timeout: Duration,

    /// Buffered coordinator events per subscriber
    pub event_capacity: usize,
}

impl CoordinatorConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            port_attempts: DEFAULT_PORT_ATTEMPTS,
            call_timeout: Duration::from_secs(5),
            event_capacity: 256,
        }
    }

    /// Set the host
    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Set the first port to try
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set how many successive ports to try
    pub fn port_attempts(mut self, attempts: u16) -> Self {
        self.port_attempts = attempts;
        self
    }

    /// Set the remote call timeout
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the per-subscriber event buffer
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("host cannot be empty".to_string());
        }
        check_port_range(self.port, self.port_attempts)?;
        if self.event_capacity == 0 {
            return Err("event_capacity must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Host the node's directory is opened on
    pub host: String,

    /// First directory port to try
    pub port: u16,

    /// How many successive ports to try before giving up
    pub port_attempts: u16,

    /// Coordinator bootstrap address; re-registration always goes here
    pub coordinator: NodeAddress,

    /// Delay between service start and the first core check
    pub health_grace: Duration,

    /// Interval between core checks
    pub health_interval: Duration,

    /// Bound on each remote call the node makes (core check, registration, report)
    pub call_timeout: Duration,

    /// Buffered state transitions per subscriber
    pub event_capacity: usize,
}

impl NodeConfig {
    /// Create a node configuration pointing at `coordinator`
    pub fn new(coordinator: NodeAddress) -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            port_attempts: DEFAULT_PORT_ATTEMPTS,
            coordinator,
            health_grace: Duration::from_secs(7),
            health_interval: Duration::from_secs(4),
            call_timeout: Duration::from_secs(3),
            event_capacity: 64,
        }
    }

    /// Set the host
    pub fn host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Set the first port to try
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set how many successive ports to try
    pub fn port_attempts(mut self, attempts: u16) -> Self {
        self.port_attempts = attempts;
        self
    }

    /// Set the delay before the first core check
    pub fn health_grace(mut self, grace: Duration) -> Self {
        self.health_grace = grace;
        self
    }

    /// Set the interval between core checks
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Set the remote call timeout
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the per-subscriber event buffer
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("host cannot be empty".to_string());
        }
        check_port_range(self.port, self.port_attempts)?;
        if self.health_interval.is_zero() {
            return Err("health_interval must be > 0".to_string());
        }
        if self.call_timeout.is_zero() {
            return Err("call_timeout must be > 0".to_string());
        }
        if self.event_capacity == 0 {
            return Err("event_capacity must be > 0".to_string());
        }
        Ok(())
    }
}
