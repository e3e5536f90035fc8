use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::error::{Error, Result};

/// Time allowed to write one frame to the peer.
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Time allowed between two frames from the peer.
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Largest encoded message accepted from the peer.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024;

/// Interval of the read worker's poll loop.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Period of OS-level keepalive probes on accepted sockets.
pub const DEFAULT_TCP_KEEPALIVE: Duration = Duration::from_secs(3 * 60);

/// Capacity of the listener's delivery queue.
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;

/// Derives the probe period from the receive deadline (9/10 of it).
fn ping_period_for(pong_wait: Duration) -> Duration {
    pong_wait / 10 * 9
}

/// Liveness and size policy of one channel.
///
/// The value is handed to every adapter at construction; nothing reads a
/// process-wide default after that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveConfig {
    write_wait: Duration,
    pong_wait: Duration,
    ping_period: Duration,
    max_message_size: usize,
    poll_interval: Duration,
}

impl KeepAliveConfig {
    pub fn new() -> Self {
        Self {
            write_wait: DEFAULT_WRITE_WAIT,
            pong_wait: DEFAULT_PONG_WAIT,
            ping_period: ping_period_for(DEFAULT_PONG_WAIT),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_write_wait(mut self, wait: Duration) -> Self {
        self.write_wait = wait;
        self
    }

    /// Sets the receive deadline and re-derives the ping period from it.
    pub fn with_pong_wait(mut self, wait: Duration) -> Self {
        self.pong_wait = wait;
        self.ping_period = ping_period_for(wait);
        self
    }

    /// Overrides the derived ping period. Must stay below the pong wait.
    pub fn with_ping_period(mut self, period: Duration) -> Self {
        self.ping_period = period;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn write_wait(&self) -> Duration {
        self.write_wait
    }

    pub fn pong_wait(&self) -> Duration {
        self.pong_wait
    }

    pub fn ping_period(&self) -> Duration {
        self.ping_period
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Checks the invariants the workers rely on.
    ///
    /// A ping period that is not strictly below the pong wait lets the
    /// receive deadline lapse before the next probe is even sent.
    pub fn validate(&self) -> Result<()> {
        if self.write_wait.is_zero() || self.pong_wait.is_zero() || self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "write wait, pong wait and poll interval must be non-zero".into(),
            ));
        }
        if self.ping_period.is_zero() || self.ping_period >= self.pong_wait {
            return Err(Error::InvalidConfig(format!(
                "ping period {:?} must be non-zero and below pong wait {:?}",
                self.ping_period, self.pong_wait
            )));
        }
        if self.max_message_size == 0 {
            return Err(Error::InvalidConfig("max message size must be non-zero".into()));
        }
        Ok(())
    }

    /// WebSocket settings enforcing the inbound size ceiling.
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: Some(self.max_message_size),
            max_frame_size: Some(self.max_message_size),
            ..WebSocketConfig::default()
        }
    }
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Settings of the accepting side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    endpoint: String,
    max_connections: usize,
    tcp_keepalive: Duration,
}

impl ListenerConfig {
    pub fn new() -> Self {
        Self {
            endpoint: "/".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            tcp_keepalive: DEFAULT_TCP_KEEPALIVE,
        }
    }

    /// Path on which upgrade requests are served.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Number of upgraded channels that may wait for a consumer.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_tcp_keepalive(mut self, period: Duration) -> Self {
        self.tcp_keepalive = period;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    pub fn tcp_keepalive(&self) -> Duration {
        self.tcp_keepalive
    }

    pub fn validate(&self) -> Result<()> {
        if !self.endpoint.starts_with('/') {
            return Err(Error::InvalidConfig(format!(
                "endpoint {:?} must start with '/'",
                self.endpoint
            )));
        }
        if self.max_connections == 0 {
            return Err(Error::InvalidConfig("max connections must be at least 1".into()));
        }
        if self.tcp_keepalive.is_zero() {
            return Err(Error::InvalidConfig("tcp keepalive period must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self::new()
    }
}
