use std::sync::Arc;
use std::time::Duration;

use crate::naming::{NumberedNaming, QueueNaming};

/// Whether a link exchanges liveness pings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingMode {
    Disabled,
    Enabled,
}

/// Timing and naming for IPC message ports.
#[derive(Debug, Clone)]
pub struct IpcConfig {
    /// Idle time after which the send side emits a ping. Default: 10 s.
    pub ping_interval: Duration,
    /// Silence after which a receive fails with `LostConnection`. Default: 25 s.
    pub ping_timeout: Duration,
    /// Longest single wait on the queue; bounds cancellation latency.
    /// Default: 1 s.
    pub poll_interval: Duration,
    /// How long `connect` waits for the acceptor's reply. Default: 8 s.
    pub connect_timeout: Duration,
    /// How long a send waits on a full queue. Default: zero (try once).
    pub send_timeout: Duration,
    pub naming: Arc<dyn QueueNaming>,
}

impl IpcConfig {
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    pub fn with_naming(mut self, naming: Arc<dyn QueueNaming>) -> Self {
        self.naming = naming;
        self
    }
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(10),
            ping_timeout: Duration::from_secs(25),
            poll_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(8),
            send_timeout: Duration::ZERO,
            naming: Arc::new(NumberedNaming),
        }
    }
}
