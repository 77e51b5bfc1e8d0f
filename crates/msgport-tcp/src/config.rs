use msgport_frame::FrameConfig;

/// Settings applied to TCP message ports.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Frame limits. `max_payload_size` bounds both directions.
    pub frame: FrameConfig,
    /// Disable Nagle's algorithm on connected sockets. Default: `true`.
    pub nodelay: bool,
}

impl TcpConfig {
    pub fn with_frame(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.frame.max_payload_size = max_payload_size;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            nodelay: true,
        }
    }
}
