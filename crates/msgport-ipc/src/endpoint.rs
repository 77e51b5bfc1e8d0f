use std::fmt;

/// Default queue depth. Matches the Linux default `msg_max` for
/// unprivileged processes.
pub const DEFAULT_MAX_NUM_MSG: usize = 10;

/// Default maximum message size in bytes.
pub const DEFAULT_MAX_MSG_SIZE: usize = 1024;

/// Name and sizing of an IPC message port.
///
/// The name identifies the acceptor's queue; connection queues derive their
/// names from it. With POSIX queues the name must start with `/` and contain
/// no other `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IpcEndPoint {
    name: String,
    max_num_msg: usize,
    max_msg_size: usize,
}

impl IpcEndPoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_num_msg: DEFAULT_MAX_NUM_MSG,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
        }
    }

    pub fn with_max_num_msg(mut self, max_num_msg: usize) -> Self {
        self.max_num_msg = max_num_msg;
        self
    }

    pub fn with_max_msg_size(mut self, max_msg_size: usize) -> Self {
        self.max_msg_size = max_msg_size;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_num_msg(&self) -> usize {
        self.max_num_msg
    }

    pub fn max_msg_size(&self) -> usize {
        self.max_msg_size
    }
}

impl fmt::Display for IpcEndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_builders() {
        let endpoint = IpcEndPoint::new("/svc");
        assert_eq!(endpoint.max_num_msg(), DEFAULT_MAX_NUM_MSG);
        assert_eq!(endpoint.max_msg_size(), DEFAULT_MAX_MSG_SIZE);

        let endpoint = endpoint.with_max_num_msg(4).with_max_msg_size(256);
        assert_eq!((endpoint.max_num_msg(), endpoint.max_msg_size()), (4, 256));
        assert_eq!(endpoint.to_string(), "/svc");
    }
}
