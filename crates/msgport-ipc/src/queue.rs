use std::io;
use std::sync::Arc;
use std::time::Instant;

/// Size and priority of a message taken off a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Received {
    pub len: usize,
    pub priority: u32,
}

/// A bounded, priority-ordered message queue shared between processes (or
/// threads).
///
/// Higher priorities are delivered first; equal priorities are FIFO.
pub trait MessageQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Largest message the queue accepts.
    fn max_msg_size(&self) -> usize;

    /// Queue depth.
    fn max_num_msg(&self) -> usize;

    /// Send, waiting until `deadline` for space.
    ///
    /// Returns `Ok(false)` if the queue stayed full. A deadline in the past
    /// still sends when space is available.
    fn timed_send(&self, data: &[u8], priority: u32, deadline: Instant) -> io::Result<bool>;

    /// Send only if space is available right now.
    fn try_send(&self, data: &[u8], priority: u32) -> io::Result<bool> {
        self.timed_send(data, priority, Instant::now())
    }

    /// Receive into `buf`, waiting until `deadline` for a message.
    ///
    /// `buf` must hold at least [`max_msg_size`](Self::max_msg_size) bytes.
    /// Returns `Ok(None)` if nothing arrived.
    fn timed_receive(&self, buf: &mut [u8], deadline: Instant) -> io::Result<Option<Received>>;
}

/// Namespace in which queues are created, opened and removed.
pub trait QueueBackend: Send + Sync {
    /// Create a new queue. Fails with `AlreadyExists` if the name is taken.
    fn create(
        &self,
        name: &str,
        max_num_msg: usize,
        max_msg_size: usize,
    ) -> io::Result<Arc<dyn MessageQueue>>;

    /// Open an existing queue. Fails with `NotFound` if there is none.
    fn open(&self, name: &str) -> io::Result<Arc<dyn MessageQueue>>;

    /// Remove a queue name. Open handles stay usable. Returns whether the
    /// name existed.
    fn remove(&self, name: &str) -> io::Result<bool>;

    fn exists(&self, name: &str) -> bool;
}
