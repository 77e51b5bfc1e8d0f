use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::queue::{MessageQueue, QueueBackend, Received};

/// In-process queue namespace.
///
/// Clones share the same namespace, so ports on different threads of one
/// process can reach each other. Useful for single-process deployments and
/// for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct LocalQueues {
    registry: Arc<Mutex<HashMap<String, Arc<LocalQueue>>>>,
}

impl LocalQueues {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Arc<LocalQueue>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl QueueBackend for LocalQueues {
    fn create(
        &self,
        name: &str,
        max_num_msg: usize,
        max_msg_size: usize,
    ) -> io::Result<Arc<dyn MessageQueue>> {
        if max_num_msg == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "queue depth must be at least 1",
            ));
        }
        let mut registry = self.registry();
        if registry.contains_key(name) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("queue {name} already exists"),
            ));
        }
        let queue = Arc::new(LocalQueue {
            name: name.to_string(),
            max_num_msg,
            max_msg_size,
            state: Mutex::new(LocalState::default()),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        });
        registry.insert(name.to_string(), Arc::clone(&queue));
        Ok(queue)
    }

    fn open(&self, name: &str) -> io::Result<Arc<dyn MessageQueue>> {
        match self.registry().get(name) {
            Some(queue) => Ok(Arc::clone(queue) as Arc<dyn MessageQueue>),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("queue {name} does not exist"),
            )),
        }
    }

    fn remove(&self, name: &str) -> io::Result<bool> {
        Ok(self.registry().remove(name).is_some())
    }

    fn exists(&self, name: &str) -> bool {
        self.registry().contains_key(name)
    }
}

#[derive(Debug)]
struct LocalQueue {
    name: String,
    max_num_msg: usize,
    max_msg_size: usize,
    state: Mutex<LocalState>,
    not_empty: Condvar,
    not_full: Condvar,
}

#[derive(Debug, Default)]
struct LocalState {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

#[derive(Debug)]
struct Entry {
    priority: u32,
    seq: u64,
    data: Vec<u8>,
}

// Max-heap: highest priority first, then lowest sequence number.
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl LocalQueue {
    fn lock(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MessageQueue for LocalQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_msg_size(&self) -> usize {
        self.max_msg_size
    }

    fn max_num_msg(&self) -> usize {
        self.max_num_msg
    }

    fn timed_send(&self, data: &[u8], priority: u32, deadline: Instant) -> io::Result<bool> {
        if data.len() > self.max_msg_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "message of {} bytes exceeds queue limit of {}",
                    data.len(),
                    self.max_msg_size
                ),
            ));
        }

        let mut state = self.lock();
        while state.heap.len() >= self.max_num_msg {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            state = self
                .not_full
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry {
            priority,
            seq,
            data: data.to_vec(),
        });
        self.not_empty.notify_one();
        Ok(true)
    }

    fn timed_receive(&self, buf: &mut [u8], deadline: Instant) -> io::Result<Option<Received>> {
        if buf.len() < self.max_msg_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "receive buffer smaller than the queue's message size",
            ));
        }

        let mut state = self.lock();
        loop {
            if let Some(entry) = state.heap.pop() {
                self.not_full.notify_one();
                buf[..entry.data.len()].copy_from_slice(&entry.data);
                return Ok(Some(Received {
                    len: entry.data.len(),
                    priority: entry.priority,
                }));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            state = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
