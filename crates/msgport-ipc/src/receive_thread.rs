use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use msgport_core::{
    pair, Buffer, Completer, Completion, Error, GenericErrorCode, IpcErrorCode, Result,
};
use tracing::{debug, trace};

use crate::config::PingMode;
use crate::queue::MessageQueue;
use crate::sys_message::SYS_PRIORITY;

/// A message delivered by a [`ReceiveThread`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReceivedMessage {
    pub data: Buffer,
    pub priority: u32,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ReceiveOptions {
    pub ping: PingMode,
    pub ping_timeout: Duration,
    pub poll_interval: Duration,
}

struct Request {
    timeout: Option<Duration>,
    completer: Completer<ReceivedMessage>,
}

#[derive(Default)]
struct Slot {
    request: Option<Request>,
    /// Bumped each time a request is installed.
    generation: u64,
    /// A message dequeued after its receiver went away. Handed to the next
    /// receive before the queue is read again.
    parked: Option<ReceivedMessage>,
}

struct Shared {
    slot: Mutex<Slot>,
    wake: Condvar,
    closing: AtomicBool,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether request `generation` is still installed and awaited.
    fn is_wanted(&self, generation: u64) -> bool {
        if self.closing.load(Ordering::Acquire) {
            return false;
        }
        let slot = self.slot();
        slot.generation == generation
            && slot
                .request
                .as_ref()
                .is_some_and(|request| !request.completer.is_abandoned())
    }
}

enum Outcome {
    Message(ReceivedMessage),
    Failed(Error),
    Superseded,
}

/// Dedicated thread receiving from one queue on behalf of async callers.
///
/// One receive may be outstanding at a time. Each receive waits on the queue
/// in slices of `poll_interval`, so cancellation and liveness are checked at
/// least that often. Dropping a receive's completion releases the slot; a
/// message the thread had already taken off the queue is kept for the next
/// receive. Zero-length system-priority messages are pings: they keep the
/// link alive and are never delivered.
pub(crate) struct ReceiveThread {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl ReceiveThread {
    pub(crate) fn spawn(queue: Arc<dyn MessageQueue>, options: ReceiveOptions) -> Result<Self> {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot::default()),
            wake: Condvar::new(),
            closing: AtomicBool::new(false),
        });

        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("msgport-recv {}", queue.name()))
            .spawn(move || run(queue, worker, options))
            .map_err(|err| Error::io("spawn receive thread failed", err))?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Start a receive. `timeout` of `None` waits until a message arrives,
    /// the link is declared lost, or the thread is closed.
    pub(crate) fn receive(&self, timeout: Option<Duration>) -> Completion<ReceivedMessage> {
        if self.shared.closing.load(Ordering::Acquire) {
            return Completion::ready(Err(canceled()));
        }

        let mut slot = self.shared.slot();
        if let Some(message) = slot.parked.take() {
            return Completion::ready(Ok(message));
        }
        if slot
            .request
            .as_ref()
            .is_some_and(|request| !request.completer.is_abandoned())
        {
            return Completion::ready(Err(Error::new(
                IpcErrorCode::BadUsage,
                "a previous receive has not yet completed",
            )));
        }

        let (completer, completion) = pair();
        slot.request = Some(Request { timeout, completer });
        slot.generation = slot.generation.wrapping_add(1);
        self.shared.wake.notify_one();
        completion
    }

    /// Cancel any pending receive and stop the thread. Idempotent.
    pub(crate) fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shared.closing.store(true, Ordering::Release);
        {
            let _slot = self.shared.slot();
            self.shared.wake.notify_all();
        }
        if handle.join().is_err() {
            debug!("receive thread panicked");
        }
    }
}

impl Drop for ReceiveThread {
    fn drop(&mut self) {
        self.close();
    }
}

fn canceled() -> Error {
    Error::new(GenericErrorCode::OperationAborted, "receive was canceled")
}

fn run(queue: Arc<dyn MessageQueue>, shared: Arc<Shared>, options: ReceiveOptions) {
    let mut buf = vec![0u8; queue.max_msg_size()];
    let mut served = 0u64;
    loop {
        let (generation, timeout) = {
            let mut slot = shared.slot();
            loop {
                if shared.closing.load(Ordering::Acquire) {
                    if let Some(request) = slot.request.take() {
                        request.completer.complete(Err(canceled()));
                    }
                    trace!(queue = queue.name(), "receive thread stopped");
                    return;
                }
                if slot.generation != served {
                    if let Some(request) = &slot.request {
                        break (slot.generation, request.timeout);
                    }
                }
                slot = shared
                    .wake
                    .wait(slot)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        served = generation;

        match receive_one(&*queue, &shared, &options, generation, timeout, &mut buf) {
            Outcome::Message(message) => deliver(&shared, message),
            Outcome::Failed(err) => {
                let mut slot = shared.slot();
                if slot.generation == generation {
                    if let Some(request) = slot.request.take() {
                        request.completer.complete(Err(err));
                    }
                }
            }
            Outcome::Superseded => {
                trace!(queue = queue.name(), "receive released by its caller");
            }
        }
    }
}

/// Hand a dequeued message to whichever receive is installed now, or park
/// it when nobody is waiting.
fn deliver(shared: &Shared, mut message: ReceivedMessage) {
    let mut slot = shared.slot();
    if let Some(request) = slot.request.take() {
        match request.completer.try_complete(Ok(message)) {
            Ok(()) => return,
            Err(Ok(undelivered)) => message = undelivered,
            Err(Err(_)) => return,
        }
    }
    slot.parked = Some(message);
}

fn receive_one(
    queue: &dyn MessageQueue,
    shared: &Shared,
    options: &ReceiveOptions,
    generation: u64,
    timeout: Option<Duration>,
    buf: &mut [u8],
) -> Outcome {
    let started = Instant::now();
    let expiry = timeout.map(|timeout| started + timeout);
    let pinging = options.ping == PingMode::Enabled;
    let mut liveness = started + options.ping_timeout;

    loop {
        if !shared.is_wanted(generation) {
            return Outcome::Superseded;
        }

        let now = Instant::now();
        if expiry.is_some_and(|expiry| now >= expiry) {
            return Outcome::Failed(Error::new(
                IpcErrorCode::TimeOutExpired,
                "no message arrived before the receive timeout",
            ));
        }
        if pinging && now >= liveness {
            debug!(queue = queue.name(), "no traffic within ping timeout");
            return Outcome::Failed(Error::new(
                IpcErrorCode::LostConnection,
                "lost connection with peer: no ping within timeout",
            ));
        }

        let mut slice_end = now + options.poll_interval;
        if let Some(expiry) = expiry {
            slice_end = slice_end.min(expiry);
        }
        if pinging {
            slice_end = slice_end.min(liveness);
        }

        match queue.timed_receive(buf, slice_end) {
            Ok(Some(received)) if received.priority == SYS_PRIORITY && received.len == 0 => {
                trace!(queue = queue.name(), "ping received");
                liveness = Instant::now() + options.ping_timeout;
            }
            Ok(Some(received)) => {
                return Outcome::Message(ReceivedMessage {
                    data: Buffer::from_slice(&buf[..received.len]),
                    priority: received.priority,
                });
            }
            Ok(None) => {}
            Err(err) => {
                debug!(queue = queue.name(), error = %err, "message queue receive failed");
                return Outcome::Failed(Error::new(
                    IpcErrorCode::CommunicationFailure,
                    format!("receive from {} failed: {err}", queue.name()),
                ));
            }
        }
    }
}
