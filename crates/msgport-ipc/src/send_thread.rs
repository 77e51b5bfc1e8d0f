use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use msgport_core::{
    pair, Buffer, Complete, Completer, Completion, Error, GenericErrorCode, IpcErrorCode, Result,
    SendQueue,
};
use tracing::{debug, trace, warn};

use crate::config::PingMode;
use crate::queue::MessageQueue;
use crate::sys_message::{SysMessage, SysMessageType, SYS_PRIORITY};

#[derive(Debug, Clone, Copy)]
pub(crate) struct SendOptions {
    pub ping: PingMode,
    pub ping_interval: Duration,
    pub send_timeout: Duration,
}

/// Completion of a queued send plus the priority to send it at.
struct Pending {
    priority: u32,
    completer: Completer<()>,
}

impl Complete for Pending {
    fn complete(self, result: Result<()>) {
        self.completer.complete(result);
    }
}

struct Shared {
    queue: Mutex<SendQueue<Pending>>,
    wake: Condvar,
    closing: AtomicBool,
    failed: AtomicBool,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, SendQueue<Pending>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Dedicated thread sending to one queue on behalf of async callers.
///
/// Callers append to a shared [`SendQueue`]; the worker drains it in order.
/// A full queue fails only the message that did not fit. Any other queue
/// error marks the thread failed: that message, everything still queued,
/// and every later send fail with `MessageQueueSendFailed`.
pub(crate) struct SendThread {
    shared: Arc<Shared>,
    max_msg_size: usize,
    handle: Option<JoinHandle<()>>,
}

impl SendThread {
    pub(crate) fn spawn(queue: Arc<dyn MessageQueue>, options: SendOptions) -> Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(SendQueue::new()),
            wake: Condvar::new(),
            closing: AtomicBool::new(false),
            failed: AtomicBool::new(false),
        });
        let max_msg_size = queue.max_msg_size();

        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("msgport-send {}", queue.name()))
            .spawn(move || run(queue, worker, options))
            .map_err(|err| Error::io("spawn send thread failed", err))?;

        Ok(Self {
            shared,
            max_msg_size,
            handle: Some(handle),
        })
    }

    pub(crate) fn send(&self, buffer: Buffer, priority: u32) -> Completion<()> {
        if self.shared.failed.load(Ordering::Acquire) {
            return Completion::ready(Err(send_failed("a previous send failed")));
        }
        if self.shared.closing.load(Ordering::Acquire) {
            return Completion::ready(Err(Error::new(
                GenericErrorCode::OperationAborted,
                "send thread is closing",
            )));
        }
        if buffer.len() > self.max_msg_size {
            return Completion::ready(Err(Error::new(
                GenericErrorCode::MessageTooLarge,
                format!(
                    "message of {} bytes exceeds queue limit of {}",
                    buffer.len(),
                    self.max_msg_size
                ),
            )));
        }

        let (completer, completion) = pair();
        let mut queue = self.shared.queue();
        queue.push(
            buffer,
            Pending {
                priority,
                completer,
            },
        );
        self.shared.wake.notify_one();
        completion
    }

    pub(crate) fn has_failed(&self) -> bool {
        self.shared.failed.load(Ordering::Acquire)
    }

    /// Flush queued messages, post `DISCONN`, and stop the thread.
    /// Idempotent.
    pub(crate) fn close(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shared.closing.store(true, Ordering::Release);
        {
            let _queue = self.shared.queue();
            self.shared.wake.notify_all();
        }
        if handle.join().is_err() {
            debug!("send thread panicked");
        }
    }
}

impl Drop for SendThread {
    fn drop(&mut self) {
        self.close();
    }
}

fn send_failed(reason: &str) -> Error {
    Error::new(IpcErrorCode::MessageQueueSendFailed, reason)
}

fn run(queue: Arc<dyn MessageQueue>, shared: Arc<Shared>, options: SendOptions) {
    let mut last_sent = Instant::now();
    loop {
        let mut batch = {
            let mut pending = shared.queue();
            loop {
                if !pending.is_empty() {
                    break pending.take();
                }
                if shared.closing.load(Ordering::Acquire) {
                    break SendQueue::new();
                }
                let pinging =
                    options.ping == PingMode::Enabled && !shared.failed.load(Ordering::Acquire);
                if !pinging {
                    pending = shared
                        .wake
                        .wait(pending)
                        .unwrap_or_else(PoisonError::into_inner);
                    continue;
                }
                let due = last_sent + options.ping_interval;
                let now = Instant::now();
                if now >= due {
                    break SendQueue::new();
                }
                pending = shared
                    .wake
                    .wait_timeout(pending, due - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
        };

        if !batch.is_empty() {
            flush(&*queue, &shared, &options, &mut batch, &mut last_sent);
            continue;
        }
        if shared.closing.load(Ordering::Acquire) {
            break;
        }
        send_ping(&*queue, &shared, &mut last_sent);
    }

    let mut rest = shared.queue().take();
    flush(&*queue, &shared, &options, &mut rest, &mut last_sent);
    if !shared.failed.load(Ordering::Acquire) {
        match SysMessage::new(SysMessageType::Disconnect).encode() {
            Ok(bytes) => {
                if let Err(err) = queue.try_send(&bytes, SYS_PRIORITY) {
                    debug!(queue = queue.name(), error = %err, "disconnect notice not sent");
                }
            }
            Err(err) => debug!(error = %err, "disconnect notice not encoded"),
        }
    }
    trace!(queue = queue.name(), "send thread stopped");
}

fn flush(
    queue: &dyn MessageQueue,
    shared: &Shared,
    options: &SendOptions,
    batch: &mut SendQueue<Pending>,
    last_sent: &mut Instant,
) {
    while let Some(item) = batch.pop() {
        if shared.failed.load(Ordering::Acquire) {
            item.complete(Err(send_failed("a previous send failed")));
            continue;
        }

        let deadline = Instant::now() + options.send_timeout;
        let priority = item.completion.priority;
        match queue.timed_send(item.buffer.as_slice(), priority, deadline) {
            Ok(true) => {
                *last_sent = Instant::now();
                item.complete(Ok(()));
            }
            Ok(false) => item.complete(Err(Error::new(
                IpcErrorCode::MessageQueueFull,
                format!("message queue {} is full", queue.name()),
            ))),
            Err(err) => {
                warn!(queue = queue.name(), error = %err, "message queue send failed");
                shared.failed.store(true, Ordering::Release);
                let error = send_failed(&format!("send to {} failed: {err}", queue.name()));
                item.complete(Err(error.clone()));
                batch.fail_all(&error);
                shared.queue().fail_all(&error);
            }
        }
    }
}

fn send_ping(queue: &dyn MessageQueue, shared: &Shared, last_sent: &mut Instant) {
    match queue.try_send(&[], SYS_PRIORITY) {
        Ok(true) => trace!(queue = queue.name(), "ping sent"),
        Ok(false) => debug!(queue = queue.name(), "queue full; ping skipped"),
        Err(err) => {
            warn!(queue = queue.name(), error = %err, "ping failed");
            shared.failed.store(true, Ordering::Release);
            let error = send_failed(&format!("ping to {} failed: {err}", queue.name()));
            shared.queue().fail_all(&error);
        }
    }
    *last_sent = Instant::now();
}
