use std::ffi::CString;
use std::io;
use std::mem;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::queue::{MessageQueue, QueueBackend, Received};

/// Longest queue name accepted, including the leading `/`.
pub const MAX_NAME_LEN: usize = 255;

/// POSIX message queues (`mq_overview(7)`).
///
/// Names must start with `/` and contain no other `/`. Queue depth and
/// message size are subject to `/proc/sys/fs/mqueue/msg_max` and
/// `msgsize_max` for unprivileged processes.
#[derive(Debug, Clone, Copy)]
pub struct PosixQueues {
    mode: u32,
}

impl PosixQueues {
    /// Default permission mode for created queues.
    pub const DEFAULT_QUEUE_MODE: u32 = 0o600;

    pub fn new() -> Self {
        Self::with_mode(Self::DEFAULT_QUEUE_MODE)
    }

    /// Create queues with an explicit permission mode.
    pub fn with_mode(mode: u32) -> Self {
        Self { mode }
    }
}

impl Default for PosixQueues {
    fn default() -> Self {
        Self::new()
    }
}

/// Check a name against the rules of `mq_open(3)`.
pub fn validate_name(name: &str) -> io::Result<CString> {
    let invalid = |reason: &str| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid queue name {name:?}: {reason}"),
        )
    };

    if !name.starts_with('/') {
        return Err(invalid("must start with '/'"));
    }
    if name.len() < 2 {
        return Err(invalid("empty name"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("too long"));
    }
    if name[1..].contains('/') {
        return Err(invalid("contains '/' after the first character"));
    }
    CString::new(name).map_err(|_| invalid("contains NUL"))
}

impl QueueBackend for PosixQueues {
    fn create(
        &self,
        name: &str,
        max_num_msg: usize,
        max_msg_size: usize,
    ) -> io::Result<Arc<dyn MessageQueue>> {
        let c_name = validate_name(name)?;

        // mq_attr has private padding on some targets; start from zero.
        // SAFETY: mq_attr is a plain C struct for which all-zero is valid.
        let mut attr: libc::mq_attr = unsafe { mem::zeroed() };
        attr.mq_maxmsg = to_c_long(max_num_msg)?;
        attr.mq_msgsize = to_c_long(max_msg_size)?;

        // SAFETY: c_name is NUL-terminated and attr outlives the call.
        let fd = unsafe {
            libc::mq_open(
                c_name.as_ptr(),
                libc::O_RDWR | libc::O_CREAT | libc::O_EXCL,
                self.mode as libc::mode_t,
                &mut attr as *mut libc::mq_attr,
            )
        };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        debug!(name, max_num_msg, max_msg_size, "created message queue");
        Ok(Arc::new(PosixQueue {
            fd,
            name: name.to_string(),
            max_num_msg,
            max_msg_size,
        }))
    }

    fn open(&self, name: &str) -> io::Result<Arc<dyn MessageQueue>> {
        let c_name = validate_name(name)?;
        // SAFETY: c_name is NUL-terminated.
        let fd = unsafe { libc::mq_open(c_name.as_ptr(), libc::O_RDWR) };
        if fd == -1 {
            return Err(io::Error::last_os_error());
        }

        let mut queue = PosixQueue {
            fd,
            name: name.to_string(),
            max_num_msg: 0,
            max_msg_size: 0,
        };
        // SAFETY: zeroed mq_attr is valid and is filled by mq_getattr.
        let mut attr: libc::mq_attr = unsafe { mem::zeroed() };
        // SAFETY: fd is an open queue descriptor owned by `queue`.
        if unsafe { libc::mq_getattr(queue.fd, &mut attr) } == -1 {
            return Err(io::Error::last_os_error());
        }
        queue.max_num_msg = usize::try_from(attr.mq_maxmsg).unwrap_or(0);
        queue.max_msg_size = usize::try_from(attr.mq_msgsize).unwrap_or(0);
        Ok(Arc::new(queue))
    }

    fn remove(&self, name: &str) -> io::Result<bool> {
        let c_name = validate_name(name)?;
        // SAFETY: c_name is NUL-terminated.
        if unsafe { libc::mq_unlink(c_name.as_ptr()) } == 0 {
            debug!(name, "removed message queue");
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ENOENT) {
            Ok(false)
        } else {
            Err(err)
        }
    }

    fn exists(&self, name: &str) -> bool {
        let Ok(c_name) = validate_name(name) else {
            return false;
        };
        // SAFETY: c_name is NUL-terminated.
        let fd = unsafe { libc::mq_open(c_name.as_ptr(), libc::O_RDONLY) };
        if fd == -1 {
            // EACCES means it exists but belongs to someone else.
            return io::Error::last_os_error().raw_os_error() != Some(libc::ENOENT);
        }
        // SAFETY: fd was just opened and is not shared.
        unsafe { libc::mq_close(fd) };
        true
    }
}

struct PosixQueue {
    fd: libc::mqd_t,
    name: String,
    max_num_msg: usize,
    max_msg_size: usize,
}

impl MessageQueue for PosixQueue {
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
        loop {
            let timeout = realtime_deadline(deadline)?;
            // SAFETY: data is valid for data.len() bytes; timeout outlives the call.
            let rc = unsafe {
                libc::mq_timedsend(
                    self.fd,
                    data.as_ptr().cast(),
                    data.len(),
                    priority,
                    &timeout,
                )
            };
            if rc == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) | Some(libc::EAGAIN) => return Ok(false),
                _ => return Err(err),
            }
        }
    }

    fn timed_receive(&self, buf: &mut [u8], deadline: Instant) -> io::Result<Option<Received>> {
        loop {
            let timeout = realtime_deadline(deadline)?;
            let mut priority: libc::c_uint = 0;
            // SAFETY: buf is valid for buf.len() bytes; priority and timeout
            // outlive the call.
            let rc = unsafe {
                libc::mq_timedreceive(
                    self.fd,
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                    &mut priority,
                    &timeout,
                )
            };
            if rc >= 0 {
                return Ok(Some(Received {
                    len: rc as usize,
                    priority,
                }));
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EINTR) => continue,
                Some(libc::ETIMEDOUT) | Some(libc::EAGAIN) => return Ok(None),
                _ => return Err(err),
            }
        }
    }
}

impl Drop for PosixQueue {
    fn drop(&mut self) {
        // SAFETY: fd is owned by this handle and closed exactly once.
        unsafe { libc::mq_close(self.fd) };
    }
}

fn to_c_long(value: usize) -> io::Result<libc::c_long> {
    libc::c_long::try_from(value)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "queue attribute too large"))
}

/// Convert a monotonic deadline into the absolute `CLOCK_REALTIME` time the
/// timed mq calls expect.
fn realtime_deadline(deadline: Instant) -> io::Result<libc::timespec> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    // SAFETY: zeroed timespec is valid and is filled by clock_gettime.
    let mut now: libc::timespec = unsafe { mem::zeroed() };
    // SAFETY: now is a valid out-pointer.
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } == -1 {
        return Err(io::Error::last_os_error());
    }

    const NANOS_PER_SEC: libc::c_long = 1_000_000_000;
    let mut sec = now.tv_sec + remaining.as_secs() as libc::time_t;
    let mut nsec = now.tv_nsec + remaining.subsec_nanos() as libc::c_long;
    if nsec >= NANOS_PER_SEC {
        sec += 1;
        nsec -= NANOS_PER_SEC;
    }
    now.tv_sec = sec;
    now.tv_nsec = nsec;
    Ok(now)
}
