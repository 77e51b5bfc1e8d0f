//! Message ports over local system message queues.
//!
//! A connection uses two queues, one per direction, named from the
//! acceptor's endpoint by a [`QueueNaming`]. Link control travels as
//! [`SysMessage`]s at [`SYS_PRIORITY`], above user traffic:
//! - `CONNECT` posts the client's queue pair to the acceptor queue
//! - `CONN-ACK` confirms the attachment
//! - `DISCONN` announces an orderly close
//!
//! Idle links exchange zero-length pings so that a vanished peer surfaces as
//! `LostConnection`. Queues come from a [`QueueBackend`]: [`LocalQueues`]
//! within one process, or [`PosixQueues`] on Linux.

pub mod acceptor;
pub mod config;
pub mod endpoint;
pub mod local;
pub mod naming;
pub mod port;
pub mod queue;
pub mod sys_message;

#[cfg(target_os = "linux")]
pub mod posix;

mod receive_thread;
mod send_thread;

pub use acceptor::IpcAcceptor;
pub use config::{IpcConfig, PingMode};
pub use endpoint::{IpcEndPoint, DEFAULT_MAX_MSG_SIZE, DEFAULT_MAX_NUM_MSG};
pub use local::LocalQueues;
pub use naming::{NumberedNaming, QueueNaming, QueuePair};
pub use port::IpcMessagePort;
pub use queue::{MessageQueue, QueueBackend, Received};
pub use sys_message::{
    SysMessage, SysMessageType, MAX_SYS_MESSAGE_SIZE, SYS_PRIORITY, USER_PRIORITY,
};

#[cfg(target_os = "linux")]
pub use posix::PosixQueues;
