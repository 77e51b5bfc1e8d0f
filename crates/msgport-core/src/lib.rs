//! Transport-independent building blocks for msgport.
//!
//! - [`Buffer`]: single-owner message body
//! - [`Error`]: one error type over the generic, TCP, IPC and system code spaces
//! - [`SendQueue`]: FIFO of pending sends with fail-fast broadcast
//! - [`Completion`]: awaitable result of a submitted operation
//! - [`MessagePort`] / [`MessagePortAcceptor`]: the port abstraction

pub mod buffer;
pub mod completion;
pub mod error;
pub mod port;
pub mod send_queue;

pub use buffer::Buffer;
pub use completion::{pair, Completer, Completion};
pub use error::{
    Category, Error, ErrorCode, GenericErrorCode, IpcErrorCode, Result, TcpErrorCode,
};
pub use port::{MessagePort, MessagePortAcceptor};
pub use send_queue::{Complete, SendItem, SendQueue};
