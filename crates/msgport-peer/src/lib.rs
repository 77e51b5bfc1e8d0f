//! Connection management on top of message ports.
//!
//! [`MessagePortServer`] runs an accept loop over any
//! [`MessagePortAcceptor`](msgport_core::MessagePortAcceptor), gives each
//! accepted port a [`ConnectionId`] and feeds its messages to a
//! [`ServerHandler`]. Connections can be addressed by id or all at once.
//!
//! [`MessagePortClient`] keeps one outgoing port connected to an endpoint,
//! optionally reconnecting after a delay, and feeds its messages to a
//! [`ClientHandler`].
//!
//! Both run on the ambient tokio runtime.

pub mod client;
pub mod connection;
pub mod handler;
pub mod server;

pub use client::{ClientConfig, MessagePortClient};
pub use connection::{ClientConnection, ConnectionId, ServerConnection};
pub use handler::{ClientHandler, ServerHandler};
pub use server::{MessagePortServer, ServerHandle};
