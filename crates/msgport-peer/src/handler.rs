use std::future::Future;

use msgport_core::{Buffer, Error, Result};

use crate::connection::{ClientConnection, ConnectionId, ServerConnection};

/// Application callbacks for a [`MessagePortServer`](crate::MessagePortServer).
///
/// Messages of one connection are handled one at a time, in arrival order;
/// the next receive starts only after `message` resolves. Different
/// connections are handled concurrently.
pub trait ServerHandler: Send + Sync + 'static {
    /// A connection was accepted. Returning an error disconnects it.
    fn connected(&self, _connection: &ServerConnection) -> Result<()> {
        Ok(())
    }

    fn message(
        &self,
        connection: &ServerConnection,
        message: Buffer,
    ) -> impl Future<Output = Result<()>> + Send;

    /// `message` failed. `Ok` keeps the connection; an error disconnects it.
    fn message_error(&self, _connection: &ServerConnection, error: Error) -> Result<()> {
        Err(error)
    }

    /// Called exactly once per accepted connection, after it has been
    /// removed from the server.
    fn disconnected(&self, _id: ConnectionId, _error: &Error) {}

    /// An accept failed. The server keeps accepting.
    fn accept_error(&self, _error: &Error) {}
}

/// Application callbacks for a [`MessagePortClient`](crate::MessagePortClient).
pub trait ClientHandler: Send + Sync + 'static {
    /// A connection was established. Returning an error disconnects it.
    fn connected(&self, _connection: &ClientConnection) -> Result<()> {
        Ok(())
    }

    fn message(
        &self,
        connection: &ClientConnection,
        message: Buffer,
    ) -> impl Future<Output = Result<()>> + Send;

    /// `message` failed. `Ok` keeps the connection; an error disconnects it.
    fn message_error(&self, _connection: &ClientConnection, error: Error) -> Result<()> {
        Err(error)
    }

    /// A connection ended or a connect attempt failed. `id` is the id the
    /// attempt was given.
    fn disconnected(&self, _id: ConnectionId, _error: &Error) {}
}
