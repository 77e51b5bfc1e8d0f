use std::fmt;
use std::sync::Arc;

use msgport_core::{Buffer, Completion, MessagePort};
use tokio::sync::watch;

use crate::server::ServerHandle;

/// Identifies one connection for the lifetime of a server or client.
/// Ids start at 1 and are never reused.
pub type ConnectionId = u64;

/// Send side of a connected port, independent of its transport.
pub(crate) trait Outbound: Send + Sync {
    fn send(&self, buffer: Buffer) -> Completion<()>;
}

impl<P> Outbound for P
where
    P: MessagePort + Send + Sync,
{
    fn send(&self, buffer: Buffer) -> Completion<()> {
        MessagePort::send(self, buffer)
    }
}

/// A connection accepted by a [`MessagePortServer`](crate::MessagePortServer).
#[derive(Clone)]
pub struct ServerConnection {
    id: ConnectionId,
    server: ServerHandle,
}

impl ServerConnection {
    pub(crate) fn new(id: ConnectionId, server: ServerHandle) -> Self {
        Self { id, server }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The server this connection belongs to, for sending to other
    /// connections or broadcasting.
    pub fn server(&self) -> &ServerHandle {
        &self.server
    }

    /// Send to this connection.
    pub fn send(&self, buffer: Buffer) -> Completion<()> {
        self.server.send(self.id, buffer)
    }
}

impl fmt::Debug for ServerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// The connection currently held by a [`MessagePortClient`](crate::MessagePortClient).
#[derive(Clone)]
pub struct ClientConnection {
    id: ConnectionId,
    port: Arc<dyn Outbound>,
}

impl ClientConnection {
    pub(crate) fn new(id: ConnectionId, port: Arc<dyn Outbound>) -> Self {
        Self { id, port }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn send(&self, buffer: Buffer) -> Completion<()> {
        self.port.send(buffer)
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Resolves once `stop` is raised or its sender is gone.
pub(crate) async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}
