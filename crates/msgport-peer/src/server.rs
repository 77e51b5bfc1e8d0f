use std::collections::HashMap;
use std::future::Future;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use msgport_core::{
    Buffer, Completion, Error, GenericErrorCode, MessagePort, MessagePortAcceptor,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::connection::{stopped, ConnectionId, Outbound, ServerConnection};
use crate::handler::ServerHandler;

/// Pause after a failed accept before the next one.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(50);

struct Registry {
    ports: Mutex<HashMap<ConnectionId, Arc<dyn Outbound>>>,
    next_id: AtomicU64,
}

/// Shared access to a server's live connections.
#[derive(Clone)]
pub struct ServerHandle {
    registry: Arc<Registry>,
}

impl ServerHandle {
    fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                ports: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn ports(&self) -> MutexGuard<'_, HashMap<ConnectionId, Arc<dyn Outbound>>> {
        self.registry
            .ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, port: Arc<dyn Outbound>) -> ConnectionId {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.ports().insert(id, port);
        id
    }

    fn remove(&self, id: ConnectionId) {
        self.ports().remove(&id);
    }

    /// Ids of the live connections, ascending.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.ports().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Send to one connection. An unknown or departed id fails with
    /// `Disconnected`.
    pub fn send(&self, id: ConnectionId, buffer: Buffer) -> Completion<()> {
        let port = self.ports().get(&id).cloned();
        match port {
            Some(port) => port.send(buffer),
            None => Completion::ready(Err(Error::new(
                GenericErrorCode::Disconnected,
                format!("no connection with id {id}"),
            ))),
        }
    }

    /// Send a copy of `buffer` to every live connection.
    ///
    /// All sends are submitted before this returns; the future resolves once
    /// each has completed, with the number that succeeded. Individual send
    /// failures are logged and otherwise ignored.
    pub fn broadcast(&self, buffer: Buffer) -> impl Future<Output = usize> + Send + 'static {
        let mut ports: Vec<_> = self
            .ports()
            .iter()
            .map(|(id, port)| (*id, Arc::clone(port)))
            .collect();
        ports.sort_unstable_by_key(|(id, _)| *id);
        let sends: Vec<_> = ports
            .into_iter()
            .map(|(id, port)| (id, port.send(buffer.clone())))
            .collect();

        async move {
            let mut delivered = 0;
            for (id, send) in sends {
                match send.await {
                    Ok(()) => delivered += 1,
                    Err(err) => debug!(id, error = %err, "broadcast send failed"),
                }
            }
            delivered
        }
    }
}

/// Accepts connections and dispatches their messages to a [`ServerHandler`].
///
/// Stopping (or dropping) the server ends the accept loop and every
/// connection; each one is still reported through
/// [`ServerHandler::disconnected`], with `OperationAborted`.
pub struct MessagePortServer {
    handle: ServerHandle,
    shutdown: watch::Sender<bool>,
}

impl MessagePortServer {
    /// Start accepting on `acceptor`. `make_port` supplies the unconnected
    /// port each accept fills in. Must be called within a tokio runtime.
    pub fn start<A, F, H>(acceptor: A, make_port: F, handler: H) -> Self
    where
        A: MessagePortAcceptor + Send + Sync + 'static,
        A::Port: Send + Sync + 'static,
        F: Fn() -> A::Port + Send + 'static,
        H: ServerHandler,
    {
        let handle = ServerHandle::new();
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(accept_loop(
            acceptor,
            make_port,
            Arc::new(handler),
            handle.clone(),
            shutdown_rx,
        ));
        info!("message port server started");
        Self { handle, shutdown }
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.handle.ids()
    }

    pub fn send(&self, id: ConnectionId, buffer: Buffer) -> Completion<()> {
        self.handle.send(id, buffer)
    }

    pub fn broadcast(&self, buffer: Buffer) -> impl Future<Output = usize> + Send + 'static {
        self.handle.broadcast(buffer)
    }

    /// Stop accepting and end every connection. Idempotent.
    pub fn stop(&self) {
        if !self.shutdown.send_replace(true) {
            info!(connections = self.handle.ids().len(), "message port server stopping");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl Drop for MessagePortServer {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop<A, F, H>(
    acceptor: A,
    make_port: F,
    handler: Arc<H>,
    handle: ServerHandle,
    mut shutdown: watch::Receiver<bool>,
) where
    A: MessagePortAcceptor + Send + Sync + 'static,
    A::Port: Send + Sync + 'static,
    F: Fn() -> A::Port + Send + 'static,
    H: ServerHandler,
{
    loop {
        let mut port = make_port();
        let accepted = tokio::select! {
            result = acceptor.accept(&mut port) => result,
            _ = stopped(&mut shutdown) => break,
        };

        if let Err(err) = accepted {
            if err.is(GenericErrorCode::OperationAborted) {
                debug!(error = %err, "acceptor closed");
                break;
            }
            warn!(error = %err, "accept failed");
            handler.accept_error(&err);
            tokio::select! {
                _ = tokio::time::sleep(ACCEPT_RETRY_DELAY) => continue,
                _ = stopped(&mut shutdown) => break,
            }
        }

        let port = Arc::new(port);
        let id = handle.register(Arc::clone(&port) as Arc<dyn Outbound>);
        debug!(id, "connection accepted");
        tokio::spawn(run_connection(
            port,
            ServerConnection::new(id, handle.clone()),
            Arc::clone(&handler),
            shutdown.clone(),
        ));
    }
    debug!("accept loop finished");
}

async fn run_connection<P, H>(
    port: Arc<P>,
    connection: ServerConnection,
    handler: Arc<H>,
    mut shutdown: watch::Receiver<bool>,
) where
    P: MessagePort + Send + Sync + 'static,
    H: ServerHandler,
{
    let error = tokio::select! {
        error = serve(&*port, &connection, &*handler) => error,
        _ = stopped(&mut shutdown) => {
            Error::new(GenericErrorCode::OperationAborted, "server stopped")
        }
    };
    connection.server().remove(connection.id());
    debug!(id = connection.id(), error = %error, "connection ended");
    handler.disconnected(connection.id(), &error);
}

/// Receive and dispatch until the connection fails. Returns the error that
/// ended it.
async fn serve<P, H>(port: &P, connection: &ServerConnection, handler: &H) -> Error
where
    P: MessagePort,
    H: ServerHandler,
{
    if let Err(err) = handler.connected(connection) {
        return err;
    }
    let mut buffer = Buffer::new();
    loop {
        if let Err(err) = port.receive(&mut buffer).await {
            return err;
        }
        let message = mem::take(&mut buffer);
        if let Err(err) = handler.message(connection, message).await {
            if let Err(err) = handler.message_error(connection, err) {
                return err;
            }
        }
    }
}
