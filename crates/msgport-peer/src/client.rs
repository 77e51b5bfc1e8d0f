use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use msgport_core::{Buffer, Completion, Error, GenericErrorCode, MessagePort};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::connection::{stopped, ClientConnection, ConnectionId, Outbound};
use crate::handler::ClientHandler;

/// Client behavior.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Delay before reconnecting after a failed attempt or a lost
    /// connection. `None` leaves the client disconnected until the next
    /// [`connect`](MessagePortClient::connect). Default: `None`.
    pub reconnect_delay: Option<Duration>,
}

impl ClientConfig {
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = Some(delay);
        self
    }
}

/// Keeps one outgoing port connected and dispatches its messages to a
/// [`ClientHandler`].
///
/// [`connect`](Self::connect) starts a session in the background. A session
/// connects, serves the connection until it fails, reports it through
/// [`ClientHandler::disconnected`] and, with a reconnect delay configured,
/// tries again. [`disconnect`](Self::disconnect) ends the session;
/// [`shut_down`](Self::shut_down) also refuses later connects. Dropping the
/// client shuts it down.
pub struct MessagePortClient<P: MessagePort, H> {
    inner: Arc<ClientInner<P, H>>,
}

struct ClientInner<P: MessagePort, H> {
    endpoint: P::EndPoint,
    make_port: Box<dyn Fn() -> P + Send + Sync>,
    handler: H,
    config: ClientConfig,
    next_id: AtomicU64,
    state: Mutex<ClientState>,
}

#[derive(Default)]
struct ClientState {
    shut_down: bool,
    next_session: u64,
    session: Option<Session>,
}

struct Session {
    key: u64,
    stop: watch::Sender<bool>,
    connection: Option<ClientConnection>,
}

impl<P, H> MessagePortClient<P, H>
where
    P: MessagePort + Send + Sync + 'static,
    P::EndPoint: Send + Sync + 'static,
    H: ClientHandler,
{
    pub fn new<F>(endpoint: P::EndPoint, make_port: F, handler: H) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
    {
        Self::with_config(endpoint, make_port, handler, ClientConfig::default())
    }

    pub fn with_config<F>(
        endpoint: P::EndPoint,
        make_port: F,
        handler: H,
        config: ClientConfig,
    ) -> Self
    where
        F: Fn() -> P + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ClientInner {
                endpoint,
                make_port: Box::new(make_port),
                handler,
                config,
                next_id: AtomicU64::new(1),
                state: Mutex::new(ClientState::default()),
            }),
        }
    }

    /// Start a session. Returns `false`, doing nothing, when a session is
    /// already running or the client has been shut down. Must be called
    /// within a tokio runtime.
    pub fn connect(&self) -> bool {
        let mut state = self.inner.state();
        if state.shut_down || state.session.is_some() {
            return false;
        }
        state.next_session += 1;
        let key = state.next_session;
        let (stop, stop_rx) = watch::channel(false);
        state.session = Some(Session {
            key,
            stop,
            connection: None,
        });
        drop(state);

        tokio::spawn(run_session(Arc::clone(&self.inner), key, stop_rx));
        true
    }
}

impl<P: MessagePort, H> MessagePortClient<P, H> {
    /// End the current session. A live connection is reported as
    /// disconnected with `OperationAborted`; no reconnect follows.
    pub fn disconnect(&self) {
        self.inner.end_session();
    }

    /// Disconnect and refuse every later [`connect`](Self::connect).
    pub fn shut_down(&self) {
        self.inner.state().shut_down = true;
        self.inner.end_session();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.state().shut_down
    }

    pub fn is_connected(&self) -> bool {
        self.connection().is_some()
    }

    /// Id of the live connection.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection().map(|connection| connection.id())
    }

    /// Send on the live connection; fails with `Disconnected` without one.
    pub fn send(&self, buffer: Buffer) -> Completion<()> {
        match self.connection() {
            Some(connection) => connection.send(buffer),
            None => Completion::ready(Err(Error::new(
                GenericErrorCode::Disconnected,
                "client is not connected",
            ))),
        }
    }

    fn connection(&self) -> Option<ClientConnection> {
        self.inner
            .state()
            .session
            .as_ref()
            .and_then(|session| session.connection.clone())
    }
}

impl<P: MessagePort, H> Drop for MessagePortClient<P, H> {
    fn drop(&mut self) {
        self.shut_down();
    }
}

impl<P: MessagePort, H> ClientInner<P, H> {
    fn state(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn end_session(&self) {
        let session = self.state().session.take();
        if let Some(session) = session {
            debug!(session = session.key, "ending client session");
            session.stop.send_replace(true);
        }
    }

    /// Publish `connection` if session `key` is still current.
    fn attach(&self, key: u64, connection: ClientConnection) -> bool {
        let mut state = self.state();
        match state.session.as_mut() {
            Some(session) if session.key == key => {
                session.connection = Some(connection);
                true
            }
            _ => false,
        }
    }

    /// Withdraw session `key`'s connection. Returns the delay before the
    /// next attempt, or `None` when the session is over.
    fn detach(&self, key: u64) -> Option<Duration> {
        let mut state = self.state();
        if !state.session.as_ref().is_some_and(|session| session.key == key) {
            return None;
        }
        let delay = self.config.reconnect_delay.filter(|_| !state.shut_down);
        if delay.is_none() {
            state.session = None;
        } else if let Some(session) = state.session.as_mut() {
            session.connection = None;
        }
        delay
    }
}

async fn run_session<P, H>(
    inner: Arc<ClientInner<P, H>>,
    key: u64,
    mut stop: watch::Receiver<bool>,
) where
    P: MessagePort + Send + Sync + 'static,
    P::EndPoint: Send + Sync + 'static,
    H: ClientHandler,
{
    loop {
        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut port = (inner.make_port)();
        let connected = tokio::select! {
            result = port.connect(&inner.endpoint) => result,
            _ = stopped(&mut stop) => return,
        };

        let error = match connected {
            Err(err) => {
                debug!(id, error = %err, "connect failed");
                err
            }
            Ok(()) => {
                let port = Arc::new(port);
                let connection =
                    ClientConnection::new(id, Arc::clone(&port) as Arc<dyn Outbound>);
                if !inner.attach(key, connection.clone()) {
                    return;
                }
                info!(id, "client connected");
                tokio::select! {
                    error = serve(&*port, &connection, &inner.handler) => error,
                    _ = stopped(&mut stop) => {
                        Error::new(GenericErrorCode::OperationAborted, "client disconnected")
                    }
                }
            }
        };

        let reconnect = inner.detach(key);
        inner.handler.disconnected(id, &error);
        let Some(delay) = reconnect else {
            return;
        };
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = stopped(&mut stop) => return,
        }
    }
}

async fn serve<P, H>(port: &P, connection: &ClientConnection, handler: &H) -> Error
where
    P: MessagePort,
    H: ClientHandler,
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
