use std::future::Future;
use std::net::SocketAddr;

use msgport_core::{
    pair, Buffer, Completion, Error, GenericErrorCode, MessagePort, Result, SendItem, TcpErrorCode,
};
use msgport_frame::{check_payload_size, FrameProgress};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::TcpConfig;
use crate::endpoint::TcpEndPoint;
use crate::writer::run_writer;

/// Message port over a TCP connection.
///
/// Sends are handed to a writer task that owns the write half, so
/// [`send`](MessagePort::send) never blocks and messages leave in call
/// order. Receives decode directly from the read half; only one receive may
/// be outstanding at a time.
///
/// Dropping a pending receive is safe: bytes of a partly read frame stay
/// with the port and the next receive picks up where it left off.
///
/// Any receive failure (protocol mismatch, oversized frame, I/O error, peer
/// close) is terminal: every later receive reports the same error until the
/// port is reconnected. A failed write poisons the connection the same way,
/// and a pending receive ends with the write error.
pub struct TcpMessagePort {
    config: TcpConfig,
    link: Option<Link>,
}

struct Link {
    tx: mpsc::UnboundedSender<SendItem>,
    writer: JoinHandle<()>,
    failed: watch::Receiver<Option<Error>>,
    reader: Mutex<ReadState>,
    peer: SocketAddr,
    local: SocketAddr,
}

struct ReadState {
    half: OwnedReadHalf,
    progress: FrameProgress,
    terminal: Option<Error>,
}

impl TcpMessagePort {
    pub fn new() -> Self {
        Self::with_config(TcpConfig::default())
    }

    pub fn with_config(config: TcpConfig) -> Self {
        Self { config, link: None }
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Address of the connected peer.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.link.as_ref().map(|link| link.peer)
    }

    /// Local address of the connected socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.link.as_ref().map(|link| link.local)
    }

    /// Take over an already connected stream, replacing any current
    /// connection. Must be called from within a tokio runtime.
    pub fn attach(&mut self, stream: TcpStream) -> Result<()> {
        self.disconnect();

        if self.config.nodelay {
            stream.set_nodelay(true).map_err(|err| {
                Error::new(
                    TcpErrorCode::SocketInitializationFailed,
                    format!("set TCP_NODELAY failed: {err}"),
                )
            })?;
        }
        let peer = stream
            .peer_addr()
            .map_err(|err| Error::io("peer address unavailable", err))?;
        let local = stream
            .local_addr()
            .map_err(|err| Error::io("local address unavailable", err))?;

        let (read_half, write_half) = stream.into_split();
        let max_payload = self.config.frame.max_payload_size;
        let (tx, rx) = mpsc::unbounded_channel();
        let (failed_tx, failed) = watch::channel(None);
        let writer = tokio::spawn(run_writer(write_half, rx, max_payload, failed_tx));

        self.link = Some(Link {
            tx,
            writer,
            failed,
            reader: Mutex::new(ReadState {
                half: read_half,
                progress: FrameProgress::new(max_payload),
                terminal: None,
            }),
            peer,
            local,
        });
        debug!(%peer, %local, "tcp message port attached");
        Ok(())
    }
}

impl Default for TcpMessagePort {
    fn default() -> Self {
        Self::new()
    }
}

impl MessagePort for TcpMessagePort {
    type EndPoint = TcpEndPoint;

    fn connect(&mut self, endpoint: &TcpEndPoint) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.disconnect();
            let addr = endpoint.resolve().await?;
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|err| Error::io(&format!("connect to {endpoint} failed"), err))?;
            self.attach(stream)?;
            debug!(%endpoint, %addr, "connected");
            Ok(())
        }
    }

    fn send(&self, buffer: Buffer) -> Completion<()> {
        let Some(link) = &self.link else {
            return Completion::ready(Err(Error::new(
                GenericErrorCode::Disconnected,
                "send on a port that is not connected",
            )));
        };
        if let Err(err) = check_payload_size(buffer.len(), self.config.frame.max_payload_size) {
            return Completion::ready(Err(err));
        }

        let (completer, completion) = pair();
        if let Err(mpsc::error::SendError(item)) = link.tx.send(SendItem::new(buffer, completer)) {
            item.complete(Err(Error::new(
                GenericErrorCode::Disconnected,
                "connection failed; send rejected",
            )));
        }
        completion
    }

    fn receive<'a>(
        &'a self,
        buffer: &'a mut Buffer,
    ) -> impl Future<Output = Result<()>> + Send + 'a {
        async move {
            let link = self.link.as_ref().ok_or_else(|| {
                Error::new(
                    GenericErrorCode::Disconnected,
                    "receive on a port that is not connected",
                )
            })?;
            let mut state = link.reader.try_lock().map_err(|_| {
                Error::new(
                    GenericErrorCode::InProgress,
                    "a previous receive has not yet completed",
                )
            })?;
            let state = &mut *state;

            if state.terminal.is_none() {
                let failure = link.failed.borrow().clone();
                state.terminal = failure;
            }
            if let Some(err) = &state.terminal {
                buffer.clear();
                return Err(err.clone());
            }

            let mut failed = link.failed.clone();
            let result = tokio::select! {
                result = state.progress.read(&mut state.half, buffer) => result,
                err = write_failure(&mut failed) => Err(err),
            };

            if let Err(err) = &result {
                buffer.clear();
                debug!(peer = %link.peer, error = %err, "receive failed; connection unusable");
                state.terminal = Some(err.clone());
            }
            result
        }
    }

    fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            link.writer.abort();
            debug!(peer = %link.peer, "tcp message port disconnected");
        }
    }

    fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|link| {
            !link.tx.is_closed() && !link.writer.is_finished() && link.failed.borrow().is_none()
        })
    }
}

/// Resolves with the writer's error once it has failed. Never resolves if
/// the writer ends cleanly.
async fn write_failure(failed: &mut watch::Receiver<Option<Error>>) -> Error {
    loop {
        let failure = failed.borrow_and_update().clone();
        if let Some(err) = failure {
            return err;
        }
        if failed.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

impl Drop for TcpMessagePort {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use msgport_frame::encode_prefix;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use super::*;

    async fn connected_pair(config: TcpConfig) -> (TcpMessagePort, TcpMessagePort) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = TcpEndPoint::from(listener.local_addr().unwrap());

        let mut client = TcpMessagePort::with_config(config.clone());
        let (connected, accepted) = tokio::join!(client.connect(&endpoint), listener.accept());
        connected.unwrap();

        let mut server = TcpMessagePort::with_config(config);
        server.attach(accepted.unwrap().0).unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn messages_arrive_in_send_order() {
        let (client, server) = connected_pair(TcpConfig::default()).await;
        assert!(client.is_connected());

        let completions: Vec<_> = (1..=5)
            .map(|i| client.send(Buffer::from(format!("Message {i}").as_str())))
            .collect();

        let mut buf = Buffer::new();
        for i in 1..=5 {
            server.receive(&mut buf).await.unwrap();
            assert_eq!(buf, Buffer::from(format!("Message {i}").as_str()));
        }
        for completion in completions {
            completion.await.unwrap();
        }
    }

    #[tokio::test]
    async fn send_when_disconnected_fails() {
        let port = TcpMessagePort::new();
        let err = port.send(Buffer::from("x")).await.unwrap_err();
        assert!(err.is(GenericErrorCode::Disconnected));

        let mut buf = Buffer::new();
        let err = port.receive(&mut buf).await.unwrap_err();
        assert!(err.is(GenericErrorCode::Disconnected));
    }

    #[tokio::test]
    async fn oversize_send_rejected_without_queueing() {
        let config = TcpConfig::default().with_max_payload_size(8);
        let (client, server) = connected_pair(config).await;

        let err = client.send(Buffer::from("too large!")).await.unwrap_err();
        assert!(err.is(GenericErrorCode::MessageTooLarge));

        client.send(Buffer::from("fits")).await.unwrap();
        let mut buf = Buffer::new();
        server.receive(&mut buf).await.unwrap();
        assert_eq!(buf, Buffer::from("fits"));
    }

    #[tokio::test]
    async fn concurrent_receive_is_in_progress() {
        let (_client, server) = connected_pair(TcpConfig::default()).await;
        let mut first = Buffer::new();
        let mut second = Buffer::new();

        let pending = server.receive(&mut first);
        tokio::pin!(pending);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), &mut pending)
                .await
                .is_err()
        );

        let err = server.receive(&mut second).await.unwrap_err();
        assert!(err.is(GenericErrorCode::InProgress));
    }

    #[tokio::test]
    async fn protocol_error_is_terminal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = TcpEndPoint::from(listener.local_addr().unwrap());
        let mut port = TcpMessagePort::new();
        let (connected, accepted) = tokio::join!(port.connect(&endpoint), listener.accept());
        connected.unwrap();
        let (mut raw, _) = accepted.unwrap();

        let mut wire = encode_prefix(2).to_vec();
        wire[0] = b'Z';
        wire.extend_from_slice(b"ok");
        raw.write_all(&wire).await.unwrap();

        let mut buf = Buffer::from("stale");
        let err = port.receive(&mut buf).await.unwrap_err();
        assert!(err.is(TcpErrorCode::ProtocolError));
        assert!(buf.is_empty());

        let mut good = encode_prefix(2).to_vec();
        good.extend_from_slice(b"ok");
        raw.write_all(&good).await.unwrap();
        let again = port.receive(&mut buf).await.unwrap_err();
        assert_eq!(again, err);
    }

    #[tokio::test]
    async fn peer_close_reports_connection_closed() {
        let (client, server) = connected_pair(TcpConfig::default()).await;
        drop(client);

        let mut buf = Buffer::new();
        let err = server.receive(&mut buf).await.unwrap_err();
        assert!(err.is(GenericErrorCode::ConnectionClosed));
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let (mut client, _server) = connected_pair(TcpConfig::default()).await;
        client.disconnect();
        client.disconnect();
        assert!(!client.is_connected());
        assert!(client.peer_addr().is_none());
        let err = client.send(Buffer::from("late")).await.unwrap_err();
        assert!(err.is(GenericErrorCode::Disconnected));
    }

    #[tokio::test]
    async fn send_failure_after_peer_reset_fails_queue() {
        let (client, server) = connected_pair(TcpConfig::default()).await;
        drop(server);

        let payload = Buffer::with_len(64 * 1024);
        let mut failed = None;
        for _ in 0..256 {
            if let Err(err) = client.send(payload.clone()).await {
                failed = Some(err);
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(failed.is_some(), "writes to a closed peer never failed");

        let err = client.send(Buffer::from("after")).await.unwrap_err();
        assert!(err.is(GenericErrorCode::Disconnected));
        assert!(!client.is_connected());

        let mut buf = Buffer::from("stale");
        let err = client.receive(&mut buf).await.unwrap_err();
        assert_eq!(Some(err), failed);
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn write_failure_resolves_once_published() {
        let (tx, mut rx) = watch::channel(None);
        let waiter = tokio::spawn(async move { write_failure(&mut rx).await });
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        tx.send_replace(Some(Error::from(GenericErrorCode::ConnectionClosed)));
        let err = waiter.await.unwrap();
        assert!(err.is(GenericErrorCode::ConnectionClosed));
    }

    #[tokio::test]
    async fn clean_writer_exit_never_fails_reads() {
        let (tx, mut rx) = watch::channel(None);
        drop(tx);
        let waited =
            tokio::time::timeout(Duration::from_millis(20), write_failure(&mut rx)).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn canceled_idle_receive_keeps_link_usable() {
        let (client, server) = connected_pair(TcpConfig::default()).await;
        let mut buf = Buffer::new();
        for _ in 0..3 {
            let waited =
                tokio::time::timeout(Duration::from_millis(20), server.receive(&mut buf)).await;
            assert!(waited.is_err());
        }

        client.send(Buffer::from("after cancel")).await.unwrap();
        server.receive(&mut buf).await.unwrap();
        assert_eq!(buf, Buffer::from("after cancel"));
    }

    #[tokio::test]
    async fn receive_canceled_mid_frame_resumes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = TcpEndPoint::from(listener.local_addr().unwrap());
        let mut port = TcpMessagePort::new();
        let (connected, accepted) = tokio::join!(port.connect(&endpoint), listener.accept());
        connected.unwrap();
        let (mut raw, _) = accepted.unwrap();

        let mut wire = encode_prefix(11).to_vec();
        wire.extend_from_slice(b"split frame");
        raw.write_all(&wire[..16]).await.unwrap();

        let mut buf = Buffer::new();
        let waited = tokio::time::timeout(Duration::from_millis(50), port.receive(&mut buf)).await;
        assert!(waited.is_err());

        raw.write_all(&wire[16..]).await.unwrap();
        port.receive(&mut buf).await.unwrap();
        assert_eq!(buf, Buffer::from("split frame"));
        assert!(port.is_connected());
    }
}
