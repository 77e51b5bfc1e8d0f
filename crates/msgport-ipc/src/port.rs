use std::collections::hash_map::RandomState;
use std::future::Future;
use std::hash::{BuildHasher, Hasher};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use msgport_core::{
    Buffer, Completion, Error, GenericErrorCode, IpcErrorCode, MessagePort, Result,
};
use tracing::{debug, trace};

use crate::config::{IpcConfig, PingMode};
use crate::endpoint::IpcEndPoint;
use crate::naming::QueuePair;
use crate::queue::{MessageQueue, QueueBackend};
use crate::receive_thread::{ReceiveOptions, ReceiveThread, ReceivedMessage};
use crate::send_thread::{SendOptions, SendThread};
use crate::sys_message::{
    SysMessage, SysMessageType, MAX_SYS_MESSAGE_SIZE, SYS_PRIORITY, USER_PRIORITY,
};

/// Message port over a pair of system message queues.
///
/// Each direction is served by its own OS thread; async callers receive
/// results through completions. Both sides ping each other while idle, and a
/// receive with no traffic for `ping_timeout` fails with `LostConnection`.
///
/// [`disconnect`](MessagePort::disconnect) (and drop) joins the worker
/// threads, which may block for up to one `poll_interval`.
pub struct IpcMessagePort {
    backend: Arc<dyn QueueBackend>,
    config: IpcConfig,
    link: Option<Link>,
}

struct Link {
    send_name: String,
    recv_name: String,
    sender: SendThread,
    receiver: ReceiveThread,
    peer_gone: AtomicBool,
}

impl IpcMessagePort {
    pub fn new(backend: Arc<dyn QueueBackend>) -> Self {
        Self::with_config(backend, IpcConfig::default())
    }

    pub fn with_config(backend: Arc<dyn QueueBackend>, config: IpcConfig) -> Self {
        Self {
            backend,
            config,
            link: None,
        }
    }

    pub fn config(&self) -> &IpcConfig {
        &self.config
    }

    /// Name of the queue this port sends on.
    pub fn send_queue_name(&self) -> Option<&str> {
        self.link.as_ref().map(|link| link.send_name.as_str())
    }

    /// Name of the queue this port receives on.
    pub fn receive_queue_name(&self) -> Option<&str> {
        self.link.as_ref().map(|link| link.recv_name.as_str())
    }

    /// Receive the next message, giving up after `timeout` with
    /// `TimeOutExpired`. `None` waits indefinitely (subject to liveness).
    pub async fn receive_timeout(
        &self,
        buffer: &mut Buffer,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let link = self.link.as_ref().ok_or_else(not_connected)?;
        loop {
            let msg = link.receiver.receive(timeout).await?;
            if msg.priority != SYS_PRIORITY {
                *buffer = msg.data;
                return Ok(());
            }
            match SysMessage::decode(msg.data.as_slice()) {
                Ok(sys) if sys.kind() == SysMessageType::Disconnect => {
                    debug!(queue = %link.recv_name, "peer disconnected");
                    link.peer_gone.store(true, Ordering::Release);
                    return Err(Error::new(
                        IpcErrorCode::Disconnected,
                        "peer closed the connection",
                    ));
                }
                other => trace!(?other, "skipping system message"),
            }
        }
    }

    /// Attach to an existing queue pair created by a connecting peer.
    pub(crate) fn attach(&mut self, send_name: &str, recv_name: &str) -> Result<()> {
        self.disconnect();
        let send_queue = self
            .backend
            .open(send_name)
            .map_err(|err| queue_failure(send_name, "open", err))?;
        let recv_queue = self
            .backend
            .open(recv_name)
            .map_err(|err| queue_failure(recv_name, "open", err))?;
        self.start(send_name, recv_name, send_queue, recv_queue)?;
        debug!(send = send_name, recv = recv_name, "ipc message port attached");
        Ok(())
    }

    /// Queue a system message on the send side.
    pub(crate) fn send_system(&self, msg: &SysMessage) -> Completion<()> {
        let Some(link) = &self.link else {
            return Completion::ready(Err(not_connected()));
        };
        match msg.encode() {
            Ok(bytes) => link.sender.send(Buffer::from(bytes), SYS_PRIORITY),
            Err(err) => Completion::ready(Err(err)),
        }
    }

    fn start(
        &mut self,
        send_name: &str,
        recv_name: &str,
        send_queue: Arc<dyn MessageQueue>,
        recv_queue: Arc<dyn MessageQueue>,
    ) -> Result<()> {
        let sender = SendThread::spawn(
            send_queue,
            SendOptions {
                ping: PingMode::Enabled,
                ping_interval: self.config.ping_interval,
                send_timeout: self.config.send_timeout,
            },
        )?;
        let receiver = ReceiveThread::spawn(
            recv_queue,
            ReceiveOptions {
                ping: PingMode::Enabled,
                ping_timeout: self.config.ping_timeout,
                poll_interval: self.config.poll_interval,
            },
        )?;
        self.link = Some(Link {
            send_name: send_name.to_string(),
            recv_name: recv_name.to_string(),
            sender,
            receiver,
            peer_gone: AtomicBool::new(false),
        });
        Ok(())
    }

    /// Claim a connection id and create its two queues.
    fn create_queues(
        &self,
        endpoint: &IpcEndPoint,
    ) -> Result<(QueuePair, Arc<dyn MessageQueue>, Arc<dyn MessageQueue>)> {
        let naming = Arc::clone(&self.config.naming);
        let ids = naming.id_range();
        let (first, last) = (*ids.start(), *ids.end());
        let span = last.saturating_sub(first).saturating_add(1);
        let offset = random_offset(span);
        let max_msg_size = endpoint.max_msg_size().max(MAX_SYS_MESSAGE_SIZE);

        for attempt in 0..span {
            let id = first + (offset + attempt) % span;
            let pair = naming.connection_names(endpoint.name(), id);
            if self.backend.exists(&pair.client) || self.backend.exists(&pair.server) {
                continue;
            }

            let client = match self
                .backend
                .create(&pair.client, endpoint.max_num_msg(), max_msg_size)
            {
                Ok(queue) => queue,
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(queue_failure(&pair.client, "create", err)),
            };
            let server = match self
                .backend
                .create(&pair.server, endpoint.max_num_msg(), max_msg_size)
            {
                Ok(queue) => queue,
                Err(err) => {
                    let _ = self.backend.remove(&pair.client);
                    if err.kind() == io::ErrorKind::AlreadyExists {
                        continue;
                    }
                    return Err(queue_failure(&pair.server, "create", err));
                }
            };
            return Ok((pair, server, client));
        }

        Err(Error::new(
            IpcErrorCode::CommunicationFailure,
            format!("no free connection id for {endpoint}"),
        ))
    }

    async fn handshake(&self, endpoint: &IpcEndPoint, pair: &QueuePair) -> Result<()> {
        let acceptor = self.backend.open(endpoint.name()).map_err(|err| {
            Error::new(
                IpcErrorCode::CommunicationFailure,
                format!("no acceptor listening on {endpoint}: {err}"),
            )
        })?;
        let request = SysMessage::connect(&pair.client, &pair.server).encode()?;
        match acceptor.try_send(&request, SYS_PRIORITY) {
            Ok(true) => {}
            Ok(false) => {
                return Err(Error::new(
                    IpcErrorCode::CommunicationFailure,
                    format!("acceptor queue {endpoint} is full"),
                ))
            }
            Err(err) => return Err(queue_failure(endpoint.name(), "send to", err)),
        }
        drop(acceptor);

        let link = self.link.as_ref().ok_or_else(not_connected)?;
        let reply = link
            .receiver
            .receive(Some(self.config.connect_timeout))
            .await
            .map_err(|err| {
                Error::new(
                    IpcErrorCode::CommunicationFailure,
                    format!("no connection acknowledgement from {endpoint}: {err}"),
                )
            })?;
        if is_ack(&reply) {
            Ok(())
        } else {
            Err(Error::new(
                IpcErrorCode::CommunicationFailure,
                format!("unexpected reply from {endpoint}"),
            ))
        }
    }
}

impl MessagePort for IpcMessagePort {
    type EndPoint = IpcEndPoint;

    fn connect(&mut self, endpoint: &IpcEndPoint) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.disconnect();

            let (pair, send_queue, recv_queue) = self.create_queues(endpoint)?;
            if let Err(err) = self.start(&pair.server, &pair.client, send_queue, recv_queue) {
                let _ = self.backend.remove(&pair.client);
                let _ = self.backend.remove(&pair.server);
                return Err(err);
            }

            if let Err(err) = self.handshake(endpoint, &pair).await {
                debug!(%endpoint, error = %err, "connect failed");
                self.disconnect();
                return Err(err);
            }
            debug!(%endpoint, client = %pair.client, server = %pair.server, "connected");
            Ok(())
        }
    }

    fn send(&self, buffer: Buffer) -> Completion<()> {
        match &self.link {
            Some(link) => link.sender.send(buffer, USER_PRIORITY),
            None => Completion::ready(Err(not_connected())),
        }
    }

    fn receive<'a>(
        &'a self,
        buffer: &'a mut Buffer,
    ) -> impl Future<Output = Result<()>> + Send + 'a {
        self.receive_timeout(buffer, None)
    }

    fn disconnect(&mut self) {
        let Some(mut link) = self.link.take() else {
            return;
        };
        link.sender.close();
        link.receiver.close();
        for name in [&link.send_name, &link.recv_name] {
            if let Err(err) = self.backend.remove(name) {
                debug!(queue = %name, error = %err, "queue removal failed");
            }
        }
        debug!(send = %link.send_name, recv = %link.recv_name, "ipc message port disconnected");
    }

    fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|link| {
            !link.peer_gone.load(Ordering::Acquire) && !link.sender.has_failed()
        })
    }
}

impl Drop for IpcMessagePort {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn is_ack(reply: &ReceivedMessage) -> bool {
    reply.priority == SYS_PRIORITY
        && SysMessage::decode(reply.data.as_slice())
            .is_ok_and(|msg| msg.kind() == SysMessageType::ConnAck)
}

fn not_connected() -> Error {
    Error::from(GenericErrorCode::Disconnected)
}

fn queue_failure(name: &str, action: &str, err: io::Error) -> Error {
    Error::new(
        IpcErrorCode::CommunicationFailure,
        format!("{action} message queue {name} failed: {err}"),
    )
}

fn random_offset(span: u32) -> u32 {
    if span == 0 {
        return 0;
    }
    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u32(std::process::id());
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    hasher.write_u128(nanos);
    (hasher.finish() % u64::from(span)) as u32
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::local::LocalQueues;

    #[test]
    fn random_offset_stays_in_span() {
        for _ in 0..100 {
            assert!(random_offset(99) < 99);
        }
        assert_eq!(random_offset(0), 0);
        assert_eq!(random_offset(1), 0);
    }

    #[tokio::test]
    async fn operations_require_connection() {
        let port = IpcMessagePort::new(Arc::new(LocalQueues::new()));
        assert!(!port.is_connected());

        let err = port.send(Buffer::from("x")).await.unwrap_err();
        assert!(err.is(GenericErrorCode::Disconnected));

        let mut buf = Buffer::new();
        let err = port.receive(&mut buf).await.unwrap_err();
        assert!(err.is(GenericErrorCode::Disconnected));
    }

    #[tokio::test]
    async fn connect_without_acceptor_cleans_up() {
        let queues = LocalQueues::new();
        let config = IpcConfig::default()
            .with_poll_interval(Duration::from_millis(20))
            .with_connect_timeout(Duration::from_millis(100));
        let mut port = IpcMessagePort::with_config(Arc::new(queues.clone()), config);

        let err = port.connect(&IpcEndPoint::new("/nobody")).await.unwrap_err();
        assert!(err.is(IpcErrorCode::CommunicationFailure));
        assert!(!port.is_connected());
        for id in 1..=99 {
            assert!(!queues.exists(&format!("/nobody#Client#{id}")));
            assert!(!queues.exists(&format!("/nobody#Server#{id}")));
        }
    }

    #[tokio::test]
    async fn connect_times_out_without_ack() {
        let queues = LocalQueues::new();
        queues.create("/silent", 4, 128).unwrap();
        let config = IpcConfig::default()
            .with_poll_interval(Duration::from_millis(20))
            .with_connect_timeout(Duration::from_millis(100));
        let mut port = IpcMessagePort::with_config(Arc::new(queues.clone()), config);

        let started = Instant::now();
        let err = port.connect(&IpcEndPoint::new("/silent")).await.unwrap_err();
        assert!(err.is(IpcErrorCode::CommunicationFailure));
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(port.send_queue_name().is_none());
    }
}
