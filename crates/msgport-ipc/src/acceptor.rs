use std::future::Future;
use std::sync::Arc;

use msgport_core::{
    Error, GenericErrorCode, IpcErrorCode, MessagePort, MessagePortAcceptor, Result,
};
use tracing::{debug, info};

use crate::config::{IpcConfig, PingMode};
use crate::endpoint::IpcEndPoint;
use crate::port::IpcMessagePort;
use crate::queue::QueueBackend;
use crate::receive_thread::{ReceiveOptions, ReceiveThread};
use crate::sys_message::{SysMessage, SysMessageType, MAX_SYS_MESSAGE_SIZE, SYS_PRIORITY};

/// Listening side of IPC message ports.
///
/// Owns the queue named by the endpoint. Connecting ports post a `CONNECT`
/// naming their queue pair; each [`accept`](MessagePortAcceptor::accept)
/// attaches one of them to the caller's port and acknowledges it.
pub struct IpcAcceptor {
    backend: Arc<dyn QueueBackend>,
    endpoint: IpcEndPoint,
    receiver: Option<ReceiveThread>,
}

impl IpcAcceptor {
    /// Create the acceptor queue for `endpoint`, first removing any queues
    /// left behind by a previous acceptor or its connections.
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        endpoint: IpcEndPoint,
        config: &IpcConfig,
    ) -> Result<Self> {
        remove_stale(&*backend, &endpoint, config);

        let max_msg_size = endpoint.max_msg_size().max(MAX_SYS_MESSAGE_SIZE);
        let queue = backend
            .create(endpoint.name(), endpoint.max_num_msg(), max_msg_size)
            .map_err(|err| {
                Error::new(
                    IpcErrorCode::CommunicationFailure,
                    format!("create acceptor queue {endpoint} failed: {err}"),
                )
            })?;
        let receiver = match ReceiveThread::spawn(
            queue,
            ReceiveOptions {
                ping: PingMode::Disabled,
                ping_timeout: config.ping_timeout,
                poll_interval: config.poll_interval,
            },
        ) {
            Ok(receiver) => receiver,
            Err(err) => {
                let _ = backend.remove(endpoint.name());
                return Err(err);
            }
        };

        info!(%endpoint, "listening for message ports");
        Ok(Self {
            backend,
            endpoint,
            receiver: Some(receiver),
        })
    }

    pub fn endpoint(&self) -> &IpcEndPoint {
        &self.endpoint
    }

    pub fn is_open(&self) -> bool {
        self.receiver.is_some()
    }
}

impl MessagePortAcceptor for IpcAcceptor {
    type Port = IpcMessagePort;

    fn accept<'a>(
        &'a self,
        port: &'a mut IpcMessagePort,
    ) -> impl Future<Output = Result<()>> + Send + 'a {
        async move {
            let receiver = self
                .receiver
                .as_ref()
                .ok_or_else(|| {
                    Error::new(GenericErrorCode::OperationAborted, "acceptor is closed")
                })?;
            let request = receiver.receive(None).await?;

            let (send_name, recv_name) = match SysMessage::decode(request.data.as_slice()) {
                Ok(msg)
                    if request.priority == SYS_PRIORITY
                        && msg.kind() == SysMessageType::Connect
                        && msg.params().len() == 2 =>
                {
                    (msg.params()[0].clone(), msg.params()[1].clone())
                }
                _ => {
                    debug!(endpoint = %self.endpoint, "invalid connect request");
                    return Err(Error::new(
                        IpcErrorCode::CommunicationFailure,
                        "invalid CONNECT request received",
                    ));
                }
            };

            port.attach(&send_name, &recv_name)?;

            let ack = port.send_system(&SysMessage::new(SysMessageType::ConnAck));
            if let Err(err) = ack.await {
                port.disconnect();
                return Err(Error::new(
                    IpcErrorCode::CommunicationFailure,
                    format!("connection acknowledgement not sent: {err}"),
                ));
            }
            debug!(endpoint = %self.endpoint, send = %send_name, recv = %recv_name, "accepted");
            Ok(())
        }
    }

    fn close(&mut self) {
        let Some(mut receiver) = self.receiver.take() else {
            return;
        };
        receiver.close();
        drop(receiver);
        if let Err(err) = self.backend.remove(self.endpoint.name()) {
            debug!(endpoint = %self.endpoint, error = %err, "acceptor queue removal failed");
        }
        info!(endpoint = %self.endpoint, "stopped listening");
    }
}

impl Drop for IpcAcceptor {
    fn drop(&mut self) {
        self.close();
    }
}

fn remove_stale(backend: &dyn QueueBackend, endpoint: &IpcEndPoint, config: &IpcConfig) {
    let mut removed = 0usize;
    if backend.remove(endpoint.name()).unwrap_or(false) {
        removed += 1;
    }
    for id in config.naming.id_range() {
        let pair = config.naming.connection_names(endpoint.name(), id);
        for name in [&pair.client, &pair.server] {
            if backend.remove(name).unwrap_or(false) {
                removed += 1;
            }
        }
    }
    if removed > 0 {
        debug!(%endpoint, removed, "removed stale message queues");
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use msgport_core::Buffer;

    use super::*;
    use crate::local::LocalQueues;

    fn fast_config() -> IpcConfig {
        IpcConfig::default()
            .with_poll_interval(Duration::from_millis(20))
            .with_ping_interval(Duration::from_millis(50))
            .with_ping_timeout(Duration::from_millis(400))
            .with_connect_timeout(Duration::from_secs(2))
    }

    struct Fixture {
        queues: LocalQueues,
        acceptor: IpcAcceptor,
        endpoint: IpcEndPoint,
    }

    fn fixture(name: &str) -> Fixture {
        let queues = LocalQueues::new();
        let endpoint = IpcEndPoint::new(name);
        let acceptor =
            IpcAcceptor::new(Arc::new(queues.clone()), endpoint.clone(), &fast_config()).unwrap();
        Fixture {
            queues,
            acceptor,
            endpoint,
        }
    }

    fn port(queues: &LocalQueues) -> IpcMessagePort {
        IpcMessagePort::with_config(Arc::new(queues.clone()), fast_config())
    }

    async fn connected(fx: &Fixture) -> (IpcMessagePort, IpcMessagePort) {
        let mut server = port(&fx.queues);
        let mut client = port(&fx.queues);
        let (accepted, connected) =
            tokio::join!(fx.acceptor.accept(&mut server), client.connect(&fx.endpoint));
        accepted.unwrap();
        connected.unwrap();
        (client, server)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn connect_accept_and_exchange() {
        let fx = fixture("/svc");
        let (client, server) = connected(&fx).await;
        assert!(client.is_connected());
        assert!(server.is_connected());
        assert_eq!(client.send_queue_name(), server.receive_queue_name());
        assert_eq!(client.receive_queue_name(), server.send_queue_name());

        for i in 1..=5 {
            client
                .send(Buffer::from(format!("Message {i}").as_str()))
                .await
                .unwrap();
        }
        let mut buf = Buffer::new();
        for i in 1..=5 {
            server.receive(&mut buf).await.unwrap();
            assert_eq!(buf, Buffer::from(format!("Message {i}").as_str()));
        }

        server.send(Buffer::from("Reply")).await.unwrap();
        client.receive(&mut buf).await.unwrap();
        assert_eq!(buf, Buffer::from("Reply"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn idle_link_survives_past_ping_timeout() {
        let fx = fixture("/idle");
        let (client, server) = connected(&fx).await;

        let mut buf = Buffer::new();
        let err = server
            .receive_timeout(&mut buf, Some(Duration::from_millis(900)))
            .await
            .unwrap_err();
        assert!(err.is(IpcErrorCode::TimeOutExpired));

        client.send(Buffer::from("still here")).await.unwrap();
        server.receive(&mut buf).await.unwrap();
        assert_eq!(buf, Buffer::from("still here"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn canceled_receive_does_not_lose_next_message() {
        let fx = fixture("/cancel");
        let (client, server) = connected(&fx).await;

        let mut buf = Buffer::new();
        let waited =
            tokio::time::timeout(Duration::from_millis(100), server.receive(&mut buf)).await;
        assert!(waited.is_err());

        client.send(Buffer::from("important")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        server.receive(&mut buf).await.unwrap();
        assert_eq!(buf, Buffer::from("important"));

        let waited =
            tokio::time::timeout(Duration::from_millis(50), server.receive(&mut buf)).await;
        assert!(waited.is_err());
        client.send(Buffer::from("again")).await.unwrap();
        server.receive(&mut buf).await.unwrap();
        assert_eq!(buf, Buffer::from("again"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn peer_disconnect_is_reported() {
        let fx = fixture("/bye");
        let (mut client, server) = connected(&fx).await;
        let names = (
            client.send_queue_name().unwrap().to_string(),
            client.receive_queue_name().unwrap().to_string(),
        );

        client.disconnect();
        assert!(!fx.queues.exists(&names.0));
        assert!(!fx.queues.exists(&names.1));

        let mut buf = Buffer::new();
        let err = server.receive(&mut buf).await.unwrap_err();
        assert!(err.is(IpcErrorCode::Disconnected));
        assert!(!server.is_connected());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_receive_is_bad_usage() {
        let fx = fixture("/busy");
        let (_client, server) = connected(&fx).await;

        let mut first = Buffer::new();
        let mut second = Buffer::new();
        let pending = server.receive(&mut first);
        tokio::pin!(pending);
        assert!(tokio::time::timeout(Duration::from_millis(50), &mut pending)
            .await
            .is_err());

        let err = server.receive(&mut second).await.unwrap_err();
        assert!(err.is(IpcErrorCode::BadUsage));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn invalid_connect_request_fails_accept() {
        let fx = fixture("/junk");
        let raw = fx.queues.open("/junk").unwrap();
        raw.try_send(b"hello", 0).unwrap();

        let mut server = port(&fx.queues);
        let err = fx.acceptor.accept(&mut server).await.unwrap_err();
        assert!(err.is(IpcErrorCode::CommunicationFailure));
        assert!(!server.is_connected());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn full_client_queue_fails_ack() {
        let fx = fixture("/full");
        let client_queue = fx.queues.create("/full#Client#1", 1, 128).unwrap();
        fx.queues.create("/full#Server#1", 1, 128).unwrap();
        client_queue.try_send(b"filler", 0).unwrap();

        let request = SysMessage::connect("/full#Client#1", "/full#Server#1")
            .encode()
            .unwrap();
        fx.queues
            .open("/full")
            .unwrap()
            .try_send(&request, SYS_PRIORITY)
            .unwrap();

        let mut server = port(&fx.queues);
        let err = fx.acceptor.accept(&mut server).await.unwrap_err();
        assert!(err.is(IpcErrorCode::CommunicationFailure));
        assert!(!server.is_connected());
    }

    #[tokio::test]
    async fn new_removes_stale_queues() {
        let queues = LocalQueues::new();
        queues.create("/stale", 1, 128).unwrap();
        queues.create("/stale#Client#42", 1, 128).unwrap();
        queues.create("/stale#Server#42", 1, 128).unwrap();

        let _acceptor = IpcAcceptor::new(
            Arc::new(queues.clone()),
            IpcEndPoint::new("/stale"),
            &fast_config(),
        )
        .unwrap();
        assert!(queues.exists("/stale"));
        assert!(!queues.exists("/stale#Client#42"));
        assert!(!queues.exists("/stale#Server#42"));

        let fresh = queues.open("/stale").unwrap();
        assert!(fresh.max_msg_size() >= MAX_SYS_MESSAGE_SIZE);
    }

    #[tokio::test]
    async fn close_stops_accepting_and_removes_queue() {
        let mut fx = fixture("/closing");
        let started = Instant::now();
        fx.acceptor.close();
        fx.acceptor.close();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(!fx.acceptor.is_open());
        assert!(!fx.queues.exists("/closing"));

        let mut server = port(&fx.queues);
        let err = fx.acceptor.accept(&mut server).await.unwrap_err();
        assert!(err.is(GenericErrorCode::OperationAborted));

        let mut client = port(&fx.queues);
        let err = client.connect(&fx.endpoint).await.unwrap_err();
        assert!(err.is(IpcErrorCode::CommunicationFailure));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn posix_queues_roundtrip() {
        use crate::posix::PosixQueues;

        let backend: Arc<dyn QueueBackend> = Arc::new(PosixQueues::new());
        let name = format!("/msgport-accept-{}", std::process::id());
        let endpoint = IpcEndPoint::new(name.as_str());
        let acceptor = match IpcAcceptor::new(Arc::clone(&backend), endpoint.clone(), &fast_config())
        {
            Ok(acceptor) => acceptor,
            Err(err) => {
                eprintln!("skipping: posix message queues unavailable ({err})");
                return;
            }
        };

        let mut server = IpcMessagePort::with_config(Arc::clone(&backend), fast_config());
        let mut client = IpcMessagePort::with_config(Arc::clone(&backend), fast_config());
        let (accepted, connected) =
            tokio::join!(acceptor.accept(&mut server), client.connect(&endpoint));
        accepted.unwrap();
        connected.unwrap();

        client.send(Buffer::from("over posix")).await.unwrap();
        let mut buf = Buffer::new();
        server.receive(&mut buf).await.unwrap();
        assert_eq!(buf, Buffer::from("over posix"));

        client.disconnect();
        let err = server.receive(&mut buf).await.unwrap_err();
        assert!(err.is(IpcErrorCode::Disconnected));
    }
}
