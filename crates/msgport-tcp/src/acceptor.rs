use std::future::Future;
use std::net::SocketAddr;

use msgport_core::{Error, GenericErrorCode, MessagePortAcceptor, Result};
use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::endpoint::TcpEndPoint;
use crate::port::TcpMessagePort;

/// Listening side of TCP message ports.
pub struct TcpAcceptor {
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
}

impl TcpAcceptor {
    /// Bind and listen on `endpoint`. Port `0` picks a free port; see
    /// [`local_addr`](Self::local_addr).
    pub async fn bind(endpoint: &TcpEndPoint) -> Result<Self> {
        let addr = endpoint.resolve().await?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| Error::io(&format!("bind {endpoint} failed"), err))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| Error::io("local address unavailable", err))?;

        info!(%local_addr, "listening for message ports");
        Ok(Self {
            listener: Some(listener),
            local_addr,
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_open(&self) -> bool {
        self.listener.is_some()
    }
}

impl MessagePortAcceptor for TcpAcceptor {
    type Port = TcpMessagePort;

    fn accept<'a>(
        &'a self,
        port: &'a mut TcpMessagePort,
    ) -> impl Future<Output = Result<()>> + Send + 'a {
        async move {
            let listener = self.listener.as_ref().ok_or_else(|| {
                Error::new(GenericErrorCode::OperationAborted, "acceptor is closed")
            })?;
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(|err| Error::io("accept failed", err))?;
            port.attach(stream)?;
            debug!(%peer, "accepted message port connection");
            Ok(())
        }
    }

    fn close(&mut self) {
        if self.listener.take().is_some() {
            info!(local_addr = %self.local_addr, "stopped listening");
        }
    }
}

#[cfg(test)]
mod tests {
    use msgport_core::{Buffer, MessagePort};

    use super::*;

    fn loopback() -> TcpEndPoint {
        TcpEndPoint::new("127.0.0.1", 0)
    }

    #[tokio::test]
    async fn accept_and_exchange_both_ways() {
        let acceptor = TcpAcceptor::bind(&loopback()).await.unwrap();
        let endpoint = TcpEndPoint::from(acceptor.local_addr());

        let mut server = TcpMessagePort::new();
        let mut client = TcpMessagePort::new();
        let (accepted, connected) =
            tokio::join!(acceptor.accept(&mut server), client.connect(&endpoint));
        accepted.unwrap();
        connected.unwrap();
        assert!(server.is_connected());
        assert_eq!(server.peer_addr(), client.local_addr());

        client.send(Buffer::from("Message 1")).await.unwrap();
        let mut buf = Buffer::new();
        server.receive(&mut buf).await.unwrap();
        assert_eq!(buf, Buffer::from("Message 1"));

        server.send(Buffer::from("Reply 1")).await.unwrap();
        client.receive(&mut buf).await.unwrap();
        assert_eq!(buf, Buffer::from("Reply 1"));
    }

    #[tokio::test]
    async fn serves_several_clients_in_turn() {
        let acceptor = TcpAcceptor::bind(&loopback()).await.unwrap();
        let endpoint = TcpEndPoint::from(acceptor.local_addr());

        for i in 0..3 {
            let mut server = TcpMessagePort::new();
            let mut client = TcpMessagePort::new();
            let (accepted, connected) =
                tokio::join!(acceptor.accept(&mut server), client.connect(&endpoint));
            accepted.unwrap();
            connected.unwrap();

            let msg = Buffer::from(format!("client {i}").as_str());
            client.send(msg.clone()).await.unwrap();
            let mut buf = Buffer::new();
            server.receive(&mut buf).await.unwrap();
            assert_eq!(buf, msg);
        }
    }

    #[tokio::test]
    async fn accept_after_close_is_aborted() {
        let mut acceptor = TcpAcceptor::bind(&loopback()).await.unwrap();
        acceptor.close();
        acceptor.close();
        assert!(!acceptor.is_open());

        let mut port = TcpMessagePort::new();
        let err = acceptor.accept(&mut port).await.unwrap_err();
        assert!(err.is(GenericErrorCode::OperationAborted));
    }

    #[tokio::test]
    async fn connect_to_closed_acceptor_fails() {
        let mut acceptor = TcpAcceptor::bind(&loopback()).await.unwrap();
        let endpoint = TcpEndPoint::from(acceptor.local_addr());
        acceptor.close();

        let mut client = TcpMessagePort::new();
        let err = client.connect(&endpoint).await.unwrap_err();
        assert_eq!(err.category(), msgport_core::Category::System);
        assert!(!client.is_connected());
    }
}
