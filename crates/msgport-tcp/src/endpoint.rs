use std::fmt;
use std::io;
use std::net::SocketAddr;

use msgport_core::{Error, Result};
use tokio::net::lookup_host;

/// Host name or address plus port of a TCP message port.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TcpEndPoint {
    address: String,
    port: u16,
}

impl TcpEndPoint {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolve to a socket address, preferring the first IPv4 result.
    pub async fn resolve(&self) -> Result<SocketAddr> {
        let addrs: Vec<SocketAddr> = lookup_host((self.address.as_str(), self.port))
            .await
            .map_err(|err| Error::io(&format!("resolve {self} failed"), err))?
            .collect();

        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                Error::io(
                    &format!("resolve {self} failed"),
                    io::Error::new(io::ErrorKind::NotFound, "no addresses found"),
                )
            })
    }
}

impl fmt::Display for TcpEndPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.address.contains(':') {
            write!(f, "[{}]:{}", self.address, self.port)
        } else {
            write!(f, "{}:{}", self.address, self.port)
        }
    }
}

impl From<SocketAddr> for TcpEndPoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_numeric_address() {
        let endpoint = TcpEndPoint::new("127.0.0.1", 8080);
        let addr = endpoint.resolve().await.unwrap();
        assert_eq!(addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn localhost_prefers_ipv4() {
        let addr = TcpEndPoint::new("localhost", 9).resolve().await.unwrap();
        if addr.is_ipv6() {
            // Host without an IPv4 loopback entry.
            return;
        }
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn display_brackets_ipv6() {
        assert_eq!(TcpEndPoint::new("::1", 5).to_string(), "[::1]:5");
        assert_eq!(TcpEndPoint::new("host", 5).to_string(), "host:5");
    }

    #[test]
    fn from_socket_addr() {
        let addr: SocketAddr = "10.0.0.1:4000".parse().unwrap();
        let endpoint = TcpEndPoint::from(addr);
        assert_eq!(endpoint.address(), "10.0.0.1");
        assert_eq!(endpoint.port(), 4000);
    }
}
