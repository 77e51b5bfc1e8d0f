//! Asynchronous message ports.
//!
//! A message port carries discrete binary messages between two peers, in
//! order, with one completion per send. The same [`MessagePort`] and
//! [`MessagePortAcceptor`] traits front two transports:
//!
//! - [`tcp`]: framed messages over a TCP stream (feature `tcp`)
//! - [`ipc`]: paired system message queues on one host (feature `ipc`)
//!
//! [`peer`] layers a connection-managing server and a reconnecting client
//! over either transport (feature `peer`). [`frame`] exposes the TCP wire
//! codec for use outside a port.

pub use msgport_core::*;

/// Wire framing used by the TCP transport.
pub mod frame {
    pub use msgport_frame::*;
}

/// TCP transport (requires `tcp` feature).
#[cfg(feature = "tcp")]
pub mod tcp {
    pub use msgport_tcp::*;
}

/// Local message queue transport (requires `ipc` feature).
#[cfg(feature = "ipc")]
pub mod ipc {
    pub use msgport_ipc::*;
}

/// Server and client over message ports (requires `peer` feature).
#[cfg(feature = "peer")]
pub mod peer {
    pub use msgport_peer::*;
}
