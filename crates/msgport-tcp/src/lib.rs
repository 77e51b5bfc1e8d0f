//! TCP transport for msgport.
//!
//! Each message travels as one frame (see `msgport-frame`). A
//! [`TcpMessagePort`] connects to a [`TcpEndPoint`] or is handed a
//! connection by a [`TcpAcceptor`].

pub mod acceptor;
pub mod config;
pub mod endpoint;
pub mod port;
mod writer;

pub use acceptor::TcpAcceptor;
pub use config::TcpConfig;
pub use endpoint::TcpEndPoint;
pub use port::TcpMessagePort;
