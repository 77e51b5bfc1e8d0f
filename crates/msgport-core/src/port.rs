use std::future::Future;

use crate::buffer::Buffer;
use crate::completion::Completion;
use crate::error::Result;

/// Point-to-point channel carrying discrete binary messages.
///
/// Implementations deliver messages whole and in send order. A port moves
/// from disconnected to connected through [`connect`](MessagePort::connect)
/// or an acceptor, and back through [`disconnect`](MessagePort::disconnect)
/// or a terminal failure.
pub trait MessagePort {
    /// Address of the remote side.
    type EndPoint;

    /// Connect to `endpoint`, replacing any existing connection.
    fn connect(&mut self, endpoint: &Self::EndPoint) -> impl Future<Output = Result<()>> + Send;

    /// Submit `buffer` for sending.
    ///
    /// Submission is synchronous, so messages go out in call order; the
    /// returned completion resolves once the message has been handed to the
    /// transport or the send has failed.
    fn send(&self, buffer: Buffer) -> Completion<()>;

    /// Receive the next message into `buffer`, replacing its contents.
    fn receive<'a>(&'a self, buffer: &'a mut Buffer)
        -> impl Future<Output = Result<()>> + Send + 'a;

    /// Tear down the connection. Safe to call repeatedly.
    fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Passive side that turns incoming connection requests into ports.
pub trait MessagePortAcceptor {
    type Port: MessagePort;

    /// Wait for one connection and attach it to `port`.
    fn accept<'a>(&'a self, port: &'a mut Self::Port)
        -> impl Future<Output = Result<()>> + Send + 'a;

    /// Stop accepting. Later accepts fail.
    fn close(&mut self);
}
