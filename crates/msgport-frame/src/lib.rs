//! Framing for msgport stream transports.
//!
//! Every message is framed with:
//! - An 8-byte magic token ("MSGPORT0") for stream synchronization
//! - A 4-byte little-endian protocol version
//! - An 8-byte little-endian payload length
//!
//! Magic and version are validated before the length is read, and the
//! length is checked against the configured maximum before any payload
//! byte is read. The decoder is sans-io; with the `async` feature
//! [`FrameProgress`] and [`MessagePortCodec`] drive it over tokio I/O.

pub mod codec;
pub mod decoder;

#[cfg(feature = "async")]
pub mod async_io;
#[cfg(feature = "async")]
pub mod framed;

pub use codec::{
    check_payload_size, encode_frame, encode_prefix, FrameConfig, DEFAULT_MAX_PAYLOAD,
    HEADER_SIZE, LENGTH_SIZE, MAGIC, PREFIX_SIZE, PROTOCOL_VERSION,
};
pub use decoder::{FrameDecoder, Stage};

#[cfg(feature = "async")]
pub use async_io::{read_frame, write_frame, FrameProgress};
#[cfg(feature = "async")]
pub use framed::MessagePortCodec;
