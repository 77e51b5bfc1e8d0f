use bytes::{BufMut, BytesMut};
use msgport_core::{Error, GenericErrorCode, Result};

/// Magic token opening every frame.
pub const MAGIC: [u8; 8] = *b"MSGPORT0";

/// Protocol version carried after the magic.
pub const PROTOCOL_VERSION: i32 = 1;

/// Magic (8) + version (4) = 12 bytes, read as the first stage.
pub const HEADER_SIZE: usize = 12;

/// Payload length field, read as the second stage.
pub const LENGTH_SIZE: usize = 8;

/// Everything in front of the payload.
pub const PREFIX_SIZE: usize = HEADER_SIZE + LENGTH_SIZE;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// Encode the 20-byte prefix for a payload of `len` bytes.
///
/// Wire format:
/// ```text
/// ┌──────────────┬────────────┬─────────────┬────────────────┐
/// │ Magic (8B)   │ Version    │ Length      │ Payload        │
/// │ "MSGPORT0"   │ (4B LE i32)│ (8B LE u64) │ (Length bytes) │
/// └──────────────┴────────────┴─────────────┴────────────────┘
/// ```
pub fn encode_prefix(len: usize) -> [u8; PREFIX_SIZE] {
    let mut prefix = [0u8; PREFIX_SIZE];
    prefix[..8].copy_from_slice(&MAGIC);
    prefix[8..HEADER_SIZE].copy_from_slice(&PROTOCOL_VERSION.to_le_bytes());
    prefix[HEADER_SIZE..].copy_from_slice(&(len as u64).to_le_bytes());
    prefix
}

/// Append one complete frame for `payload` to `dst`.
pub fn encode_frame(payload: &[u8], max_payload: usize, dst: &mut BytesMut) -> Result<()> {
    check_payload_size(payload.len(), max_payload)?;
    dst.reserve(PREFIX_SIZE + payload.len());
    dst.put_slice(&encode_prefix(payload.len()));
    dst.put_slice(payload);
    Ok(())
}

/// Reject payloads larger than `max_payload`.
pub fn check_payload_size(len: usize, max_payload: usize) -> Result<()> {
    if len > max_payload {
        return Err(Error::new(
            GenericErrorCode::MessageTooLarge,
            format!("payload too large ({len} bytes, max {max_payload})"),
        ));
    }
    Ok(())
}

/// Configuration for framed connections.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl FrameConfig {
    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.max_payload_size = max_payload_size;
        self
    }
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
