use bytes::{Buf, BytesMut};
use msgport_core::{Buffer, Error, Result};
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{encode_frame, FrameConfig};
use crate::decoder::FrameDecoder;

/// `tokio_util` codec for use with `Framed`.
///
/// Decoding consumes each stage from the read buffer only once the whole
/// stage is available, so a rejected header never eats into the length
/// field and an oversized length never waits for its payload.
#[derive(Debug)]
pub struct MessagePortCodec {
    decoder: FrameDecoder,
    current: Buffer,
    max_payload: usize,
}

impl MessagePortCodec {
    pub fn new() -> Self {
        Self::with_config(&FrameConfig::default())
    }

    pub fn with_config(config: &FrameConfig) -> Self {
        Self {
            decoder: FrameDecoder::new(config.max_payload_size),
            current: Buffer::new(),
            max_payload: config.max_payload_size,
        }
    }
}

impl Default for MessagePortCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessagePortCodec {
    type Item = Buffer;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Buffer>> {
        loop {
            let Some(target) = self.decoder.read_target(&mut self.current) else {
                self.decoder.reset();
                return Ok(Some(std::mem::take(&mut self.current)));
            };
            let needed = target.len();
            if src.len() < needed {
                src.reserve(needed - src.len());
                return Ok(None);
            }
            target.copy_from_slice(&src[..needed]);
            src.advance(needed);
            self.decoder.advance(&mut self.current)?;
        }
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for MessagePortCodec {
    type Error = Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        encode_frame(item.as_ref(), self.max_payload, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use msgport_core::{GenericErrorCode, TcpErrorCode};
    use tokio::io::AsyncWriteExt;
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::codec::{encode_prefix, HEADER_SIZE};

    #[tokio::test]
    async fn framed_roundtrip() {
        let (client, server) = tokio::io::duplex(1024);
        let mut sink = FramedWrite::new(client, MessagePortCodec::new());
        let mut stream = FramedRead::new(server, MessagePortCodec::new());

        sink.send(Buffer::from("Message 1")).await.unwrap();
        sink.send(Buffer::new()).await.unwrap();
        sink.send(b"Message 3".as_slice()).await.unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), Buffer::from("Message 1"));
        assert!(stream.next().await.unwrap().unwrap().is_empty());
        assert_eq!(stream.next().await.unwrap().unwrap(), Buffer::from("Message 3"));
    }

    #[test]
    fn decode_waits_for_each_stage() {
        let mut codec = MessagePortCodec::new();
        let mut wire = encode_prefix(5).to_vec();
        wire.extend_from_slice(b"hello");

        let mut src = BytesMut::from(&wire[..HEADER_SIZE - 1]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(&wire[HEADER_SIZE - 1..wire.len() - 1]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(&wire[wire.len() - 1..]);
        assert_eq!(codec.decode(&mut src).unwrap(), Some(Buffer::from("hello")));
        assert!(src.is_empty());
    }

    #[test]
    fn decode_rejects_bad_magic_without_consuming_length() {
        let mut codec = MessagePortCodec::new();
        let mut wire = encode_prefix(1).to_vec();
        wire[3] = b'?';
        wire.push(b'z');
        let mut src = BytesMut::from(wire.as_slice());

        let err = codec.decode(&mut src).unwrap_err();
        assert!(err.is(TcpErrorCode::ProtocolError));
        assert_eq!(src.len(), wire.len() - HEADER_SIZE);
    }

    #[test]
    fn decode_rejects_oversize_length() {
        let config = FrameConfig::default().with_max_payload_size(8);
        let mut codec = MessagePortCodec::with_config(&config);
        let mut src = BytesMut::from(&encode_prefix(9)[..]);
        let err = codec.decode(&mut src).unwrap_err();
        assert!(err.is(GenericErrorCode::MessageTooLarge));
    }

    #[tokio::test]
    async fn framed_read_reports_bad_version() {
        let (mut client, server) = tokio::io::duplex(256);
        let mut wire = encode_prefix(0).to_vec();
        wire[8] = 7;
        client.write_all(&wire).await.unwrap();

        let mut stream = FramedRead::new(server, MessagePortCodec::new());
        let err = stream.next().await.unwrap().unwrap_err();
        assert!(err.is(TcpErrorCode::WrongProtocolVersion));
    }
}
