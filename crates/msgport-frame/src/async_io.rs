use std::mem;

use msgport_core::{Buffer, Error, GenericErrorCode, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::codec::{check_payload_size, encode_prefix};
use crate::decoder::{FrameDecoder, Stage};

/// A frame read that survives cancellation.
///
/// Bytes taken off the stream are kept here rather than in the read future,
/// so dropping an in-flight [`read`](FrameProgress::read) and calling it
/// again resumes the same frame. Stage validation is the same as
/// [`FrameDecoder`]; any error resets the progress and is terminal for the
/// stream.
#[derive(Debug)]
pub struct FrameProgress {
    decoder: FrameDecoder,
    filled: usize,
    partial: Buffer,
}

impl FrameProgress {
    pub fn new(max_payload: usize) -> Self {
        Self {
            decoder: FrameDecoder::new(max_payload),
            filled: 0,
            partial: Buffer::new(),
        }
    }

    /// Whether part of a frame has already been consumed.
    pub fn in_frame(&self) -> bool {
        self.filled > 0 || self.decoder.stage() != Stage::Header
    }

    /// Read until one whole frame is available, then move it into `dst`.
    ///
    /// On failure `dst` is cleared so no partial frame is ever observed.
    pub async fn read<R>(&mut self, reader: &mut R, dst: &mut Buffer) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let result = self.fill(reader).await;
        let stage = self.decoder.stage();
        self.decoder.reset();
        self.filled = 0;
        match result {
            Ok(()) => {
                *dst = mem::take(&mut self.partial);
                Ok(())
            }
            Err(err) => {
                debug!(?stage, error = %err, "frame read failed");
                self.partial.clear();
                dst.clear();
                Err(err)
            }
        }
    }

    async fn fill<R>(&mut self, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        loop {
            let in_frame = self.in_frame();
            let Some(target) = self.decoder.read_target(&mut self.partial) else {
                return Ok(());
            };
            if self.filled < target.len() {
                let n = reader
                    .read(&mut target[self.filled..])
                    .await
                    .map_err(|err| Error::io("frame read failed", err))?;
                if n == 0 {
                    return Err(closed(in_frame));
                }
                self.filled += n;
                continue;
            }
            self.filled = 0;
            self.decoder.advance(&mut self.partial)?;
        }
    }
}

/// Read one frame from `reader` into `dst`.
///
/// Progress lives in the returned future; use [`FrameProgress`] where the
/// read may be canceled and retried.
pub async fn read_frame<R>(reader: &mut R, dst: &mut Buffer, max_payload: usize) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    FrameProgress::new(max_payload).read(reader, dst).await
}

/// Write one frame: prefix, payload, flush.
///
/// Payloads above `max_payload` fail with `MessageTooLarge` before anything
/// is written.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], max_payload: usize) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    check_payload_size(payload.len(), max_payload)?;
    let prefix = encode_prefix(payload.len());
    writer
        .write_all(&prefix)
        .await
        .map_err(|err| Error::io("frame write failed", err))?;
    writer
        .write_all(payload)
        .await
        .map_err(|err| Error::io("frame write failed", err))?;
    writer
        .flush()
        .await
        .map_err(|err| Error::io("frame flush failed", err))
}

fn closed(in_frame: bool) -> Error {
    if in_frame {
        Error::new(
            GenericErrorCode::ConnectionClosed,
            "connection closed (incomplete frame)",
        )
    } else {
        GenericErrorCode::ConnectionClosed.into()
    }
}

#[cfg(test)]
mod tests {
    use msgport_core::TcpErrorCode;

    use std::time::Duration;

    use super::*;
    use crate::codec::{DEFAULT_MAX_PAYLOAD, HEADER_SIZE, PREFIX_SIZE};

    #[tokio::test]
    async fn roundtrip_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let writer = tokio::spawn(async move {
            for i in 1..=5 {
                let msg = format!("Message {i}");
                write_frame(&mut client, msg.as_bytes(), DEFAULT_MAX_PAYLOAD)
                    .await
                    .unwrap();
            }
            write_frame(&mut client, &[0xAB; 300], DEFAULT_MAX_PAYLOAD)
                .await
                .unwrap();
        });

        let mut dst = Buffer::new();
        for i in 1..=5 {
            read_frame(&mut server, &mut dst, DEFAULT_MAX_PAYLOAD)
                .await
                .unwrap();
            assert_eq!(dst, Buffer::from(format!("Message {i}").as_str()));
        }
        read_frame(&mut server, &mut dst, DEFAULT_MAX_PAYLOAD)
            .await
            .unwrap();
        assert_eq!(dst.as_slice(), &[0xAB; 300][..]);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn bad_magic_consumes_only_header() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let mut wire = encode_prefix(3).to_vec();
        wire[..8].copy_from_slice(b"NOTMAGIC");
        wire.extend_from_slice(b"abc");
        client.write_all(&wire).await.unwrap();
        drop(client);

        let mut dst = Buffer::from("previous");
        let err = read_frame(&mut server, &mut dst, DEFAULT_MAX_PAYLOAD)
            .await
            .unwrap_err();
        assert!(err.is(TcpErrorCode::ProtocolError));
        assert!(dst.is_empty());

        let mut rest = Vec::new();
        server.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest.len(), wire.len() - HEADER_SIZE);
    }

    #[tokio::test]
    async fn eof_mid_payload_is_connection_closed() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let mut wire = encode_prefix(10).to_vec();
        wire.extend_from_slice(b"half");
        client.write_all(&wire).await.unwrap();
        drop(client);

        let mut dst = Buffer::new();
        let err = read_frame(&mut server, &mut dst, DEFAULT_MAX_PAYLOAD)
            .await
            .unwrap_err();
        assert!(err.is(GenericErrorCode::ConnectionClosed));
        assert!(dst.is_empty());
    }

    #[tokio::test]
    async fn dropped_read_resumes_mid_frame() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let mut wire = encode_prefix(11).to_vec();
        wire.extend_from_slice(b"hello world");
        client.write_all(&wire[..PREFIX_SIZE + 5]).await.unwrap();

        let mut progress = FrameProgress::new(DEFAULT_MAX_PAYLOAD);
        let mut dst = Buffer::new();
        let waited = tokio::time::timeout(
            Duration::from_millis(50),
            progress.read(&mut server, &mut dst),
        )
        .await;
        assert!(waited.is_err());
        assert!(progress.in_frame());

        client.write_all(&wire[PREFIX_SIZE + 5..]).await.unwrap();
        progress.read(&mut server, &mut dst).await.unwrap();
        assert_eq!(dst, Buffer::from("hello world"));
        assert!(!progress.in_frame());
    }

    #[tokio::test]
    async fn eof_between_frames_is_connection_closed() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        let mut dst = Buffer::new();
        let err = read_frame(&mut server, &mut dst, DEFAULT_MAX_PAYLOAD)
            .await
            .unwrap_err();
        assert!(err.is(GenericErrorCode::ConnectionClosed));
    }

    #[tokio::test]
    async fn oversize_write_is_rejected() {
        let (mut client, _server) = tokio::io::duplex(64);
        let err = write_frame(&mut client, &[0u8; 65], 64).await.unwrap_err();
        assert!(err.is(GenericErrorCode::MessageTooLarge));
    }
}
