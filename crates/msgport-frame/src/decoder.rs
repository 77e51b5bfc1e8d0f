use msgport_core::{Buffer, Error, GenericErrorCode, Result, TcpErrorCode};

use crate::codec::{HEADER_SIZE, LENGTH_SIZE, MAGIC, PROTOCOL_VERSION};

/// Where a [`FrameDecoder`] is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for magic + version.
    Header,
    /// Header validated, waiting for the payload length.
    Length,
    /// Destination resized, waiting for the payload bytes.
    Payload,
    /// A whole frame is in the destination buffer.
    Complete,
}

/// Sans-io frame decoder.
///
/// The driver asks for the next region to fill with [`read_target`], fills
/// it completely with one read call, then calls [`advance`]. Each stage is
/// validated before the next one is requested, so a bad magic is reported
/// without touching the length bytes and an oversized length is reported
/// without reading any payload.
///
/// [`read_target`]: FrameDecoder::read_target
/// [`advance`]: FrameDecoder::advance
#[derive(Debug)]
pub struct FrameDecoder {
    stage: Stage,
    max_payload: usize,
    scratch: [u8; HEADER_SIZE],
}

impl FrameDecoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            stage: Stage::Header,
            max_payload,
            scratch: [0u8; HEADER_SIZE],
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Start over with a new frame.
    pub fn reset(&mut self) {
        self.stage = Stage::Header;
    }

    /// The region the next read must fill, or `None` once the frame is
    /// complete. The payload stage writes straight into `dst`.
    pub fn read_target<'a>(&'a mut self, dst: &'a mut Buffer) -> Option<&'a mut [u8]> {
        match self.stage {
            Stage::Header => Some(&mut self.scratch[..HEADER_SIZE]),
            Stage::Length => Some(&mut self.scratch[..LENGTH_SIZE]),
            Stage::Payload => Some(dst.as_mut_slice()),
            Stage::Complete => None,
        }
    }

    /// Validate the region just filled and move to the next stage.
    ///
    /// Errors are terminal for the stream; the decoder returns to
    /// [`Stage::Header`] and `dst` is cleared.
    pub fn advance(&mut self, dst: &mut Buffer) -> Result<Stage> {
        match self.step(dst) {
            Ok(stage) => {
                self.stage = stage;
                Ok(stage)
            }
            Err(err) => {
                self.stage = Stage::Header;
                dst.clear();
                Err(err)
            }
        }
    }

    fn step(&mut self, dst: &mut Buffer) -> Result<Stage> {
        match self.stage {
            Stage::Header => {
                if self.scratch[..MAGIC.len()] != MAGIC {
                    return Err(Error::new(
                        TcpErrorCode::ProtocolError,
                        "invalid frame magic",
                    ));
                }
                let mut version = [0u8; 4];
                version.copy_from_slice(&self.scratch[MAGIC.len()..HEADER_SIZE]);
                let version = i32::from_le_bytes(version);
                if version != PROTOCOL_VERSION {
                    return Err(Error::new(
                        TcpErrorCode::WrongProtocolVersion,
                        format!(
                            "protocol version {version} received, expected {PROTOCOL_VERSION}"
                        ),
                    ));
                }
                Ok(Stage::Length)
            }
            Stage::Length => {
                let mut length = [0u8; LENGTH_SIZE];
                length.copy_from_slice(&self.scratch[..LENGTH_SIZE]);
                let length = u64::from_le_bytes(length);
                let length = usize::try_from(length)
                    .ok()
                    .filter(|len| *len <= self.max_payload)
                    .ok_or_else(|| {
                        Error::new(
                            GenericErrorCode::MessageTooLarge,
                            format!(
                                "advertised payload of {length} bytes exceeds max {}",
                                self.max_payload
                            ),
                        )
                    })?;
                dst.resize(length);
                if length == 0 {
                    Ok(Stage::Complete)
                } else {
                    Ok(Stage::Payload)
                }
            }
            Stage::Payload | Stage::Complete => Ok(Stage::Complete),
        }
    }
}
