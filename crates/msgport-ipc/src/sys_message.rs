use msgport_core::{Error, GenericErrorCode, IpcErrorCode, Result};

/// Priority of link-control messages. Everything above user traffic.
pub const SYS_PRIORITY: u32 = 10;

/// Priority of application messages.
pub const USER_PRIORITY: u32 = 0;

/// Largest encoded system message.
pub const MAX_SYS_MESSAGE_SIZE: usize = 100;

const TYPE_LEN: usize = 8;

/// Kind of a link-control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SysMessageType {
    /// Client asks the acceptor to attach; params: client queue, server queue.
    Connect,
    /// Acceptor confirms the attachment.
    ConnAck,
    /// Sender is closing the link.
    Disconnect,
}

impl SysMessageType {
    fn tag(self) -> &'static [u8] {
        match self {
            SysMessageType::Connect => b"CONNECT",
            SysMessageType::ConnAck => b"CONN-ACK",
            SysMessageType::Disconnect => b"DISCONN",
        }
    }

    fn from_tag(tag: &[u8]) -> Option<Self> {
        let end = tag.iter().position(|b| *b == 0).unwrap_or(tag.len());
        [
            SysMessageType::Connect,
            SysMessageType::ConnAck,
            SysMessageType::Disconnect,
        ]
        .into_iter()
        .find(|kind| kind.tag() == &tag[..end])
    }
}

/// Link-control message carried at [`SYS_PRIORITY`].
///
/// Layout: 8-byte NUL-padded type, `u32` LE parameter count, then per
/// parameter a `u32` LE length and the bytes. A zero-length message at
/// system priority is a ping and never reaches this codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysMessage {
    kind: SysMessageType,
    params: Vec<String>,
}

impl SysMessage {
    pub fn new(kind: SysMessageType) -> Self {
        Self {
            kind,
            params: Vec::new(),
        }
    }

    pub fn connect(client_queue: &str, server_queue: &str) -> Self {
        Self {
            kind: SysMessageType::Connect,
            params: vec![client_queue.to_string(), server_queue.to_string()],
        }
    }

    pub fn kind(&self) -> SysMessageType {
        self.kind
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(MAX_SYS_MESSAGE_SIZE);
        let mut tag = [0u8; TYPE_LEN];
        tag[..self.kind.tag().len()].copy_from_slice(self.kind.tag());
        out.extend_from_slice(&tag);
        out.extend_from_slice(&(self.params.len() as u32).to_le_bytes());
        for param in &self.params {
            out.extend_from_slice(&(param.len() as u32).to_le_bytes());
            out.extend_from_slice(param.as_bytes());
        }
        if out.len() > MAX_SYS_MESSAGE_SIZE {
            return Err(Error::new(
                GenericErrorCode::MessageTooLarge,
                format!(
                    "system message of {} bytes exceeds {MAX_SYS_MESSAGE_SIZE}",
                    out.len()
                ),
            ));
        }
        Ok(out)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut reader = Reader { data, pos: 0 };
        let kind = SysMessageType::from_tag(reader.take(TYPE_LEN)?)
            .ok_or_else(|| malformed("unknown system message type"))?;
        let count = reader.u32()?;
        let mut params = Vec::new();
        for _ in 0..count {
            let len = reader.u32()? as usize;
            let bytes = reader.take(len)?;
            let param = std::str::from_utf8(bytes)
                .map_err(|_| malformed("parameter is not UTF-8"))?;
            params.push(param.to_string());
        }
        Ok(Self { kind, params })
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| malformed("truncated system message"))?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u32(&mut self) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(raw))
    }
}

fn malformed(reason: &str) -> Error {
    Error::new(IpcErrorCode::CommunicationFailure, reason)
}
