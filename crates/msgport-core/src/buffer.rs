use std::fmt;

use bytes::{Bytes, BytesMut};

/// Owned, resizable message body.
///
/// A buffer has exactly one owner at a time. Sends take it by value and move
/// it through the transport; receives fill a caller-owned buffer in place.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Buffer {
    inner: BytesMut,
}

impl Buffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a zero-filled buffer of `len` bytes.
    pub fn with_len(len: usize) -> Self {
        let mut inner = BytesMut::with_capacity(len);
        inner.resize(len, 0);
        Self { inner }
    }

    /// Create a buffer holding a copy of `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        Self {
            inner: BytesMut::from(data),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.inner
    }

    /// Resize to `len` bytes. New bytes are zeroed; existing bytes are kept.
    pub fn resize(&mut self, len: usize) {
        self.inner.resize(len, 0);
    }

    /// Replace the contents with a copy of `data`.
    pub fn assign(&mut self, data: &[u8]) {
        self.inner.clear();
        self.inner.extend_from_slice(data);
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Freeze into an immutable [`Bytes`] handle.
    pub fn freeze(self) -> Bytes {
        self.inner.freeze()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.inner.to_vec()
    }
}

impl AsRef<[u8]> for Buffer {
    fn as_ref(&self) -> &[u8] {
        &self.inner
    }
}

impl AsMut<[u8]> for Buffer {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.inner
    }
}

impl From<Vec<u8>> for Buffer {
    fn from(data: Vec<u8>) -> Self {
        Self {
            inner: BytesMut::from(Bytes::from(data)),
        }
    }
}

impl From<&[u8]> for Buffer {
    fn from(data: &[u8]) -> Self {
        Self::from_slice(data)
    }
}

impl From<&str> for Buffer {
    fn from(text: &str) -> Self {
        Self::from_slice(text.as_bytes())
    }
}

impl From<BytesMut> for Buffer {
    fn from(inner: BytesMut) -> Self {
        Self { inner }
    }
}

impl From<Bytes> for Buffer {
    fn from(bytes: Bytes) -> Self {
        Self {
            inner: BytesMut::from(bytes),
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.inner) {
            Ok(text) if text.len() <= 64 => f.debug_tuple("Buffer").field(&text).finish(),
            _ => f
                .debug_struct("Buffer")
                .field("len", &self.inner.len())
                .finish(),
        }
    }
}
