//! Ordered, typed message buffer ("blob").
//!
//! A blob is a flat sequence of fields with no schema and no tagging:
//! sender and receiver agree on field order and type per opcode.
//!
//! ```text
//! u32 / i32 / f32 : 4 bytes little-endian
//! string          : [u32 LE byte length][UTF-8 bytes]
//! ```
//!
//! Every wire message starts with two string fields, the destination plugin
//! name and the opcode, followed by the opcode payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::BlobError;

/// A primitive type that can be pushed to and extracted from a [`Blob`].
pub trait BlobField: Sized + Default {
    /// Name used in exhaustion errors.
    const TYPE_NAME: &'static str;

    /// Append the encoded field to `buf`.
    fn write_to(&self, buf: &mut BytesMut);

    /// Decode one field from the front of `src`, advancing it.
    fn read_from(src: &mut &[u8]) -> Result<Self, BlobError>;
}

impl BlobField for u32 {
    const TYPE_NAME: &'static str = "u32";

    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_u32_le(*self);
    }

    fn read_from(src: &mut &[u8]) -> Result<Self, BlobError> {
        if src.remaining() < 4 {
            return Err(BlobError::Exhausted { expected: Self::TYPE_NAME });
        }
        Ok(src.get_u32_le())
    }
}

impl BlobField for i32 {
    const TYPE_NAME: &'static str = "i32";

    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_i32_le(*self);
    }

    fn read_from(src: &mut &[u8]) -> Result<Self, BlobError> {
        if src.remaining() < 4 {
            return Err(BlobError::Exhausted { expected: Self::TYPE_NAME });
        }
        Ok(src.get_i32_le())
    }
}

impl BlobField for f32 {
    const TYPE_NAME: &'static str = "f32";

    fn write_to(&self, buf: &mut BytesMut) {
        buf.put_f32_le(*self);
    }

    fn read_from(src: &mut &[u8]) -> Result<Self, BlobError> {
        if src.remaining() < 4 {
            return Err(BlobError::Exhausted { expected: Self::TYPE_NAME });
        }
        Ok(src.get_f32_le())
    }
}

impl BlobField for String {
    const TYPE_NAME: &'static str = "string";

    fn write_to(&self, buf: &mut BytesMut) {
        write_str(buf, self);
    }

    fn read_from(src: &mut &[u8]) -> Result<Self, BlobError> {
        if src.remaining() < 4 {
            return Err(BlobError::Exhausted { expected: Self::TYPE_NAME });
        }
        let len = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if src.remaining() < 4 + len {
            return Err(BlobError::Exhausted { expected: Self::TYPE_NAME });
        }
        let text = std::str::from_utf8(&src[4..4 + len])
            .map_err(|_| BlobError::InvalidUtf8)?
            .to_owned();
        src.advance(4 + len);
        Ok(text)
    }
}

fn write_str(buf: &mut BytesMut, value: &str) {
    buf.put_u32_le(value.len() as u32);
    buf.put_slice(value.as_bytes());
}

/// Ordered push/extract byte buffer for one wire message.
#[derive(Clone, Default, PartialEq)]
pub struct Blob {
    data: BytesMut,
    read_pos: usize,
}

impl std::fmt::Debug for Blob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blob")
            .field("len", &self.data.len())
            .field("read_pos", &self.read_pos)
            .finish()
    }
}

impl Blob {
    /// Create an empty blob.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start an outbound message addressed to `plugin` with `opcode`.
    pub fn message(plugin: &str, opcode: &str) -> Self {
        let mut blob = Self::new();
        blob.push_str(plugin).push_str(opcode);
        blob
    }

    /// Wrap received bytes for extraction from the first field.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: BytesMut::from(bytes),
            read_pos: 0,
        }
    }

    /// Append a field.
    pub fn push<T: BlobField>(&mut self, value: T) -> &mut Self {
        value.write_to(&mut self.data);
        self
    }

    /// Append a string field without taking ownership.
    pub fn push_str(&mut self, value: &str) -> &mut Self {
        write_str(&mut self.data, value);
        self
    }

    /// Read the next field into `slot`.
    ///
    /// On failure `slot` is reset to its default, the read position is left
    /// untouched, and `false` is returned.
    pub fn extract<T: BlobField>(&mut self, slot: &mut T) -> bool {
        match self.take::<T>() {
            Ok(value) => {
                *slot = value;
                true
            }
            Err(_) => {
                *slot = T::default();
                false
            }
        }
    }

    /// Read the next field, failing when the buffer cannot supply it.
    pub fn take<T: BlobField>(&mut self) -> Result<T, BlobError> {
        let mut src = &self.data[self.read_pos..];
        let before = src.len();
        let value = T::read_from(&mut src)?;
        self.read_pos += before - src.len();
        Ok(value)
    }

    /// Fail when unread fields remain.
    pub fn ensure_consumed(&self) -> Result<(), BlobError> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(BlobError::TrailingBytes { remaining }),
        }
    }

    /// Unread byte count.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.read_pos
    }

    /// Total encoded length.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether no field was ever pushed.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Move the read position back to the first field.
    pub fn rewind(&mut self) {
        self.read_pos = 0;
    }

    /// The full encoded payload, independent of the read position.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Freeze into an immutable buffer.
    pub fn into_bytes(self) -> Bytes {
        self.data.freeze()
    }
}
