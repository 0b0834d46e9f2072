//! Cursors over a single inbound or outbound message.
//!
//! [`MessageReader`] consumes a message delivered by the transport and
//! [`MessageWriter`] accumulates one to be sent. Both are owned by exactly one
//! exchange and released when it ends, so a failing peer cannot leak them.

use bincode::{
    BorrowDecode,
    Encode,
    borrow_decode_from_slice,
    config,
    encode_to_vec,
    error::{DecodeError, EncodeError},
};
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FramingError, HandlerError};

/// Wrapper trait for typed payloads.
///
/// Any type deriving [`Encode`] and [`BorrowDecode`] implements this trait via
/// a blanket implementation using bincode's standard configuration.
pub trait Message: Encode + for<'de> BorrowDecode<'de, ()> {
    /// Serialize the message into a byte vector.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if serialization fails.
    fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> { encode_to_vec(self, config::standard()) }

    /// Deserialize a message from a byte slice, returning the message and
    /// the number of bytes consumed.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if deserialization fails.
    fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), DecodeError>
    where
        Self: Sized,
    {
        borrow_decode_from_slice(bytes, config::standard())
    }
}

impl<T> Message for T where for<'de> T: Encode + BorrowDecode<'de, ()> {}

/// Read cursor over one inbound message.
#[derive(Debug)]
pub struct MessageReader {
    buf: Bytes,
}

impl MessageReader {
    /// Wrap a complete inbound message.
    #[must_use]
    pub fn new(message: Bytes) -> Self { Self { buf: message } }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize { self.buf.remaining() }

    /// Returns true once every byte has been consumed.
    #[must_use]
    pub fn is_empty(&self) -> bool { !self.buf.has_remaining() }

    /// Look at the next byte without consuming it.
    #[must_use]
    pub fn peek_u8(&self) -> Option<u8> { self.buf.first().copied() }

    fn ensure(&self, needed: usize) -> Result<(), FramingError> {
        let remaining = self.buf.remaining();
        if remaining < needed {
            return Err(FramingError::Truncated { needed, remaining });
        }
        Ok(())
    }

    /// Read one byte.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Truncated`] at end of message.
    pub fn read_u8(&mut self) -> Result<u8, FramingError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a big-endian `u16`.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Truncated`] if fewer than two bytes remain.
    pub fn read_u16(&mut self) -> Result<u16, FramingError> {
        self.ensure(2)?;
        Ok(self.buf.get_u16())
    }

    /// Read a big-endian `u32`.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Truncated`] if fewer than four bytes remain.
    pub fn read_u32(&mut self) -> Result<u32, FramingError> {
        self.ensure(4)?;
        Ok(self.buf.get_u32())
    }

    /// Read exactly `len` bytes without copying.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Truncated`] if fewer than `len` bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes, FramingError> {
        self.ensure(len)?;
        Ok(self.buf.split_to(len))
    }

    /// Read a `u16` length-prefixed UTF-8 string.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Truncated`] or [`FramingError::InvalidUtf8`].
    pub fn read_string(&mut self) -> Result<String, FramingError> {
        let len = usize::from(self.read_u16()?);
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FramingError::InvalidUtf8)
    }

    /// Read a `u32` length-prefixed byte block.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::Truncated`] if the block is incomplete.
    pub fn read_block(&mut self) -> Result<Bytes, FramingError> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    /// Read a length-prefixed bincode message.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] if the block is truncated or cannot be
    /// decoded.
    pub fn read_message<M: Message>(&mut self) -> Result<M, HandlerError> {
        let block = self.read_block()?;
        let (message, _) = M::from_bytes(&block)?;
        Ok(message)
    }

    /// Consume `tag`, failing if another byte is present.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::UnexpectedField`] or
    /// [`FramingError::Truncated`].
    pub fn expect_tag(&mut self, tag: u8) -> Result<(), FramingError> {
        let actual = self.read_u8()?;
        if actual != tag {
            return Err(FramingError::UnexpectedField {
                expected: tag,
                actual,
            });
        }
        Ok(())
    }

    /// Consume the frame's end marker.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::MissingEndMarker`] if the next byte is absent
    /// or differs from `marker`.
    pub fn expect_end(&mut self, marker: u8) -> Result<(), FramingError> {
        match self.peek_u8() {
            Some(found) if found == marker => {
                self.buf.advance(1);
                Ok(())
            }
            found => Err(FramingError::MissingEndMarker {
                expected: marker,
                found,
            }),
        }
    }

    /// Discard everything left in the message, returning the count.
    pub fn drain(&mut self) -> usize {
        let discarded = self.buf.remaining();
        self.buf.advance(discarded);
        discarded
    }
}

/// Write buffer for one outbound message.
///
/// Nothing reaches the transport until the owning exchange hands the frozen
/// buffer over; dropping a writer discards its contents.
#[derive(Debug, Default)]
pub struct MessageWriter {
    buf: BytesMut,
}

impl MessageWriter {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Number of bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize { self.buf.len() }

    /// Returns true if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }

    /// Drop everything written after the first `len` bytes.
    pub fn truncate(&mut self, len: usize) { self.buf.truncate(len); }

    /// Write one byte.
    pub fn write_u8(&mut self, value: u8) { self.buf.put_u8(value); }

    /// Write a big-endian `u16`.
    pub fn write_u16(&mut self, value: u16) { self.buf.put_u16(value); }

    /// Write a big-endian `u32`.
    pub fn write_u32(&mut self, value: u32) { self.buf.put_u32(value); }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) { self.buf.put_slice(bytes); }

    /// Write a `u16` length-prefixed UTF-8 string.
    ///
    /// Strings longer than `u16::MAX` bytes are cut at the last character
    /// boundary that fits.
    pub fn write_string(&mut self, value: &str) {
        let mut end = value.len().min(usize::from(u16::MAX));
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        let bytes = &value.as_bytes()[..end];
        self.write_u16(u16::try_from(bytes.len()).unwrap_or(u16::MAX));
        self.write_bytes(bytes);
    }

    /// Write a `u32` length-prefixed byte block.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] if the block exceeds `u32::MAX` bytes.
    pub fn write_block(&mut self, bytes: &[u8]) -> Result<(), HandlerError> {
        let len = u32::try_from(bytes.len())
            .map_err(|_| HandlerError::new("payload block exceeds u32::MAX bytes"))?;
        self.write_u32(len);
        self.write_bytes(bytes);
        Ok(())
    }

    /// Write a length-prefixed bincode message.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] if encoding fails.
    pub fn write_message<M: Message>(&mut self, message: &M) -> Result<(), HandlerError> {
        let bytes = message.to_bytes()?;
        self.write_block(&bytes)
    }

    /// Finish the message, yielding its bytes.
    #[must_use]
    pub fn freeze(self) -> Bytes { self.buf.freeze() }
}
