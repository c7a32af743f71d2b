//! Buffered wire-format encoder.
//!
//! [`CodedWriter`] writes into either a fixed-size caller-provided slice
//! (which fails with `OutOfSpace` when exhausted) or a [`Write`] sink
//! through a bounded internal buffer that is flushed whenever it fills.

use super::wire::{
    make_tag, message_set, varint32_size, zigzag_encode32, zigzag_encode64, WireType,
    MAX_VARINT_BYTES,
};
use crate::error::{Error, Result};
use crate::message::MessageLite;
use std::fmt;
use std::io::Write;
use std::ops::{Deref, DerefMut};

/// Default internal buffer size for stream output
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

enum Buffer<'a> {
    Borrowed(&'a mut [u8]),
    Owned(Box<[u8]>),
}

impl Deref for Buffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Buffer::Borrowed(buf) => buf,
            Buffer::Owned(buf) => buf,
        }
    }
}

impl DerefMut for Buffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match self {
            Buffer::Borrowed(buf) => buf,
            Buffer::Owned(buf) => buf,
        }
    }
}

/// Wire-format encoder over a fixed slice or a stream
pub struct CodedWriter<'a> {
    buffer: Buffer<'a>,
    position: usize,
    output: Option<Box<dyn Write + 'a>>,
    /// Bytes already handed to `output`
    flushed: usize,
}

impl fmt::Debug for CodedWriter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodedWriter")
            .field("capacity", &self.buffer.len())
            .field("position", &self.position)
            .field("streaming", &self.output.is_some())
            .field("flushed", &self.flushed)
            .finish()
    }
}

impl<'a> CodedWriter<'a> {
    /// Creates a writer that buffers into `output`
    pub fn new(output: impl Write + 'a) -> Self {
        Self::with_buffer_size(output, DEFAULT_BUFFER_SIZE)
    }

    /// Creates a stream writer with a custom buffer size
    pub fn with_buffer_size(output: impl Write + 'a, size: usize) -> Self {
        Self {
            buffer: Buffer::Owned(vec![0; size.max(1)].into_boxed_slice()),
            position: 0,
            output: Some(Box::new(output)),
            flushed: 0,
        }
    }

    /// Creates a writer over a fixed-capacity slice
    pub fn for_slice(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer: Buffer::Borrowed(buffer),
            position: 0,
            output: None,
            flushed: 0,
        }
    }

    /// Total bytes written so far, flushed or not
    pub fn total_written(&self) -> usize {
        self.flushed + self.position
    }

    /// Remaining capacity of a fixed-slice writer; `None` for streams
    pub fn space_left(&self) -> Option<usize> {
        match self.output {
            Some(_) => None,
            None => Some(self.buffer.len() - self.position),
        }
    }

    /// Verifies that a fixed-slice writer filled its buffer exactly.
    ///
    /// Serialization sizes are computed ahead of emission; a gap here means
    /// the two disagreed.
    pub fn check_no_space_left(&self) -> Result<()> {
        match self.space_left() {
            Some(0) | None => Ok(()),
            Some(remaining) => Err(Error::SizeMismatch {
                capacity: self.buffer.len(),
                remaining,
            }),
        }
    }

    /// Writes buffered bytes to the sink and flushes it
    pub fn flush(&mut self) -> Result<()> {
        if self.output.is_some() {
            self.refresh_buffer()?;
            if let Some(output) = self.output.as_mut() {
                output.flush()?;
            }
        }
        Ok(())
    }

    fn refresh_buffer(&mut self) -> Result<()> {
        let Some(output) = self.output.as_mut() else {
            return Err(Error::OutOfSpace {
                capacity: self.buffer.len(),
            });
        };
        output.write_all(&self.buffer[..self.position])?;
        self.flushed += self.position;
        self.position = 0;
        Ok(())
    }

    /// Writes a single byte
    #[inline]
    pub fn write_raw_byte(&mut self, byte: u8) -> Result<()> {
        if self.position == self.buffer.len() {
            self.refresh_buffer()?;
        }
        self.buffer[self.position] = byte;
        self.position += 1;
        Ok(())
    }

    /// Writes raw bytes, splitting across a flush when they don't fit
    pub fn write_raw_bytes(&mut self, data: &[u8]) -> Result<()> {
        let available = self.buffer.len() - self.position;
        if data.len() <= available {
            self.buffer[self.position..self.position + data.len()].copy_from_slice(data);
            self.position += data.len();
            return Ok(());
        }

        let (head, rest) = data.split_at(available);
        self.buffer[self.position..].copy_from_slice(head);
        self.position += available;
        self.refresh_buffer()?;

        if rest.len() <= self.buffer.len() {
            self.buffer[..rest.len()].copy_from_slice(rest);
            self.position = rest.len();
        } else if let Some(output) = self.output.as_mut() {
            output.write_all(rest)?;
            self.flushed += rest.len();
        }
        Ok(())
    }

    /// Writes a varint of up to 32 bits
    #[inline]
    pub fn write_raw_varint32(&mut self, value: u32) -> Result<()> {
        self.write_raw_varint64(value as u64)
    }

    /// Writes a varint of up to 64 bits
    pub fn write_raw_varint64(&mut self, mut value: u64) -> Result<()> {
        let mut buf = [0u8; MAX_VARINT_BYTES];
        let mut len = 0;
        loop {
            if value < 0x80 {
                buf[len] = value as u8;
                len += 1;
                break;
            }
            buf[len] = (value as u8 & 0x7F) | 0x80;
            len += 1;
            value >>= 7;
        }
        self.write_raw_bytes(&buf[..len])
    }

    /// Writes a 32-bit little-endian value
    pub fn write_raw_little_endian32(&mut self, value: u32) -> Result<()> {
        self.write_raw_bytes(&value.to_le_bytes())
    }

    /// Writes a 64-bit little-endian value
    pub fn write_raw_little_endian64(&mut self, value: u64) -> Result<()> {
        self.write_raw_bytes(&value.to_le_bytes())
    }

    /// Writes a field tag
    pub fn write_tag(&mut self, field_number: u32, wire_type: WireType) -> Result<()> {
        self.write_raw_varint32(make_tag(field_number, wire_type))
    }

    /// Writes a `double` value
    pub fn write_double_no_tag(&mut self, value: f64) -> Result<()> {
        self.write_raw_little_endian64(value.to_bits())
    }

    /// Writes a `float` value
    pub fn write_float_no_tag(&mut self, value: f32) -> Result<()> {
        self.write_raw_little_endian32(value.to_bits())
    }

    /// Writes a `uint64` value
    pub fn write_uint64_no_tag(&mut self, value: u64) -> Result<()> {
        self.write_raw_varint64(value)
    }

    /// Writes an `int64` value
    pub fn write_int64_no_tag(&mut self, value: i64) -> Result<()> {
        self.write_raw_varint64(value as u64)
    }

    /// Writes an `int32` value; negatives are sign-extended to ten bytes
    pub fn write_int32_no_tag(&mut self, value: i32) -> Result<()> {
        if value >= 0 {
            self.write_raw_varint32(value as u32)
        } else {
            self.write_raw_varint64(value as i64 as u64)
        }
    }

    /// Writes a `fixed64` value
    pub fn write_fixed64_no_tag(&mut self, value: u64) -> Result<()> {
        self.write_raw_little_endian64(value)
    }

    /// Writes a `fixed32` value
    pub fn write_fixed32_no_tag(&mut self, value: u32) -> Result<()> {
        self.write_raw_little_endian32(value)
    }

    /// Writes a `bool` value
    pub fn write_bool_no_tag(&mut self, value: bool) -> Result<()> {
        self.write_raw_byte(value as u8)
    }

    /// Writes a length-prefixed string
    pub fn write_string_no_tag(&mut self, value: &str) -> Result<()> {
        self.write_bytes_no_tag(value.as_bytes())
    }

    /// Writes a length-prefixed byte string
    pub fn write_bytes_no_tag(&mut self, value: &[u8]) -> Result<()> {
        self.write_raw_varint32(value.len() as u32)?;
        self.write_raw_bytes(value)
    }

    /// Writes a `uint32` value
    pub fn write_uint32_no_tag(&mut self, value: u32) -> Result<()> {
        self.write_raw_varint32(value)
    }

    /// Writes an enum value by number
    pub fn write_enum_no_tag(&mut self, value: i32) -> Result<()> {
        self.write_int32_no_tag(value)
    }

    /// Writes an `sfixed32` value
    pub fn write_sfixed32_no_tag(&mut self, value: i32) -> Result<()> {
        self.write_raw_little_endian32(value as u32)
    }

    /// Writes an `sfixed64` value
    pub fn write_sfixed64_no_tag(&mut self, value: i64) -> Result<()> {
        self.write_raw_little_endian64(value as u64)
    }

    /// Writes an `sint32` value
    pub fn write_sint32_no_tag(&mut self, value: i32) -> Result<()> {
        self.write_raw_varint32(zigzag_encode32(value))
    }

    /// Writes an `sint64` value
    pub fn write_sint64_no_tag(&mut self, value: i64) -> Result<()> {
        self.write_raw_varint64(zigzag_encode64(value))
    }

    /// Writes a length prefix and the message body
    pub fn write_message_no_tag<M: MessageLite + ?Sized>(&mut self, message: &M) -> Result<()> {
        self.write_raw_varint32(message.serialized_size() as u32)?;
        message.write_to(self)
    }

    /// Writes a group body; the caller supplies the surrounding tags
    pub fn write_group_no_tag<M: MessageLite + ?Sized>(&mut self, message: &M) -> Result<()> {
        message.write_to(self)
    }

    /// Writes a `double` field
    pub fn write_double(&mut self, field_number: u32, value: f64) -> Result<()> {
        self.write_tag(field_number, WireType::Fixed64)?;
        self.write_double_no_tag(value)
    }

    /// Writes a `float` field
    pub fn write_float(&mut self, field_number: u32, value: f32) -> Result<()> {
        self.write_tag(field_number, WireType::Fixed32)?;
        self.write_float_no_tag(value)
    }

    /// Writes a `uint64` field
    pub fn write_uint64(&mut self, field_number: u32, value: u64) -> Result<()> {
        self.write_tag(field_number, WireType::Varint)?;
        self.write_uint64_no_tag(value)
    }

    /// Writes an `int64` field
    pub fn write_int64(&mut self, field_number: u32, value: i64) -> Result<()> {
        self.write_tag(field_number, WireType::Varint)?;
        self.write_int64_no_tag(value)
    }

    /// Writes an `int32` field
    pub fn write_int32(&mut self, field_number: u32, value: i32) -> Result<()> {
        self.write_tag(field_number, WireType::Varint)?;
        self.write_int32_no_tag(value)
    }

    /// Writes a `fixed64` field
    pub fn write_fixed64(&mut self, field_number: u32, value: u64) -> Result<()> {
        self.write_tag(field_number, WireType::Fixed64)?;
        self.write_fixed64_no_tag(value)
    }

    /// Writes a `fixed32` field
    pub fn write_fixed32(&mut self, field_number: u32, value: u32) -> Result<()> {
        self.write_tag(field_number, WireType::Fixed32)?;
        self.write_fixed32_no_tag(value)
    }

    /// Writes a `bool` field
    pub fn write_bool(&mut self, field_number: u32, value: bool) -> Result<()> {
        self.write_tag(field_number, WireType::Varint)?;
        self.write_bool_no_tag(value)
    }

    /// Writes a `string` field
    pub fn write_string(&mut self, field_number: u32, value: &str) -> Result<()> {
        self.write_tag(field_number, WireType::LengthDelimited)?;
        self.write_string_no_tag(value)
    }

    /// Writes a `bytes` field
    pub fn write_bytes(&mut self, field_number: u32, value: &[u8]) -> Result<()> {
        self.write_tag(field_number, WireType::LengthDelimited)?;
        self.write_bytes_no_tag(value)
    }

    /// Writes a `uint32` field
    pub fn write_uint32(&mut self, field_number: u32, value: u32) -> Result<()> {
        self.write_tag(field_number, WireType::Varint)?;
        self.write_uint32_no_tag(value)
    }

    /// Writes an enum field
    pub fn write_enum(&mut self, field_number: u32, value: i32) -> Result<()> {
        self.write_tag(field_number, WireType::Varint)?;
        self.write_enum_no_tag(value)
    }

    /// Writes an `sfixed32` field
    pub fn write_sfixed32(&mut self, field_number: u32, value: i32) -> Result<()> {
        self.write_tag(field_number, WireType::Fixed32)?;
        self.write_sfixed32_no_tag(value)
    }

    /// Writes an `sfixed64` field
    pub fn write_sfixed64(&mut self, field_number: u32, value: i64) -> Result<()> {
        self.write_tag(field_number, WireType::Fixed64)?;
        self.write_sfixed64_no_tag(value)
    }

    /// Writes an `sint32` field
    pub fn write_sint32(&mut self, field_number: u32, value: i32) -> Result<()> {
        self.write_tag(field_number, WireType::Varint)?;
        self.write_sint32_no_tag(value)
    }

    /// Writes an `sint64` field
    pub fn write_sint64(&mut self, field_number: u32, value: i64) -> Result<()> {
        self.write_tag(field_number, WireType::Varint)?;
        self.write_sint64_no_tag(value)
    }

    /// Writes an embedded message field with its precomputed length
    pub fn write_message<M: MessageLite + ?Sized>(
        &mut self,
        field_number: u32,
        message: &M,
    ) -> Result<()> {
        self.write_tag(field_number, WireType::LengthDelimited)?;
        self.write_message_no_tag(message)
    }

    /// Writes a group field: start tag, unframed body, end tag
    pub fn write_group<M: MessageLite + ?Sized>(
        &mut self,
        field_number: u32,
        message: &M,
    ) -> Result<()> {
        self.write_tag(field_number, WireType::StartGroup)?;
        self.write_group_no_tag(message)?;
        self.write_tag(field_number, WireType::EndGroup)
    }

    /// Writes a repeated scalar field as one packed block.
    ///
    /// `size_of` must return the encoded size of a single value so the block
    /// length can be written before the values.
    pub fn write_packed<T, S, W>(
        &mut self,
        field_number: u32,
        values: &[T],
        size_of: S,
        mut write: W,
    ) -> Result<()>
    where
        S: Fn(&T) -> usize,
        W: FnMut(&mut Self, &T) -> Result<()>,
    {
        if values.is_empty() {
            return Ok(());
        }
        let data_size: usize = values.iter().map(size_of).sum();
        self.write_tag(field_number, WireType::LengthDelimited)?;
        self.write_raw_varint32(data_size as u32)?;
        for value in values {
            write(self, value)?;
        }
        Ok(())
    }

    /// Writes an extension in the legacy message-set item layout
    pub fn write_message_set_extension<M: MessageLite + ?Sized>(
        &mut self,
        field_number: u32,
        message: &M,
    ) -> Result<()> {
        self.write_tag(message_set::ITEM, WireType::StartGroup)?;
        self.write_uint32(message_set::TYPE_ID, field_number)?;
        self.write_message(message_set::MESSAGE, message)?;
        self.write_tag(message_set::ITEM, WireType::EndGroup)
    }

    /// Writes an already-serialized payload as a message-set item
    pub fn write_raw_message_set_extension(
        &mut self,
        field_number: u32,
        payload: &[u8],
    ) -> Result<()> {
        self.write_tag(message_set::ITEM, WireType::StartGroup)?;
        self.write_uint32(message_set::TYPE_ID, field_number)?;
        self.write_bytes(message_set::MESSAGE, payload)?;
        self.write_tag(message_set::ITEM, WireType::EndGroup)
    }
}

/// Serializes `message` into a buffer of exactly its computed size
pub fn encode_to_vec<M: MessageLite + ?Sized>(message: &M) -> Result<Vec<u8>> {
    let mut buffer = vec![0u8; message.serialized_size()];
    let mut writer = CodedWriter::for_slice(&mut buffer);
    message.write_to(&mut writer)?;
    writer.check_no_space_left()?;
    drop(writer);
    Ok(buffer)
}

/// Encoded size of a message-set item carrying a payload of `payload_len` bytes
pub fn message_set_item_size(field_number: u32, payload_len: usize) -> usize {
    let tag = super::wire::tag_size(message_set::ITEM) * 2;
    let type_id = super::wire::tag_size(message_set::TYPE_ID) + varint32_size(field_number);
    let message = super::wire::tag_size(message_set::MESSAGE)
        + super::wire::length_delimited_size(payload_len);
    tag + type_id + message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::wire::{int32_size, varint64_size};

    fn encode(f: impl FnOnce(&mut CodedWriter<'_>) -> Result<()>) -> Vec<u8> {
        let mut out = Vec::new();
        {
            let mut writer = CodedWriter::new(&mut out);
            f(&mut writer).unwrap();
            writer.flush().unwrap();
        }
        out
    }

    #[test]
    fn test_tag_and_varint() {
        let bytes = encode(|w| w.write_int32(1, 300));
        assert_eq!(bytes, vec![0x08, 0xAC, 0x02]);
    }

    #[test]
    fn test_negative_int32_sign_extended() {
        let bytes = encode(|w| w.write_int32_no_tag(-1));
        assert_eq!(bytes.len(), int32_size(-1));
        assert_eq!(bytes, vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);
    }

    #[test]
    fn test_matches_prost_encoding() {
        let mut expected = Vec::new();
        prost::encoding::sint64::encode(3, &-42, &mut expected);
        prost::encoding::string::encode(4, &"hi".to_string(), &mut expected);
        prost::encoding::double::encode(5, &0.5, &mut expected);
        prost::encoding::sfixed32::encode(6, &-3, &mut expected);

        let bytes = encode(|w| {
            w.write_sint64(3, -42)?;
            w.write_string(4, "hi")?;
            w.write_double(5, 0.5)?;
            w.write_sfixed32(6, -3)
        });
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_packed_array() {
        let values = [1i32, 2, 3];
        let bytes = encode(|w| {
            w.write_packed(4, &values, |v| int32_size(*v), |w, v| w.write_int32_no_tag(*v))
        });
        assert_eq!(bytes, vec![0x22, 0x03, 0x01, 0x02, 0x03]);

        let mut expected = Vec::new();
        prost::encoding::int32::encode_packed(4, &values, &mut expected);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_empty_packed_writes_nothing() {
        let bytes = encode(|w| w.write_packed(4, &[] as &[u64], |v| varint64_size(*v), |w, v| w.write_uint64_no_tag(*v)));
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_fixed_slice_out_of_space() {
        let mut buf = [0u8; 2];
        let mut writer = CodedWriter::for_slice(&mut buf);
        assert!(matches!(
            writer.write_int32(1, 300),
            Err(Error::OutOfSpace { capacity: 2 })
        ));
    }

    #[test]
    fn test_check_no_space_left() {
        let mut buf = [0u8; 4];
        let mut writer = CodedWriter::for_slice(&mut buf);
        writer.write_int32(1, 300).unwrap();
        assert_eq!(writer.space_left(), Some(1));
        assert!(matches!(
            writer.check_no_space_left(),
            Err(Error::SizeMismatch { capacity: 4, remaining: 1 })
        ));
        writer.write_raw_byte(0).unwrap();
        assert!(writer.check_no_space_left().is_ok());
    }

    #[test]
    fn test_large_write_splits_across_flush() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(100).collect();
        let mut out = Vec::new();
        {
            let mut writer = CodedWriter::with_buffer_size(&mut out, 8);
            writer.write_raw_bytes(&[0xAA; 5]).unwrap();
            writer.write_raw_bytes(&payload).unwrap();
            writer.write_raw_bytes(&[0xBB; 6]).unwrap();
            assert_eq!(writer.total_written(), 111);
            writer.flush().unwrap();
        }
        assert_eq!(out.len(), 111);
        assert_eq!(&out[..5], &[0xAA; 5]);
        assert_eq!(&out[5..105], payload.as_slice());
        assert_eq!(&out[105..], &[0xBB; 6]);
    }

    #[test]
    fn test_raw_message_set_extension() {
        let bytes = encode(|w| w.write_raw_message_set_extension(100, b"xy"));
        assert_eq!(bytes.len(), message_set_item_size(100, 2));
        assert_eq!(
            bytes,
            vec![0x0B, 0x10, 0x64, 0x1A, 0x02, b'x', b'y', 0x0C]
        );
    }
}
