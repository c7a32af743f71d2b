//! Buffered wire-format decoder.
//!
//! [`CodedReader`] reads tags and primitive values from either an in-memory
//! slice or a pull-based [`Read`] stream. It enforces two guards against
//! hostile input: a total size limit (bounding memory) and a recursion limit
//! (bounding stack depth for nested messages and groups).

use super::wire::{
    zigzag_decode32, zigzag_decode64, Tag, WireType, MAX_VARINT_BYTES,
};
use crate::error::{Error, Result};
use bytes::Bytes;
use std::borrow::Cow;
use std::fmt;
use std::io::{ErrorKind, Read};
use tracing::{debug, trace};

/// Default total size limit: 64 MiB
pub const DEFAULT_SIZE_LIMIT: usize = 64 << 20;

/// Default nesting limit for messages and groups
pub const DEFAULT_RECURSION_LIMIT: usize = 64;

/// Default internal buffer size for stream input
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

/// Upper bound on speculative allocation for large length-delimited values
const MAX_PREALLOC: usize = 64 * 1024;

/// No limit pushed
const NO_LIMIT: usize = usize::MAX;

/// Configuration for a [`CodedReader`]
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Maximum number of bytes read from a stream before failing
    pub size_limit: usize,
    /// Maximum nesting depth of messages and groups
    pub recursion_limit: usize,
    /// Internal buffer size used for stream input
    pub buffer_size: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            size_limit: DEFAULT_SIZE_LIMIT,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl ReaderConfig {
    /// Creates a new reader config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the total size limit
    pub fn size_limit(mut self, limit: usize) -> Self {
        self.size_limit = limit;
        self
    }

    /// Sets the recursion limit
    pub fn recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Sets the stream buffer size
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }
}

/// Wire-format decoder over a slice or a stream
pub struct CodedReader<'a> {
    buffer: Cow<'a, [u8]>,
    /// Readable bytes in `buffer`, excluding anything past the current limit
    buffer_size: usize,
    buffer_size_after_limit: usize,
    buffer_pos: usize,
    input: Option<Box<dyn Read + 'a>>,
    /// Bytes consumed by buffers that have since been replaced
    total_bytes_retired: usize,
    /// Absolute position where the size counter was last reset
    size_counter_base: usize,
    /// Absolute end of the current length-delimited region
    current_limit: usize,
    last_tag: Option<Tag>,
    /// One-tag lookahead filled by `peek_tag`
    next_tag: Option<Tag>,
    recursion_depth: usize,
    recursion_limit: usize,
    size_limit: usize,
}

impl fmt::Debug for CodedReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodedReader")
            .field("position", &self.position())
            .field("streaming", &self.input.is_some())
            .field("current_limit", &self.bytes_until_limit())
            .field("last_tag", &self.last_tag)
            .field("recursion_depth", &self.recursion_depth)
            .finish()
    }
}

impl<'a> CodedReader<'a> {
    /// Creates a reader over an in-memory byte slice
    pub fn new(data: &'a [u8]) -> Self {
        let config = ReaderConfig::default();
        Self {
            buffer_size: data.len(),
            buffer: Cow::Borrowed(data),
            buffer_size_after_limit: 0,
            buffer_pos: 0,
            input: None,
            total_bytes_retired: 0,
            size_counter_base: 0,
            current_limit: NO_LIMIT,
            last_tag: None,
            next_tag: None,
            recursion_depth: 0,
            recursion_limit: config.recursion_limit,
            size_limit: config.size_limit,
        }
    }

    /// Creates a reader that pulls from a stream through an internal buffer
    pub fn from_stream(input: impl Read + 'a) -> Self {
        Self::from_stream_with_config(input, ReaderConfig::default())
    }

    /// Creates a stream reader whose buffer is `config.buffer_size` bytes
    pub fn from_stream_with_config(input: impl Read + 'a, config: ReaderConfig) -> Self {
        Self {
            buffer: Cow::Owned(vec![0; config.buffer_size]),
            buffer_size: 0,
            buffer_size_after_limit: 0,
            buffer_pos: 0,
            input: Some(Box::new(input)),
            total_bytes_retired: 0,
            size_counter_base: 0,
            current_limit: NO_LIMIT,
            last_tag: None,
            next_tag: None,
            recursion_depth: 0,
            recursion_limit: config.recursion_limit,
            size_limit: config.size_limit,
        }
    }

    /// Applies the size and recursion limits of `config`.
    ///
    /// The buffer is fixed at construction; stream readers take their buffer
    /// size from [`CodedReader::from_stream_with_config`].
    pub fn with_config(mut self, config: ReaderConfig) -> Self {
        self.size_limit = config.size_limit;
        self.recursion_limit = config.recursion_limit;
        self
    }

    /// Sets the maximum total size, returning the previous limit
    pub fn set_size_limit(&mut self, limit: usize) -> usize {
        std::mem::replace(&mut self.size_limit, limit)
    }

    /// Sets the maximum nesting depth, returning the previous limit
    pub fn set_recursion_limit(&mut self, limit: usize) -> usize {
        std::mem::replace(&mut self.recursion_limit, limit)
    }

    /// Restarts the size-limit accounting from the current position.
    ///
    /// Used when one stream carries many independent messages.
    pub fn reset_size_counter(&mut self) {
        self.size_counter_base = self.position();
    }

    /// Absolute number of bytes consumed so far
    pub fn position(&self) -> usize {
        self.total_bytes_retired + self.buffer_pos
    }

    /// The last tag returned by [`read_tag`](Self::read_tag); `None` after end of input
    pub fn last_tag(&self) -> Option<Tag> {
        self.last_tag
    }

    /// Current nesting depth
    pub fn recursion_depth(&self) -> usize {
        self.recursion_depth
    }

    /// Configured maximum nesting depth
    pub fn recursion_limit(&self) -> usize {
        self.recursion_limit
    }

    /// Restricts reading to the next `byte_limit` bytes, returning the
    /// previous limit for [`pop_limit`](Self::pop_limit)
    pub fn push_limit(&mut self, byte_limit: usize) -> Result<usize> {
        let position = self.position();
        let new_limit = position
            .checked_add(byte_limit)
            .ok_or_else(|| Error::truncated(position))?;
        let old_limit = self.current_limit;
        if new_limit > old_limit {
            return Err(Error::truncated(position));
        }
        self.current_limit = new_limit;
        self.recompute_buffer_size_after_limit();
        Ok(old_limit)
    }

    /// Restores a limit returned by [`push_limit`](Self::push_limit)
    pub fn pop_limit(&mut self, old_limit: usize) {
        self.current_limit = old_limit;
        self.recompute_buffer_size_after_limit();
    }

    /// Bytes left before the current limit, or `None` when no limit is set
    pub fn bytes_until_limit(&self) -> Option<usize> {
        if self.current_limit == NO_LIMIT {
            None
        } else {
            Some(self.current_limit - self.position())
        }
    }

    /// Returns true when the current limit has been reached
    pub fn reached_limit(&self) -> bool {
        self.bytes_until_limit() == Some(0)
    }

    /// Returns true at end of input or at the current limit
    pub fn is_at_end(&mut self) -> Result<bool> {
        Ok(self.buffer_pos == self.buffer_size && !self.refill_buffer(false)?)
    }

    fn recompute_buffer_size_after_limit(&mut self) {
        self.buffer_size += self.buffer_size_after_limit;
        let buffer_end = self.total_bytes_retired + self.buffer_size;
        if buffer_end > self.current_limit {
            self.buffer_size_after_limit = buffer_end - self.current_limit;
            self.buffer_size -= self.buffer_size_after_limit;
        } else {
            self.buffer_size_after_limit = 0;
        }
    }

    /// Replaces the exhausted buffer with fresh stream data.
    ///
    /// Returns `Ok(false)` at end of input or at the current limit, or fails
    /// with `TruncatedMessage` when `must_succeed` is set.
    fn refill_buffer(&mut self, must_succeed: bool) -> Result<bool> {
        debug_assert_eq!(self.buffer_pos, self.buffer_size);

        let position = self.position();
        if self.total_bytes_retired + self.buffer_size == self.current_limit {
            return if must_succeed {
                Err(Error::truncated(position))
            } else {
                Ok(false)
            };
        }

        self.total_bytes_retired += self.buffer_size;
        self.buffer_pos = 0;
        self.buffer_size = 0;

        if let Some(input) = self.input.as_mut() {
            let buf = self.buffer.to_mut();
            self.buffer_size = loop {
                match input.read(buf) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e.into()),
                }
            };
        }

        if self.buffer_size == 0 {
            return if must_succeed {
                Err(Error::truncated(position))
            } else {
                Ok(false)
            };
        }

        self.recompute_buffer_size_after_limit();
        let total_bytes_read = self.total_bytes_retired + self.buffer_size
            + self.buffer_size_after_limit
            - self.size_counter_base;
        if total_bytes_read > self.size_limit {
            debug!(
                "size limit of {} bytes exceeded after {} bytes",
                self.size_limit, total_bytes_read
            );
            return Err(Error::SizeLimitExceeded {
                limit: self.size_limit,
            });
        }
        Ok(true)
    }

    /// Reads a single byte
    #[inline]
    pub fn read_raw_byte(&mut self) -> Result<u8> {
        if self.buffer_pos == self.buffer_size {
            self.refill_buffer(true)?;
        }
        let byte = self.buffer[self.buffer_pos];
        self.buffer_pos += 1;
        Ok(byte)
    }

    /// Reads a varint and truncates it to 32 bits.
    ///
    /// Values encoded with up to ten bytes are accepted so that negative
    /// `int32`s and wider future types decode; the high bits are discarded.
    pub fn read_raw_varint32(&mut self) -> Result<u32> {
        let start = self.position();
        let mut result: u32 = 0;

        if self.buffer_pos + 5 <= self.buffer_size {
            let window = &self.buffer[self.buffer_pos..self.buffer_pos + 5];
            for (i, &byte) in window.iter().enumerate() {
                result |= ((byte & 0x7F) as u32) << (7 * i);
                if byte < 0x80 {
                    self.buffer_pos += i + 1;
                    return Ok(result);
                }
            }
            self.buffer_pos += 5;
        } else {
            for i in 0..5 {
                let byte = self.read_raw_byte()?;
                result |= ((byte & 0x7F) as u32) << (7 * i);
                if byte < 0x80 {
                    return Ok(result);
                }
            }
        }

        // Discard the upper 32 bits
        for _ in 5..MAX_VARINT_BYTES {
            if self.read_raw_byte()? < 0x80 {
                return Ok(result);
            }
        }
        Err(Error::malformed_varint(start))
    }

    /// Reads a varint of up to 64 bits
    pub fn read_raw_varint64(&mut self) -> Result<u64> {
        let start = self.position();
        let mut result: u64 = 0;

        if self.buffer_pos + MAX_VARINT_BYTES <= self.buffer_size {
            let window = &self.buffer[self.buffer_pos..self.buffer_pos + MAX_VARINT_BYTES];
            for (i, &byte) in window.iter().enumerate() {
                result |= ((byte & 0x7F) as u64) << (7 * i);
                if byte < 0x80 {
                    self.buffer_pos += i + 1;
                    return Ok(result);
                }
            }
            self.buffer_pos += MAX_VARINT_BYTES;
        } else {
            for i in 0..MAX_VARINT_BYTES {
                let byte = self.read_raw_byte()?;
                result |= ((byte & 0x7F) as u64) << (7 * i);
                if byte < 0x80 {
                    return Ok(result);
                }
            }
        }
        Err(Error::malformed_varint(start))
    }

    /// Reads a 32-bit little-endian value
    pub fn read_raw_little_endian32(&mut self) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.read_raw_into(&mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// Reads a 64-bit little-endian value
    pub fn read_raw_little_endian64(&mut self) -> Result<u64> {
        let mut bytes = [0u8; 8];
        self.read_raw_into(&mut bytes)?;
        Ok(u64::from_le_bytes(bytes))
    }

    fn read_raw_into(&mut self, out: &mut [u8]) -> Result<()> {
        let n = out.len();
        if self.buffer_pos + n <= self.buffer_size {
            out.copy_from_slice(&self.buffer[self.buffer_pos..self.buffer_pos + n]);
            self.buffer_pos += n;
        } else {
            for slot in out.iter_mut() {
                *slot = self.read_raw_byte()?;
            }
        }
        Ok(())
    }

    /// Reads exactly `n` raw bytes
    pub fn read_raw_bytes(&mut self, n: usize) -> Result<Vec<u8>> {
        let start = self.position();
        if n <= self.buffer_size - self.buffer_pos {
            let bytes = self.buffer[self.buffer_pos..self.buffer_pos + n].to_vec();
            self.buffer_pos += n;
            return Ok(bytes);
        }
        if self.current_limit != NO_LIMIT && start + n > self.current_limit {
            return Err(Error::truncated(start));
        }

        let mut out = Vec::with_capacity(n.min(MAX_PREALLOC));
        while out.len() < n {
            if self.buffer_pos == self.buffer_size {
                self.refill_buffer(true)?;
            }
            let take = (n - out.len()).min(self.buffer_size - self.buffer_pos);
            out.extend_from_slice(&self.buffer[self.buffer_pos..self.buffer_pos + take]);
            self.buffer_pos += take;
        }
        Ok(out)
    }

    /// Discards exactly `n` raw bytes
    pub fn skip_raw_bytes(&mut self, n: usize) -> Result<()> {
        let start = self.position();
        if self.current_limit != NO_LIMIT && start + n > self.current_limit {
            return Err(Error::truncated(start));
        }

        let mut remaining = n;
        loop {
            let take = remaining.min(self.buffer_size - self.buffer_pos);
            self.buffer_pos += take;
            remaining -= take;
            if remaining == 0 {
                return Ok(());
            }
            self.refill_buffer(true)?;
        }
    }

    /// Reads a length prefix, rejecting negative values
    pub fn read_length(&mut self) -> Result<usize> {
        let offset = self.position();
        let size = self.read_raw_varint32()? as i32;
        if size < 0 {
            return Err(Error::NegativeSize { offset, size });
        }
        Ok(size as usize)
    }

    /// Reads the next field tag.
    ///
    /// Returns `None` at end of input or at the current limit. A tag whose
    /// value or field number is zero fails with `InvalidTag`.
    pub fn read_tag(&mut self) -> Result<Option<Tag>> {
        if let Some(tag) = self.next_tag.take() {
            self.last_tag = Some(tag);
            return Ok(Some(tag));
        }

        if self.is_at_end()? {
            self.last_tag = None;
            return Ok(None);
        }

        let offset = self.position();
        let raw = self.read_raw_varint32()?;
        let tag = Tag::from_raw(raw, offset)?;
        self.last_tag = Some(tag);
        Ok(Some(tag))
    }

    /// Returns the next tag without consuming it.
    ///
    /// The peeked tag is handed out again by the following `read_tag`.
    /// `last_tag` is not affected, so `skip_field` still refers to the field
    /// most recently read.
    pub fn peek_tag(&mut self) -> Result<Option<Tag>> {
        if let Some(tag) = self.next_tag {
            return Ok(Some(tag));
        }
        let saved = self.last_tag;
        let tag = self.read_tag()?;
        self.next_tag = tag;
        self.last_tag = saved;
        Ok(tag)
    }

    /// Verifies how the last merge loop ended: at end of input (`None`) or
    /// at the end-group tag of field `expected`
    pub fn check_last_tag_was(&self, expected: Option<u32>) -> Result<()> {
        let found = self.last_tag.map(|tag| tag.field_number());
        let matches = match (expected, self.last_tag) {
            (None, None) => true,
            (Some(number), Some(tag)) => {
                tag.field_number() == number && tag.wire_type() == WireType::EndGroup
            }
            _ => false,
        };
        if matches {
            Ok(())
        } else {
            Err(Error::invalid_end_tag(self.position(), expected, found))
        }
    }

    /// Reads a `double` field value
    pub fn read_double(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_raw_little_endian64()?))
    }

    /// Reads a `float` field value
    pub fn read_float(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_raw_little_endian32()?))
    }

    /// Reads a `uint64` field value
    pub fn read_uint64(&mut self) -> Result<u64> {
        self.read_raw_varint64()
    }

    /// Reads an `int64` field value
    pub fn read_int64(&mut self) -> Result<i64> {
        Ok(self.read_raw_varint64()? as i64)
    }

    /// Reads an `int32` field value
    pub fn read_int32(&mut self) -> Result<i32> {
        Ok(self.read_raw_varint32()? as i32)
    }

    /// Reads a `fixed64` field value
    pub fn read_fixed64(&mut self) -> Result<u64> {
        self.read_raw_little_endian64()
    }

    /// Reads a `fixed32` field value
    pub fn read_fixed32(&mut self) -> Result<u32> {
        self.read_raw_little_endian32()
    }

    /// Reads a `bool` field value
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_raw_varint64()? != 0)
    }

    /// Reads a `uint32` field value
    pub fn read_uint32(&mut self) -> Result<u32> {
        self.read_raw_varint32()
    }

    /// Reads an enum field value as its number
    pub fn read_enum(&mut self) -> Result<i32> {
        Ok(self.read_raw_varint32()? as i32)
    }

    /// Reads an `sfixed32` field value
    pub fn read_sfixed32(&mut self) -> Result<i32> {
        Ok(self.read_raw_little_endian32()? as i32)
    }

    /// Reads an `sfixed64` field value
    pub fn read_sfixed64(&mut self) -> Result<i64> {
        Ok(self.read_raw_little_endian64()? as i64)
    }

    /// Reads an `sint32` field value
    pub fn read_sint32(&mut self) -> Result<i32> {
        Ok(zigzag_decode32(self.read_raw_varint32()?))
    }

    /// Reads an `sint64` field value
    pub fn read_sint64(&mut self) -> Result<i64> {
        Ok(zigzag_decode64(self.read_raw_varint64()?))
    }

    /// Reads a length-prefixed UTF-8 string
    pub fn read_string(&mut self) -> Result<String> {
        let offset = self.position();
        let len = self.read_length()?;
        if len <= self.buffer_size - self.buffer_pos {
            let text = std::str::from_utf8(&self.buffer[self.buffer_pos..self.buffer_pos + len])
                .map_err(|_| Error::InvalidUtf8 { offset })?
                .to_owned();
            self.buffer_pos += len;
            return Ok(text);
        }
        let bytes = self.read_raw_bytes(len)?;
        String::from_utf8(bytes).map_err(|_| Error::InvalidUtf8 { offset })
    }

    /// Reads a length-prefixed byte string
    pub fn read_bytes(&mut self) -> Result<Bytes> {
        let len = self.read_length()?;
        Ok(Bytes::from(self.read_raw_bytes(len)?))
    }

    fn enter_nested(&mut self) -> Result<()> {
        if self.recursion_depth >= self.recursion_limit {
            debug!(
                "recursion limit of {} exceeded at offset {}",
                self.recursion_limit,
                self.position()
            );
            return Err(Error::RecursionLimitExceeded {
                limit: self.recursion_limit,
            });
        }
        self.recursion_depth += 1;
        Ok(())
    }

    /// Reads a length-delimited sub-message, running `merge` inside a byte
    /// limit covering exactly the declared length.
    ///
    /// The nesting depth is checked before descending. The limit is popped
    /// and the depth restored on every exit path.
    pub fn read_message<T, F>(&mut self, merge: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let length = self.read_length()?;
        self.enter_nested()?;

        let result = match self.push_limit(length) {
            Ok(old_limit) => {
                let result = merge(self).and_then(|value| {
                    self.check_last_tag_was(None)?;
                    Ok(value)
                });
                self.pop_limit(old_limit);
                result
            }
            Err(e) => Err(e),
        };

        self.recursion_depth -= 1;
        result
    }

    /// Reads a group body, running `merge` until the matching end-group tag
    pub fn read_group<T, F>(&mut self, field_number: u32, merge: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.enter_nested()?;
        let result = merge(self).and_then(|value| {
            self.check_last_tag_was(Some(field_number))?;
            Ok(value)
        });
        self.recursion_depth -= 1;
        result
    }

    /// Reads the values of a repeated field whose tag was just read.
    ///
    /// If the tag is length-delimited but the field's declared wire type is
    /// not, the values are a packed block. Otherwise one value is read and
    /// reading continues for as long as the next tag is the same tag, so
    /// both encodings are accepted regardless of how the field is declared.
    pub fn read_repeated<T, F>(
        &mut self,
        declared: WireType,
        out: &mut Vec<T>,
        mut read: F,
    ) -> Result<()>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        let Some(tag) = self.last_tag else {
            return Err(Error::InvalidTag {
                offset: self.position(),
                raw: 0,
            });
        };

        if tag.wire_type() == WireType::LengthDelimited && declared != WireType::LengthDelimited {
            let length = self.read_length()?;
            let old_limit = self.push_limit(length)?;
            let mut result = Ok(());
            while !self.reached_limit() {
                match read(self) {
                    Ok(value) => out.push(value),
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
            self.pop_limit(old_limit);
            return result;
        }

        loop {
            out.push(read(self)?);
            match self.peek_tag()? {
                Some(next) if next == tag => {
                    self.read_tag()?;
                }
                _ => return Ok(()),
            }
        }
    }

    /// Discards the value of the last tag read.
    ///
    /// Returns `false` when the last tag was an end-group tag, which tells
    /// the caller to stop consuming the enclosing group.
    pub fn skip_field(&mut self) -> Result<bool> {
        let Some(tag) = self.last_tag else {
            return Err(Error::InvalidTag {
                offset: self.position(),
                raw: 0,
            });
        };
        trace!("skipping field {}", tag);

        match tag.wire_type() {
            WireType::Varint => {
                self.read_raw_varint64()?;
            }
            WireType::Fixed64 => self.skip_raw_bytes(8)?,
            WireType::LengthDelimited => {
                let length = self.read_length()?;
                self.skip_raw_bytes(length)?;
            }
            WireType::StartGroup => {
                self.read_group(tag.field_number(), |r| r.skip_message())?;
            }
            WireType::EndGroup => return Ok(false),
            WireType::Fixed32 => self.skip_raw_bytes(4)?,
        }
        Ok(true)
    }

    /// Skips fields until end of input, the current limit, or an end-group tag
    pub fn skip_message(&mut self) -> Result<()> {
        while self.read_tag()?.is_some() {
            if !self.skip_field()? {
                break;
            }
        }
        Ok(())
    }
}
