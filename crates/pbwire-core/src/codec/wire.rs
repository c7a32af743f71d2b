//! Wire-format primitives: wire types, tags, zigzag and size computation.
//!
//! ## Wire Format Overview
//!
//! Each protobuf field is encoded as:
//! - A varint "tag" containing the field number and wire type
//! - The field data (format depends on wire type)
//!
//! Wire types:
//! - 0: VARINT (int32, int64, uint32, uint64, sint32, sint64, bool, enum)
//! - 1: FIXED64 (fixed64, sfixed64, double)
//! - 2: LENGTH_DELIMITED (string, bytes, embedded messages, packed repeated fields)
//! - 3/4: START_GROUP / END_GROUP (legacy group framing)
//! - 5: FIXED32 (fixed32, sfixed32, float)

use crate::error::{Error, Result};
use std::fmt;

/// Protobuf wire types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    /// Variable-length integer
    Varint = 0,
    /// 64-bit fixed-width
    Fixed64 = 1,
    /// Length-delimited (strings, bytes, embedded messages)
    LengthDelimited = 2,
    /// Start group (legacy)
    StartGroup = 3,
    /// End group (legacy)
    EndGroup = 4,
    /// 32-bit fixed-width
    Fixed32 = 5,
}

impl WireType {
    /// Parses the low three bits of a tag, reporting `offset` on failure
    pub fn from_bits(value: u8, offset: usize) -> Result<Self> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::Fixed32),
            _ => Err(Error::InvalidWireType {
                offset,
                wire_type: value,
            }),
        }
    }
}

impl TryFrom<u8> for WireType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::from_bits(value, 0)
    }
}

/// Maximum valid protobuf field number (2^29 - 1)
pub const MAX_FIELD_NUMBER: u32 = 536_870_911;

/// Number of low bits of a tag that hold the wire type
pub const TAG_TYPE_BITS: u32 = 3;

/// Maximum encoded length of a 64-bit varint
pub const MAX_VARINT_BYTES: usize = 10;

/// Field numbers used by the legacy message-set item group
pub mod message_set {
    /// The repeated group wrapping each item
    pub const ITEM: u32 = 1;
    /// The extension field number inside an item
    pub const TYPE_ID: u32 = 2;
    /// The serialized extension message inside an item
    pub const MESSAGE: u32 = 3;
}

/// A decoded field tag: field number plus wire type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag {
    field_number: u32,
    wire_type: WireType,
}

impl Tag {
    /// Creates a tag. The field number is not validated here.
    pub const fn new(field_number: u32, wire_type: WireType) -> Self {
        Self {
            field_number,
            wire_type,
        }
    }

    /// Splits a raw tag value, rejecting zero field numbers and undefined
    /// wire types
    pub fn from_raw(raw: u32, offset: usize) -> Result<Self> {
        let field_number = raw >> TAG_TYPE_BITS;
        if field_number == 0 {
            return Err(Error::InvalidTag { offset, raw });
        }
        let wire_type = WireType::from_bits((raw & 0x07) as u8, offset)?;
        Ok(Self {
            field_number,
            wire_type,
        })
    }

    /// The raw varint value of this tag
    pub const fn raw(&self) -> u32 {
        (self.field_number << TAG_TYPE_BITS) | self.wire_type as u32
    }

    /// The field number
    pub const fn field_number(&self) -> u32 {
        self.field_number
    }

    /// The wire type
    pub const fn wire_type(&self) -> WireType {
        self.wire_type
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.field_number, self.wire_type)
    }
}

/// Makes a raw tag value
#[inline]
pub const fn make_tag(field_number: u32, wire_type: WireType) -> u32 {
    (field_number << TAG_TYPE_BITS) | wire_type as u32
}

/// Encodes a signed 32-bit integer using zigzag encoding.
///
/// Maps negative numbers to odd positive numbers:
/// 0 -> 0, -1 -> 1, 1 -> 2, -2 -> 3, 2 -> 4, ...
#[inline]
pub fn zigzag_encode32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

/// Decodes a zigzag-encoded 32-bit value back to signed.
#[inline]
pub fn zigzag_decode32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ (-((n & 1) as i32))
}

/// Encodes a signed 64-bit integer using zigzag encoding.
#[inline]
pub fn zigzag_encode64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

/// Decodes a zigzag-encoded 64-bit value back to signed.
#[inline]
pub fn zigzag_decode64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ (-((n & 1) as i64))
}

/// Encoded size of a 32-bit varint
#[inline]
pub const fn varint32_size(value: u32) -> usize {
    if value & (0xFFFF_FFFF << 7) == 0 {
        1
    } else if value & (0xFFFF_FFFF << 14) == 0 {
        2
    } else if value & (0xFFFF_FFFF << 21) == 0 {
        3
    } else if value & (0xFFFF_FFFF << 28) == 0 {
        4
    } else {
        5
    }
}

/// Encoded size of a 64-bit varint
#[inline]
pub const fn varint64_size(value: u64) -> usize {
    // Bits needed, rounded up to groups of seven; zero still takes one byte
    let bits = 64 - (value | 1).leading_zeros() as usize;
    (bits + 6) / 7
}

/// Encoded size of a tag for `field_number`
#[inline]
pub const fn tag_size(field_number: u32) -> usize {
    varint32_size(make_tag(field_number, WireType::Varint))
}

/// Encoded size of an `int32` value; negatives are sign-extended to ten bytes
#[inline]
pub const fn int32_size(value: i32) -> usize {
    if value >= 0 {
        varint32_size(value as u32)
    } else {
        MAX_VARINT_BYTES
    }
}

/// Encoded size of a length prefix followed by `len` bytes
#[inline]
pub const fn length_delimited_size(len: usize) -> usize {
    varint32_size(len as u32) + len
}

/// Decode a varint from the given bytes.
///
/// Returns the decoded value and the number of bytes consumed. This is the
/// slice-only helper; [`CodedReader`](super::CodedReader) has its own
/// buffered implementation.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize)> {
    let mut result: u64 = 0;
    let mut shift = 0;

    for (i, &byte) in data.iter().enumerate() {
        if i >= MAX_VARINT_BYTES {
            return Err(Error::malformed_varint(0));
        }

        result |= ((byte & 0x7F) as u64) << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok((result, i + 1));
        }
    }

    Err(Error::truncated(data.len()))
}

/// Encode a varint into a vector, returning the number of bytes written
pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) -> usize {
    let start = out.len();
    loop {
        if value < 0x80 {
            out.push(value as u8);
            break;
        }
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.len() - start
}
