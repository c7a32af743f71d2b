//! Declared field types, their wire shapes and their in-memory mapping.

use crate::codec::WireType;
use std::fmt;

/// The declared type of a field, as written in a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// `double`
    Double,
    /// `float`
    Float,
    /// `int64`
    Int64,
    /// `uint64`
    UInt64,
    /// `int32`
    Int32,
    /// `fixed64`
    Fixed64,
    /// `fixed32`
    Fixed32,
    /// `bool`
    Bool,
    /// `string`
    String,
    /// legacy `group`
    Group,
    /// embedded message
    Message,
    /// `bytes`
    Bytes,
    /// `uint32`
    UInt32,
    /// enum
    Enum,
    /// `sfixed32`
    SFixed32,
    /// `sfixed64`
    SFixed64,
    /// `sint32`
    SInt32,
    /// `sint64`
    SInt64,
}

/// The in-memory representation a field type maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MappedType {
    /// `i32`
    Int32,
    /// `i64`
    Int64,
    /// `u32`
    UInt32,
    /// `u64`
    UInt64,
    /// `f32`
    Single,
    /// `f64`
    Double,
    /// `bool`
    Boolean,
    /// `String`
    String,
    /// `bytes::Bytes`
    ByteString,
    /// enum value descriptor
    Enum,
    /// nested message
    Message,
}

/// Field cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Label {
    /// May be absent
    #[default]
    Optional,
    /// Must be present for the message to be initialized
    Required,
    /// Zero or more values
    Repeated,
}

impl FieldType {
    /// The wire type a single value of this type is encoded with
    pub const fn wire_type(self) -> WireType {
        match self {
            FieldType::Double | FieldType::Fixed64 | FieldType::SFixed64 => WireType::Fixed64,
            FieldType::Float | FieldType::Fixed32 | FieldType::SFixed32 => WireType::Fixed32,
            FieldType::Int64
            | FieldType::UInt64
            | FieldType::Int32
            | FieldType::Bool
            | FieldType::UInt32
            | FieldType::Enum
            | FieldType::SInt32
            | FieldType::SInt64 => WireType::Varint,
            FieldType::String | FieldType::Message | FieldType::Bytes => {
                WireType::LengthDelimited
            }
            FieldType::Group => WireType::StartGroup,
        }
    }

    /// The in-memory type values of this field type are stored as
    pub const fn mapped_type(self) -> MappedType {
        match self {
            FieldType::Int32 | FieldType::SInt32 | FieldType::SFixed32 => MappedType::Int32,
            FieldType::Int64 | FieldType::SInt64 | FieldType::SFixed64 => MappedType::Int64,
            FieldType::UInt32 | FieldType::Fixed32 => MappedType::UInt32,
            FieldType::UInt64 | FieldType::Fixed64 => MappedType::UInt64,
            FieldType::Float => MappedType::Single,
            FieldType::Double => MappedType::Double,
            FieldType::Bool => MappedType::Boolean,
            FieldType::String => MappedType::String,
            FieldType::Bytes => MappedType::ByteString,
            FieldType::Enum => MappedType::Enum,
            FieldType::Message | FieldType::Group => MappedType::Message,
        }
    }

    /// Whether repeated fields of this type may use packed encoding
    pub const fn is_packable(self) -> bool {
        !matches!(
            self,
            FieldType::String | FieldType::Bytes | FieldType::Message | FieldType::Group
        )
    }

    /// The schema keyword for this type
    pub const fn name(self) -> &'static str {
        match self {
            FieldType::Double => "double",
            FieldType::Float => "float",
            FieldType::Int64 => "int64",
            FieldType::UInt64 => "uint64",
            FieldType::Int32 => "int32",
            FieldType::Fixed64 => "fixed64",
            FieldType::Fixed32 => "fixed32",
            FieldType::Bool => "bool",
            FieldType::String => "string",
            FieldType::Group => "group",
            FieldType::Message => "message",
            FieldType::Bytes => "bytes",
            FieldType::UInt32 => "uint32",
            FieldType::Enum => "enum",
            FieldType::SFixed32 => "sfixed32",
            FieldType::SFixed64 => "sfixed64",
            FieldType::SInt32 => "sint32",
            FieldType::SInt64 => "sint64",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for MappedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MappedType::Int32 => "i32",
            MappedType::Int64 => "i64",
            MappedType::UInt32 => "u32",
            MappedType::UInt64 => "u64",
            MappedType::Single => "f32",
            MappedType::Double => "f64",
            MappedType::Boolean => "bool",
            MappedType::String => "string",
            MappedType::ByteString => "bytes",
            MappedType::Enum => "enum",
            MappedType::Message => "message",
        };
        f.write_str(name)
    }
}
