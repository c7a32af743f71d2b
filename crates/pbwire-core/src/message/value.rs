//! Reflective field values and their wire encoding.

use super::{DynamicMessage, MessageLite};
use crate::codec::{
    int32_size, length_delimited_size, tag_size, varint32_size, varint64_size, zigzag_encode32,
    zigzag_encode64, CodedReader, CodedWriter,
};
use crate::descriptor::{EnumValueDescriptor, FieldDescriptor, FieldType, MappedType};
use crate::error::{Error, Result};
use bytes::Bytes;

/// A single field value, tagged with its in-memory type
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// `bool`
    Bool(bool),
    /// `int32`, `sint32` or `sfixed32`
    I32(i32),
    /// `int64`, `sint64` or `sfixed64`
    I64(i64),
    /// `uint32` or `fixed32`
    U32(u32),
    /// `uint64` or `fixed64`
    U64(u64),
    /// `float`
    F32(f32),
    /// `double`
    F64(f64),
    /// `string`
    String(String),
    /// `bytes`
    Bytes(Bytes),
    /// A known value of an enum type
    Enum(EnumValueDescriptor),
    /// An embedded message or group
    Message(DynamicMessage),
}

impl Value {
    /// The zero value of a scalar, string or bytes type
    pub fn zero(field_type: FieldType) -> Option<Self> {
        let value = match field_type.mapped_type() {
            MappedType::Int32 => Value::I32(0),
            MappedType::Int64 => Value::I64(0),
            MappedType::UInt32 => Value::U32(0),
            MappedType::UInt64 => Value::U64(0),
            MappedType::Single => Value::F32(0.0),
            MappedType::Double => Value::F64(0.0),
            MappedType::Boolean => Value::Bool(false),
            MappedType::String => Value::String(String::new()),
            MappedType::ByteString => Value::Bytes(Bytes::new()),
            MappedType::Enum | MappedType::Message => return None,
        };
        Some(value)
    }

    /// The in-memory type of this value
    pub fn mapped_type(&self) -> MappedType {
        match self {
            Value::Bool(_) => MappedType::Boolean,
            Value::I32(_) => MappedType::Int32,
            Value::I64(_) => MappedType::Int64,
            Value::U32(_) => MappedType::UInt32,
            Value::U64(_) => MappedType::UInt64,
            Value::F32(_) => MappedType::Single,
            Value::F64(_) => MappedType::Double,
            Value::String(_) => MappedType::String,
            Value::Bytes(_) => MappedType::ByteString,
            Value::Enum(_) => MappedType::Enum,
            Value::Message(_) => MappedType::Message,
        }
    }

    /// Checks that this value may be stored in `field`.
    ///
    /// Enum values must belong to the field's enum type and messages must be
    /// of the field's message type.
    pub fn check_type(&self, field: &FieldDescriptor) -> Result<()> {
        let mismatch = |found: String| {
            Error::type_mismatch(
                field.containing_type().full_name(),
                field.name(),
                expected_name(field),
                found,
            )
        };
        match self {
            Value::Enum(value) => {
                if field.enum_type().as_ref() != Some(value.enum_type()) {
                    return Err(mismatch(format!("enum {}", value.enum_type().full_name())));
                }
            }
            Value::Message(message) => {
                if field.message_type().as_ref() != Some(message.descriptor()) {
                    return Err(mismatch(format!(
                        "message {}",
                        message.descriptor().full_name()
                    )));
                }
            }
            other => {
                if other.mapped_type() != field.mapped_type() {
                    return Err(mismatch(other.mapped_type().to_string()));
                }
            }
        }
        Ok(())
    }

    /// Returns the `bool` value, if this is one
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the `i32` value, if this is one
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the `i64` value, if this is one
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the `u32` value, if this is one
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::U32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the `u64` value, if this is one
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the `f32` value, if this is one
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the `f64` value, if this is one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string, if this is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the byte string, if this is one
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the enum value, if this is one
    pub fn as_enum(&self) -> Option<&EnumValueDescriptor> {
        match self {
            Value::Enum(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the message, if this is one
    pub fn as_message(&self) -> Option<&DynamicMessage> {
        match self {
            Value::Message(v) => Some(v),
            _ => None,
        }
    }
}

fn expected_name(field: &FieldDescriptor) -> String {
    match (field.enum_type(), field.message_type()) {
        (Some(enum_type), _) => format!("enum {}", enum_type.full_name()),
        (_, Some(message_type)) => format!("message {}", message_type.full_name()),
        _ => field.mapped_type().to_string(),
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i32 => I32,
    i64 => I64,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => String,
    Bytes => Bytes,
    EnumValueDescriptor => Enum,
    DynamicMessage => Message,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(value))
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(value))
    }
}

/// Reads one value of a scalar, string or bytes type
pub(crate) fn read_scalar(reader: &mut CodedReader<'_>, field_type: FieldType) -> Result<Value> {
    let value = match field_type {
        FieldType::Double => Value::F64(reader.read_double()?),
        FieldType::Float => Value::F32(reader.read_float()?),
        FieldType::Int64 => Value::I64(reader.read_int64()?),
        FieldType::UInt64 => Value::U64(reader.read_uint64()?),
        FieldType::Int32 => Value::I32(reader.read_int32()?),
        FieldType::Fixed64 => Value::U64(reader.read_fixed64()?),
        FieldType::Fixed32 => Value::U32(reader.read_fixed32()?),
        FieldType::Bool => Value::Bool(reader.read_bool()?),
        FieldType::String => Value::String(reader.read_string()?),
        FieldType::Bytes => Value::Bytes(reader.read_bytes()?),
        FieldType::UInt32 => Value::U32(reader.read_uint32()?),
        FieldType::SFixed32 => Value::I32(reader.read_sfixed32()?),
        FieldType::SFixed64 => Value::I64(reader.read_sfixed64()?),
        FieldType::SInt32 => Value::I32(reader.read_sint32()?),
        FieldType::SInt64 => Value::I64(reader.read_sint64()?),
        FieldType::Enum | FieldType::Message | FieldType::Group => {
            return Err(Error::descriptor_build(format!(
                "{field_type} values are not scalars"
            )))
        }
    };
    Ok(value)
}

/// Encoded size of a value without its tag.
///
/// Values are type-checked when stored, so a mismatched pair never reaches
/// here; it would count as zero bytes.
pub(crate) fn size_no_tag(field_type: FieldType, value: &Value) -> usize {
    match (field_type, value) {
        (FieldType::Double | FieldType::Fixed64 | FieldType::SFixed64, _) => 8,
        (FieldType::Float | FieldType::Fixed32 | FieldType::SFixed32, _) => 4,
        (FieldType::Bool, _) => 1,
        (FieldType::Int64, Value::I64(v)) => varint64_size(*v as u64),
        (FieldType::UInt64, Value::U64(v)) => varint64_size(*v),
        (FieldType::Int32, Value::I32(v)) => int32_size(*v),
        (FieldType::UInt32, Value::U32(v)) => varint32_size(*v),
        (FieldType::SInt32, Value::I32(v)) => varint32_size(zigzag_encode32(*v)),
        (FieldType::SInt64, Value::I64(v)) => varint64_size(zigzag_encode64(*v)),
        (FieldType::Enum, Value::Enum(v)) => int32_size(v.number()),
        (FieldType::String, Value::String(v)) => length_delimited_size(v.len()),
        (FieldType::Bytes, Value::Bytes(v)) => length_delimited_size(v.len()),
        (FieldType::Message, Value::Message(m)) => length_delimited_size(m.serialized_size()),
        (FieldType::Group, Value::Message(m)) => m.serialized_size(),
        _ => 0,
    }
}

/// Encoded size of a value including its tag (both tags for groups)
pub(crate) fn size_with_tag(field: &FieldDescriptor, value: &Value) -> usize {
    let tags = if field.field_type() == FieldType::Group {
        2 * tag_size(field.number())
    } else {
        tag_size(field.number())
    };
    tags + size_no_tag(field.field_type(), value)
}

/// Writes a value without its tag
pub(crate) fn write_no_tag(
    writer: &mut CodedWriter<'_>,
    field: &FieldDescriptor,
    value: &Value,
) -> Result<()> {
    match (field.field_type(), value) {
        (FieldType::Double, Value::F64(v)) => writer.write_double_no_tag(*v),
        (FieldType::Float, Value::F32(v)) => writer.write_float_no_tag(*v),
        (FieldType::Int64, Value::I64(v)) => writer.write_int64_no_tag(*v),
        (FieldType::UInt64, Value::U64(v)) => writer.write_uint64_no_tag(*v),
        (FieldType::Int32, Value::I32(v)) => writer.write_int32_no_tag(*v),
        (FieldType::Fixed64, Value::U64(v)) => writer.write_fixed64_no_tag(*v),
        (FieldType::Fixed32, Value::U32(v)) => writer.write_fixed32_no_tag(*v),
        (FieldType::Bool, Value::Bool(v)) => writer.write_bool_no_tag(*v),
        (FieldType::String, Value::String(v)) => writer.write_string_no_tag(v),
        (FieldType::Bytes, Value::Bytes(v)) => writer.write_bytes_no_tag(v),
        (FieldType::UInt32, Value::U32(v)) => writer.write_uint32_no_tag(*v),
        (FieldType::Enum, Value::Enum(v)) => writer.write_enum_no_tag(v.number()),
        (FieldType::SFixed32, Value::I32(v)) => writer.write_sfixed32_no_tag(*v),
        (FieldType::SFixed64, Value::I64(v)) => writer.write_sfixed64_no_tag(*v),
        (FieldType::SInt32, Value::I32(v)) => writer.write_sint32_no_tag(*v),
        (FieldType::SInt64, Value::I64(v)) => writer.write_sint64_no_tag(*v),
        (FieldType::Message, Value::Message(m)) => writer.write_message_no_tag(m),
        (FieldType::Group, Value::Message(m)) => writer.write_group_no_tag(m),
        (_, other) => Err(Error::type_mismatch(
            field.containing_type().full_name(),
            field.name(),
            field.field_type().name(),
            other.mapped_type().to_string(),
        )),
    }
}

/// Writes a value with its tag, wrapping groups in start and end tags
pub(crate) fn write_with_tag(
    writer: &mut CodedWriter<'_>,
    field: &FieldDescriptor,
    value: &Value,
) -> Result<()> {
    let number = field.number();
    match (field.field_type(), value) {
        (FieldType::Group, Value::Message(m)) => writer.write_group(number, m),
        (field_type, _) => {
            writer.write_tag(number, field_type.wire_type())?;
            write_no_tag(writer, field, value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::tests::person_pool;

    #[test]
    fn test_zero_values() {
        assert_eq!(Value::zero(FieldType::SFixed64), Some(Value::I64(0)));
        assert_eq!(Value::zero(FieldType::Bytes), Some(Value::Bytes(Bytes::new())));
        assert_eq!(Value::zero(FieldType::Enum), None);
        assert_eq!(Value::zero(FieldType::Group), None);
    }

    #[test]
    fn test_check_type() {
        let pool = person_pool();
        let person = pool.get_message_by_name("test.Person").unwrap();
        let id = person.field_by_name("id").unwrap();
        assert!(Value::I32(3).check_type(&id).is_ok());

        let err = Value::from("three").check_type(&id).unwrap_err();
        match err {
            Error::TypeMismatch {
                message,
                field,
                expected,
                found,
            } => {
                assert_eq!(message, "test.Person");
                assert_eq!(field, "id");
                assert_eq!(expected, "i32");
                assert_eq!(found, "string");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_check_enum_type() {
        let pool = person_pool();
        let person = pool.get_message_by_name("test.Person").unwrap();
        let color = person.field_by_name("color").unwrap();
        let blue = pool
            .get_enum_by_name("test.Color")
            .unwrap()
            .value_by_name("BLUE")
            .unwrap();
        assert!(Value::Enum(blue).check_type(&color).is_ok());
        assert!(Value::I32(2).check_type(&color).is_err());
    }

    #[test]
    fn test_sizes() {
        assert_eq!(size_no_tag(FieldType::Int32, &Value::I32(-1)), 10);
        assert_eq!(size_no_tag(FieldType::SInt32, &Value::I32(-1)), 1);
        assert_eq!(size_no_tag(FieldType::Fixed32, &Value::U32(1)), 4);
        assert_eq!(
            size_no_tag(FieldType::String, &Value::from("hello")),
            6
        );
    }
}
