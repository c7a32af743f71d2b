//! Schema definitions and their resolution into a [`DescriptorPool`].

use super::{
    DescriptorPool, EnumData, EnumValueData, FieldData, FieldType, Label, MessageData, PoolInner,
};
use crate::codec::MAX_FIELD_NUMBER;
use crate::error::{Error, Result};
use crate::message::Value;
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use tracing::debug;

/// Definition of a message type
#[derive(Debug, Clone, PartialEq)]
pub struct MessageDef {
    /// Fully-qualified name, e.g. `pkg.Outer.Inner`
    pub full_name: String,
    /// Regular fields, in any order
    pub fields: Vec<FieldDef>,
    /// Field number ranges reserved for extensions, end-exclusive
    pub extension_ranges: Vec<Range<u32>>,
    /// Whether extensions use the legacy message-set item layout
    pub message_set_wire_format: bool,
}

impl MessageDef {
    /// Creates an empty message definition
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            fields: Vec::new(),
            extension_ranges: Vec::new(),
            message_set_wire_format: false,
        }
    }

    /// Adds a field
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Declares an extension range
    pub fn extension_range(mut self, range: Range<u32>) -> Self {
        self.extension_ranges.push(range);
        self
    }

    /// Marks the type as a message set
    pub fn message_set_wire_format(mut self, enabled: bool) -> Self {
        self.message_set_wire_format = enabled;
        self
    }
}

/// Definition of a field
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Short name
    pub name: String,
    /// Field number
    pub number: u32,
    /// Declared type
    pub field_type: FieldType,
    /// Cardinality
    pub label: Label,
    /// Packed encoding for repeated scalars
    pub packed: bool,
    /// Fully-qualified name of the message or enum type, for those field types
    pub type_name: Option<String>,
    /// Textual default value, in the schema language's syntax
    pub default_value: Option<String>,
}

impl FieldDef {
    /// Creates an optional field
    pub fn new(name: impl Into<String>, number: u32, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            number,
            field_type,
            label: Label::Optional,
            packed: false,
            type_name: None,
            default_value: None,
        }
    }

    /// Makes the field required
    pub fn required(mut self) -> Self {
        self.label = Label::Required;
        self
    }

    /// Makes the field repeated
    pub fn repeated(mut self) -> Self {
        self.label = Label::Repeated;
        self
    }

    /// Uses packed encoding
    pub fn packed(mut self) -> Self {
        self.packed = true;
        self
    }

    /// Sets the referenced message or enum type
    pub fn type_name(mut self, name: impl Into<String>) -> Self {
        self.type_name = Some(name.into());
        self
    }

    /// Sets the textual default value
    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// Definition of an enum type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumDef {
    /// Fully-qualified name
    pub full_name: String,
    /// Values as `(name, number)`, in declaration order
    pub values: Vec<(String, i32)>,
}

impl EnumDef {
    /// Creates an enum with no values
    pub fn new(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
            values: Vec::new(),
        }
    }

    /// Adds a value
    pub fn value(mut self, name: impl Into<String>, number: i32) -> Self {
        self.values.push((name.into(), number));
        self
    }
}

/// Definition of an extension field
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionDef {
    /// Fully-qualified name of the extension
    pub full_name: String,
    /// Fully-qualified name of the extended message type
    pub extendee: String,
    /// The field itself
    pub field: FieldDef,
}

impl ExtensionDef {
    /// Creates an extension definition
    pub fn new(full_name: impl Into<String>, extendee: impl Into<String>, field: FieldDef) -> Self {
        Self {
            full_name: full_name.into(),
            extendee: extendee.into(),
            field,
        }
    }
}

/// Collects definitions and resolves them into a [`DescriptorPool`].
///
/// Type references are resolved by fully-qualified name at build time, so
/// definitions may be added in any order.
#[derive(Debug, Clone, Default)]
pub struct DescriptorPoolBuilder {
    messages: Vec<MessageDef>,
    enums: Vec<EnumDef>,
    extensions: Vec<ExtensionDef>,
}

impl DescriptorPoolBuilder {
    /// Creates an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a message type
    pub fn add_message(&mut self, def: MessageDef) -> &mut Self {
        self.messages.push(def);
        self
    }

    /// Adds an enum type
    pub fn add_enum(&mut self, def: EnumDef) -> &mut Self {
        self.enums.push(def);
        self
    }

    /// Adds an extension field
    pub fn add_extension(&mut self, def: ExtensionDef) -> &mut Self {
        self.extensions.push(def);
        self
    }

    /// Resolves every definition and validates the schema
    pub fn build(&self) -> Result<DescriptorPool> {
        let mut inner = PoolInner::default();

        for (index, def) in self.messages.iter().enumerate() {
            let name = normalize(&def.full_name);
            if inner.message_names.insert(name.to_owned(), index).is_some() {
                return Err(Error::descriptor_build(format!(
                    "duplicate message type '{name}'"
                )));
            }
        }
        for (index, def) in self.enums.iter().enumerate() {
            let name = normalize(&def.full_name);
            if inner.message_names.contains_key(name)
                || inner.enum_names.insert(name.to_owned(), index).is_some()
            {
                return Err(Error::descriptor_build(format!("duplicate type '{name}'")));
            }
            inner.enums.push(build_enum(def)?);
        }

        for (index, def) in self.messages.iter().enumerate() {
            let message = build_message(&inner, def, index)?;
            inner.messages.push(message);
        }

        let mut seen = HashSet::new();
        for def in &self.extensions {
            let extendee = normalize(&def.extendee);
            let containing = *inner.message_names.get(extendee).ok_or_else(|| {
                Error::descriptor_build(format!(
                    "extension '{}' extends unknown type '{extendee}'",
                    def.full_name
                ))
            })?;
            let full_name = normalize(&def.full_name).to_owned();
            let field = resolve_field(&inner, &def.field, containing, full_name.clone())?;

            let target = &inner.messages[containing];
            if !target
                .extension_ranges
                .iter()
                .any(|range| range.contains(&field.number))
            {
                return Err(Error::descriptor_build(format!(
                    "extension '{full_name}' uses number {} outside the extension ranges of '{}'",
                    field.number, target.full_name
                )));
            }
            if field.label == Label::Required {
                return Err(Error::descriptor_build(format!(
                    "extension '{full_name}' cannot be required"
                )));
            }
            if !seen.insert((containing, field.number)) {
                return Err(Error::descriptor_build(format!(
                    "extension number {} of '{}' is declared twice",
                    field.number, target.full_name
                )));
            }
            let index = inner.extensions.len();
            if inner.extension_names.insert(full_name.clone(), index).is_some() {
                return Err(Error::descriptor_build(format!(
                    "duplicate extension '{full_name}'"
                )));
            }
            inner.extensions.push(field);
        }

        debug!(
            "built descriptor pool with {} messages, {} enums, {} extensions",
            inner.messages.len(),
            inner.enums.len(),
            inner.extensions.len()
        );
        Ok(DescriptorPool::from_inner(inner))
    }
}

fn normalize(name: &str) -> &str {
    name.trim_start_matches('.')
}

fn short_name(full_name: &str) -> &str {
    full_name.rsplit('.').next().unwrap_or(full_name)
}

fn build_enum(def: &EnumDef) -> Result<EnumData> {
    let full_name = normalize(&def.full_name);
    let mut values = Vec::with_capacity(def.values.len());
    let mut values_by_number = HashMap::new();
    let mut values_by_name = HashMap::new();
    for (index, (name, number)) in def.values.iter().enumerate() {
        if values_by_name.insert(name.clone(), index).is_some() {
            return Err(Error::descriptor_build(format!(
                "duplicate value '{name}' in enum '{full_name}'"
            )));
        }
        values_by_number.entry(*number).or_insert(index);
        values.push(EnumValueData {
            name: name.clone(),
            number: *number,
        });
    }
    Ok(EnumData {
        name: short_name(full_name).to_owned(),
        full_name: full_name.to_owned(),
        values,
        values_by_number,
        values_by_name,
    })
}

fn build_message(inner: &PoolInner, def: &MessageDef, index: usize) -> Result<MessageData> {
    let full_name = normalize(&def.full_name);

    for range in &def.extension_ranges {
        if range.start == 0 || range.start >= range.end || range.end > MAX_FIELD_NUMBER + 1 {
            return Err(Error::descriptor_build(format!(
                "invalid extension range {}..{} in '{full_name}'",
                range.start, range.end
            )));
        }
    }

    let mut fields = def
        .fields
        .iter()
        .map(|field| {
            resolve_field(inner, field, index, format!("{full_name}.{}", field.name))
        })
        .collect::<Result<Vec<_>>>()?;
    fields.sort_by_key(|field| field.number);

    let mut fields_by_number = HashMap::with_capacity(fields.len());
    let mut fields_by_name = HashMap::with_capacity(fields.len());
    for (position, field) in fields.iter().enumerate() {
        if fields_by_number.insert(field.number, position).is_some() {
            return Err(Error::descriptor_build(format!(
                "field number {} is used twice in '{full_name}'",
                field.number
            )));
        }
        if fields_by_name.insert(field.name.clone(), position).is_some() {
            return Err(Error::descriptor_build(format!(
                "field name '{}' is used twice in '{full_name}'",
                field.name
            )));
        }
        if def
            .extension_ranges
            .iter()
            .any(|range| range.contains(&field.number))
        {
            return Err(Error::descriptor_build(format!(
                "field '{}' of '{full_name}' overlaps an extension range",
                field.name
            )));
        }
    }

    Ok(MessageData {
        name: short_name(full_name).to_owned(),
        full_name: full_name.to_owned(),
        fields,
        fields_by_number,
        fields_by_name,
        extension_ranges: def.extension_ranges.clone(),
        message_set_wire_format: def.message_set_wire_format,
    })
}

fn resolve_field(
    inner: &PoolInner,
    def: &FieldDef,
    containing_type: usize,
    full_name: String,
) -> Result<FieldData> {
    if def.number == 0 || def.number > MAX_FIELD_NUMBER {
        return Err(Error::InvalidFieldNumber {
            number: def.number,
            max: MAX_FIELD_NUMBER,
        });
    }

    let type_name = || {
        def.type_name.as_deref().map(normalize).ok_or_else(|| {
            Error::descriptor_build(format!(
                "field '{full_name}' of type {} has no type name",
                def.field_type
            ))
        })
    };
    let (message_type, enum_type) = match def.field_type {
        FieldType::Message | FieldType::Group => {
            let name = type_name()?;
            let index = inner.message_names.get(name).copied().ok_or_else(|| {
                Error::descriptor_build(format!(
                    "field '{full_name}' refers to unknown message type '{name}'"
                ))
            })?;
            (Some(index), None)
        }
        FieldType::Enum => {
            let name = type_name()?;
            let index = inner.enum_names.get(name).copied().ok_or_else(|| {
                Error::descriptor_build(format!(
                    "field '{full_name}' refers to unknown enum type '{name}'"
                ))
            })?;
            (None, Some(index))
        }
        _ => (None, None),
    };

    if def.packed && !(def.label == Label::Repeated && def.field_type.is_packable()) {
        return Err(Error::descriptor_build(format!(
            "field '{full_name}' cannot be packed: only repeated scalar fields can"
        )));
    }

    let mut default_value = None;
    let mut default_enum_value = None;
    if let Some(text) = &def.default_value {
        if def.label == Label::Repeated {
            return Err(Error::descriptor_build(format!(
                "repeated field '{full_name}' cannot have a default value"
            )));
        }
        match (def.field_type, enum_type) {
            (FieldType::Message | FieldType::Group, _) => {
                return Err(Error::descriptor_build(format!(
                    "message field '{full_name}' cannot have a default value"
                )));
            }
            (FieldType::Enum, Some(index)) => {
                let value = inner.enums[index].values_by_name.get(text).copied();
                default_enum_value = Some(value.ok_or_else(|| {
                    Error::descriptor_build(format!(
                        "default '{text}' of field '{full_name}' is not a value of '{}'",
                        inner.enums[index].full_name
                    ))
                })?);
            }
            (field_type, _) => {
                let value = parse_default(field_type, text).map_err(|reason| {
                    Error::descriptor_build(format!(
                        "invalid default '{text}' for field '{full_name}': {reason}"
                    ))
                })?;
                default_value = Some(value);
            }
        }
    }

    Ok(FieldData {
        name: def.name.clone(),
        full_name,
        number: def.number,
        field_type: def.field_type,
        label: def.label,
        packed: def.packed,
        containing_type,
        message_type,
        enum_type,
        default_value,
        default_enum_value,
    })
}

/// Parses a textual default value for a scalar, string or bytes field
fn parse_default(field_type: FieldType, text: &str) -> std::result::Result<Value, String> {
    let value = match field_type {
        FieldType::Int32 | FieldType::SInt32 | FieldType::SFixed32 => {
            Value::I32(text.parse().map_err(|e| format!("{e}"))?)
        }
        FieldType::Int64 | FieldType::SInt64 | FieldType::SFixed64 => {
            Value::I64(text.parse().map_err(|e| format!("{e}"))?)
        }
        FieldType::UInt32 | FieldType::Fixed32 => {
            Value::U32(text.parse().map_err(|e| format!("{e}"))?)
        }
        FieldType::UInt64 | FieldType::Fixed64 => {
            Value::U64(text.parse().map_err(|e| format!("{e}"))?)
        }
        FieldType::Float => Value::F32(parse_float(text)? as f32),
        FieldType::Double => Value::F64(parse_float(text)?),
        FieldType::Bool => match text {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err("expected 'true' or 'false'".into()),
        },
        FieldType::String => Value::String(text.to_owned()),
        FieldType::Bytes => Value::Bytes(Bytes::from(unescape_bytes(text)?)),
        FieldType::Enum | FieldType::Message | FieldType::Group => {
            return Err(format!("{field_type} fields take no textual default"))
        }
    };
    Ok(value)
}

fn parse_float(text: &str) -> std::result::Result<f64, String> {
    match text {
        "inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        "nan" => Ok(f64::NAN),
        _ => text.parse().map_err(|e| format!("{e}")),
    }
}

/// Decodes a C-style escaped byte string
fn unescape_bytes(text: &str) -> std::result::Result<Vec<u8>, String> {
    let bytes = text.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        let byte = bytes[i];
        i += 1;
        if byte != b'\\' {
            out.push(byte);
            continue;
        }

        let Some(&escape) = bytes.get(i) else {
            return Err("trailing backslash".into());
        };
        i += 1;
        match escape {
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0C),
            b'v' => out.push(0x0B),
            b'\\' | b'\'' | b'"' | b'?' => out.push(escape),
            b'0'..=b'7' => {
                let mut value = u32::from(escape - b'0');
                for _ in 0..2 {
                    match bytes.get(i) {
                        Some(&digit @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(digit - b'0');
                            i += 1;
                        }
                        _ => break,
                    }
                }
                let value = u8::try_from(value).map_err(|_| "octal escape out of range")?;
                out.push(value);
            }
            b'x' => {
                let mut value = 0u32;
                let mut digits = 0;
                while digits < 2 {
                    match bytes.get(i).and_then(|d| char::from(*d).to_digit(16)) {
                        Some(digit) => {
                            value = value * 16 + digit;
                            i += 1;
                            digits += 1;
                        }
                        None => break,
                    }
                }
                if digits == 0 {
                    return Err("\\x with no hex digits".into());
                }
                out.push(value as u8);
            }
            other => return Err(format!("unknown escape '\\{}'", char::from(other))),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_single(def: MessageDef) -> Result<DescriptorPool> {
        DescriptorPool::builder().add_message(def).build()
    }

    #[test]
    fn test_unescape_bytes() {
        assert_eq!(unescape_bytes("abc").unwrap(), b"abc");
        assert_eq!(unescape_bytes(r"a\nb").unwrap(), b"a\nb");
        assert_eq!(unescape_bytes(r"\000\377").unwrap(), vec![0, 255]);
        assert_eq!(unescape_bytes(r"\x41\x4a").unwrap(), b"AJ");
        assert_eq!(unescape_bytes(r#"\"\\"#).unwrap(), b"\"\\");
        assert!(unescape_bytes("\\").is_err());
        assert!(unescape_bytes(r"\q").is_err());
    }

    #[test]
    fn test_parse_defaults() {
        assert_eq!(parse_default(FieldType::SInt32, "-7"), Ok(Value::I32(-7)));
        assert_eq!(
            parse_default(FieldType::Fixed64, "18446744073709551615"),
            Ok(Value::U64(u64::MAX))
        );
        assert_eq!(parse_default(FieldType::Bool, "true"), Ok(Value::Bool(true)));
        assert_eq!(
            parse_default(FieldType::Double, "-inf"),
            Ok(Value::F64(f64::NEG_INFINITY))
        );
        assert_eq!(parse_default(FieldType::Float, "1.5"), Ok(Value::F32(1.5)));
        assert!(parse_default(FieldType::UInt32, "-1").is_err());
        assert!(parse_default(FieldType::Bool, "yes").is_err());
    }

    #[test]
    fn test_rejects_field_number_zero() {
        let err = build_single(
            MessageDef::new("m.M").field(FieldDef::new("a", 0, FieldType::Int32)),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidFieldNumber { number: 0, .. }));
    }

    #[test]
    fn test_rejects_field_number_too_large() {
        let err = build_single(
            MessageDef::new("m.M").field(FieldDef::new("a", MAX_FIELD_NUMBER + 1, FieldType::Int32)),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidFieldNumber { .. }));
    }

    #[test]
    fn test_rejects_duplicate_numbers() {
        let err = build_single(
            MessageDef::new("m.M")
                .field(FieldDef::new("a", 1, FieldType::Int32))
                .field(FieldDef::new("b", 1, FieldType::Int64)),
        )
        .unwrap_err();
        assert!(matches!(err, Error::DescriptorBuild(_)));
    }

    #[test]
    fn test_rejects_unresolved_type() {
        let err = build_single(
            MessageDef::new("m.M")
                .field(FieldDef::new("a", 1, FieldType::Message).type_name("m.Missing")),
        )
        .unwrap_err();
        assert!(err.to_string().contains("m.Missing"));
    }

    #[test]
    fn test_rejects_packed_strings() {
        let err = build_single(
            MessageDef::new("m.M").field(FieldDef::new("a", 1, FieldType::String).repeated().packed()),
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot be packed"));
    }

    #[test]
    fn test_rejects_unknown_enum_default() {
        let err = DescriptorPool::builder()
            .add_enum(EnumDef::new("m.E").value("A", 0))
            .add_message(
                MessageDef::new("m.M").field(
                    FieldDef::new("e", 1, FieldType::Enum)
                        .type_name(".m.E")
                        .default_value("B"),
                ),
            )
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("'B'"));
    }

    #[test]
    fn test_rejects_extension_outside_range() {
        let err = DescriptorPool::builder()
            .add_message(MessageDef::new("m.M").extension_range(10..20))
            .add_extension(ExtensionDef::new(
                "m.ext",
                "m.M",
                FieldDef::new("ext", 20, FieldType::Int32),
            ))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("outside the extension ranges"));
    }

    #[test]
    fn test_rejects_duplicate_extension_number() {
        let err = DescriptorPool::builder()
            .add_message(MessageDef::new("m.M").extension_range(10..20))
            .add_extension(ExtensionDef::new(
                "m.a",
                "m.M",
                FieldDef::new("a", 10, FieldType::Int32),
            ))
            .add_extension(ExtensionDef::new(
                "m.b",
                "m.M",
                FieldDef::new("b", 10, FieldType::Int32),
            ))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_enum_aliases_resolve_to_first() {
        let pool = DescriptorPool::builder()
            .add_enum(EnumDef::new("m.E").value("A", 1).value("B", 1))
            .build()
            .unwrap();
        let e = pool.get_enum_by_name("m.E").unwrap();
        assert_eq!(e.value_by_number(1).unwrap().name(), "A");
        assert_eq!(e.values().len(), 2);
    }
}
