//! Loading pools from compiled `FileDescriptorSet`s.
//!
//! This is how `protoc --descriptor_set_out` output (or any descriptor set
//! produced by a build tool) becomes a [`DescriptorPool`].

use super::{
    DescriptorPool, DescriptorPoolBuilder, EnumDef, ExtensionDef, FieldDef, FieldType, Label,
    MessageDef,
};
use crate::error::{Error, Result};
use prost::Message as _;
use prost_types::field_descriptor_proto::{Label as ProtoLabel, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    FileDescriptorSet,
};
use tracing::debug;

impl DescriptorPool {
    /// Decodes a serialized `FileDescriptorSet` and builds a pool from it
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let set = FileDescriptorSet::decode(bytes)?;
        Self::from_file_descriptor_set(&set)
    }

    /// Builds a pool from every file of a `FileDescriptorSet`.
    ///
    /// Every type referenced by the set must be defined somewhere in it.
    pub fn from_file_descriptor_set(set: &FileDescriptorSet) -> Result<Self> {
        let mut builder = DescriptorPoolBuilder::new();
        for file in &set.file {
            debug!("loading descriptors from {}", file.name());
            add_file(&mut builder, file)?;
        }
        builder.build()
    }
}

fn add_file(builder: &mut DescriptorPoolBuilder, file: &FileDescriptorProto) -> Result<()> {
    let scope = file.package();
    let proto3 = file.syntax() == "proto3";

    for message in &file.message_type {
        add_message(builder, scope, message, proto3)?;
    }
    for enum_type in &file.enum_type {
        builder.add_enum(enum_def(scope, enum_type));
    }
    for extension in &file.extension {
        builder.add_extension(extension_def(scope, extension, proto3)?);
    }
    Ok(())
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_owned()
    } else {
        format!("{scope}.{name}")
    }
}

fn add_message(
    builder: &mut DescriptorPoolBuilder,
    scope: &str,
    proto: &DescriptorProto,
    proto3: bool,
) -> Result<()> {
    let full_name = qualify(scope, proto.name());

    let mut def = MessageDef::new(full_name.clone()).message_set_wire_format(
        proto
            .options
            .as_ref()
            .and_then(|options| options.message_set_wire_format)
            .unwrap_or(false),
    );
    for field in &proto.field {
        def = def.field(field_def(field, proto3)?);
    }
    for range in &proto.extension_range {
        let start = u32::try_from(range.start()).unwrap_or(0);
        let end = u32::try_from(range.end()).unwrap_or(0);
        def = def.extension_range(start..end);
    }
    builder.add_message(def);

    for nested in &proto.nested_type {
        add_message(builder, &full_name, nested, proto3)?;
    }
    for enum_type in &proto.enum_type {
        builder.add_enum(enum_def(&full_name, enum_type));
    }
    for extension in &proto.extension {
        builder.add_extension(extension_def(&full_name, extension, proto3)?);
    }
    Ok(())
}

fn enum_def(scope: &str, proto: &EnumDescriptorProto) -> EnumDef {
    proto
        .value
        .iter()
        .fold(EnumDef::new(qualify(scope, proto.name())), |def, value| {
            def.value(value.name(), value.number())
        })
}

fn extension_def(scope: &str, proto: &FieldDescriptorProto, proto3: bool) -> Result<ExtensionDef> {
    Ok(ExtensionDef::new(
        qualify(scope, proto.name()),
        proto.extendee().trim_start_matches('.'),
        field_def(proto, proto3)?,
    ))
}

fn field_def(proto: &FieldDescriptorProto, proto3: bool) -> Result<FieldDef> {
    let number = u32::try_from(proto.number()).map_err(|_| Error::InvalidFieldNumber {
        number: 0,
        max: crate::codec::MAX_FIELD_NUMBER,
    })?;

    let mut def = FieldDef::new(proto.name(), number, field_type(proto.r#type()));
    def.label = match proto.label() {
        ProtoLabel::Optional => Label::Optional,
        ProtoLabel::Required => Label::Required,
        ProtoLabel::Repeated => Label::Repeated,
    };
    if let Some(type_name) = &proto.type_name {
        def.type_name = Some(type_name.trim_start_matches('.').to_owned());
    }
    def.default_value = proto.default_value.clone();

    // proto3 packs repeated scalars unless told otherwise
    let explicit = proto.options.as_ref().and_then(|options| options.packed);
    let packable = def.label == Label::Repeated && def.field_type.is_packable();
    def.packed = packable && explicit.unwrap_or(proto3);
    Ok(def)
}

fn field_type(ty: Type) -> FieldType {
    match ty {
        Type::Double => FieldType::Double,
        Type::Float => FieldType::Float,
        Type::Int64 => FieldType::Int64,
        Type::Uint64 => FieldType::UInt64,
        Type::Int32 => FieldType::Int32,
        Type::Fixed64 => FieldType::Fixed64,
        Type::Fixed32 => FieldType::Fixed32,
        Type::Bool => FieldType::Bool,
        Type::String => FieldType::String,
        Type::Group => FieldType::Group,
        Type::Message => FieldType::Message,
        Type::Bytes => FieldType::Bytes,
        Type::Uint32 => FieldType::UInt32,
        Type::Enum => FieldType::Enum,
        Type::Sfixed32 => FieldType::SFixed32,
        Type::Sfixed64 => FieldType::SFixed64,
        Type::Sint32 => FieldType::SInt32,
        Type::Sint64 => FieldType::SInt64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::descriptor_proto::ExtensionRange;
    use prost_types::{EnumValueDescriptorProto, FieldOptions, MessageOptions};

    fn field(name: &str, number: i32, ty: Type, label: ProtoLabel) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.into()),
            number: Some(number),
            r#type: Some(ty as i32),
            label: Some(label as i32),
            ..Default::default()
        }
    }

    fn descriptor_set(syntax: &str) -> FileDescriptorSet {
        let inner = DescriptorProto {
            name: Some("Inner".into()),
            field: vec![field("value", 1, Type::Int32, ProtoLabel::Optional)],
            ..Default::default()
        };
        let values = field("values", 2, Type::Int32, ProtoLabel::Repeated);
        let mut unpacked = field("unpacked", 3, Type::Int32, ProtoLabel::Repeated);
        unpacked.options = Some(FieldOptions {
            packed: Some(false),
            ..Default::default()
        });
        let mut inner_ref = field("inner", 4, Type::Message, ProtoLabel::Optional);
        inner_ref.type_name = Some(".demo.Outer.Inner".into());
        let mut kind = field("kind", 5, Type::Enum, ProtoLabel::Optional);
        kind.type_name = Some(".demo.Kind".into());

        let outer = DescriptorProto {
            name: Some("Outer".into()),
            field: vec![values, unpacked, inner_ref, kind],
            nested_type: vec![inner],
            extension_range: vec![ExtensionRange {
                start: Some(100),
                end: Some(200),
                ..Default::default()
            }],
            ..Default::default()
        };
        let set_container = DescriptorProto {
            name: Some("Container".into()),
            options: Some(MessageOptions {
                message_set_wire_format: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut extension = field("note", 100, Type::String, ProtoLabel::Optional);
        extension.extendee = Some(".demo.Outer".into());

        FileDescriptorSet {
            file: vec![FileDescriptorProto {
                name: Some("demo.proto".into()),
                package: Some("demo".into()),
                syntax: Some(syntax.into()),
                message_type: vec![outer, set_container],
                enum_type: vec![EnumDescriptorProto {
                    name: Some("Kind".into()),
                    value: vec![
                        EnumValueDescriptorProto {
                            name: Some("ZERO".into()),
                            number: Some(0),
                            ..Default::default()
                        },
                        EnumValueDescriptorProto {
                            name: Some("ONE".into()),
                            number: Some(1),
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                }],
                extension: vec![extension],
                ..Default::default()
            }],
        }
    }

    #[test]
    fn test_load_nested_types() {
        let pool = DescriptorPool::from_file_descriptor_set(&descriptor_set("proto2")).unwrap();
        let outer = pool.get_message_by_name("demo.Outer").unwrap();
        let inner = pool.get_message_by_name("demo.Outer.Inner").unwrap();
        assert_eq!(
            outer.field_by_name("inner").unwrap().message_type().unwrap(),
            inner
        );
        assert_eq!(
            outer.field_by_name("kind").unwrap().enum_type().unwrap().full_name(),
            "demo.Kind"
        );
        assert!(outer.is_extension_number(150));
        assert!(pool
            .get_message_by_name("demo.Container")
            .unwrap()
            .message_set_wire_format());
    }

    #[test]
    fn test_packing_follows_syntax() {
        let proto2 = DescriptorPool::from_file_descriptor_set(&descriptor_set("proto2")).unwrap();
        let outer = proto2.get_message_by_name("demo.Outer").unwrap();
        assert!(!outer.field_by_name("values").unwrap().is_packed());

        let proto3 = DescriptorPool::from_file_descriptor_set(&descriptor_set("proto3")).unwrap();
        let outer = proto3.get_message_by_name("demo.Outer").unwrap();
        assert!(outer.field_by_name("values").unwrap().is_packed());
        assert!(!outer.field_by_name("unpacked").unwrap().is_packed());
    }

    #[test]
    fn test_decode_serialized_set() {
        let bytes = descriptor_set("proto2").encode_to_vec();
        let pool = DescriptorPool::decode(&bytes).unwrap();
        let note = pool.get_extension_by_name("demo.note").unwrap();
        assert_eq!(note.number(), 100);
        assert_eq!(note.containing_type().full_name(), "demo.Outer");
    }

    #[test]
    fn test_decode_garbage() {
        let err = DescriptorPool::decode(&[0x0A, 0xFF]).unwrap_err();
        assert!(matches!(err, Error::DescriptorParse(_)));
    }
}
