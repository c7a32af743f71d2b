//! Shared schema for the integration tests.

#![allow(dead_code)]

use pbwire_core::codec::MAX_FIELD_NUMBER;
use pbwire_core::{
    DescriptorPool, EnumDef, ExtensionDef, FieldDef, FieldDescriptor, FieldType, MessageDef,
    MessageDescriptor,
};

pub fn schema() -> DescriptorPool {
    let mut builder = DescriptorPool::builder();
    builder
        .add_enum(
            EnumDef::new("test.Kind")
                .value("UNKNOWN", 0)
                .value("SMALL", 1)
                .value("LARGE", 2),
        )
        .add_message(
            MessageDef::new("test.Node")
                .field(FieldDef::new("child", 1, FieldType::Message).type_name("test.Node"))
                .field(FieldDef::new("value", 2, FieldType::Int32)),
        )
        .add_message(
            MessageDef::new("test.Record")
                .field(FieldDef::new("id", 1, FieldType::UInt64).required())
                .field(FieldDef::new("title", 2, FieldType::String))
                .field(FieldDef::new("kind", 3, FieldType::Enum).type_name("test.Kind"))
                .field(FieldDef::new("scores", 4, FieldType::SInt32).repeated().packed())
                .field(FieldDef::new("notes", 5, FieldType::String).repeated())
                .field(
                    FieldDef::new("parts", 6, FieldType::Message)
                        .repeated()
                        .type_name("test.Record.Part"),
                )
                .field(FieldDef::new("owner", 7, FieldType::Message).type_name("test.Record.Part"))
                .field(FieldDef::new("ratio", 8, FieldType::Double))
                .field(FieldDef::new("checksum", 9, FieldType::Fixed32))
                .field(FieldDef::new("blob", 10, FieldType::Bytes))
                .extension_range(100..200),
        )
        .add_message(
            MessageDef::new("test.Record.Part")
                .field(FieldDef::new("name", 1, FieldType::String).required())
                .field(FieldDef::new("weight", 2, FieldType::SFixed64)),
        )
        .add_message(
            MessageDef::new("test.Container")
                .extension_range(4..MAX_FIELD_NUMBER + 1)
                .message_set_wire_format(true),
        )
        .add_message(
            MessageDef::new("test.Payload").field(FieldDef::new("text", 1, FieldType::String)),
        )
        .add_extension(ExtensionDef::new(
            "test.Payload.item",
            "test.Container",
            FieldDef::new("item", 1000, FieldType::Message).type_name("test.Payload"),
        ))
        .add_extension(ExtensionDef::new(
            "test.Node.tree",
            "test.Container",
            FieldDef::new("tree", 1001, FieldType::Message).type_name("test.Node"),
        ))
        .add_extension(ExtensionDef::new(
            "test.priority",
            "test.Record",
            FieldDef::new("priority", 100, FieldType::Int32),
        ))
        .add_extension(ExtensionDef::new(
            "test.labels",
            "test.Record",
            FieldDef::new("labels", 101, FieldType::String).repeated(),
        ))
        .add_extension(ExtensionDef::new(
            "test.audit",
            "test.Record",
            FieldDef::new("audit", 102, FieldType::Message).type_name("test.Record.Part"),
        ));
    builder.build().expect("test schema is valid")
}

pub fn message(pool: &DescriptorPool, name: &str) -> MessageDescriptor {
    pool.get_message_by_name(name)
        .unwrap_or_else(|| panic!("missing message type {name}"))
}

pub fn field(descriptor: &MessageDescriptor, name: &str) -> FieldDescriptor {
    descriptor
        .field_by_name(name)
        .unwrap_or_else(|| panic!("missing field {name}"))
}

pub fn extension(pool: &DescriptorPool, name: &str) -> FieldDescriptor {
    pool.get_extension_by_name(name)
        .unwrap_or_else(|| panic!("missing extension {name}"))
}
