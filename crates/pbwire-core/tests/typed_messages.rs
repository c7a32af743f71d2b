//! Hand-written messages speaking the same wire format as reflective ones.

use pbwire_core::codec::{length_delimited_size, tag_size, varint32_size, zigzag_encode32};
use pbwire_core::{
    BuilderLite, CodedReader, CodedWriter, DescriptorPool, DynamicMessage, ExtensionRegistry,
    MessageBuilder, MessageLite, MessageStreamIterator, MessageStreamWriter, Result,
    UnknownFieldSet, UnknownFieldSetBuilder, Value, WireType,
};
use pretty_assertions::assert_eq;
use prost::Message as _;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{DescriptorProto, FieldDescriptorProto, FileDescriptorProto, FileDescriptorSet};

#[derive(Debug, Clone, Default, PartialEq)]
struct Point {
    x: i32,
    y: i32,
    label: Option<String>,
    tags: Vec<u32>,
    unknown_fields: UnknownFieldSet,
}

impl MessageLite for Point {
    fn serialized_size(&self) -> usize {
        let mut size = tag_size(1) + varint32_size(zigzag_encode32(self.x));
        size += tag_size(2) + varint32_size(zigzag_encode32(self.y));
        if let Some(label) = &self.label {
            size += tag_size(3) + length_delimited_size(label.len());
        }
        if !self.tags.is_empty() {
            let data: usize = self.tags.iter().map(|t| varint32_size(*t)).sum();
            size += tag_size(4) + length_delimited_size(data);
        }
        size + self.unknown_fields.serialized_size()
    }

    fn write_to(&self, writer: &mut CodedWriter<'_>) -> Result<()> {
        writer.write_sint32(1, self.x)?;
        writer.write_sint32(2, self.y)?;
        if let Some(label) = &self.label {
            writer.write_string(3, label)?;
        }
        writer.write_packed(
            4,
            &self.tags,
            |t| varint32_size(*t),
            |w, t| w.write_uint32_no_tag(*t),
        )?;
        self.unknown_fields.write_to(writer)
    }
}

#[derive(Debug, Clone, Default)]
struct PointBuilder {
    point: Point,
    unknown_fields: UnknownFieldSetBuilder,
}

impl BuilderLite for PointBuilder {
    type Message = Point;

    fn merge_from_reader(
        &mut self,
        reader: &mut CodedReader<'_>,
        _registry: &ExtensionRegistry,
    ) -> Result<()> {
        while let Some(tag) = reader.read_tag()? {
            match (tag.field_number(), tag.wire_type()) {
                (1, WireType::Varint) => self.point.x = reader.read_sint32()?,
                (2, WireType::Varint) => self.point.y = reader.read_sint32()?,
                (3, WireType::LengthDelimited) => self.point.label = Some(reader.read_string()?),
                (4, WireType::Varint | WireType::LengthDelimited) => {
                    reader.read_repeated(WireType::Varint, &mut self.point.tags, |r| {
                        r.read_uint32()
                    })?
                }
                _ => {
                    if !self.unknown_fields.merge_field_from(tag, reader)? {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    fn build(self) -> Result<Point> {
        Ok(self.build_partial())
    }

    fn build_partial(self) -> Point {
        let mut point = self.point;
        let mut unknown_fields = point.unknown_fields.to_builder();
        unknown_fields.merge_from_set(&self.unknown_fields.build());
        point.unknown_fields = unknown_fields.build();
        point
    }
}

#[derive(Clone, PartialEq, prost::Message)]
struct ProstPoint {
    #[prost(sint32, tag = "1")]
    x: i32,
    #[prost(sint32, tag = "2")]
    y: i32,
    #[prost(string, tag = "3")]
    label: String,
    #[prost(uint32, repeated, tag = "4")]
    tags: Vec<u32>,
}

fn point_pool() -> DescriptorPool {
    let field = |name: &str, number: i32, label: Label, ty: Type| FieldDescriptorProto {
        name: Some(name.to_owned()),
        number: Some(number),
        label: Some(label as i32),
        r#type: Some(ty as i32),
        ..Default::default()
    };
    let set = FileDescriptorSet {
        file: vec![FileDescriptorProto {
            name: Some("geo.proto".to_owned()),
            package: Some("geo".to_owned()),
            syntax: Some("proto3".to_owned()),
            message_type: vec![DescriptorProto {
                name: Some("Point".to_owned()),
                field: vec![
                    field("x", 1, Label::Optional, Type::Sint32),
                    field("y", 2, Label::Optional, Type::Sint32),
                    field("label", 3, Label::Optional, Type::String),
                    field("tags", 4, Label::Repeated, Type::Uint32),
                ],
                ..Default::default()
            }],
            ..Default::default()
        }],
    };
    DescriptorPool::decode(&set.encode_to_vec()).unwrap()
}

fn sample() -> Point {
    Point {
        x: 3,
        y: -2,
        label: Some("origin".to_owned()),
        tags: vec![1, 300],
        unknown_fields: UnknownFieldSet::new(),
    }
}

#[test]
fn test_typed_reflective_and_prost_agree() {
    let point = sample();
    let bytes = point.to_bytes().unwrap();
    assert_eq!(point.serialized_size(), bytes.len());

    let oracle = ProstPoint {
        x: 3,
        y: -2,
        label: "origin".to_owned(),
        tags: vec![1, 300],
    }
    .encode_to_vec();
    assert_eq!(bytes, oracle);

    let pool = point_pool();
    let descriptor = pool.get_message_by_name("geo.Point").unwrap();
    let mut builder = MessageBuilder::new(&descriptor);
    builder
        .set_field_by_name("x", 3)
        .unwrap()
        .set_field_by_name("y", -2)
        .unwrap()
        .set_field_by_name("label", "origin")
        .unwrap()
        .set_repeated_field(
            &descriptor.field_by_name("tags").unwrap(),
            vec![Value::U32(1), Value::U32(300)],
        )
        .unwrap();
    let reflective = builder.build().unwrap();
    assert_eq!(reflective.to_bytes().unwrap(), bytes);

    let parsed =
        DynamicMessage::parse_from_bytes(&descriptor, &bytes, ExtensionRegistry::empty()).unwrap();
    assert_eq!(parsed, reflective);

    let mut typed = PointBuilder::default();
    typed
        .merge_from_bytes(&reflective.to_bytes().unwrap(), ExtensionRegistry::empty())
        .unwrap();
    assert_eq!(typed.build().unwrap(), point);
}

#[test]
fn test_typed_message_keeps_unknown_fields() {
    let mut bytes = sample().to_bytes().unwrap();
    bytes.extend_from_slice(&[0x48, 0x07, 0x55, 0x01, 0x00, 0x00, 0x00]);

    let mut builder = PointBuilder::default();
    builder
        .merge_from_bytes(&bytes, ExtensionRegistry::empty())
        .unwrap();
    let point = builder.build().unwrap();

    assert_eq!(point.unknown_fields.field(9).unwrap().varint_list(), &[7]);
    assert_eq!(point.unknown_fields.field(10).unwrap().fixed32_list(), &[1]);
    assert_eq!(point.to_bytes().unwrap(), bytes);
}

#[test]
fn test_unpacked_tags_are_accepted() {
    let mut bytes = Vec::new();
    prost::encoding::sint32::encode(1, &1, &mut bytes);
    prost::encoding::uint32::encode_repeated(4, &[5, 6], &mut bytes);
    prost::encoding::uint32::encode_packed(4, &[7], &mut bytes);

    let mut builder = PointBuilder::default();
    builder
        .merge_from_bytes(&bytes, ExtensionRegistry::empty())
        .unwrap();
    let point = builder.build().unwrap();
    assert_eq!(point.x, 1);
    assert_eq!(point.tags, vec![5, 6, 7]);
}

#[test]
fn test_typed_message_as_submessage() {
    let point = sample();
    let mut out = Vec::new();
    {
        let mut writer = CodedWriter::new(&mut out);
        writer.write_message(5, &point).unwrap();
        point.write_delimited_to(&mut writer).unwrap();
        writer.flush().unwrap();
    }

    let mut reader = CodedReader::new(&out);
    let tag = reader.read_tag().unwrap().unwrap();
    assert_eq!((tag.field_number(), tag.wire_type()), (5, WireType::LengthDelimited));

    let mut nested = PointBuilder::default();
    nested
        .merge_delimited_from(&mut reader, ExtensionRegistry::empty())
        .unwrap();
    let mut delimited = PointBuilder::default();
    delimited
        .merge_delimited_from(&mut reader, ExtensionRegistry::empty())
        .unwrap();

    assert_eq!(nested.build().unwrap(), point);
    assert_eq!(delimited.build().unwrap(), point);
    assert_eq!(reader.read_tag().unwrap(), None);
}

#[test]
fn test_stream_read_by_typed_and_reflective_builders() {
    let points: Vec<Point> = (0..5)
        .map(|i| Point {
            x: i,
            y: -i,
            label: None,
            tags: (0..i as u32).collect(),
            unknown_fields: UnknownFieldSet::new(),
        })
        .collect();

    let mut out = Vec::new();
    {
        let mut writer = MessageStreamWriter::new(&mut out);
        for point in &points {
            writer.write(point).unwrap();
        }
        assert_eq!(writer.count(), points.len());
    }

    let typed: Vec<Point> =
        MessageStreamIterator::from_stream(out.as_slice(), PointBuilder::default(), ExtensionRegistry::empty())
            .collect::<Result<_>>()
            .unwrap();
    assert_eq!(typed, points);

    let pool = point_pool();
    let descriptor = pool.get_message_by_name("geo.Point").unwrap();
    let reflective: Vec<DynamicMessage> = MessageStreamIterator::new(
        CodedReader::new(&out),
        MessageBuilder::new(&descriptor),
        ExtensionRegistry::empty(),
    )
    .collect::<Result<_>>()
    .unwrap();
    assert_eq!(reflective.len(), points.len());
    for (message, point) in reflective.iter().zip(&points) {
        assert_eq!(message.get_field_by_name("x").unwrap().as_i32(), Some(point.x));
        assert_eq!(message.to_bytes().unwrap(), point.to_bytes().unwrap());
    }
}
