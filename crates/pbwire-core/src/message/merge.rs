//! Wire-format parsing into a [`MessageBuilder`].

use super::value::{self, Value};
use super::MessageBuilder;
use crate::codec::wire::message_set;
use crate::codec::{CodedReader, Tag, WireType};
use crate::descriptor::{FieldDescriptor, FieldType};
use crate::error::Result;
use crate::extension::ExtensionRegistry;
use bytes::Bytes;
use std::borrow::Cow;
use tracing::trace;

impl MessageBuilder {
    /// Merges fields from `reader` until end of input, the current limit, or
    /// an end-group tag.
    ///
    /// Singular scalars are overwritten, repeated fields are appended to and
    /// singular messages are merged recursively. Fields that match nothing
    /// in the descriptor or the registry are kept as unknown fields.
    pub fn merge_from(
        &mut self,
        reader: &mut CodedReader<'_>,
        registry: &ExtensionRegistry,
    ) -> Result<()> {
        while let Some(tag) = reader.read_tag()? {
            if !self.merge_field(tag, reader, registry)? {
                break;
            }
        }
        Ok(())
    }

    fn merge_field(
        &mut self,
        tag: Tag,
        reader: &mut CodedReader<'_>,
        registry: &ExtensionRegistry,
    ) -> Result<bool> {
        let number = tag.field_number();
        if self.descriptor.message_set_wire_format()
            && tag == Tag::new(message_set::ITEM, WireType::StartGroup)
        {
            self.merge_message_set_item(reader, registry)?;
            return Ok(true);
        }

        let field = match self.descriptor.field_by_number(number) {
            Some(field) => Some(field),
            None if self.descriptor.is_extension_number(number) => registry
                .find_by_number(&self.descriptor, number)
                .map(|info| info.descriptor().clone()),
            None => None,
        };
        let Some(field) = field else {
            return self.unknown_fields.merge_field_from(tag, reader);
        };

        let declared = field.field_type().wire_type();
        let packed = field.is_repeated()
            && field.is_packable()
            && tag.wire_type() == WireType::LengthDelimited;
        if tag.wire_type() != declared && !packed {
            trace!(
                "{} arrived as {:?} but is declared {:?}",
                field.full_name(),
                tag.wire_type(),
                declared
            );
            return self.unknown_fields.merge_field_from(tag, reader);
        }

        if field.is_repeated() {
            self.merge_repeated(&field, reader, registry)?;
        } else {
            self.merge_singular(&field, reader, registry)?;
        }
        Ok(true)
    }

    fn merge_singular(
        &mut self,
        field: &FieldDescriptor,
        reader: &mut CodedReader<'_>,
        registry: &ExtensionRegistry,
    ) -> Result<()> {
        match field.field_type() {
            FieldType::Message => {
                let mut sub = self.sub_builder(field)?;
                reader.read_message(|r| sub.merge_from(r, registry))?;
                self.fields.set_field(field, Value::Message(sub.build_partial()))
            }
            FieldType::Group => {
                let mut sub = self.sub_builder(field)?;
                reader.read_group(field.number(), |r| sub.merge_from(r, registry))?;
                self.fields.set_field(field, Value::Message(sub.build_partial()))
            }
            FieldType::Enum => {
                let number = reader.read_enum()?;
                match field.require_enum_type()?.value_by_number(number) {
                    Some(value) => self.fields.set_field(field, Value::Enum(value)),
                    None => {
                        self.unknown_fields
                            .add_varint(field.number(), number as i64 as u64);
                        Ok(())
                    }
                }
            }
            field_type => {
                let value = value::read_scalar(reader, field_type)?;
                self.fields.set_field(field, value)
            }
        }
    }

    fn merge_repeated(
        &mut self,
        field: &FieldDescriptor,
        reader: &mut CodedReader<'_>,
        registry: &ExtensionRegistry,
    ) -> Result<()> {
        let field_type = field.field_type();
        let mut values = Vec::new();

        match field_type {
            FieldType::Message | FieldType::Group => {
                let message_type = field.require_message_type()?;
                let number = field.number();
                reader.read_repeated(field_type.wire_type(), &mut values, |r| {
                    let mut sub = MessageBuilder::new(&message_type);
                    if field_type == FieldType::Group {
                        r.read_group(number, |r| sub.merge_from(r, registry))?;
                    } else {
                        r.read_message(|r| sub.merge_from(r, registry))?;
                    }
                    Ok(Value::Message(sub.build_partial()))
                })?;
            }
            FieldType::Enum => {
                let enum_type = field.require_enum_type()?;
                let mut numbers = Vec::new();
                reader.read_repeated(WireType::Varint, &mut numbers, |r| r.read_enum())?;
                for number in numbers {
                    match enum_type.value_by_number(number) {
                        Some(value) => values.push(Value::Enum(value)),
                        None => {
                            self.unknown_fields
                                .add_varint(field.number(), number as i64 as u64);
                        }
                    }
                }
            }
            _ => {
                reader.read_repeated(field_type.wire_type(), &mut values, |r| {
                    value::read_scalar(r, field_type)
                })?;
            }
        }

        for value in values {
            self.fields.add_repeated_field(field, value)?;
        }
        Ok(())
    }

    /// Builder seeded with the current value of a singular message field
    fn sub_builder(&self, field: &FieldDescriptor) -> Result<MessageBuilder> {
        match self.fields.get_field(field) {
            Some(Cow::Borrowed(Value::Message(existing))) => Ok(existing.to_builder()),
            _ => Ok(MessageBuilder::new(&field.require_message_type()?)),
        }
    }

    /// Reads one message-set item group.
    ///
    /// The type id and the payload may arrive in either order. A payload seen
    /// before its type id is buffered and parsed once the group ends. Items
    /// whose type id is not registered are kept as unknown length-delimited
    /// fields numbered by the type id.
    fn merge_message_set_item(
        &mut self,
        reader: &mut CodedReader<'_>,
        registry: &ExtensionRegistry,
    ) -> Result<()> {
        let mut type_id = 0u32;
        let mut extension: Option<FieldDescriptor> = None;
        let mut payload: Option<Bytes> = None;
        let mut builder: Option<MessageBuilder> = None;

        reader.read_group(message_set::ITEM, |r| {
            while let Some(tag) = r.read_tag()? {
                match (tag.field_number(), tag.wire_type()) {
                    (message_set::TYPE_ID, WireType::Varint) => {
                        type_id = r.read_uint32()?;
                        extension = registry
                            .find_by_number(&self.descriptor, type_id)
                            .map(|info| info.descriptor().clone())
                            .filter(|field| field.field_type() == FieldType::Message);
                    }
                    (message_set::MESSAGE, WireType::LengthDelimited) => match &extension {
                        Some(field) => {
                            if builder.is_none() {
                                builder = Some(self.sub_builder(field)?);
                            }
                            if let Some(sub) = builder.as_mut() {
                                r.read_message(|r| sub.merge_from(r, registry))?;
                            }
                        }
                        None => payload = Some(r.read_bytes()?),
                    },
                    _ => {
                        if !r.skip_field()? {
                            break;
                        }
                    }
                }
            }
            Ok(())
        })?;

        if let Some(bytes) = payload {
            match &extension {
                Some(field) => {
                    let mut sub = match builder.take() {
                        Some(sub) => sub,
                        None => self.sub_builder(field)?,
                    };
                    // Same budget as in-order parsing: item group plus message
                    let mut nested = CodedReader::new(&bytes);
                    nested.set_recursion_limit(
                        reader
                            .recursion_limit()
                            .saturating_sub(reader.recursion_depth() + 2),
                    );
                    sub.merge_from(&mut nested, registry)?;
                    nested.check_last_tag_was(None)?;
                    builder = Some(sub);
                }
                None if type_id != 0 => {
                    self.unknown_fields.add_length_delimited(type_id, bytes);
                }
                None => trace!("dropping message-set item without a type id"),
            }
        }

        if let (Some(field), Some(sub)) = (extension, builder) {
            self.fields.set_field(&field, Value::Message(sub.build_partial()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::tests::person_pool;
    use crate::error::Error;
    use crate::message::{BuilderLite, MessageLite};
    use pretty_assertions::assert_eq;

    fn parse(data: &[u8]) -> Result<MessageBuilder> {
        let pool = person_pool();
        let desc = pool.get_message_by_name("test.Person").unwrap();
        let mut builder = MessageBuilder::new(&desc);
        builder.merge_from_bytes(data, ExtensionRegistry::empty())?;
        Ok(builder)
    }

    #[test]
    fn test_scalars_and_strings() {
        let builder = parse(b"\x0a\x03bob\x10\x2a").unwrap();
        let message = builder.build().unwrap();
        assert_eq!(message.get_field_by_name("name").unwrap().as_str(), Some("bob"));
        assert_eq!(message.get_field_by_name("id").unwrap().as_i32(), Some(42));
    }

    #[test]
    fn test_last_scalar_wins() {
        let message = parse(b"\x10\x01\x10\x02").unwrap().build_partial();
        assert_eq!(message.get_field_by_name("id").unwrap().as_i32(), Some(2));
    }

    #[test]
    fn test_packed_and_unpacked_both_accepted() {
        let packed = parse(b"\x2a\x02\x01\x02").unwrap().build_partial();
        let unpacked = parse(b"\x28\x01\x28\x02").unwrap().build_partial();
        let expected = vec![Value::I64(-1), Value::I64(1)];
        for message in [&packed, &unpacked] {
            let field = message.descriptor().field_by_name("samples").unwrap();
            assert_eq!(message.get_repeated_field(&field).unwrap(), expected.as_slice());
        }
    }

    #[test]
    fn test_unknown_enum_number_kept_as_varint() {
        let message = parse(b"\x20\x09").unwrap().build_partial();
        let field = message.descriptor().field_by_name("color").unwrap();
        assert!(!message.has_field(&field));
        assert_eq!(
            message.unknown_fields().field(4).unwrap().varint_list(),
            &[9]
        );
        assert_eq!(message.to_bytes().unwrap(), b"\x20\x09");
    }

    #[test]
    fn test_wrong_wire_type_goes_to_unknown() {
        let message = parse(b"\x15\x01\x00\x00\x00").unwrap().build_partial();
        assert!(!message.has_field(&message.descriptor().field_by_name("id").unwrap()));
        assert_eq!(message.unknown_fields().field(2).unwrap().fixed32_list(), &[1]);
    }

    #[test]
    fn test_group_field() {
        let message = parse(b"\x3b\x08\x01\x3c").unwrap().build_partial();
        let extra = message.get_field_by_name("extra").unwrap();
        let extra = extra.as_message().unwrap();
        assert_eq!(extra.get_field_by_name("flag").unwrap().as_bool(), Some(true));
        assert_eq!(message.to_bytes().unwrap(), b"\x3b\x08\x01\x3c");
    }

    #[test]
    fn test_mismatched_end_group_fails() {
        assert!(matches!(
            parse(b"\x3b\x08\x01\x44"),
            Err(Error::InvalidEndTag { .. })
        ));
    }

    #[test]
    fn test_stray_end_group_fails() {
        assert!(matches!(parse(b"\x0c"), Err(Error::InvalidEndTag { .. })));
    }

    #[test]
    fn test_singular_message_merges() {
        let message = parse(b"\x32\x02\x10\x05\x32\x05\x0a\x03amy")
            .unwrap()
            .build_partial();
        let friend = message.get_field_by_name("friend").unwrap();
        let friend = friend.as_message().unwrap();
        assert_eq!(friend.get_field_by_name("id").unwrap().as_i32(), Some(5));
        assert_eq!(friend.get_field_by_name("name").unwrap().as_str(), Some("amy"));
    }

    #[test]
    fn test_truncated_input() {
        assert!(matches!(
            parse(b"\x0a\x05ab"),
            Err(Error::TruncatedMessage { .. })
        ));
    }
}
