//! Reflective messages.
//!
//! [`DynamicMessage`] is an immutable message of any type described by a
//! [`MessageDescriptor`]. It is produced by a [`MessageBuilder`], either
//! field by field through the reflective API or by parsing the wire format.
//! Messages share their contents on clone and memoize their encoded size.

mod field_set;
mod lite;
mod merge;
mod stream;
mod unknown;
mod value;

pub use field_set::{FieldSet, FieldValue};
pub use lite::{BuilderLite, MessageLite};
pub use stream::{MessageStreamIterator, MessageStreamWriter};
pub use unknown::{UnknownField, UnknownFieldSet, UnknownFieldSetBuilder};
pub use value::Value;

use crate::codec::{CodedReader, CodedWriter};
use crate::descriptor::{FieldDescriptor, MessageDescriptor};
use crate::error::{Error, Result};
use crate::extension::ExtensionRegistry;
use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// An immutable message of a runtime-described type
#[derive(Clone)]
pub struct DynamicMessage {
    inner: Arc<MessageInner>,
}

struct MessageInner {
    descriptor: MessageDescriptor,
    fields: FieldSet,
    unknown_fields: UnknownFieldSet,
    serialized_size: OnceLock<usize>,
}

impl DynamicMessage {
    fn from_parts(
        descriptor: MessageDescriptor,
        mut fields: FieldSet,
        unknown_fields: UnknownFieldSet,
    ) -> Self {
        fields.make_immutable();
        Self {
            inner: Arc::new(MessageInner {
                descriptor,
                fields,
                unknown_fields,
                serialized_size: OnceLock::new(),
            }),
        }
    }

    /// The message of `descriptor`'s type with no fields set
    pub fn default_instance(descriptor: &MessageDescriptor) -> Self {
        Self::from_parts(descriptor.clone(), FieldSet::new(), UnknownFieldSet::new())
    }

    /// Starts building a message of `descriptor`'s type
    pub fn builder(descriptor: &MessageDescriptor) -> MessageBuilder {
        MessageBuilder::new(descriptor)
    }

    /// Parses a complete buffer, failing if required fields are missing
    pub fn parse_from_bytes(
        descriptor: &MessageDescriptor,
        data: &[u8],
        registry: &ExtensionRegistry,
    ) -> Result<Self> {
        let mut builder = MessageBuilder::new(descriptor);
        builder.merge_from_bytes(data, registry)?;
        builder.build()
    }

    /// Parses a complete buffer without checking required fields
    pub fn parse_partial_from_bytes(
        descriptor: &MessageDescriptor,
        data: &[u8],
        registry: &ExtensionRegistry,
    ) -> Result<Self> {
        let mut builder = MessageBuilder::new(descriptor);
        builder.merge_from_bytes(data, registry)?;
        Ok(builder.build_partial())
    }

    /// Parses everything remaining in `reader`
    pub fn parse_from_reader(
        descriptor: &MessageDescriptor,
        reader: &mut CodedReader<'_>,
        registry: &ExtensionRegistry,
    ) -> Result<Self> {
        let mut builder = MessageBuilder::new(descriptor);
        builder.merge_from(reader, registry)?;
        reader.check_last_tag_was(None)?;
        builder.build()
    }

    /// Parses one length-prefixed message from `reader`
    pub fn parse_delimited_from(
        descriptor: &MessageDescriptor,
        reader: &mut CodedReader<'_>,
        registry: &ExtensionRegistry,
    ) -> Result<Self> {
        let mut builder = MessageBuilder::new(descriptor);
        builder.merge_delimited_from(reader, registry)?;
        builder.build()
    }

    /// This message's type
    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.inner.descriptor
    }

    /// The frozen field values
    pub fn fields(&self) -> &FieldSet {
        &self.inner.fields
    }

    /// Fields that were parsed but not recognized
    pub fn unknown_fields(&self) -> &UnknownFieldSet {
        &self.inner.unknown_fields
    }

    /// Whether `field` is present
    pub fn has_field(&self, field: &FieldDescriptor) -> bool {
        self.inner.fields.has_field(field)
    }

    /// The value of a singular field, or its default when absent.
    ///
    /// An absent message field reads as the default instance of its type.
    pub fn get_field(&self, field: &FieldDescriptor) -> Result<Cow<'_, Value>> {
        check_field(self.descriptor(), field)?;
        singular_value(&self.inner.fields, field)
    }

    /// Looks up a regular field by name and returns its value
    pub fn get_field_by_name(&self, name: &str) -> Result<Cow<'_, Value>> {
        let field = field_by_name(self.descriptor(), name)?;
        singular_value(&self.inner.fields, &field)
    }

    /// The values of a repeated field
    pub fn get_repeated_field(&self, field: &FieldDescriptor) -> Result<&[Value]> {
        check_field(self.descriptor(), field)?;
        repeated_values(&self.inner.fields, field)
    }

    /// A builder initialized with this message's contents
    pub fn to_builder(&self) -> MessageBuilder {
        MessageBuilder {
            descriptor: self.inner.descriptor.clone(),
            fields: self.inner.fields.to_mutable(),
            unknown_fields: self.inner.unknown_fields.clone().into(),
        }
    }

    /// Whether every required field is present, recursively
    pub fn is_initialized(&self) -> bool {
        self.inner.fields.is_initialized(&self.inner.descriptor)
    }

    /// Dotted paths of every missing required field, e.g. `child.name` or
    /// `items[2].id`
    pub fn initialization_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        self.find_initialization_errors_with_prefix("", &mut errors);
        errors
    }

    pub(crate) fn find_initialization_errors_with_prefix(
        &self,
        prefix: &str,
        errors: &mut Vec<String>,
    ) {
        self.inner
            .fields
            .find_initialization_errors(&self.inner.descriptor, prefix, errors);
    }
}

impl MessageLite for DynamicMessage {
    fn serialized_size(&self) -> usize {
        *self.inner.serialized_size.get_or_init(|| {
            let unknown = if self.inner.descriptor.message_set_wire_format() {
                self.inner.unknown_fields.serialized_size_as_message_set()
            } else {
                self.inner.unknown_fields.serialized_size()
            };
            self.inner.fields.serialized_size() + unknown
        })
    }

    fn write_to(&self, writer: &mut CodedWriter<'_>) -> Result<()> {
        self.inner.fields.write_to(writer)?;
        if self.inner.descriptor.message_set_wire_format() {
            self.inner.unknown_fields.write_as_message_set_to(writer)
        } else {
            self.inner.unknown_fields.write_to(writer)
        }
    }

    fn is_initialized(&self) -> bool {
        DynamicMessage::is_initialized(self)
    }
}

impl PartialEq for DynamicMessage {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            || (self.inner.descriptor == other.inner.descriptor
                && self.inner.fields == other.inner.fields
                && self.inner.unknown_fields == other.inner.unknown_fields)
    }
}

impl fmt::Debug for DynamicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicMessage")
            .field("type", &self.inner.descriptor.full_name())
            .field("fields", &self.inner.fields)
            .field("unknown_fields", &self.inner.unknown_fields)
            .finish()
    }
}

/// Mutable accumulator for a [`DynamicMessage`]
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    descriptor: MessageDescriptor,
    fields: FieldSet,
    unknown_fields: UnknownFieldSetBuilder,
}

impl MessageBuilder {
    /// Creates an empty builder for `descriptor`'s type
    pub fn new(descriptor: &MessageDescriptor) -> Self {
        Self {
            descriptor: descriptor.clone(),
            fields: FieldSet::new(),
            unknown_fields: UnknownFieldSetBuilder::new(),
        }
    }

    /// The type being built
    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    /// Whether `field` is present
    pub fn has_field(&self, field: &FieldDescriptor) -> bool {
        self.fields.has_field(field)
    }

    /// The value of a singular field, or its default when absent
    pub fn get_field(&self, field: &FieldDescriptor) -> Result<Cow<'_, Value>> {
        check_field(&self.descriptor, field)?;
        singular_value(&self.fields, field)
    }

    /// The values of a repeated field
    pub fn get_repeated_field(&self, field: &FieldDescriptor) -> Result<&[Value]> {
        check_field(&self.descriptor, field)?;
        repeated_values(&self.fields, field)
    }

    /// Sets a singular field
    pub fn set_field(&mut self, field: &FieldDescriptor, value: Value) -> Result<&mut Self> {
        check_field(&self.descriptor, field)?;
        self.fields.set_field(field, value)?;
        Ok(self)
    }

    /// Sets a singular regular field looked up by name
    pub fn set_field_by_name(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let field = field_by_name(&self.descriptor, name)?;
        self.fields.set_field(&field, value.into())?;
        Ok(self)
    }

    /// Replaces every value of a repeated field
    pub fn set_repeated_field(
        &mut self,
        field: &FieldDescriptor,
        values: Vec<Value>,
    ) -> Result<&mut Self> {
        check_field(&self.descriptor, field)?;
        self.fields.set_repeated_field(field, values)?;
        Ok(self)
    }

    /// Replaces the value at `index` of a repeated field
    pub fn set_repeated_field_at(
        &mut self,
        field: &FieldDescriptor,
        index: usize,
        value: Value,
    ) -> Result<&mut Self> {
        check_field(&self.descriptor, field)?;
        self.fields.set_repeated_field_at(field, index, value)?;
        Ok(self)
    }

    /// Appends a value to a repeated field
    pub fn add_repeated_field(&mut self, field: &FieldDescriptor, value: Value) -> Result<&mut Self> {
        check_field(&self.descriptor, field)?;
        self.fields.add_repeated_field(field, value)?;
        Ok(self)
    }

    /// Removes a field
    pub fn clear_field(&mut self, field: &FieldDescriptor) -> Result<&mut Self> {
        check_field(&self.descriptor, field)?;
        self.fields.clear_field(field)?;
        Ok(self)
    }

    /// Removes every field, known and unknown
    pub fn clear(&mut self) -> Result<&mut Self> {
        self.fields.clear()?;
        self.unknown_fields.clear();
        Ok(self)
    }

    /// The unknown fields collected so far
    pub fn unknown_fields(&self) -> UnknownFieldSet {
        self.unknown_fields.clone().build()
    }

    /// Replaces the unknown fields
    pub fn set_unknown_fields(&mut self, unknown_fields: UnknownFieldSet) -> &mut Self {
        self.unknown_fields = unknown_fields.into();
        self
    }

    /// Appends unknown fields
    pub fn merge_unknown_fields(&mut self, unknown_fields: &UnknownFieldSet) -> &mut Self {
        self.unknown_fields.merge_from_set(unknown_fields);
        self
    }

    /// Merges another message of the same type into this builder
    pub fn merge_from_message(&mut self, other: &DynamicMessage) -> Result<&mut Self> {
        if other.descriptor() != &self.descriptor {
            return Err(Error::type_mismatch(
                self.descriptor.full_name(),
                "<message>",
                self.descriptor.full_name(),
                other.descriptor().full_name(),
            ));
        }
        self.fields.merge_from(other.fields())?;
        self.unknown_fields.merge_from_set(other.unknown_fields());
        Ok(self)
    }

    /// Whether every required field is present, recursively
    pub fn is_initialized(&self) -> bool {
        self.fields.is_initialized(&self.descriptor)
    }

    /// Freezes the builder into a message, failing if required fields are
    /// missing anywhere in the tree
    pub fn build(self) -> Result<DynamicMessage> {
        if !self.is_initialized() {
            let mut missing = Vec::new();
            self.fields
                .find_initialization_errors(&self.descriptor, "", &mut missing);
            return Err(Error::UninitializedMessage { missing });
        }
        Ok(self.build_partial())
    }

    /// Freezes the builder into a message without checking required fields
    pub fn build_partial(self) -> DynamicMessage {
        DynamicMessage::from_parts(self.descriptor, self.fields, self.unknown_fields.build())
    }
}

impl BuilderLite for MessageBuilder {
    type Message = DynamicMessage;

    fn merge_from_reader(
        &mut self,
        reader: &mut CodedReader<'_>,
        registry: &ExtensionRegistry,
    ) -> Result<()> {
        self.merge_from(reader, registry)
    }

    fn build(self) -> Result<DynamicMessage> {
        MessageBuilder::build(self)
    }

    fn build_partial(self) -> DynamicMessage {
        MessageBuilder::build_partial(self)
    }
}

fn check_field(descriptor: &MessageDescriptor, field: &FieldDescriptor) -> Result<()> {
    if field.containing_type() == *descriptor {
        Ok(())
    } else {
        Err(Error::FieldNotInMessage {
            field: field.full_name().to_owned(),
            message: descriptor.full_name().to_owned(),
        })
    }
}

fn field_by_name(descriptor: &MessageDescriptor, name: &str) -> Result<FieldDescriptor> {
    descriptor
        .field_by_name(name)
        .ok_or_else(|| Error::FieldNotInMessage {
            field: name.to_owned(),
            message: descriptor.full_name().to_owned(),
        })
}

fn singular_value<'a>(fields: &'a FieldSet, field: &FieldDescriptor) -> Result<Cow<'a, Value>> {
    if field.is_repeated() {
        return Err(Error::NotSingular {
            field: field.full_name().to_owned(),
        });
    }
    match fields.get_field(field) {
        Some(value) => Ok(value),
        None => {
            let message_type = field.require_message_type()?;
            Ok(Cow::Owned(Value::Message(DynamicMessage::default_instance(
                &message_type,
            ))))
        }
    }
}

fn repeated_values<'a>(fields: &'a FieldSet, field: &FieldDescriptor) -> Result<&'a [Value]> {
    if !field.is_repeated() {
        return Err(Error::NotRepeated {
            field: field.full_name().to_owned(),
        });
    }
    Ok(fields.get_repeated_field(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::tests::person_pool;
    use crate::descriptor::DescriptorPool;
    use pretty_assertions::assert_eq;

    fn person(pool: &DescriptorPool) -> MessageDescriptor {
        pool.get_message_by_name("test.Person").unwrap()
    }

    #[test]
    fn test_build_requires_name() {
        let pool = person_pool();
        let err = MessageBuilder::new(&person(&pool)).build().unwrap_err();
        match err {
            Error::UninitializedMessage { missing } => assert_eq!(missing, vec!["name"]),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_nested_initialization_paths() {
        let pool = person_pool();
        let desc = person(&pool);
        let friend = MessageBuilder::new(&desc).build_partial();

        let mut builder = MessageBuilder::new(&desc);
        builder.set_field_by_name("name", "root").unwrap();
        builder
            .set_field(&desc.field_by_name("friend").unwrap(), Value::Message(friend))
            .unwrap();
        let message = builder.build_partial();
        assert!(!message.is_initialized());
        assert_eq!(message.initialization_errors(), vec!["friend.name"]);
    }

    #[test]
    fn test_absent_message_reads_default_instance() {
        let pool = person_pool();
        let desc = person(&pool);
        let message = MessageBuilder::new(&desc).build_partial();
        let friend = message.get_field(&desc.field_by_name("friend").unwrap()).unwrap();
        let friend = friend.as_message().unwrap();
        assert_eq!(friend.descriptor(), &desc);
        assert!(friend.fields().is_empty());
    }

    #[test]
    fn test_foreign_field_rejected() {
        let pool = person_pool();
        let extra = pool.get_message_by_name("test.Person.Extra").unwrap();
        let id = person(&pool).field_by_name("id").unwrap();
        let mut builder = MessageBuilder::new(&extra);
        assert!(matches!(
            builder.set_field(&id, Value::I32(1)),
            Err(Error::FieldNotInMessage { .. })
        ));
    }

    #[test]
    fn test_repeated_access_checks() {
        let pool = person_pool();
        let desc = person(&pool);
        let message = MessageBuilder::new(&desc).build_partial();
        assert!(matches!(
            message.get_field(&desc.field_by_name("email").unwrap()),
            Err(Error::NotSingular { .. })
        ));
        assert!(matches!(
            message.get_repeated_field(&desc.field_by_name("id").unwrap()),
            Err(Error::NotRepeated { .. })
        ));
    }

    #[test]
    fn test_built_message_is_frozen_copy() {
        let pool = person_pool();
        let desc = person(&pool);
        let mut builder = MessageBuilder::new(&desc);
        builder.set_field_by_name("name", "a").unwrap();
        let first = builder.clone().build().unwrap();

        builder.set_field_by_name("name", "b").unwrap();
        let second = builder.build().unwrap();
        assert_eq!(first.get_field_by_name("name").unwrap().as_str(), Some("a"));
        assert_eq!(second.get_field_by_name("name").unwrap().as_str(), Some("b"));
        assert!(first.fields().is_immutable());
    }

    #[test]
    fn test_serialized_size_is_memoized() {
        let pool = person_pool();
        let desc = person(&pool);
        let mut builder = MessageBuilder::new(&desc);
        builder.set_field_by_name("name", "abc").unwrap();
        let message = builder.build().unwrap();
        assert_eq!(message.serialized_size(), 5);
        assert_eq!(message.serialized_size(), 5);
        assert_eq!(message.to_bytes().unwrap(), b"\x0a\x03abc");
    }

    #[test]
    fn test_merge_from_message_recurses() {
        let pool = person_pool();
        let desc = person(&pool);
        let friend_field = desc.field_by_name("friend").unwrap();

        let mut inner_a = MessageBuilder::new(&desc);
        inner_a.set_field_by_name("name", "x").unwrap();
        let mut a = MessageBuilder::new(&desc);
        a.set_field(&friend_field, Value::Message(inner_a.build_partial()))
            .unwrap();

        let mut inner_b = MessageBuilder::new(&desc);
        inner_b.set_field_by_name("id", 7).unwrap();
        let mut b = MessageBuilder::new(&desc);
        b.set_field(&friend_field, Value::Message(inner_b.build_partial()))
            .unwrap();

        a.merge_from_message(&b.build_partial()).unwrap();
        let merged = a.build_partial();
        let friend = merged.get_field(&friend_field).unwrap();
        let friend = friend.as_message().unwrap();
        assert_eq!(friend.get_field_by_name("name").unwrap().as_str(), Some("x"));
        assert_eq!(friend.get_field_by_name("id").unwrap().as_i32(), Some(7));
    }

    #[test]
    fn test_merge_rejects_other_type() {
        let pool = person_pool();
        let extra = pool.get_message_by_name("test.Person.Extra").unwrap();
        let other = DynamicMessage::default_instance(&extra);
        let mut builder = MessageBuilder::new(&person(&pool));
        assert!(matches!(
            builder.merge_from_message(&other),
            Err(Error::TypeMismatch { .. })
        ));
    }
}
