//! Schema descriptors.
//!
//! A [`DescriptorPool`] owns every message, enum and extension definition of
//! a schema in flat arenas. Descriptors handed out by the pool are cheap
//! handles (pool plus index), so message types may refer to each other in
//! cycles without reference loops. Handles compare equal when they point at
//! the same entry of the same pool.
//!
//! Pools are built with [`DescriptorPoolBuilder`] or loaded from a serialized
//! `FileDescriptorSet`.

mod builder;
mod field_type;
mod schema;

pub use builder::{DescriptorPoolBuilder, EnumDef, ExtensionDef, FieldDef, MessageDef};
pub use field_type::{FieldType, Label, MappedType};

use crate::error::{Error, Result};
use crate::message::Value;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::Arc;

/// An immutable collection of resolved schema definitions
#[derive(Clone)]
pub struct DescriptorPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug, Default)]
pub(crate) struct PoolInner {
    messages: Vec<MessageData>,
    enums: Vec<EnumData>,
    extensions: Vec<FieldData>,
    message_names: HashMap<String, usize>,
    enum_names: HashMap<String, usize>,
    extension_names: HashMap<String, usize>,
}

#[derive(Debug)]
pub(crate) struct MessageData {
    name: String,
    full_name: String,
    /// Sorted by field number
    fields: Vec<FieldData>,
    fields_by_number: HashMap<u32, usize>,
    fields_by_name: HashMap<String, usize>,
    extension_ranges: Vec<Range<u32>>,
    message_set_wire_format: bool,
}

#[derive(Debug)]
pub(crate) struct FieldData {
    name: String,
    full_name: String,
    number: u32,
    field_type: FieldType,
    label: Label,
    packed: bool,
    containing_type: usize,
    message_type: Option<usize>,
    enum_type: Option<usize>,
    /// Explicit default for scalar, string and bytes fields
    default_value: Option<Value>,
    /// Explicit default for enum fields, as an index into the enum's values
    default_enum_value: Option<usize>,
}

#[derive(Debug)]
pub(crate) struct EnumData {
    name: String,
    full_name: String,
    values: Vec<EnumValueData>,
    /// First declared value wins when numbers are aliased
    values_by_number: HashMap<i32, usize>,
    values_by_name: HashMap<String, usize>,
}

#[derive(Debug)]
pub(crate) struct EnumValueData {
    name: String,
    number: i32,
}

impl DescriptorPool {
    /// Starts building a new pool
    pub fn builder() -> DescriptorPoolBuilder {
        DescriptorPoolBuilder::new()
    }

    pub(crate) fn from_inner(inner: PoolInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Looks up a message type by its fully-qualified name
    pub fn get_message_by_name(&self, full_name: &str) -> Option<MessageDescriptor> {
        let full_name = full_name.trim_start_matches('.');
        self.inner
            .message_names
            .get(full_name)
            .map(|&index| MessageDescriptor::new(self.clone(), index))
    }

    /// Looks up an enum type by its fully-qualified name
    pub fn get_enum_by_name(&self, full_name: &str) -> Option<EnumDescriptor> {
        let full_name = full_name.trim_start_matches('.');
        self.inner
            .enum_names
            .get(full_name)
            .map(|&index| EnumDescriptor::new(self.clone(), index))
    }

    /// Looks up an extension field by its fully-qualified name
    pub fn get_extension_by_name(&self, full_name: &str) -> Option<FieldDescriptor> {
        let full_name = full_name.trim_start_matches('.');
        self.inner
            .extension_names
            .get(full_name)
            .map(|&index| FieldDescriptor::new(self.clone(), FieldKey::Extension(index)))
    }

    /// Every message type in the pool, in definition order
    pub fn messages(&self) -> impl ExactSizeIterator<Item = MessageDescriptor> + '_ {
        (0..self.inner.messages.len()).map(move |index| MessageDescriptor::new(self.clone(), index))
    }

    /// Every enum type in the pool, in definition order
    pub fn enums(&self) -> impl ExactSizeIterator<Item = EnumDescriptor> + '_ {
        (0..self.inner.enums.len()).map(move |index| EnumDescriptor::new(self.clone(), index))
    }

    /// Every extension field in the pool, in definition order
    pub fn extensions(&self) -> impl ExactSizeIterator<Item = FieldDescriptor> + '_ {
        (0..self.inner.extensions.len())
            .map(move |index| FieldDescriptor::new(self.clone(), FieldKey::Extension(index)))
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }
}

impl fmt::Debug for DescriptorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorPool")
            .field("messages", &self.inner.messages.len())
            .field("enums", &self.inner.enums.len())
            .field("extensions", &self.inner.extensions.len())
            .finish()
    }
}

impl PartialEq for DescriptorPool {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for DescriptorPool {}

/// Handle to a message type
#[derive(Clone)]
pub struct MessageDescriptor {
    pool: DescriptorPool,
    index: usize,
}

impl MessageDescriptor {
    fn new(pool: DescriptorPool, index: usize) -> Self {
        Self { pool, index }
    }

    fn data(&self) -> &MessageData {
        &self.pool.inner.messages[self.index]
    }

    /// The pool this type belongs to
    pub fn pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// Short name
    pub fn name(&self) -> &str {
        &self.data().name
    }

    /// Fully-qualified name
    pub fn full_name(&self) -> &str {
        &self.data().full_name
    }

    /// Regular (non-extension) fields, ordered by field number
    pub fn fields(&self) -> impl ExactSizeIterator<Item = FieldDescriptor> + '_ {
        (0..self.data().fields.len()).map(move |index| {
            FieldDescriptor::new(
                self.pool.clone(),
                FieldKey::Field {
                    message: self.index,
                    index,
                },
            )
        })
    }

    /// Looks up a regular field by number
    pub fn field_by_number(&self, number: u32) -> Option<FieldDescriptor> {
        self.data().fields_by_number.get(&number).map(|&index| {
            FieldDescriptor::new(
                self.pool.clone(),
                FieldKey::Field {
                    message: self.index,
                    index,
                },
            )
        })
    }

    /// Looks up a regular field by short name
    pub fn field_by_name(&self, name: &str) -> Option<FieldDescriptor> {
        self.data().fields_by_name.get(name).map(|&index| {
            FieldDescriptor::new(
                self.pool.clone(),
                FieldKey::Field {
                    message: self.index,
                    index,
                },
            )
        })
    }

    /// Declared extension ranges, end-exclusive
    pub fn extension_ranges(&self) -> &[Range<u32>] {
        &self.data().extension_ranges
    }

    /// Whether `number` falls inside one of the declared extension ranges
    pub fn is_extension_number(&self, number: u32) -> bool {
        self.data()
            .extension_ranges
            .iter()
            .any(|range| range.contains(&number))
    }

    /// Whether extensions of this type use the legacy message-set layout
    pub fn message_set_wire_format(&self) -> bool {
        self.data().message_set_wire_format
    }

    /// Extensions in this type's pool that extend it
    pub fn extensions(&self) -> impl Iterator<Item = FieldDescriptor> + '_ {
        self.pool
            .extensions()
            .filter(move |ext| ext.data().containing_type == self.index)
    }
}

impl PartialEq for MessageDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.pool.ptr_eq(&other.pool)
    }
}

impl Eq for MessageDescriptor {}

impl Hash for MessageDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pool.id().hash(state);
        self.index.hash(state);
    }
}

impl fmt::Debug for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageDescriptor")
            .field(&self.full_name())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FieldKey {
    Field { message: usize, index: usize },
    Extension(usize),
}

/// Handle to a field, either a regular field or an extension
#[derive(Clone)]
pub struct FieldDescriptor {
    pool: DescriptorPool,
    key: FieldKey,
}

impl FieldDescriptor {
    fn new(pool: DescriptorPool, key: FieldKey) -> Self {
        Self { pool, key }
    }

    fn data(&self) -> &FieldData {
        match self.key {
            FieldKey::Field { message, index } => &self.pool.inner.messages[message].fields[index],
            FieldKey::Extension(index) => &self.pool.inner.extensions[index],
        }
    }

    /// Short name
    pub fn name(&self) -> &str {
        &self.data().name
    }

    /// Fully-qualified name
    pub fn full_name(&self) -> &str {
        &self.data().full_name
    }

    /// Field number
    pub fn number(&self) -> u32 {
        self.data().number
    }

    /// Declared type
    pub fn field_type(&self) -> FieldType {
        self.data().field_type
    }

    /// In-memory type of this field's values
    pub fn mapped_type(&self) -> MappedType {
        self.data().field_type.mapped_type()
    }

    /// Cardinality
    pub fn label(&self) -> Label {
        self.data().label
    }

    /// Whether this field holds a list
    pub fn is_repeated(&self) -> bool {
        self.data().label == Label::Repeated
    }

    /// Whether this field must be set for its message to be initialized
    pub fn is_required(&self) -> bool {
        self.data().label == Label::Required
    }

    /// Whether repeated values are written as one packed block
    pub fn is_packed(&self) -> bool {
        self.data().packed
    }

    /// Whether this is a repeated field of a type that admits packed encoding
    pub fn is_packable(&self) -> bool {
        self.is_repeated() && self.data().field_type.is_packable()
    }

    /// Whether this field is an extension
    pub fn is_extension(&self) -> bool {
        matches!(self.key, FieldKey::Extension(_))
    }

    /// Whether this is an extension written in the legacy message-set item layout
    pub fn uses_message_set_wire_format(&self) -> bool {
        self.is_extension()
            && !self.is_repeated()
            && self.data().field_type == FieldType::Message
            && self.containing_type().message_set_wire_format()
    }

    /// The message type this field belongs to (the extended type for extensions)
    pub fn containing_type(&self) -> MessageDescriptor {
        MessageDescriptor::new(self.pool.clone(), self.data().containing_type)
    }

    /// The value type of a message or group field
    pub fn message_type(&self) -> Option<MessageDescriptor> {
        self.data()
            .message_type
            .map(|index| MessageDescriptor::new(self.pool.clone(), index))
    }

    /// The value type of an enum field
    pub fn enum_type(&self) -> Option<EnumDescriptor> {
        self.data()
            .enum_type
            .map(|index| EnumDescriptor::new(self.pool.clone(), index))
    }

    pub(crate) fn require_message_type(&self) -> Result<MessageDescriptor> {
        self.message_type().ok_or_else(|| {
            Error::descriptor_build(format!("field '{}' has no message type", self.full_name()))
        })
    }

    pub(crate) fn require_enum_type(&self) -> Result<EnumDescriptor> {
        self.enum_type().ok_or_else(|| {
            Error::descriptor_build(format!("field '{}' has no enum type", self.full_name()))
        })
    }

    /// The value an unset singular field reads as.
    ///
    /// Returns `None` for repeated and message fields; callers substitute an
    /// empty list or the type's default instance.
    pub fn default_value(&self) -> Option<Value> {
        let data = self.data();
        if data.label == Label::Repeated {
            return None;
        }
        if let Some(value) = &data.default_value {
            return Some(value.clone());
        }
        match data.field_type {
            FieldType::Message | FieldType::Group => None,
            FieldType::Enum => {
                let enum_type = self.enum_type()?;
                match data.default_enum_value {
                    Some(index) => Some(Value::Enum(EnumValueDescriptor::new(enum_type, index))),
                    None => enum_type.default_value().map(Value::Enum),
                }
            }
            other => Value::zero(other),
        }
    }
}

impl PartialEq for FieldDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.pool.ptr_eq(&other.pool)
    }
}

impl Eq for FieldDescriptor {}

impl Hash for FieldDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pool.id().hash(state);
        self.key.hash(state);
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("name", &self.full_name())
            .field("number", &self.number())
            .field("type", &self.field_type())
            .field("label", &self.label())
            .finish()
    }
}

/// Handle to an enum type
#[derive(Clone)]
pub struct EnumDescriptor {
    pool: DescriptorPool,
    index: usize,
}

impl EnumDescriptor {
    fn new(pool: DescriptorPool, index: usize) -> Self {
        Self { pool, index }
    }

    fn data(&self) -> &EnumData {
        &self.pool.inner.enums[self.index]
    }

    /// Short name
    pub fn name(&self) -> &str {
        &self.data().name
    }

    /// Fully-qualified name
    pub fn full_name(&self) -> &str {
        &self.data().full_name
    }

    /// Values in declaration order
    pub fn values(&self) -> impl ExactSizeIterator<Item = EnumValueDescriptor> + '_ {
        (0..self.data().values.len()).map(move |index| EnumValueDescriptor::new(self.clone(), index))
    }

    /// Looks up a value by number; aliases resolve to the first declaration
    pub fn value_by_number(&self, number: i32) -> Option<EnumValueDescriptor> {
        self.data()
            .values_by_number
            .get(&number)
            .map(|&index| EnumValueDescriptor::new(self.clone(), index))
    }

    /// Looks up a value by name
    pub fn value_by_name(&self, name: &str) -> Option<EnumValueDescriptor> {
        self.data()
            .values_by_name
            .get(name)
            .map(|&index| EnumValueDescriptor::new(self.clone(), index))
    }

    /// The first declared value
    pub fn default_value(&self) -> Option<EnumValueDescriptor> {
        (!self.data().values.is_empty()).then(|| EnumValueDescriptor::new(self.clone(), 0))
    }
}

impl PartialEq for EnumDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.pool.ptr_eq(&other.pool)
    }
}

impl Eq for EnumDescriptor {}

impl Hash for EnumDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.pool.id().hash(state);
        self.index.hash(state);
    }
}

impl fmt::Debug for EnumDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EnumDescriptor")
            .field(&self.full_name())
            .finish()
    }
}

/// Handle to one value of an enum type
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct EnumValueDescriptor {
    enum_type: EnumDescriptor,
    index: usize,
}

impl EnumValueDescriptor {
    fn new(enum_type: EnumDescriptor, index: usize) -> Self {
        Self { enum_type, index }
    }

    fn data(&self) -> &EnumValueData {
        &self.enum_type.data().values[self.index]
    }

    /// Value name
    pub fn name(&self) -> &str {
        &self.data().name
    }

    /// Numeric value written on the wire
    pub fn number(&self) -> i32 {
        self.data().number
    }

    /// The enum this value belongs to
    pub fn enum_type(&self) -> &EnumDescriptor {
        &self.enum_type
    }
}

impl fmt::Debug for EnumValueDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} = {}",
            self.enum_type.full_name(),
            self.name(),
            self.number()
        )
    }
}
