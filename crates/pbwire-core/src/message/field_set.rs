//! Reflective storage of field values keyed by descriptor.
//!
//! A [`FieldSet`] holds regular fields and extensions alike, ordered by
//! field number. It is mutable while owned by a builder and frozen once the
//! message is built; every mutation on a frozen set fails with
//! [`Error::FrozenFieldSet`].

use super::value::{self, Value};
use super::{DynamicMessage, MessageLite};
use crate::codec::{message_set_item_size, tag_size, varint32_size, CodedWriter};
use crate::descriptor::{FieldDescriptor, MessageDescriptor};
use crate::error::{Error, Result};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// The value(s) stored for one field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// A singular field's value
    Single(Value),
    /// A repeated field's values, never empty
    Repeated(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
struct FieldEntry {
    descriptor: FieldDescriptor,
    value: FieldValue,
}

/// Field values of one message, ordered by field number
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    fields: BTreeMap<u32, FieldEntry>,
    immutable: bool,
}

impl PartialEq for FieldSet {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl FieldSet {
    /// Creates an empty, mutable set
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the set has been frozen
    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// Freezes the set. Idempotent.
    pub fn make_immutable(&mut self) {
        if self.immutable {
            return;
        }
        for entry in self.fields.values_mut() {
            if let FieldValue::Repeated(values) = &mut entry.value {
                values.shrink_to_fit();
            }
        }
        self.immutable = true;
    }

    /// A mutable copy of this set
    pub fn to_mutable(&self) -> Self {
        Self {
            fields: self.fields.clone(),
            immutable: false,
        }
    }

    fn check_mutable(&self) -> Result<()> {
        if self.immutable {
            Err(Error::FrozenFieldSet)
        } else {
            Ok(())
        }
    }

    /// Whether any field is set
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of fields present
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Iterates present fields in ascending number order
    pub fn iter(&self) -> impl Iterator<Item = (&FieldDescriptor, &FieldValue)> + '_ {
        self.fields
            .values()
            .map(|entry| (&entry.descriptor, &entry.value))
    }

    /// Whether `field` is present. A repeated field is present when non-empty.
    pub fn has_field(&self, field: &FieldDescriptor) -> bool {
        self.entry(field).is_some()
    }

    fn entry(&self, field: &FieldDescriptor) -> Option<&FieldEntry> {
        self.fields
            .get(&field.number())
            .filter(|entry| entry.descriptor == *field)
    }

    /// The value of a singular field.
    ///
    /// A present value is borrowed. An absent scalar reads as its declared
    /// default. An absent message field, and any repeated field, yields
    /// `None`.
    pub fn get_field(&self, field: &FieldDescriptor) -> Option<Cow<'_, Value>> {
        if field.is_repeated() {
            return None;
        }
        match self.entry(field) {
            Some(FieldEntry {
                value: FieldValue::Single(value),
                ..
            }) => Some(Cow::Borrowed(value)),
            _ => field.default_value().map(Cow::Owned),
        }
    }

    /// The values of a repeated field; empty when absent or singular
    pub fn get_repeated_field(&self, field: &FieldDescriptor) -> &[Value] {
        match self.entry(field) {
            Some(FieldEntry {
                value: FieldValue::Repeated(values),
                ..
            }) => values,
            _ => &[],
        }
    }

    /// Number of values of a repeated field
    pub fn get_repeated_field_count(&self, field: &FieldDescriptor) -> usize {
        self.get_repeated_field(field).len()
    }

    /// Sets a singular field
    pub fn set_field(&mut self, field: &FieldDescriptor, value: Value) -> Result<()> {
        self.check_mutable()?;
        if field.is_repeated() {
            return Err(Error::NotSingular {
                field: field.full_name().to_owned(),
            });
        }
        value.check_type(field)?;
        self.fields.insert(
            field.number(),
            FieldEntry {
                descriptor: field.clone(),
                value: FieldValue::Single(value),
            },
        );
        Ok(())
    }

    /// Replaces every value of a repeated field. An empty list clears it.
    pub fn set_repeated_field(&mut self, field: &FieldDescriptor, values: Vec<Value>) -> Result<()> {
        self.check_mutable()?;
        check_repeated(field)?;
        for value in &values {
            value.check_type(field)?;
        }
        if values.is_empty() {
            self.fields.remove(&field.number());
        } else {
            self.fields.insert(
                field.number(),
                FieldEntry {
                    descriptor: field.clone(),
                    value: FieldValue::Repeated(values),
                },
            );
        }
        Ok(())
    }

    /// Appends a value to a repeated field
    pub fn add_repeated_field(&mut self, field: &FieldDescriptor, value: Value) -> Result<()> {
        self.check_mutable()?;
        check_repeated(field)?;
        value.check_type(field)?;
        self.extend_repeated(field, vec![value]);
        Ok(())
    }

    /// Replaces the value at `index` of a repeated field
    pub fn set_repeated_field_at(
        &mut self,
        field: &FieldDescriptor,
        index: usize,
        value: Value,
    ) -> Result<()> {
        self.check_mutable()?;
        check_repeated(field)?;
        value.check_type(field)?;
        let count = self.get_repeated_field_count(field);
        match self.fields.get_mut(&field.number()) {
            Some(FieldEntry {
                value: FieldValue::Repeated(values),
                ..
            }) if index < values.len() => {
                values[index] = value;
                Ok(())
            }
            _ => Err(Error::IndexOutOfRange {
                field: field.full_name().to_owned(),
                index,
                len: count,
            }),
        }
    }

    fn extend_repeated(&mut self, field: &FieldDescriptor, values: Vec<Value>) {
        if values.is_empty() {
            return;
        }
        let entry = self
            .fields
            .entry(field.number())
            .or_insert_with(|| FieldEntry {
                descriptor: field.clone(),
                value: FieldValue::Repeated(Vec::new()),
            });
        if entry.descriptor != *field {
            entry.descriptor = field.clone();
            entry.value = FieldValue::Repeated(Vec::new());
        }
        if let FieldValue::Repeated(existing) = &mut entry.value {
            existing.extend(values);
        } else {
            entry.value = FieldValue::Repeated(values);
        }
    }

    /// Removes a field
    pub fn clear_field(&mut self, field: &FieldDescriptor) -> Result<()> {
        self.check_mutable()?;
        if self.entry(field).is_some() {
            self.fields.remove(&field.number());
        }
        Ok(())
    }

    /// Removes every field
    pub fn clear(&mut self) -> Result<()> {
        self.check_mutable()?;
        self.fields.clear();
        Ok(())
    }

    /// Merges `other` into this set.
    ///
    /// Singular scalars are overwritten, repeated values appended, and
    /// singular messages merged recursively.
    pub fn merge_from(&mut self, other: &FieldSet) -> Result<()> {
        self.check_mutable()?;
        for entry in other.fields.values() {
            let field = &entry.descriptor;
            match &entry.value {
                FieldValue::Repeated(values) => {
                    self.extend_repeated(field, values.clone());
                }
                FieldValue::Single(Value::Message(incoming)) => {
                    let merged = match self.get_field(field) {
                        Some(Cow::Borrowed(Value::Message(existing))) => {
                            let mut builder = existing.to_builder();
                            builder.merge_from_message(incoming)?;
                            builder.build_partial()
                        }
                        _ => incoming.clone(),
                    };
                    self.set_field(field, Value::Message(merged))?;
                }
                FieldValue::Single(value) => {
                    self.set_field(field, value.clone())?;
                }
            }
        }
        Ok(())
    }

    /// Whether every required field of `descriptor` is present, recursively
    pub fn is_initialized(&self, descriptor: &MessageDescriptor) -> bool {
        let required_present = descriptor
            .fields()
            .filter(|field| field.is_required())
            .all(|field| self.has_field(&field));
        required_present
            && self.messages().all(|(_, _, message)| message.is_initialized())
    }

    /// Appends the dotted path of every missing required field to `errors`
    pub fn find_initialization_errors(
        &self,
        descriptor: &MessageDescriptor,
        prefix: &str,
        errors: &mut Vec<String>,
    ) {
        for field in descriptor.fields() {
            if field.is_required() && !self.has_field(&field) {
                errors.push(format!("{prefix}{}", field.name()));
            }
        }
        for (field, index, message) in self.messages() {
            let name = if field.is_extension() {
                format!("({})", field.full_name())
            } else {
                field.name().to_owned()
            };
            let path = match index {
                Some(index) => format!("{prefix}{name}[{index}]."),
                None => format!("{prefix}{name}."),
            };
            message.find_initialization_errors_with_prefix(&path, errors);
        }
    }

    /// Every present sub-message, with its index for repeated fields
    fn messages(
        &self,
    ) -> impl Iterator<Item = (&FieldDescriptor, Option<usize>, &DynamicMessage)> + '_ {
        self.fields.values().flat_map(|entry| {
            let (single, repeated): (Option<&Value>, &[Value]) = match &entry.value {
                FieldValue::Single(value) => (Some(value), &[]),
                FieldValue::Repeated(values) => (None, values.as_slice()),
            };
            let single = single.into_iter().map(|value| (None, value));
            let repeated = repeated
                .iter()
                .enumerate()
                .map(|(index, value)| (Some(index), value));
            single.chain(repeated).filter_map(move |(index, value)| {
                value
                    .as_message()
                    .map(|message| (&entry.descriptor, index, message))
            })
        })
    }

    /// Encoded size of every field
    pub fn serialized_size(&self) -> usize {
        self.fields
            .values()
            .map(|entry| field_size(&entry.descriptor, &entry.value))
            .sum()
    }

    /// Writes every field in ascending number order
    pub fn write_to(&self, writer: &mut CodedWriter<'_>) -> Result<()> {
        for entry in self.fields.values() {
            write_field(writer, &entry.descriptor, &entry.value)?;
        }
        Ok(())
    }
}

fn check_repeated(field: &FieldDescriptor) -> Result<()> {
    if field.is_repeated() {
        Ok(())
    } else {
        Err(Error::NotRepeated {
            field: field.full_name().to_owned(),
        })
    }
}

/// Encoded size of one field with all its values
pub(crate) fn field_size(field: &FieldDescriptor, value: &FieldValue) -> usize {
    match value {
        FieldValue::Single(Value::Message(message)) if field.uses_message_set_wire_format() => {
            message_set_item_size(field.number(), message.serialized_size())
        }
        FieldValue::Single(value) => value::size_with_tag(field, value),
        FieldValue::Repeated(values) if field.is_packed() => {
            if values.is_empty() {
                return 0;
            }
            let data: usize = values
                .iter()
                .map(|v| value::size_no_tag(field.field_type(), v))
                .sum();
            tag_size(field.number()) + varint32_size(data as u32) + data
        }
        FieldValue::Repeated(values) => values
            .iter()
            .map(|v| value::size_with_tag(field, v))
            .sum(),
    }
}

/// Writes one field with all its values
pub(crate) fn write_field(
    writer: &mut CodedWriter<'_>,
    field: &FieldDescriptor,
    value: &FieldValue,
) -> Result<()> {
    match value {
        FieldValue::Single(Value::Message(message)) if field.uses_message_set_wire_format() => {
            writer.write_message_set_extension(field.number(), message)
        }
        FieldValue::Single(value) => value::write_with_tag(writer, field, value),
        FieldValue::Repeated(values) if field.is_packed() => {
            let field_type = field.field_type();
            writer.write_packed(
                field.number(),
                values,
                |v| value::size_no_tag(field_type, v),
                |w, v| value::write_no_tag(w, field, v),
            )
        }
        FieldValue::Repeated(values) => {
            for v in values {
                value::write_with_tag(writer, field, v)?;
            }
            Ok(())
        }
    }
}
