//! Preservation of fields a message type doesn't declare.
//!
//! Anything the parser can't map to a known field (or a registered
//! extension) lands here, grouped by field number and wire type, so that
//! re-serializing a message reproduces it.

use super::lite::{BuilderLite, MessageLite};
use crate::codec::{
    length_delimited_size, message_set_item_size, tag_size, varint64_size, CodedReader,
    CodedWriter, Tag, WireType,
};
use crate::error::Result;
use crate::extension::ExtensionRegistry;
use bytes::Bytes;
use std::collections::BTreeMap;
use tracing::trace;

/// Every value seen for one unknown field number, bucketed by wire type
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnknownField {
    varint: Vec<u64>,
    fixed32: Vec<u32>,
    fixed64: Vec<u64>,
    length_delimited: Vec<Bytes>,
    group: Vec<UnknownFieldSet>,
}

impl UnknownField {
    /// Creates an empty field
    pub fn new() -> Self {
        Self::default()
    }

    /// Varint values, in arrival order
    pub fn varint_list(&self) -> &[u64] {
        &self.varint
    }

    /// Fixed 32-bit values
    pub fn fixed32_list(&self) -> &[u32] {
        &self.fixed32
    }

    /// Fixed 64-bit values
    pub fn fixed64_list(&self) -> &[u64] {
        &self.fixed64
    }

    /// Length-delimited payloads
    pub fn length_delimited_list(&self) -> &[Bytes] {
        &self.length_delimited
    }

    /// Group bodies
    pub fn group_list(&self) -> &[UnknownFieldSet] {
        &self.group
    }

    /// Whether no value has been recorded
    pub fn is_empty(&self) -> bool {
        self.varint.is_empty()
            && self.fixed32.is_empty()
            && self.fixed64.is_empty()
            && self.length_delimited.is_empty()
            && self.group.is_empty()
    }

    /// Appends a varint value
    pub fn add_varint(&mut self, value: u64) -> &mut Self {
        self.varint.push(value);
        self
    }

    /// Appends a fixed 32-bit value
    pub fn add_fixed32(&mut self, value: u32) -> &mut Self {
        self.fixed32.push(value);
        self
    }

    /// Appends a fixed 64-bit value
    pub fn add_fixed64(&mut self, value: u64) -> &mut Self {
        self.fixed64.push(value);
        self
    }

    /// Appends a length-delimited payload
    pub fn add_length_delimited(&mut self, value: Bytes) -> &mut Self {
        self.length_delimited.push(value);
        self
    }

    /// Appends a group body
    pub fn add_group(&mut self, value: UnknownFieldSet) -> &mut Self {
        self.group.push(value);
        self
    }

    /// Appends every value of `other`
    pub fn merge_from(&mut self, other: &UnknownField) -> &mut Self {
        self.varint.extend_from_slice(&other.varint);
        self.fixed32.extend_from_slice(&other.fixed32);
        self.fixed64.extend_from_slice(&other.fixed64);
        self.length_delimited
            .extend_from_slice(&other.length_delimited);
        self.group.extend_from_slice(&other.group);
        self
    }

    /// Encoded size of every value under field `number`
    pub fn serialized_size(&self, number: u32) -> usize {
        let tag = tag_size(number);
        let varints: usize = self.varint.iter().map(|v| tag + varint64_size(*v)).sum();
        let fixed = (self.fixed32.len() * (tag + 4)) + (self.fixed64.len() * (tag + 8));
        let delimited: usize = self
            .length_delimited
            .iter()
            .map(|v| tag + length_delimited_size(v.len()))
            .sum();
        let groups: usize = self
            .group
            .iter()
            .map(|g| 2 * tag + g.serialized_size())
            .sum();
        varints + fixed + delimited + groups
    }

    /// Writes every value under field `number`, one wire type at a time
    pub fn write_to(&self, number: u32, writer: &mut CodedWriter<'_>) -> Result<()> {
        for value in &self.varint {
            writer.write_uint64(number, *value)?;
        }
        for value in &self.fixed32 {
            writer.write_fixed32(number, *value)?;
        }
        for value in &self.fixed64 {
            writer.write_fixed64(number, *value)?;
        }
        for value in &self.length_delimited {
            writer.write_bytes(number, value)?;
        }
        for value in &self.group {
            writer.write_group(number, value)?;
        }
        Ok(())
    }

    /// Encoded size of the length-delimited values written as message-set items
    pub fn serialized_size_as_message_set_extension(&self, number: u32) -> usize {
        self.length_delimited
            .iter()
            .map(|v| message_set_item_size(number, v.len()))
            .sum()
    }

    /// Writes the length-delimited values as message-set items.
    ///
    /// Values of other wire types have no message-set form and are dropped.
    pub fn write_as_message_set_extension_to(
        &self,
        number: u32,
        writer: &mut CodedWriter<'_>,
    ) -> Result<()> {
        for value in &self.length_delimited {
            writer.write_raw_message_set_extension(number, value)?;
        }
        Ok(())
    }
}

/// An immutable map from field number to [`UnknownField`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnknownFieldSet {
    fields: BTreeMap<u32, UnknownField>,
}

impl UnknownFieldSet {
    /// The empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts building a set
    pub fn builder() -> UnknownFieldSetBuilder {
        UnknownFieldSetBuilder::new()
    }

    /// Parses a complete buffer as a set of unknown fields
    pub fn parse_from_bytes(data: &[u8]) -> Result<Self> {
        let mut builder = UnknownFieldSetBuilder::new();
        builder.merge_from_bytes(data)?;
        Ok(builder.build())
    }

    /// A builder pre-populated with this set's fields
    pub fn to_builder(&self) -> UnknownFieldSetBuilder {
        let mut builder = UnknownFieldSetBuilder::new();
        builder.merge_from_set(self);
        builder
    }

    /// Whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of distinct field numbers
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether field `number` has any recorded value
    pub fn has_field(&self, number: u32) -> bool {
        self.fields.contains_key(&number)
    }

    /// The values recorded for field `number`
    pub fn field(&self, number: u32) -> Option<&UnknownField> {
        self.fields.get(&number)
    }

    /// Iterates fields in ascending number order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &UnknownField)> + '_ {
        self.fields.iter().map(|(number, field)| (*number, field))
    }

    /// Encoded size when written in the legacy message-set layout
    pub fn serialized_size_as_message_set(&self) -> usize {
        self.fields
            .iter()
            .map(|(number, field)| field.serialized_size_as_message_set_extension(*number))
            .sum()
    }

    /// Writes every length-delimited field as a message-set item
    pub fn write_as_message_set_to(&self, writer: &mut CodedWriter<'_>) -> Result<()> {
        for (number, field) in &self.fields {
            field.write_as_message_set_extension_to(*number, writer)?;
        }
        Ok(())
    }
}

impl MessageLite for UnknownFieldSet {
    fn serialized_size(&self) -> usize {
        self.fields
            .iter()
            .map(|(number, field)| field.serialized_size(*number))
            .sum()
    }

    fn write_to(&self, writer: &mut CodedWriter<'_>) -> Result<()> {
        for (number, field) in &self.fields {
            field.write_to(*number, writer)?;
        }
        Ok(())
    }
}

/// Mutable accumulator for an [`UnknownFieldSet`].
///
/// Values usually arrive in runs for the same field number, so the field
/// most recently written to is kept out of the map until another number is
/// touched or the set is built.
#[derive(Debug, Clone, Default)]
pub struct UnknownFieldSetBuilder {
    fields: BTreeMap<u32, UnknownField>,
    last_field: Option<(u32, UnknownField)>,
}

impl UnknownFieldSetBuilder {
    /// Creates an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    fn flush_last_field(&mut self) {
        if let Some((number, field)) = self.last_field.take() {
            if !field.is_empty() {
                self.fields.insert(number, field);
            }
        }
    }

    fn field_builder(&mut self, number: u32) -> &mut UnknownField {
        if !matches!(&self.last_field, Some((cached, _)) if *cached == number) {
            self.flush_last_field();
        }
        let fields = &mut self.fields;
        &mut self
            .last_field
            .get_or_insert_with(|| (number, fields.remove(&number).unwrap_or_default()))
            .1
    }

    /// Whether field `number` has any recorded value
    pub fn has_field(&self, number: u32) -> bool {
        match &self.last_field {
            Some((cached, field)) if *cached == number => !field.is_empty(),
            _ => self.fields.contains_key(&number),
        }
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self
                .last_field
                .as_ref()
                .map_or(true, |(_, field)| field.is_empty())
    }

    /// Discards every recorded value
    pub fn clear(&mut self) {
        self.fields.clear();
        self.last_field = None;
    }

    /// Replaces everything recorded for field `number`
    pub fn add_field(&mut self, number: u32, field: UnknownField) -> &mut Self {
        *self.field_builder(number) = field;
        self
    }

    /// Appends the values of `field` to field `number`
    pub fn merge_field(&mut self, number: u32, field: &UnknownField) -> &mut Self {
        self.field_builder(number).merge_from(field);
        self
    }

    /// Appends a varint value to field `number`
    pub fn add_varint(&mut self, number: u32, value: u64) -> &mut Self {
        self.field_builder(number).add_varint(value);
        self
    }

    /// Appends a fixed 32-bit value to field `number`
    pub fn add_fixed32(&mut self, number: u32, value: u32) -> &mut Self {
        self.field_builder(number).add_fixed32(value);
        self
    }

    /// Appends a fixed 64-bit value to field `number`
    pub fn add_fixed64(&mut self, number: u32, value: u64) -> &mut Self {
        self.field_builder(number).add_fixed64(value);
        self
    }

    /// Appends a length-delimited payload to field `number`
    pub fn add_length_delimited(&mut self, number: u32, value: Bytes) -> &mut Self {
        self.field_builder(number).add_length_delimited(value);
        self
    }

    /// Appends a group body to field `number`
    pub fn add_group(&mut self, number: u32, value: UnknownFieldSet) -> &mut Self {
        self.field_builder(number).add_group(value);
        self
    }

    /// Appends every field of `other`
    pub fn merge_from_set(&mut self, other: &UnknownFieldSet) -> &mut Self {
        for (number, field) in &other.fields {
            self.merge_field(*number, field);
        }
        self
    }

    /// Records the value of a field whose tag was just read.
    ///
    /// Returns `false` for an end-group tag, which ends the enclosing group.
    pub fn merge_field_from(&mut self, tag: Tag, reader: &mut CodedReader<'_>) -> Result<bool> {
        let number = tag.field_number();
        trace!("preserving unknown field {}", tag);
        match tag.wire_type() {
            WireType::Varint => {
                let value = reader.read_uint64()?;
                self.field_builder(number).add_varint(value);
            }
            WireType::Fixed64 => {
                let value = reader.read_fixed64()?;
                self.field_builder(number).add_fixed64(value);
            }
            WireType::LengthDelimited => {
                let value = reader.read_bytes()?;
                self.field_builder(number).add_length_delimited(value);
            }
            WireType::StartGroup => {
                let mut nested = UnknownFieldSetBuilder::new();
                reader.read_group(number, |r| nested.merge_from(r))?;
                self.field_builder(number).add_group(nested.build());
            }
            WireType::EndGroup => return Ok(false),
            WireType::Fixed32 => {
                let value = reader.read_fixed32()?;
                self.field_builder(number).add_fixed32(value);
            }
        }
        Ok(true)
    }

    /// Reads fields until end of input, the current limit, or an end-group tag
    pub fn merge_from(&mut self, reader: &mut CodedReader<'_>) -> Result<()> {
        while let Some(tag) = reader.read_tag()? {
            if !self.merge_field_from(tag, reader)? {
                break;
            }
        }
        Ok(())
    }

    /// Reads a complete buffer of fields
    pub fn merge_from_bytes(&mut self, data: &[u8]) -> Result<&mut Self> {
        let mut reader = CodedReader::new(data);
        self.merge_from(&mut reader)?;
        Ok(self)
    }

    /// Finishes the set
    pub fn build(mut self) -> UnknownFieldSet {
        self.flush_last_field();
        UnknownFieldSet {
            fields: self.fields,
        }
    }
}

/// Lets raw field sets be parsed wherever a builder is expected, e.g. from a
/// message stream without a schema.
impl BuilderLite for UnknownFieldSetBuilder {
    type Message = UnknownFieldSet;

    fn merge_from_reader(
        &mut self,
        reader: &mut CodedReader<'_>,
        _registry: &ExtensionRegistry,
    ) -> Result<()> {
        self.merge_from(reader)
    }

    fn build(self) -> Result<UnknownFieldSet> {
        Ok(UnknownFieldSetBuilder::build(self))
    }

    fn build_partial(self) -> UnknownFieldSet {
        UnknownFieldSetBuilder::build(self)
    }
}

impl From<UnknownFieldSet> for UnknownFieldSetBuilder {
    fn from(set: UnknownFieldSet) -> Self {
        Self {
            fields: set.fields,
            last_field: None,
        }
    }
}
