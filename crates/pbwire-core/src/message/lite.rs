//! The minimal message contract shared by hand-written and reflective messages.

use crate::codec::{encode_to_vec, CodedReader, CodedWriter};
use crate::error::Result;
use crate::extension::ExtensionRegistry;

/// Anything that can serialize itself to the wire format.
///
/// `serialized_size` must agree exactly with what `write_to` emits; the
/// writer relies on it for length prefixes.
pub trait MessageLite {
    /// Exact encoded size in bytes
    fn serialized_size(&self) -> usize;

    /// Writes every field to `writer`
    fn write_to(&self, writer: &mut CodedWriter<'_>) -> Result<()>;

    /// Whether every required field is present
    fn is_initialized(&self) -> bool {
        true
    }

    /// Serializes into a freshly allocated buffer of exactly the right size
    fn to_bytes(&self) -> Result<Vec<u8>> {
        encode_to_vec(self)
    }

    /// Writes a varint length prefix followed by the message
    fn write_delimited_to(&self, writer: &mut CodedWriter<'_>) -> Result<()> {
        writer.write_raw_varint32(self.serialized_size() as u32)?;
        self.write_to(writer)
    }
}

/// A mutable accumulator that produces a [`MessageLite`]
pub trait BuilderLite {
    /// The message type this builder produces
    type Message: MessageLite;

    /// Merges fields from `reader` until end of input, the current limit, or
    /// an end-group tag
    fn merge_from_reader(
        &mut self,
        reader: &mut CodedReader<'_>,
        registry: &ExtensionRegistry,
    ) -> Result<()>;

    /// Freezes the builder, failing if required fields are missing
    fn build(self) -> Result<Self::Message>;

    /// Freezes the builder without checking required fields
    fn build_partial(self) -> Self::Message;

    /// Merges a complete serialized message
    fn merge_from_bytes(&mut self, data: &[u8], registry: &ExtensionRegistry) -> Result<()> {
        let mut reader = CodedReader::new(data);
        self.merge_from_reader(&mut reader, registry)?;
        reader.check_last_tag_was(None)
    }

    /// Merges one length-prefixed message
    fn merge_delimited_from(
        &mut self,
        reader: &mut CodedReader<'_>,
        registry: &ExtensionRegistry,
    ) -> Result<()> {
        reader.read_message(|r| self.merge_from_reader(r, registry))
    }
}
