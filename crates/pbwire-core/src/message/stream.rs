//! Sequences of messages framed as repeated field 1.
//!
//! A stream written here is byte-identical to a single container message
//! with a repeated message field numbered 1, so it can be read back either
//! one message at a time or all at once.

use super::{BuilderLite, MessageLite};
use crate::codec::{CodedReader, CodedWriter, Tag, WireType};
use crate::error::{Error, Result};
use crate::extension::ExtensionRegistry;
use std::io::{Read, Write};
use std::iter::FusedIterator;
use tracing::trace;

const STREAM_FIELD: u32 = 1;

/// Writes messages one after another as field 1 entries
pub struct MessageStreamWriter<'a> {
    writer: CodedWriter<'a>,
    count: usize,
}

impl<'a> MessageStreamWriter<'a> {
    /// Creates a writer over `output`
    pub fn new(output: impl Write + 'a) -> Self {
        Self {
            writer: CodedWriter::new(output),
            count: 0,
        }
    }

    /// Appends one message
    pub fn write<M: MessageLite + ?Sized>(&mut self, message: &M) -> Result<()> {
        self.writer.write_message(STREAM_FIELD, message)?;
        self.count += 1;
        Ok(())
    }

    /// Number of messages written so far
    pub fn count(&self) -> usize {
        self.count
    }

    /// Pushes buffered bytes to the output
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }
}

impl Drop for MessageStreamWriter<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.writer.flush() {
            trace!("failed to flush message stream on drop: {}", e);
        }
    }
}

/// Lazily parses the messages of a stream.
///
/// Each message gets a fresh size budget, so the total stream length is not
/// bounded by the reader's size limit. Iteration stops after the first error.
pub struct MessageStreamIterator<'a, 'r, B> {
    reader: CodedReader<'a>,
    prototype: B,
    registry: &'r ExtensionRegistry,
    finished: bool,
}

impl<'a, 'r, B: BuilderLite + Clone> MessageStreamIterator<'a, 'r, B> {
    /// Iterates over the messages in `reader`, building each from a clone of
    /// `prototype`
    pub fn new(reader: CodedReader<'a>, prototype: B, registry: &'r ExtensionRegistry) -> Self {
        Self {
            reader,
            prototype,
            registry,
            finished: false,
        }
    }

    /// Iterates over the messages in a byte stream
    pub fn from_stream(
        input: impl Read + 'a,
        prototype: B,
        registry: &'r ExtensionRegistry,
    ) -> Self {
        Self::new(CodedReader::from_stream(input), prototype, registry)
    }

    fn next_message(&mut self) -> Result<Option<B::Message>> {
        self.reader.reset_size_counter();
        let Some(tag) = self.reader.read_tag()? else {
            return Ok(None);
        };
        if tag != Tag::new(STREAM_FIELD, WireType::LengthDelimited) {
            return Err(Error::UnexpectedStreamTag {
                offset: self.reader.position(),
                tag: tag.raw(),
            });
        }

        let mut builder = self.prototype.clone();
        builder.merge_delimited_from(&mut self.reader, self.registry)?;
        builder.build().map(Some)
    }
}

impl<B: BuilderLite + Clone> Iterator for MessageStreamIterator<'_, '_, B> {
    type Item = Result<B::Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_message() {
            Ok(Some(message)) => Some(Ok(message)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}

impl<B: BuilderLite + Clone> FusedIterator for MessageStreamIterator<'_, '_, B> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{UnknownFieldSet, UnknownFieldSetBuilder};
    use pretty_assertions::assert_eq;

    fn raw() -> UnknownFieldSetBuilder {
        UnknownFieldSetBuilder::new()
    }

    fn message(value: u64) -> UnknownFieldSet {
        let mut builder = UnknownFieldSet::builder();
        builder.add_varint(1, value);
        builder.build()
    }

    #[test]
    fn test_stream_matches_repeated_field_layout() {
        let mut out = Vec::new();
        {
            let mut writer = MessageStreamWriter::new(&mut out);
            writer.write(&message(1)).unwrap();
            writer.write(&message(300)).unwrap();
            assert_eq!(writer.count(), 2);
            writer.flush().unwrap();
        }
        assert_eq!(out, b"\x0a\x02\x08\x01\x0a\x03\x08\xac\x02");

        let messages: Vec<_> =
            MessageStreamIterator::from_stream(out.as_slice(), raw(), ExtensionRegistry::empty())
                .collect::<Result<_>>()
                .unwrap();
        assert_eq!(messages, vec![message(1), message(300)]);
    }

    #[test]
    fn test_empty_stream() {
        let mut iter = MessageStreamIterator::new(
            CodedReader::new(&[]),
            raw(),
            ExtensionRegistry::empty(),
        );
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_unexpected_tag_stops_iteration() {
        let data = b"\x0a\x02\x08\x01\x10\x01";
        let mut iter = MessageStreamIterator::new(
            CodedReader::new(data),
            raw(),
            ExtensionRegistry::empty(),
        );
        assert_eq!(iter.next().unwrap().unwrap(), message(1));
        assert!(matches!(
            iter.next(),
            Some(Err(Error::UnexpectedStreamTag { tag: 0x10, .. }))
        ));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_size_limit_applies_per_message() {
        let mut out = Vec::new();
        {
            let mut writer = MessageStreamWriter::new(&mut out);
            for i in 0..64 {
                writer.write(&message(i)).unwrap();
            }
        }
        let config = crate::codec::ReaderConfig::new().size_limit(16).buffer_size(8);
        let reader = CodedReader::from_stream_with_config(out.as_slice(), config);
        let count = MessageStreamIterator::new(reader, raw(), ExtensionRegistry::empty())
            .collect::<Result<Vec<_>>>()
            .unwrap()
            .len();
        assert_eq!(count, 64);
    }
}
