//! Error types for the pbwire-core library.
//!
//! Every failure the codec can produce is a variant of [`Error`]. Decoding
//! errors carry the byte offset at which they were detected; reflection
//! errors name the message type and field involved.

use thiserror::Error;

/// Result type alias for pbwire operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all pbwire operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A varint ran past the maximum encoded length for its width
    #[error("malformed varint at offset {offset}: more than 10 bytes")]
    MalformedVarint {
        /// Byte offset where the varint started
        offset: usize,
    },

    /// The input ended before a declared length or limit was satisfied
    #[error("truncated message at offset {offset}: input ended in the middle of a field or a length was out of bounds")]
    TruncatedMessage {
        /// Byte offset where more data was expected
        offset: usize,
    },

    /// A length prefix decoded to a negative value
    #[error("negative size {size} at offset {offset}")]
    NegativeSize {
        /// Byte offset of the length prefix
        offset: usize,
        /// The decoded (negative) length
        size: i32,
    },

    /// A tag with value zero (or field number zero) was read as a real tag
    #[error("invalid tag at offset {offset}: tag {raw} has field number zero")]
    InvalidTag {
        /// Byte offset of the tag
        offset: usize,
        /// Raw tag value
        raw: u32,
    },

    /// A tag carried one of the two undefined wire types
    #[error("invalid wire type {wire_type} at offset {offset}")]
    InvalidWireType {
        /// Byte offset of the tag
        offset: usize,
        /// The undefined wire type value
        wire_type: u8,
    },

    /// A group or message was not closed by the matching end tag
    #[error("invalid end tag at offset {offset}: expected end of group {expected:?}, found end of group {found:?}")]
    InvalidEndTag {
        /// Byte offset after the offending tag
        offset: usize,
        /// Field number of the group being closed, `None` for a length-delimited message
        expected: Option<u32>,
        /// Field number of the end-group tag actually seen, `None` for end of input
        found: Option<u32>,
    },

    /// Nested message/group depth exceeded the configured limit
    #[error("recursion limit of {limit} exceeded: message nesting is too deep")]
    RecursionLimitExceeded {
        /// The configured limit
        limit: usize,
    },

    /// Total bytes read exceeded the configured limit
    #[error("size limit of {limit} bytes exceeded")]
    SizeLimitExceeded {
        /// The configured limit
        limit: usize,
    },

    /// A fixed-capacity write target was exhausted
    #[error("out of space: fixed-size output buffer of {capacity} bytes is full")]
    OutOfSpace {
        /// Capacity of the output buffer
        capacity: usize,
    },

    /// The writer emitted a different number of bytes than was precomputed
    #[error("did not write as much data as expected: {remaining} bytes of {capacity} left unwritten")]
    SizeMismatch {
        /// Capacity that was reserved from the size computation
        capacity: usize,
        /// Bytes left unwritten
        remaining: usize,
    },

    /// `build()` was called while required fields were missing
    #[error("message missing required fields: {}", missing.join(", "))]
    UninitializedMessage {
        /// Dotted paths of every missing field
        missing: Vec<String>,
    },

    /// A value of the wrong type was assigned through the reflective API
    #[error("wrong object type for field '{field}' of '{message}': expected {expected}, got {found}")]
    TypeMismatch {
        /// Full name of the owning message type
        message: String,
        /// Field name
        field: String,
        /// Expected value type
        expected: String,
        /// Supplied value type
        found: String,
    },

    /// A field descriptor was used with a message type it doesn't belong to
    #[error("field '{field}' does not belong to message type '{message}'")]
    FieldNotInMessage {
        /// Full name of the field
        field: String,
        /// Full name of the message type
        message: String,
    },

    /// A repeated-only operation was applied to a singular field
    #[error("field '{field}' is not repeated")]
    NotRepeated {
        /// Full name of the field
        field: String,
    },

    /// A singular-only operation was applied to a repeated field
    #[error("field '{field}' is repeated")]
    NotSingular {
        /// Full name of the field
        field: String,
    },

    /// A repeated-field index was past the end of the list
    #[error("index {index} out of range for field '{field}' with {len} values")]
    IndexOutOfRange {
        /// Full name of the field
        field: String,
        /// The requested index
        index: usize,
        /// Number of values present
        len: usize,
    },

    /// A delimited message stream contained something other than field 1 entries
    #[error("unexpected tag {tag} at offset {offset} in message stream: expected field 1, length-delimited")]
    UnexpectedStreamTag {
        /// Byte offset after the tag
        offset: usize,
        /// Raw tag value
        tag: u32,
    },

    /// An attempt was made to mutate a frozen field set
    #[error("field set is immutable: message has already been built")]
    FrozenFieldSet,

    /// A string field contained invalid UTF-8
    #[error("invalid UTF-8 in string field at offset {offset}")]
    InvalidUtf8 {
        /// Byte offset where the string started
        offset: usize,
    },

    /// Invalid field number in a descriptor
    #[error("invalid field number {number}: must be between 1 and {max}")]
    InvalidFieldNumber {
        /// The invalid field number
        number: u32,
        /// Maximum valid field number
        max: u32,
    },

    /// Failed to resolve a schema into a descriptor pool
    #[error("failed to build descriptor pool: {0}")]
    DescriptorBuild(String),

    /// Failed to decode a serialized FileDescriptorSet
    #[error("failed to parse FileDescriptorSet: {0}")]
    DescriptorParse(#[from] prost::DecodeError),

    /// I/O failure on the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates a new malformed varint error
    pub fn malformed_varint(offset: usize) -> Self {
        Self::MalformedVarint { offset }
    }

    /// Creates a new truncated message error
    pub fn truncated(offset: usize) -> Self {
        Self::TruncatedMessage { offset }
    }

    /// Creates a new invalid end tag error
    pub fn invalid_end_tag(offset: usize, expected: Option<u32>, found: Option<u32>) -> Self {
        Self::InvalidEndTag {
            offset,
            expected,
            found,
        }
    }

    /// Creates a new type mismatch error
    pub fn type_mismatch(
        message: impl Into<String>,
        field: impl Into<String>,
        expected: impl Into<String>,
        found: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            message: message.into(),
            field: field.into(),
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates a new descriptor build error
    pub fn descriptor_build(msg: impl Into<String>) -> Self {
        Self::DescriptorBuild(msg.into())
    }

    /// Returns true if this error was caused by malformed or hostile input,
    /// as opposed to a capacity or programming error on the caller's side
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedVarint { .. }
                | Self::TruncatedMessage { .. }
                | Self::NegativeSize { .. }
                | Self::InvalidTag { .. }
                | Self::InvalidWireType { .. }
                | Self::InvalidEndTag { .. }
                | Self::RecursionLimitExceeded { .. }
                | Self::SizeLimitExceeded { .. }
                | Self::InvalidUtf8 { .. }
                | Self::UnexpectedStreamTag { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::truncated(12);
        assert!(err.to_string().contains("truncated"));
        assert!(err.to_string().contains("12"));

        let err = Error::UninitializedMessage {
            missing: vec!["a".into(), "b.c".into()],
        };
        assert!(err.to_string().ends_with("a, b.c"));
    }

    #[test]
    fn test_type_mismatch_names_field() {
        let err = Error::type_mismatch("pkg.Person", "age", "int32", "string");
        let text = err.to_string();
        assert!(text.contains("pkg.Person"));
        assert!(text.contains("'age'"));
    }

    #[test]
    fn test_is_input_error() {
        assert!(Error::malformed_varint(0).is_input_error());
        assert!(Error::RecursionLimitExceeded { limit: 64 }.is_input_error());
        assert!(!Error::OutOfSpace { capacity: 4 }.is_input_error());
        assert!(!Error::FrozenFieldSet.is_input_error());
    }
}
