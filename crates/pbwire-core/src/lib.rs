//! # pbwire-core
//!
//! A Protocol Buffers runtime for messages whose types are only known at
//! run time.
//!
//! This crate provides:
//! - A streaming wire-format reader and writer with nesting and size limits
//! - An arena of message, enum and extension descriptors
//! - Immutable reflective messages with builders, unknown-field preservation
//!   and message-set support
//! - An extension registry with typed extension handles
//! - Framing for streams of messages
//!
//! ## Architecture
//!
//! - [`codec`]: `CodedReader`, `CodedWriter` and wire-format helpers
//! - [`descriptor`]: `DescriptorPool` and the descriptor handles
//! - [`message`]: `DynamicMessage`, `MessageBuilder`, unknown fields and streams
//! - [`extension`]: `ExtensionRegistry` and `GeneratedExtension`
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```
//! use pbwire_core::{
//!     DescriptorPool, DynamicMessage, ExtensionRegistry, FieldDef, FieldType, MessageBuilder,
//!     MessageDef, MessageLite,
//! };
//!
//! let mut pool = DescriptorPool::builder();
//! pool.add_message(
//!     MessageDef::new("demo.Point")
//!         .field(FieldDef::new("x", 1, FieldType::SInt32))
//!         .field(FieldDef::new("y", 2, FieldType::SInt32)),
//! );
//! let pool = pool.build()?;
//! let point = pool.get_message_by_name("demo.Point").unwrap();
//!
//! let mut builder = MessageBuilder::new(&point);
//! builder.set_field_by_name("x", 3)?.set_field_by_name("y", -2)?;
//! let bytes = builder.build()?.to_bytes()?;
//! assert_eq!(bytes, [0x08, 0x06, 0x10, 0x03]);
//!
//! let parsed = DynamicMessage::parse_from_bytes(&point, &bytes, ExtensionRegistry::empty())?;
//! assert_eq!(parsed.get_field_by_name("y")?.as_i32(), Some(-2));
//! # Ok::<(), pbwire_core::Error>(())
//! ```
//!
//! ## Extensibility
//!
//! Hand-written message types plug into the same codec by implementing
//! [`MessageLite`] and [`BuilderLite`].

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod codec;
pub mod descriptor;
pub mod error;
pub mod extension;
pub mod message;

// Re-export primary types for convenience
pub use codec::{CodedReader, CodedWriter, ReaderConfig, Tag, WireType};
pub use descriptor::{
    DescriptorPool, DescriptorPoolBuilder, EnumDef, EnumDescriptor, EnumValueDescriptor,
    ExtensionDef, FieldDef, FieldDescriptor, FieldType, Label, MappedType, MessageDef,
    MessageDescriptor,
};
pub use error::{Error, Result};
pub use extension::{ExtensionInfo, ExtensionRegistry, ExtensionValue, GeneratedExtension};
pub use message::{
    BuilderLite, DynamicMessage, FieldSet, FieldValue, MessageBuilder, MessageLite,
    MessageStreamIterator, MessageStreamWriter, UnknownField, UnknownFieldSet,
    UnknownFieldSetBuilder, Value,
};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
