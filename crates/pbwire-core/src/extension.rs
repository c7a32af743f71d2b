//! Extension lookup and typed extension access.
//!
//! Extensions are fields declared outside the message they extend. The
//! parser only recognizes an extension if it has been registered in the
//! [`ExtensionRegistry`] passed to it; anything else is preserved as an
//! unknown field.

use crate::descriptor::{DescriptorPool, FieldDescriptor, FieldType, MessageDescriptor};
use crate::error::{Error, Result};
use crate::message::{DynamicMessage, MessageBuilder, Value};
use bytes::Bytes;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::OnceLock;
use tracing::debug;

/// A registered extension
#[derive(Debug, Clone)]
pub struct ExtensionInfo {
    descriptor: FieldDescriptor,
    default_instance: Option<DynamicMessage>,
}

impl ExtensionInfo {
    /// The extension's field descriptor
    pub fn descriptor(&self) -> &FieldDescriptor {
        &self.descriptor
    }

    /// For message-typed extensions, the empty message of the extension's
    /// type
    pub fn default_instance(&self) -> Option<&DynamicMessage> {
        self.default_instance.as_ref()
    }
}

/// Extensions known to the parser, keyed by extended type and number
#[derive(Debug, Clone, Default)]
pub struct ExtensionRegistry {
    by_number: HashMap<(MessageDescriptor, u32), ExtensionInfo>,
    by_name: HashMap<String, (MessageDescriptor, u32)>,
}

impl ExtensionRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A shared registry with nothing in it
    pub fn empty() -> &'static ExtensionRegistry {
        static EMPTY: OnceLock<ExtensionRegistry> = OnceLock::new();
        EMPTY.get_or_init(ExtensionRegistry::new)
    }

    /// Registers an extension field.
    ///
    /// Registering the same extended type and number again replaces the
    /// earlier entry.
    pub fn add(&mut self, descriptor: FieldDescriptor) -> Result<&mut Self> {
        if !descriptor.is_extension() {
            return Err(Error::descriptor_build(format!(
                "{} is a regular field, not an extension",
                descriptor.full_name()
            )));
        }

        let default_instance = match descriptor.field_type() {
            FieldType::Message | FieldType::Group => Some(DynamicMessage::default_instance(
                &descriptor.require_message_type()?,
            )),
            _ => None,
        };
        let key = (descriptor.containing_type(), descriptor.number());
        debug!(
            "registering extension {} as {}#{}",
            descriptor.full_name(),
            key.0.full_name(),
            key.1
        );

        if let Some(previous) = self.by_number.get(&key) {
            self.by_name.remove(previous.descriptor.full_name());
        }
        self.by_name
            .insert(descriptor.full_name().to_owned(), key.clone());
        self.by_number.insert(
            key,
            ExtensionInfo {
                descriptor,
                default_instance,
            },
        );
        Ok(self)
    }

    /// Registers a typed extension
    pub fn add_extension<T: ExtensionValue>(
        &mut self,
        extension: &GeneratedExtension<T>,
    ) -> Result<&mut Self> {
        self.add(extension.descriptor().clone())
    }

    /// Registers every extension declared in `pool`
    pub fn add_all_from_pool(&mut self, pool: &DescriptorPool) -> Result<&mut Self> {
        for extension in pool.extensions() {
            self.add(extension)?;
        }
        Ok(self)
    }

    /// Finds the extension of `containing_type` numbered `number`
    pub fn find_by_number(
        &self,
        containing_type: &MessageDescriptor,
        number: u32,
    ) -> Option<&ExtensionInfo> {
        self.by_number.get(&(containing_type.clone(), number))
    }

    /// Finds an extension by its fully-qualified name
    pub fn find_by_name(&self, full_name: &str) -> Option<&ExtensionInfo> {
        let key = self.by_name.get(full_name.strip_prefix('.').unwrap_or(full_name))?;
        self.by_number.get(key)
    }

    /// Number of registered extensions
    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    /// Returns true when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }
}

/// Conversion between a Rust type and the reflective [`Value`] of an
/// extension field
pub trait ExtensionValue: Sized {
    /// Converts into the value stored for `field`
    fn to_reflection(self, field: &FieldDescriptor) -> Result<Value>;

    /// Converts a stored value of `field` back
    fn from_reflection(value: &Value, field: &FieldDescriptor) -> Result<Self>;
}

fn mismatch(field: &FieldDescriptor, expected: &str, value: &Value) -> Error {
    Error::type_mismatch(
        field.containing_type().full_name(),
        field.name(),
        expected,
        value.mapped_type().to_string(),
    )
}

macro_rules! impl_extension_value {
    ($($ty:ty => $variant:ident, $name:literal;)*) => {
        $(
            impl ExtensionValue for $ty {
                fn to_reflection(self, field: &FieldDescriptor) -> Result<Value> {
                    let value = Value::$variant(self);
                    value.check_type(field)?;
                    Ok(value)
                }

                fn from_reflection(value: &Value, field: &FieldDescriptor) -> Result<Self> {
                    match value {
                        Value::$variant(v) => Ok(v.clone()),
                        other => Err(mismatch(field, $name, other)),
                    }
                }
            }
        )*
    };
}

impl_extension_value! {
    i64 => I64, "i64";
    u32 => U32, "u32";
    u64 => U64, "u64";
    f32 => F32, "f32";
    f64 => F64, "f64";
    bool => Bool, "bool";
    String => String, "string";
    Bytes => Bytes, "bytes";
}

/// Enum extensions are accessed by number; numbers the enum does not
/// declare are rejected on write.
impl ExtensionValue for i32 {
    fn to_reflection(self, field: &FieldDescriptor) -> Result<Value> {
        if field.field_type() != FieldType::Enum {
            let value = Value::I32(self);
            value.check_type(field)?;
            return Ok(value);
        }
        let enum_type = field.require_enum_type()?;
        enum_type
            .value_by_number(self)
            .map(Value::Enum)
            .ok_or_else(|| {
                Error::type_mismatch(
                    field.containing_type().full_name(),
                    field.name(),
                    format!("enum {}", enum_type.full_name()),
                    format!("undeclared number {self}"),
                )
            })
    }

    fn from_reflection(value: &Value, field: &FieldDescriptor) -> Result<Self> {
        match value {
            Value::I32(v) => Ok(*v),
            Value::Enum(v) => Ok(v.number()),
            other => Err(mismatch(field, "i32", other)),
        }
    }
}

impl ExtensionValue for DynamicMessage {
    fn to_reflection(self, field: &FieldDescriptor) -> Result<Value> {
        let value = Value::Message(self);
        value.check_type(field)?;
        Ok(value)
    }

    fn from_reflection(value: &Value, field: &FieldDescriptor) -> Result<Self> {
        match value {
            Value::Message(v) => Ok(v.clone()),
            other => Err(mismatch(field, "message", other)),
        }
    }
}

/// A typed handle on an extension field
#[derive(Debug, Clone)]
pub struct GeneratedExtension<T> {
    descriptor: FieldDescriptor,
    _marker: PhantomData<fn() -> T>,
}

impl<T: ExtensionValue> GeneratedExtension<T> {
    /// Wraps an extension descriptor
    pub fn new(descriptor: FieldDescriptor) -> Result<Self> {
        if !descriptor.is_extension() {
            return Err(Error::descriptor_build(format!(
                "{} is a regular field, not an extension",
                descriptor.full_name()
            )));
        }
        Ok(Self {
            descriptor,
            _marker: PhantomData,
        })
    }

    /// The extension's field descriptor
    pub fn descriptor(&self) -> &FieldDescriptor {
        &self.descriptor
    }

    /// The extension's field number
    pub fn number(&self) -> u32 {
        self.descriptor.number()
    }

    /// Whether `message` carries this extension
    pub fn has(&self, message: &DynamicMessage) -> bool {
        message.has_field(&self.descriptor)
    }

    /// The value in `message`, or the extension's default when absent
    pub fn get(&self, message: &DynamicMessage) -> Result<T> {
        let value = message.get_field(&self.descriptor)?;
        T::from_reflection(&value, &self.descriptor)
    }

    /// Every value of a repeated extension
    pub fn get_repeated(&self, message: &DynamicMessage) -> Result<Vec<T>> {
        message
            .get_repeated_field(&self.descriptor)?
            .iter()
            .map(|value| T::from_reflection(value, &self.descriptor))
            .collect()
    }

    /// Sets a singular extension on `builder`
    pub fn set(&self, builder: &mut MessageBuilder, value: T) -> Result<()> {
        builder.set_field(&self.descriptor, value.to_reflection(&self.descriptor)?)?;
        Ok(())
    }

    /// Appends to a repeated extension on `builder`
    pub fn add(&self, builder: &mut MessageBuilder, value: T) -> Result<()> {
        builder.add_repeated_field(&self.descriptor, value.to_reflection(&self.descriptor)?)?;
        Ok(())
    }

    /// Removes the extension from `builder`
    pub fn clear(&self, builder: &mut MessageBuilder) -> Result<()> {
        builder.clear_field(&self.descriptor)?;
        Ok(())
    }
}
