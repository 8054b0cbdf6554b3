//! Field layout of structured types

use std::fmt;

use crate::error::Result;
use crate::value::{Primitive, PrimitiveType};

/// What a field stores: a primitive, or another named structured type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageType {
    Primitive(PrimitiveType),
    Composite(String),
}

impl StorageType {
    pub fn composite(name: impl Into<String>) -> Self {
        StorageType::Composite(name.into())
    }

    /// Name of the referenced structured type, if any.
    pub fn referenced_type(&self) -> Option<&str> {
        match self {
            StorageType::Composite(name) => Some(name),
            StorageType::Primitive(_) => None,
        }
    }
}

impl From<PrimitiveType> for StorageType {
    fn from(value: PrimitiveType) -> Self {
        StorageType::Primitive(value)
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageType::Primitive(p) => write!(f, "{p}"),
            StorageType::Composite(name) => f.write_str(name),
        }
    }
}

/// Per-field normaliser applied by the codec around the wire boundary.
///
/// `decode(encode(x))` should give back `x` for every value the field is
/// expected to hold, otherwise the round trip through storage is lossy.
#[derive(Clone, Copy)]
pub struct FieldTransform {
    name: &'static str,
    encode: fn(Primitive) -> Result<Primitive>,
    decode: fn(Primitive) -> Result<Primitive>,
}

impl FieldTransform {
    pub const fn new(
        name: &'static str,
        encode: fn(Primitive) -> Result<Primitive>,
        decode: fn(Primitive) -> Result<Primitive>,
    ) -> Self {
        Self {
            name,
            encode,
            decode,
        }
    }

    /// Strips surrounding whitespace from text on the way out.
    pub const fn trimmed() -> Self {
        Self::new("trimmed", trim_text, Ok)
    }

    /// ASCII-uppercases text on the way out (currency codes and the like).
    pub const fn uppercase() -> Self {
        Self::new("uppercase", uppercase_text, Ok)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn encode(&self, value: Primitive) -> Result<Primitive> {
        (self.encode)(value)
    }

    pub fn decode(&self, value: Primitive) -> Result<Primitive> {
        (self.decode)(value)
    }
}

impl fmt::Debug for FieldTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FieldTransform").field(&self.name).finish()
    }
}

impl PartialEq for FieldTransform {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for FieldTransform {}

fn trim_text(value: Primitive) -> Result<Primitive> {
    Ok(match value {
        Primitive::Text(s) if s.trim().len() != s.len() => Primitive::Text(s.trim().to_string()),
        other => other,
    })
}

fn uppercase_text(value: Primitive) -> Result<Primitive> {
    Ok(match value {
        Primitive::Text(s) => Primitive::Text(s.to_ascii_uppercase()),
        other => other,
    })
}

/// One member of a structured type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    name: String,
    storage: StorageType,
    nullable: bool,
    transform: Option<FieldTransform>,
}

impl FieldSpec {
    /// A nullable field with no transform.
    pub fn new(name: impl Into<String>, storage: impl Into<StorageType>) -> Self {
        Self {
            name: name.into(),
            storage: storage.into(),
            nullable: true,
            transform: None,
        }
    }

    /// Reject nulls for this field in the codec.
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_transform(mut self, transform: FieldTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn storage(&self) -> &StorageType {
        &self.storage
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn transform(&self) -> Option<&FieldTransform> {
        self.transform.as_ref()
    }
}
