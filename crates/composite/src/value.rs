//! In-memory values carried by structured types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CompositeError;

/// Primitive storage kinds a field may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Text,
    Integer,
    Decimal,
    Boolean,
    Timestamp,
    Date,
}

impl PrimitiveType {
    /// SQL type used in generated DDL
    pub fn sql_type(self) -> &'static str {
        match self {
            PrimitiveType::Text => "text",
            PrimitiveType::Integer => "integer",
            PrimitiveType::Decimal => "numeric",
            PrimitiveType::Boolean => "boolean",
            PrimitiveType::Timestamp => "timestamp with time zone",
            PrimitiveType::Date => "date",
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_type())
    }
}

/// Exact decimal kept in its textual form so the caller's scale survives storage.
///
/// Accepts `-?digits(.digits)?`. Exponent notation is rejected since
/// `numeric` has no way to remember it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Decimal(String);

impl Decimal {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0.starts_with('-')
    }

    /// Digits before the decimal point, without sign.
    pub fn integer_digits(&self) -> &str {
        let unsigned = self.0.trim_start_matches('-');
        unsigned.split('.').next().unwrap_or("0")
    }

    /// Digits after the decimal point (empty when the scale is zero).
    pub fn fraction_digits(&self) -> &str {
        self.0.split_once('.').map(|(_, frac)| frac).unwrap_or("")
    }
}

impl FromStr for Decimal {
    type Err = CompositeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || CompositeError::Encoding(format!("invalid decimal: '{s}'"));
        let (negative, unsigned) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let (int_part, frac_part) = match unsigned.split_once('.') {
            Some((int_part, frac_part)) => (int_part, Some(frac_part)),
            None => (unsigned, None),
        };
        let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
        if !all_digits(int_part) || frac_part.is_some_and(|frac| !all_digits(frac)) {
            return Err(invalid());
        }

        let int_part = int_part.trim_start_matches('0');
        let int_part = if int_part.is_empty() { "0" } else { int_part };
        let is_zero = int_part == "0" && frac_part.is_none_or(|frac| frac.bytes().all(|b| b == b'0'));

        let mut text = String::with_capacity(s.len());
        if negative && !is_zero {
            text.push('-');
        }
        text.push_str(int_part);
        if let Some(frac) = frac_part {
            text.push('.');
            text.push_str(frac);
        }
        Ok(Decimal(text))
    }
}

impl TryFrom<String> for Decimal {
    type Error = CompositeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Decimal> for String {
    fn from(value: Decimal) -> Self {
        value.0
    }
}

impl From<i32> for Decimal {
    fn from(value: i32) -> Self {
        Decimal(value.to_string())
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single primitive value
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Text(String),
    Integer(i32),
    Decimal(Decimal),
    Boolean(bool),
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
}

impl Primitive {
    pub fn kind(&self) -> PrimitiveType {
        match self {
            Primitive::Text(_) => PrimitiveType::Text,
            Primitive::Integer(_) => PrimitiveType::Integer,
            Primitive::Decimal(_) => PrimitiveType::Decimal,
            Primitive::Boolean(_) => PrimitiveType::Boolean,
            Primitive::Timestamp(_) => PrimitiveType::Timestamp,
            Primitive::Date(_) => PrimitiveType::Date,
        }
    }
}

/// Value of one field inside a [`StructuredValue`]
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Primitive(Primitive),
    Composite(StructuredValue),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Short description used in mismatch errors.
    pub(crate) fn describe(&self) -> String {
        match self {
            FieldValue::Null => "null".to_string(),
            FieldValue::Primitive(p) => p.kind().to_string(),
            FieldValue::Composite(v) => v.type_name().to_string(),
        }
    }
}

impl From<Primitive> for FieldValue {
    fn from(value: Primitive) -> Self {
        FieldValue::Primitive(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Primitive(Primitive::Text(value.to_string()))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Primitive(Primitive::Text(value))
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Primitive(Primitive::Integer(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Primitive(Primitive::Boolean(value))
    }
}

impl From<Decimal> for FieldValue {
    fn from(value: Decimal) -> Self {
        FieldValue::Primitive(Primitive::Decimal(value))
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Primitive(Primitive::Timestamp(value))
    }
}

impl From<NaiveDate> for FieldValue {
    fn from(value: NaiveDate) -> Self {
        FieldValue::Primitive(Primitive::Date(value))
    }
}

impl From<StructuredValue> for FieldValue {
    fn from(value: StructuredValue) -> Self {
        FieldValue::Composite(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(FieldValue::Null, Into::into)
    }
}

/// Positional, driver-facing form of a field
///
/// Nested structured values become anonymous rows; names only exist on the
/// definition side.
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    Null,
    Primitive(Primitive),
    Row(Vec<WireValue>),
}

impl WireValue {
    pub fn text(value: impl Into<String>) -> Self {
        WireValue::Primitive(Primitive::Text(value.into()))
    }

    pub fn integer(value: i32) -> Self {
        WireValue::Primitive(Primitive::Integer(value))
    }
}

/// Runtime instance of a structured type: an ordered, named tuple.
///
/// Absent fields and explicit nulls compare equal, so a value built with only
/// the populated fields equals the fully-populated value a decode returns.
#[derive(Debug, Clone)]
pub struct StructuredValue {
    type_name: String,
    fields: Vec<(String, FieldValue)>,
}

impl StructuredValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    /// Builder-style [`set`](Self::set).
    pub fn with(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Set a field, replacing any previous value in place.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<FieldValue>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl PartialEq for StructuredValue {
    fn eq(&self, other: &Self) -> bool {
        if self.type_name != other.type_name {
            return false;
        }
        let matches = |a: &Self, b: &Self| {
            a.fields
                .iter()
                .all(|(name, value)| b.get(name).unwrap_or(&FieldValue::Null) == value)
        };
        matches(self, other) && matches(other, self)
    }
}
