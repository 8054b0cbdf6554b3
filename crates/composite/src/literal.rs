//! Composite literal text form, as used by PostgreSQL's `record_in`/`record_out`.
//!
//! Some call sites cannot bind typed parameters and have to send
//! `'(a,b,c)'::type_name` instead. This module renders that literal from a
//! structured value (honouring the connection's client encoding) and parses
//! it back from a column read as text.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc};

use crate::codec::StructuredTypeCodec;
use crate::ddl::quote_ident;
use crate::error::{CompositeError, Result};
use crate::field::StorageType;
use crate::registry::{StructuredTypeDefinition, TypeRegistry};
use crate::value::{Primitive, PrimitiveType, StructuredValue, WireValue};

/// Server/client text encodings the literal renderer knows how to target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientEncoding {
    #[default]
    Utf8,
    Latin1,
    SqlAscii,
}

impl ClientEncoding {
    /// Convert rendered text into bytes for this encoding.
    pub fn encode(self, text: &str) -> Result<Vec<u8>> {
        if text.contains('\0') {
            return Err(CompositeError::Encoding(
                "NUL characters cannot be sent in text values".to_string(),
            ));
        }
        match self {
            ClientEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            ClientEncoding::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        CompositeError::Encoding(format!(
                            "character {c:?} has no equivalent in LATIN1"
                        ))
                    })
                })
                .collect(),
            ClientEncoding::SqlAscii => {
                if let Some(c) = text.chars().find(|c| !c.is_ascii()) {
                    return Err(CompositeError::Encoding(format!(
                        "character {c:?} has no equivalent in SQL_ASCII"
                    )));
                }
                Ok(text.as_bytes().to_vec())
            }
        }
    }

    pub fn pg_name(self) -> &'static str {
        match self {
            ClientEncoding::Utf8 => "UTF8",
            ClientEncoding::Latin1 => "LATIN1",
            ClientEncoding::SqlAscii => "SQL_ASCII",
        }
    }
}

impl FromStr for ClientEncoding {
    type Err = CompositeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().replace(['-', '_'], "").as_str() {
            "UTF8" | "UNICODE" => Ok(ClientEncoding::Utf8),
            "LATIN1" | "ISO88591" => Ok(ClientEncoding::Latin1),
            "SQLASCII" => Ok(ClientEncoding::SqlAscii),
            _ => Err(CompositeError::Encoding(format!(
                "unsupported client encoding '{s}'"
            ))),
        }
    }
}

impl fmt::Display for ClientEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pg_name())
    }
}

/// A rendered composite literal plus its bytes in the target encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireLiteral {
    type_name: String,
    text: String,
    bytes: Vec<u8>,
    encoding: ClientEncoding,
}

impl WireLiteral {
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The literal body, e.g. `(USD,500,)`.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn encoding(&self) -> ClientEncoding {
        self.encoding
    }

    /// `'(...)'::type_name`, ready to splice into a statement.
    pub fn to_sql_expression(&self) -> String {
        format!(
            "'{}'::{}",
            self.text.replace('\'', "''"),
            quote_ident(&self.type_name)
        )
    }
}

/// Render `value` as a composite literal for `definition`.
pub fn serialize_for_wire(
    registry: &TypeRegistry,
    definition: &StructuredTypeDefinition,
    value: &StructuredValue,
    encoding: ClientEncoding,
) -> Result<WireLiteral> {
    let row = StructuredTypeCodec::new(registry).encode_row(definition, value)?;
    let text = render_row(&row)?;
    let bytes = encoding.encode(&text)?;
    Ok(WireLiteral {
        type_name: definition.name().to_string(),
        text,
        bytes,
        encoding,
    })
}

/// Parse a composite literal (as returned by `col::text`) back into a value.
pub fn parse_wire_literal(
    registry: &TypeRegistry,
    definition: &StructuredTypeDefinition,
    text: &str,
) -> Result<StructuredValue> {
    let row = parse_row(registry, definition, text)?;
    StructuredTypeCodec::new(registry).decode_row(definition, row)
}

fn render_row(row: &[WireValue]) -> Result<String> {
    let fields = row
        .iter()
        .map(|value| {
            Ok(match value {
                WireValue::Null => String::new(),
                WireValue::Primitive(p) => quote_field(&render_primitive(p)?),
                WireValue::Row(inner) => quote_field(&render_row(inner)?),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(format!("({})", fields.join(",")))
}

fn render_primitive(value: &Primitive) -> Result<String> {
    Ok(match value {
        Primitive::Text(s) => s.clone(),
        Primitive::Integer(i) => i.to_string(),
        Primitive::Decimal(d) => d.to_string(),
        Primitive::Boolean(b) => (if *b { "t" } else { "f" }).to_string(),
        Primitive::Timestamp(ts) => {
            check_year(ts.year())?;
            // timestamptz stores microseconds
            let micros = ts.nanosecond() / 1_000 * 1_000;
            ts.with_nanosecond(micros)
                .unwrap_or(*ts)
                .format("%Y-%m-%d %H:%M:%S%.f+00")
                .to_string()
        }
        Primitive::Date(d) => {
            check_year(d.year())?;
            d.format("%Y-%m-%d").to_string()
        }
    })
}

/// `%Y` renders years outside 1..=9999 with a sign PostgreSQL does not accept.
fn check_year(year: i32) -> Result<()> {
    if (1..=9999).contains(&year) {
        Ok(())
    } else {
        Err(CompositeError::Encoding(format!(
            "year {year} is outside the literal range 1..=9999"
        )))
    }
}

fn quote_field(text: &str) -> String {
    let needs_quotes = text.is_empty()
        || text
            .chars()
            .any(|c| matches!(c, '"' | '\\' | '(' | ')' | ',') || c.is_whitespace());
    if !needs_quotes {
        return text.to_string();
    }
    let mut quoted = String::with_capacity(text.len() + 2);
    quoted.push('"');
    for c in text.chars() {
        if c == '"' || c == '\\' {
            quoted.push(c);
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Split `(a,"b c",)` into raw field texts; `None` marks a null position.
fn split_fields(text: &str) -> Result<Vec<Option<String>>> {
    let malformed = |reason: &str| CompositeError::MalformedLiteral(format!("{reason}: {text}"));
    let trimmed = text.trim();
    let body = trimmed
        .strip_prefix('(')
        .ok_or_else(|| malformed("missing left parenthesis"))?;

    let mut fields = Vec::new();
    let mut chars = body.chars().peekable();
    loop {
        let mut field = String::new();
        let mut seen = false;
        let mut in_quotes = false;
        loop {
            let c = chars.next().ok_or_else(|| malformed("unexpected end of input"))?;
            match c {
                '"' if in_quotes && chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => {
                    in_quotes = !in_quotes;
                    seen = true;
                }
                '\\' => {
                    let escaped = chars.next().ok_or_else(|| malformed("dangling escape"))?;
                    field.push(escaped);
                    seen = true;
                }
                ',' | ')' if !in_quotes => {
                    fields.push(seen.then_some(field));
                    if c == ')' {
                        if chars.next().is_some() {
                            return Err(malformed("junk after right parenthesis"));
                        }
                        return Ok(fields);
                    }
                    break;
                }
                other => {
                    field.push(other);
                    seen = true;
                }
            }
        }
    }
}

fn parse_row(
    registry: &TypeRegistry,
    definition: &StructuredTypeDefinition,
    text: &str,
) -> Result<Vec<WireValue>> {
    let raw = split_fields(text)?;
    if raw.len() != definition.fields().len() {
        return Err(CompositeError::ArityMismatch {
            type_name: definition.name().to_string(),
            expected: definition.fields().len(),
            found: raw.len(),
        });
    }

    definition
        .fields()
        .iter()
        .zip(raw)
        .map(|(field, raw)| {
            let Some(raw) = raw else {
                return Ok(WireValue::Null);
            };
            match field.storage() {
                StorageType::Primitive(kind) => parse_primitive(*kind, &raw).map(WireValue::Primitive),
                StorageType::Composite(nested) => {
                    let nested = registry
                        .lookup(nested)
                        .ok_or_else(|| CompositeError::UnknownType(nested.clone()))?;
                    parse_row(registry, &nested, &raw).map(WireValue::Row)
                }
            }
        })
        .collect()
}

fn parse_primitive(kind: PrimitiveType, raw: &str) -> Result<Primitive> {
    let invalid = || CompositeError::MalformedLiteral(format!("'{raw}' is not a valid {kind}"));
    Ok(match kind {
        PrimitiveType::Text => Primitive::Text(raw.to_string()),
        PrimitiveType::Integer => Primitive::Integer(raw.trim().parse().map_err(|_| invalid())?),
        PrimitiveType::Decimal => Primitive::Decimal(raw.trim().parse().map_err(|_| invalid())?),
        PrimitiveType::Boolean => match raw.trim() {
            "t" | "true" => Primitive::Boolean(true),
            "f" | "false" => Primitive::Boolean(false),
            _ => return Err(invalid()),
        },
        PrimitiveType::Timestamp => {
            let parsed = DateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S%.f%#z")
                .or_else(|_| DateTime::parse_from_rfc3339(raw.trim()))
                .map_err(|_| invalid())?;
            Primitive::Timestamp(parsed.with_timezone(&Utc))
        }
        PrimitiveType::Date => Primitive::Date(
            NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| invalid())?,
        ),
    })
}
