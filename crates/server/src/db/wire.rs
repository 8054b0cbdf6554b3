//! Binary wire format for composite values.
//!
//! A composite on the wire is `i32 field count`, then per field `u32 oid`,
//! `i32 length` (-1 for null) and the field's own binary encoding.

use std::error::Error;
use std::fmt::Write as _;

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, Utc};
use fhir_composite::{Decimal, Primitive, PrimitiveType, WireValue};
use tokio_postgres::types::{FromSql, IsNull, Kind, ToSql, Type, to_sql_checked};

type BoxError = Box<dyn Error + Sync + Send>;

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_MAX_DSCALE: usize = 0x3FFF;

/// PostgreSQL type used for each primitive storage kind.
pub fn primitive_type(kind: PrimitiveType) -> Type {
    match kind {
        PrimitiveType::Text => Type::TEXT,
        PrimitiveType::Integer => Type::INT4,
        PrimitiveType::Decimal => Type::NUMERIC,
        PrimitiveType::Boolean => Type::BOOL,
        PrimitiveType::Timestamp => Type::TIMESTAMPTZ,
        PrimitiveType::Date => Type::DATE,
    }
}

/// A composite value as read from the driver, before the codec names it.
#[derive(Debug, Clone, PartialEq)]
pub struct WireRow {
    pub type_name: String,
    pub fields: Vec<WireValue>,
}

impl<'a> FromSql<'a> for WireRow {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        let Kind::Composite(fields) = ty.kind() else {
            return Err(format!("type {} is not a composite", ty.name()).into());
        };

        let mut buf = raw;
        let count = i32::from_be_bytes(take(&mut buf)?);
        if usize::try_from(count).ok() != Some(fields.len()) {
            return Err(format!(
                "composite {} has {} fields on the wire, expected {}",
                ty.name(),
                count,
                fields.len()
            )
            .into());
        }

        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            let oid = u32::from_be_bytes(take(&mut buf)?);
            if oid != field.type_().oid() {
                return Err(format!(
                    "field {} of {} has oid {}, expected {}",
                    field.name(),
                    ty.name(),
                    oid,
                    field.type_().oid()
                )
                .into());
            }
            let len = i32::from_be_bytes(take(&mut buf)?);
            let Ok(len) = usize::try_from(len) else {
                values.push(WireValue::Null);
                continue;
            };
            if buf.len() < len {
                return Err("composite value truncated".into());
            }
            let (value, rest) = buf.split_at(len);
            buf = rest;
            values.push(read_value(field.type_(), value)?);
        }

        if !buf.is_empty() {
            return Err("trailing bytes after composite value".into());
        }
        Ok(WireRow {
            type_name: ty.name().to_string(),
            fields: values,
        })
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Composite(_))
    }
}

fn take<const N: usize>(buf: &mut &[u8]) -> Result<[u8; N], BoxError> {
    if buf.len() < N {
        return Err("composite value truncated".into());
    }
    let (head, rest) = buf.split_at(N);
    *buf = rest;
    let mut out = [0u8; N];
    out.copy_from_slice(head);
    Ok(out)
}

fn read_value(ty: &Type, raw: &[u8]) -> Result<WireValue, BoxError> {
    if let Kind::Composite(_) = ty.kind() {
        return WireRow::from_sql(ty, raw).map(|row| WireValue::Row(row.fields));
    }

    let primitive = if <String as FromSql>::accepts(ty) {
        Primitive::Text(String::from_sql(ty, raw)?)
    } else if *ty == Type::INT4 {
        Primitive::Integer(i32::from_sql(ty, raw)?)
    } else if *ty == Type::INT2 {
        Primitive::Integer(i16::from_sql(ty, raw)?.into())
    } else if *ty == Type::NUMERIC {
        Primitive::Decimal(decode_numeric(raw)?)
    } else if *ty == Type::BOOL {
        Primitive::Boolean(bool::from_sql(ty, raw)?)
    } else if *ty == Type::TIMESTAMPTZ {
        Primitive::Timestamp(DateTime::<Utc>::from_sql(ty, raw)?)
    } else if *ty == Type::DATE {
        Primitive::Date(NaiveDate::from_sql(ty, raw)?)
    } else {
        return Err(format!("unsupported composite field type {}", ty.name()).into());
    };
    Ok(WireValue::Primitive(primitive))
}

/// An encoded structured value ready to bind as a query parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundComposite {
    type_name: String,
    row: Vec<WireValue>,
}

impl BoundComposite {
    pub fn new(type_name: impl Into<String>, row: Vec<WireValue>) -> Self {
        Self {
            type_name: type_name.into(),
            row,
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

impl ToSql for BoundComposite {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if ty.name() != self.type_name {
            return Err(format!(
                "cannot bind {} as parameter of type {}",
                self.type_name,
                ty.name()
            )
            .into());
        }
        write_row(ty, &self.row, out)?;
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Composite(_))
    }

    to_sql_checked!();
}

fn write_row(ty: &Type, row: &[WireValue], out: &mut BytesMut) -> Result<(), BoxError> {
    let Kind::Composite(fields) = ty.kind() else {
        return Err(format!("type {} is not a composite", ty.name()).into());
    };
    if fields.len() != row.len() {
        return Err(format!(
            "composite {} has {} fields, value has {}",
            ty.name(),
            fields.len(),
            row.len()
        )
        .into());
    }

    out.put_i32(i32::try_from(fields.len())?);
    for (field, value) in fields.iter().zip(row) {
        out.put_u32(field.type_().oid());
        if let WireValue::Null = value {
            out.put_i32(-1);
            continue;
        }
        let base = out.len();
        out.put_i32(0);
        match value {
            WireValue::Row(inner) => write_row(field.type_(), inner, out)?,
            WireValue::Primitive(primitive) => write_primitive(field.type_(), primitive, out)?,
            WireValue::Null => {}
        }
        let len = i32::try_from(out.len() - base - 4)?;
        out[base..base + 4].copy_from_slice(&len.to_be_bytes());
    }
    Ok(())
}

fn write_primitive(ty: &Type, value: &Primitive, out: &mut BytesMut) -> Result<(), BoxError> {
    match value {
        Primitive::Text(s) => s.to_sql_checked(ty, out)?,
        Primitive::Integer(i) if *ty == Type::INT2 => i16::try_from(*i)?.to_sql_checked(ty, out)?,
        Primitive::Integer(i) if *ty == Type::INT8 => i64::from(*i).to_sql_checked(ty, out)?,
        Primitive::Integer(i) => i.to_sql_checked(ty, out)?,
        Primitive::Decimal(d) if *ty == Type::NUMERIC => {
            encode_numeric(d, out)?;
            IsNull::No
        }
        Primitive::Decimal(_) => return Err(format!("cannot send decimal as {}", ty.name()).into()),
        Primitive::Boolean(b) => b.to_sql_checked(ty, out)?,
        Primitive::Timestamp(ts) => ts.to_sql_checked(ty, out)?,
        Primitive::Date(d) => d.to_sql_checked(ty, out)?,
    };
    Ok(())
}

/// Base-10000 digit groups of `digits`, padded on the left or right to a
/// multiple of four.
fn groups(digits: &str, pad_left: bool) -> Vec<i16> {
    let pad = (4 - digits.len() % 4) % 4;
    let zeros = "0".repeat(pad);
    let padded = if pad_left {
        format!("{zeros}{digits}")
    } else {
        format!("{digits}{zeros}")
    };
    padded
        .as_bytes()
        .chunks(4)
        .map(|chunk| chunk.iter().fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0')))
        .collect()
}

pub(crate) fn encode_numeric(value: &Decimal, out: &mut BytesMut) -> Result<(), BoxError> {
    let fraction = value.fraction_digits();
    if fraction.len() > NUMERIC_MAX_DSCALE {
        return Err(format!("decimal scale {} exceeds numeric limit", fraction.len()).into());
    }

    let int_groups = groups(value.integer_digits(), true);
    let mut weight = i16::try_from(int_groups.len())? - 1;
    let mut digits = int_groups;
    if !fraction.is_empty() {
        digits.extend(groups(fraction, false));
    }

    let leading = digits.iter().take_while(|d| **d == 0).count();
    digits.drain(..leading);
    weight -= i16::try_from(leading)?;
    while digits.last() == Some(&0) {
        digits.pop();
    }
    if digits.is_empty() {
        weight = 0;
    }

    out.put_i16(i16::try_from(digits.len())?);
    out.put_i16(weight);
    out.put_u16(if value.is_negative() { NUMERIC_NEG } else { NUMERIC_POS });
    out.put_u16(u16::try_from(fraction.len())?);
    for digit in digits {
        out.put_i16(digit);
    }
    Ok(())
}

pub(crate) fn decode_numeric(raw: &[u8]) -> Result<Decimal, BoxError> {
    let mut buf = raw;
    let ndigits = usize::try_from(i16::from_be_bytes(take(&mut buf)?))?;
    let weight = i16::from_be_bytes(take(&mut buf)?);
    let sign = u16::from_be_bytes(take(&mut buf)?);
    let dscale = usize::from(u16::from_be_bytes(take(&mut buf)?));
    if sign != NUMERIC_POS && sign != NUMERIC_NEG {
        return Err("NaN and infinite numerics are not decimals".into());
    }
    let digits = (0..ndigits)
        .map(|_| take(&mut buf).map(i16::from_be_bytes))
        .collect::<Result<Vec<_>, _>>()?;
    let digit_at = |index: i32| -> i16 {
        usize::try_from(index)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if sign == NUMERIC_NEG && !digits.is_empty() {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        for index in 0..=i32::from(weight) {
            if index == 0 {
                write!(text, "{}", digit_at(index))?;
            } else {
                write!(text, "{:04}", digit_at(index))?;
            }
        }
    }
    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut index = i32::from(weight) + 1;
        while fraction.len() < dscale {
            write!(fraction, "{:04}", digit_at(index))?;
            index += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }
    Ok(text.parse()?)
}
