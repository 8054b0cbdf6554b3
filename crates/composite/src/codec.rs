//! Conversion between structured values and positional wire tuples

use crate::error::{CompositeError, Result};
use crate::field::{FieldSpec, StorageType};
use crate::registry::{StructuredTypeDefinition, TypeRegistry};
use crate::value::{FieldValue, StructuredValue, WireValue};

/// Encode/decode engine. Nested structured types are resolved through the
/// registry it borrows.
#[derive(Clone, Copy)]
pub struct StructuredTypeCodec<'r> {
    registry: &'r TypeRegistry,
}

impl<'r> StructuredTypeCodec<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self { registry }
    }

    /// Encode `value` into a tuple positioned by `definition`'s field order.
    /// `None` short-circuits to `None`.
    pub fn encode(
        &self,
        definition: &StructuredTypeDefinition,
        value: Option<&StructuredValue>,
    ) -> Result<Option<Vec<WireValue>>> {
        match value {
            Some(value) => self.encode_row(definition, value).map(Some),
            None => Ok(None),
        }
    }

    /// Decode a raw row tagged `row_type_name`. `None` short-circuits to
    /// `None` regardless of the tag.
    pub fn decode(
        &self,
        definition: &StructuredTypeDefinition,
        row: Option<Vec<WireValue>>,
        row_type_name: &str,
    ) -> Result<Option<StructuredValue>> {
        let Some(row) = row else {
            return Ok(None);
        };
        let tagged = self
            .registry
            .lookup(row_type_name)
            .ok_or_else(|| CompositeError::UnknownType(row_type_name.to_string()))?;
        if tagged.name() != definition.name() {
            return Err(CompositeError::TypeMismatch(format!(
                "row tagged '{}' cannot be decoded as '{}'",
                row_type_name,
                definition.name()
            )));
        }
        self.decode_row(definition, row).map(Some)
    }

    pub fn encode_row(
        &self,
        definition: &StructuredTypeDefinition,
        value: &StructuredValue,
    ) -> Result<Vec<WireValue>> {
        if value.type_name() != definition.name() {
            return Err(CompositeError::TypeMismatch(format!(
                "value of type '{}' cannot be encoded as '{}'",
                value.type_name(),
                definition.name()
            )));
        }
        if let Some((name, _)) = value.iter().find(|(name, _)| definition.position(name).is_none()) {
            return Err(CompositeError::UnknownField {
                type_name: definition.name().to_string(),
                field: name.to_string(),
            });
        }

        definition
            .fields()
            .iter()
            .map(|field| {
                let value = value.get(field.name()).unwrap_or(&FieldValue::Null);
                self.encode_field(definition, field, value)
            })
            .collect()
    }

    pub fn decode_row(
        &self,
        definition: &StructuredTypeDefinition,
        row: Vec<WireValue>,
    ) -> Result<StructuredValue> {
        if row.len() != definition.fields().len() {
            return Err(CompositeError::ArityMismatch {
                type_name: definition.name().to_string(),
                expected: definition.fields().len(),
                found: row.len(),
            });
        }

        let mut value = StructuredValue::new(definition.name());
        for (field, wire) in definition.fields().iter().zip(row) {
            let decoded = self.decode_field(definition, field, wire)?;
            value.set(field.name(), decoded);
        }
        Ok(value)
    }

    fn encode_field(
        &self,
        definition: &StructuredTypeDefinition,
        field: &FieldSpec,
        value: &FieldValue,
    ) -> Result<WireValue> {
        match (field.storage(), value) {
            (_, FieldValue::Null) => {
                check_nullable(definition, field)?;
                Ok(WireValue::Null)
            }
            (StorageType::Primitive(kind), FieldValue::Primitive(primitive))
                if primitive.kind() == *kind =>
            {
                let primitive = match field.transform() {
                    Some(transform) => transform.encode(primitive.clone())?,
                    None => primitive.clone(),
                };
                Ok(WireValue::Primitive(primitive))
            }
            (StorageType::Composite(nested), FieldValue::Composite(inner)) => {
                let nested = self.nested_definition(nested)?;
                self.encode_row(&nested, inner).map(WireValue::Row)
            }
            (storage, other) => Err(CompositeError::mismatch(
                definition.name(),
                field.name(),
                &storage.to_string(),
                &other.describe(),
            )),
        }
    }

    fn decode_field(
        &self,
        definition: &StructuredTypeDefinition,
        field: &FieldSpec,
        wire: WireValue,
    ) -> Result<FieldValue> {
        match (field.storage(), wire) {
            (_, WireValue::Null) => {
                check_nullable(definition, field)?;
                Ok(FieldValue::Null)
            }
            (StorageType::Primitive(kind), WireValue::Primitive(primitive))
                if primitive.kind() == *kind =>
            {
                let primitive = match field.transform() {
                    Some(transform) => transform.decode(primitive)?,
                    None => primitive,
                };
                Ok(FieldValue::Primitive(primitive))
            }
            (StorageType::Composite(nested), WireValue::Row(row)) => {
                let nested = self.nested_definition(nested)?;
                self.decode_row(&nested, row).map(FieldValue::Composite)
            }
            (storage, other) => {
                let found = match other {
                    WireValue::Primitive(p) => p.kind().to_string(),
                    _ => "row".to_string(),
                };
                Err(CompositeError::mismatch(
                    definition.name(),
                    field.name(),
                    &storage.to_string(),
                    &found,
                ))
            }
        }
    }

    fn nested_definition(&self, name: &str) -> Result<std::sync::Arc<StructuredTypeDefinition>> {
        self.registry
            .lookup(name)
            .ok_or_else(|| CompositeError::UnknownType(name.to_string()))
    }
}

fn check_nullable(definition: &StructuredTypeDefinition, field: &FieldSpec) -> Result<()> {
    if field.is_nullable() {
        Ok(())
    } else {
        Err(CompositeError::NullViolation {
            type_name: definition.name().to_string(),
            field: field.name().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, TimeZone, Utc};

    use super::*;
    use crate::field::FieldTransform;
    use crate::value::{Decimal, Primitive, PrimitiveType};

    fn registry_with_money() -> (TypeRegistry, Arc<StructuredTypeDefinition>) {
        let registry = TypeRegistry::new();
        let def = registry
            .define(
                "money_type",
                vec![
                    FieldSpec::new("name", PrimitiveType::Text),
                    FieldSpec::new("amount", PrimitiveType::Integer),
                    FieldSpec::new("note", PrimitiveType::Text),
                ],
            )
            .unwrap();
        (registry, def)
    }

    fn usd() -> StructuredValue {
        StructuredValue::new("money_type")
            .with("name", "USD")
            .with("amount", 500)
            .with("note", FieldValue::Null)
    }

    #[test]
    fn encodes_money_positionally() {
        let (registry, def) = registry_with_money();
        let codec = StructuredTypeCodec::new(&registry);
        let row = codec.encode(&def, Some(&usd())).unwrap().unwrap();
        assert_eq!(
            row,
            vec![WireValue::text("USD"), WireValue::integer(500), WireValue::Null]
        );
    }

    #[test]
    fn decodes_money_row() {
        let (registry, def) = registry_with_money();
        let codec = StructuredTypeCodec::new(&registry);
        let row = vec![WireValue::text("USD"), WireValue::integer(500), WireValue::Null];
        let value = codec.decode(&def, Some(row), "money_type").unwrap();
        assert_eq!(value, Some(usd()));
    }

    #[test]
    fn position_not_insertion_order_drives_encoding() {
        let (registry, def) = registry_with_money();
        let codec = StructuredTypeCodec::new(&registry);
        let shuffled = StructuredValue::new("money_type")
            .with("amount", 500)
            .with("name", "USD");
        let row = codec.encode_row(&def, &shuffled).unwrap();
        assert_eq!(row[0], WireValue::text("USD"));
        assert_eq!(row[1], WireValue::integer(500));
    }

    #[test]
    fn null_short_circuits_both_ways() {
        let (registry, def) = registry_with_money();
        let codec = StructuredTypeCodec::new(&registry);
        assert_eq!(codec.encode(&def, None).unwrap(), None);
        assert_eq!(codec.decode(&def, None, "NotARegisteredType").unwrap(), None);
    }

    #[test]
    fn unknown_row_type_is_rejected() {
        let (registry, def) = registry_with_money();
        let codec = StructuredTypeCodec::new(&registry);
        let row = vec![WireValue::text("USD"), WireValue::integer(500), WireValue::Null];
        let err = codec.decode(&def, Some(row), "NotARegisteredType").unwrap_err();
        assert!(matches!(err, CompositeError::UnknownType(ref n) if n == "NotARegisteredType"));
    }

    #[test]
    fn row_tagged_with_another_registered_type_is_rejected() {
        let (registry, def) = registry_with_money();
        registry
            .define("other", vec![FieldSpec::new("x", PrimitiveType::Text)])
            .unwrap();
        let codec = StructuredTypeCodec::new(&registry);
        let row = vec![WireValue::text("USD"), WireValue::integer(500), WireValue::Null];
        assert!(matches!(
            codec.decode(&def, Some(row), "other"),
            Err(CompositeError::TypeMismatch(_))
        ));
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let (registry, def) = registry_with_money();
        let codec = StructuredTypeCodec::new(&registry);
        let err = codec
            .decode(&def, Some(vec![WireValue::text("USD")]), "money_type")
            .unwrap_err();
        assert!(matches!(
            err,
            CompositeError::ArityMismatch { expected: 3, found: 1, .. }
        ));
    }

    #[test]
    fn rejects_wrong_kinds_unknown_fields_and_required_nulls() {
        let registry = TypeRegistry::new();
        let def = registry
            .define(
                "money_amount",
                vec![
                    FieldSpec::new("value", PrimitiveType::Decimal).required(),
                    FieldSpec::new("currency", PrimitiveType::Text),
                ],
            )
            .unwrap();
        let codec = StructuredTypeCodec::new(&registry);

        let wrong_kind = StructuredValue::new("money_amount").with("value", 12);
        assert!(matches!(
            codec.encode_row(&def, &wrong_kind),
            Err(CompositeError::TypeMismatch(_))
        ));

        let missing = StructuredValue::new("money_amount").with("currency", "EUR");
        assert!(matches!(
            codec.encode_row(&def, &missing),
            Err(CompositeError::NullViolation { ref field, .. }) if field == "value"
        ));

        let extra = StructuredValue::new("money_amount")
            .with("value", Decimal::from(1))
            .with("colour", "red");
        assert!(matches!(
            codec.encode_row(&def, &extra),
            Err(CompositeError::UnknownField { ref field, .. }) if field == "colour"
        ));

        let wrong_type = StructuredValue::new("period");
        assert!(matches!(
            codec.encode_row(&def, &wrong_type),
            Err(CompositeError::TypeMismatch(_))
        ));
    }

    #[test]
    fn nested_values_round_trip() {
        let registry = TypeRegistry::new();
        registry
            .define(
                "period",
                vec![
                    FieldSpec::new("start", PrimitiveType::Timestamp),
                    FieldSpec::new("end", PrimitiveType::Timestamp),
                ],
            )
            .unwrap();
        let address = registry
            .define(
                "address",
                vec![
                    FieldSpec::new("city", PrimitiveType::Text),
                    FieldSpec::new("since", PrimitiveType::Date),
                    FieldSpec::new("period", StorageType::composite("period")),
                ],
            )
            .unwrap();
        let codec = StructuredTypeCodec::new(&registry);

        let start = Utc.with_ymd_and_hms(2020, 1, 1, 8, 30, 0).unwrap();
        let value = StructuredValue::new("address")
            .with("city", "Berlin")
            .with("since", NaiveDate::from_ymd_opt(2019, 12, 24).unwrap())
            .with("period", StructuredValue::new("period").with("start", start));

        let row = codec.encode(&address, Some(&value)).unwrap();
        let Some(ref encoded) = row else {
            panic!("expected a row");
        };
        assert_eq!(
            encoded[2],
            WireValue::Row(vec![
                WireValue::Primitive(Primitive::Timestamp(start)),
                WireValue::Null
            ])
        );
        let decoded = codec.decode(&address, row, "address").unwrap();
        assert_eq!(decoded, Some(value));
    }

    #[test]
    fn transforms_apply_on_encode() {
        let registry = TypeRegistry::new();
        let def = registry
            .define(
                "money_amount",
                vec![
                    FieldSpec::new("currency", PrimitiveType::Text)
                        .with_transform(FieldTransform::uppercase()),
                ],
            )
            .unwrap();
        let codec = StructuredTypeCodec::new(&registry);
        let row = codec
            .encode_row(&def, &StructuredValue::new("money_amount").with("currency", "eur"))
            .unwrap();
        assert_eq!(row, vec![WireValue::text("EUR")]);
    }
}
