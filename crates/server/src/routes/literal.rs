//! Composite literal rendering for a JSON value

use std::str::FromStr;

use axum::{
    Json,
    extract::{Path, State},
};
use chrono::{DateTime, NaiveDate, Utc};
use fhir_composite::{
    ClientEncoding, CompositeError, Decimal, FieldValue, Primitive, PrimitiveType, StorageType,
    StructuredTypeDefinition, StructuredValue, TypeRegistry, serialize_for_wire,
};
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::AppState;
use crate::error::AppError;

#[derive(Debug, Serialize)]
pub struct LiteralResponse {
    #[serde(rename = "type")]
    type_name: String,
    literal: String,
    sql: String,
    encoding: String,
}

/// POST /types/{name}/literal - Validate a JSON object against a structured
/// type and render it as a composite literal
pub async fn render(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<JsonValue>,
) -> Result<Json<LiteralResponse>, AppError> {
    let registry = state.types.registry();
    let definition = registry
        .lookup(&name)
        .ok_or_else(|| AppError::NotFound(format!("Structured type {} not found", name)))?;

    let value = structured_from_json(registry, &definition, &body)?;
    let literal = serialize_for_wire(registry, &definition, &value, ClientEncoding::Utf8)?;

    Ok(Json(LiteralResponse {
        type_name: literal.type_name().to_string(),
        literal: literal.text().to_string(),
        sql: literal.to_sql_expression(),
        encoding: literal.encoding().to_string(),
    }))
}

/// Build a structured value from a JSON object, using the definition to
/// pick the primitive each member is read as.
pub(crate) fn structured_from_json(
    registry: &TypeRegistry,
    definition: &StructuredTypeDefinition,
    json: &JsonValue,
) -> Result<StructuredValue, AppError> {
    let JsonValue::Object(members) = json else {
        return Err(AppError::BadRequest(format!(
            "Expected a JSON object for {}",
            definition.name()
        )));
    };

    let mut value = StructuredValue::new(definition.name());
    for (key, member) in members {
        let spec = definition
            .field(key)
            .ok_or_else(|| CompositeError::UnknownField {
                type_name: definition.name().to_string(),
                field: key.clone(),
            })?;
        let field = if member.is_null() {
            FieldValue::Null
        } else {
            match spec.storage() {
                StorageType::Primitive(kind) => {
                    FieldValue::Primitive(primitive_from_json(*kind, key, member)?)
                }
                StorageType::Composite(nested) => {
                    let nested = registry
                        .lookup(nested)
                        .ok_or_else(|| CompositeError::UnknownType(nested.clone()))?;
                    FieldValue::Composite(structured_from_json(registry, &nested, member)?)
                }
            }
        };
        value.set(key.as_str(), field);
    }
    Ok(value)
}

fn primitive_from_json(kind: PrimitiveType, key: &str, json: &JsonValue) -> Result<Primitive, AppError> {
    let invalid = || AppError::BadRequest(format!("Field {} is not a valid {}", key, kind));
    let primitive = match (kind, json) {
        (PrimitiveType::Text, JsonValue::String(s)) => Primitive::Text(s.clone()),
        (PrimitiveType::Integer, JsonValue::Number(n)) => Primitive::Integer(
            n.as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .ok_or_else(invalid)?,
        ),
        (PrimitiveType::Decimal, JsonValue::Number(n)) => {
            Primitive::Decimal(Decimal::from_str(&n.to_string())?)
        }
        (PrimitiveType::Decimal, JsonValue::String(s)) => Primitive::Decimal(Decimal::from_str(s)?),
        (PrimitiveType::Boolean, JsonValue::Bool(b)) => Primitive::Boolean(*b),
        (PrimitiveType::Timestamp, JsonValue::String(s)) => Primitive::Timestamp(
            DateTime::parse_from_rfc3339(s)
                .map_err(|_| invalid())?
                .with_timezone(&Utc),
        ),
        (PrimitiveType::Date, JsonValue::String(s)) => {
            Primitive::Date(NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| invalid())?)
        }
        _ => return Err(invalid()),
    };
    Ok(primitive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fhir_composite::Catalogue;
    use serde_json::json;

    fn registry() -> TypeRegistry {
        let registry = TypeRegistry::new();
        Catalogue::fhir_datatypes().define_all(&registry).unwrap();
        registry
    }

    #[test]
    fn reads_nested_objects_by_field_kind() {
        let registry = registry();
        let identifier = registry.lookup("identifier").unwrap();
        let value = structured_from_json(
            &registry,
            &identifier,
            &json!({
                "value": "MRN-1",
                "period": {"start": "2024-01-01T00:00:00Z", "end": null}
            }),
        )
        .unwrap();

        let Some(FieldValue::Composite(period)) = value.get("period") else {
            panic!("period should be a composite");
        };
        assert_eq!(period.type_name(), "period");
        assert!(matches!(
            period.get("start"),
            Some(FieldValue::Primitive(Primitive::Timestamp(_)))
        ));
    }

    #[test]
    fn rejects_wrong_json_kinds_and_unknown_members() {
        let registry = registry();
        let money = registry.lookup("money_amount").unwrap();
        assert!(matches!(
            structured_from_json(&registry, &money, &json!({"value": true})),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            structured_from_json(&registry, &money, &json!({"amount": 1})),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            structured_from_json(&registry, &money, &json!([1, 2])),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn decimals_keep_their_digits() {
        let registry = registry();
        let money = registry.lookup("money_amount").unwrap();
        let value =
            structured_from_json(&registry, &money, &json!({"value": "12.50", "currency": "eur"}))
                .unwrap();
        assert_eq!(
            value.get("value"),
            Some(&FieldValue::Primitive(Primitive::Decimal("12.50".parse().unwrap())))
        );
    }
}
