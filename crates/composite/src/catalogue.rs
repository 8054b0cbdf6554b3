//! Flat catalogue of structured types consumed from the record layer.
//!
//! Each entry is `(type name, [(field name, storage name)])`. Storage names
//! are FHIR primitive names (`string`, `dateTime`, ...), the SQL-ish names of
//! [`PrimitiveType`], or the name of an earlier entry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{CompositeError, Result};
use crate::field::{FieldSpec, FieldTransform, StorageType};
use crate::registry::{StructuredTypeDefinition, TypeRegistry};
use crate::value::PrimitiveType;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogueField {
    pub name: String,
    #[serde(rename = "type")]
    pub storage: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogueEntry {
    pub name: String,
    pub fields: Vec<CatalogueField>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalogue {
    entries: Vec<CatalogueEntry>,
}

/// FHIR R4 datatypes with scalar members. Repeating elements (`Address.line`,
/// `HumanName.given`, ...) are left out since arrays are not mapped.
const FHIR_DATATYPES: &[(&str, &[(&str, &str)])] = &[
    (
        "coding",
        &[
            ("system", "uri"),
            ("version", "string"),
            ("code", "code"),
            ("display", "string"),
            ("user_selected", "boolean"),
        ],
    ),
    ("period", &[("start", "dateTime"), ("end", "dateTime")]),
    (
        "quantity",
        &[
            ("value", "decimal"),
            ("comparator", "code"),
            ("unit", "string"),
            ("system", "uri"),
            ("code", "code"),
        ],
    ),
    ("money_amount", &[("value", "decimal"), ("currency", "currency")]),
    (
        "identifier",
        &[
            ("use", "code"),
            ("system", "uri"),
            ("value", "string"),
            ("period", "period"),
        ],
    ),
    (
        "contact_point",
        &[
            ("system", "code"),
            ("value", "string"),
            ("use", "code"),
            ("rank", "positiveInt"),
            ("period", "period"),
        ],
    ),
    (
        "address",
        &[
            ("use", "code"),
            ("type", "code"),
            ("text", "string"),
            ("city", "string"),
            ("district", "string"),
            ("state", "string"),
            ("postal_code", "string"),
            ("country", "string"),
            ("period", "period"),
        ],
    ),
    (
        "human_name",
        &[
            ("use", "code"),
            ("text", "string"),
            ("family", "string"),
            ("period", "period"),
        ],
    ),
];

impl Catalogue {
    pub fn new(entries: Vec<CatalogueEntry>) -> Self {
        Self { entries }
    }

    /// The built-in FHIR datatype catalogue.
    pub fn fhir_datatypes() -> Self {
        let entries = FHIR_DATATYPES
            .iter()
            .map(|(name, fields)| CatalogueEntry {
                name: name.to_string(),
                fields: fields
                    .iter()
                    .map(|(field, storage)| CatalogueField {
                        name: field.to_string(),
                        storage: storage.to_string(),
                        required: false,
                    })
                    .collect(),
            })
            .collect();
        Self { entries }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CompositeError::Catalogue(e.to_string()))
    }

    pub fn entries(&self) -> &[CatalogueEntry] {
        &self.entries
    }

    /// Define every entry in order.
    pub fn define_all(&self, registry: &TypeRegistry) -> Result<Vec<Arc<StructuredTypeDefinition>>> {
        self.entries
            .iter()
            .map(|entry| {
                let fields = entry
                    .fields
                    .iter()
                    .map(|field| {
                        let spec = field_spec(registry, &field.name, &field.storage)?;
                        Ok(if field.required { spec.required() } else { spec })
                    })
                    .collect::<Result<Vec<_>>>()?;
                registry.define(&entry.name, fields)
            })
            .collect()
    }
}

/// Map a catalogue storage name onto a field spec.
fn field_spec(registry: &TypeRegistry, name: &str, storage: &str) -> Result<FieldSpec> {
    let primitive = match storage {
        "string" | "markdown" | "uri" | "url" | "canonical" | "id" | "oid" | "uuid" | "text" => {
            Some((PrimitiveType::Text, None))
        }
        "code" => Some((PrimitiveType::Text, Some(FieldTransform::trimmed()))),
        "currency" => Some((PrimitiveType::Text, Some(FieldTransform::uppercase()))),
        "integer" | "positiveInt" | "unsignedInt" => Some((PrimitiveType::Integer, None)),
        "decimal" | "numeric" => Some((PrimitiveType::Decimal, None)),
        "boolean" => Some((PrimitiveType::Boolean, None)),
        "dateTime" | "instant" | "timestamp" => Some((PrimitiveType::Timestamp, None)),
        "date" => Some((PrimitiveType::Date, None)),
        _ => None,
    };

    match primitive {
        Some((kind, transform)) => {
            let spec = FieldSpec::new(name, kind);
            Ok(match transform {
                Some(transform) => spec.with_transform(transform),
                None => spec,
            })
        }
        None if registry.lookup(storage).is_some() => {
            Ok(FieldSpec::new(name, StorageType::composite(storage)))
        }
        None => Err(CompositeError::UnknownType(storage.to_string())),
    }
}
