//! Registered structured type catalogue

use axum::{
    Json,
    extract::{Path, State},
};
use fhir_composite::StructuredTypeDefinition;
use serde::Serialize;

use crate::AppState;
use crate::error::AppError;

#[derive(Debug, Serialize)]
pub struct FieldView {
    name: String,
    #[serde(rename = "type")]
    storage: String,
    nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    transform: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct TypeView {
    name: String,
    fields: Vec<FieldView>,
    ddl: String,
}

impl From<&StructuredTypeDefinition> for TypeView {
    fn from(definition: &StructuredTypeDefinition) -> Self {
        Self {
            name: definition.name().to_string(),
            fields: definition
                .fields()
                .iter()
                .map(|field| FieldView {
                    name: field.name().to_string(),
                    storage: field.storage().to_string(),
                    nullable: field.is_nullable(),
                    transform: field.transform().map(|t| t.name()),
                })
                .collect(),
            ddl: definition.create_type_sql(),
        }
    }
}

/// GET /types - Every registered structured type in creation order
pub async fn list(State(state): State<AppState>) -> Json<Vec<TypeView>> {
    let views = state
        .types
        .registry()
        .all()
        .iter()
        .map(|definition| TypeView::from(definition.as_ref()))
        .collect();
    Json(views)
}

/// GET /types/{name} - One structured type
pub async fn read(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<TypeView>, AppError> {
    let definition = state
        .types
        .registry()
        .lookup(&name)
        .ok_or_else(|| AppError::NotFound(format!("Structured type {} not found", name)))?;
    Ok(Json(TypeView::from(definition.as_ref())))
}
