//! Application error handling

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use fhir_composite::CompositeError;
use serde_json::json;

/// Application error type
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not-found", msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "invalid", msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "transient", msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "exception", msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, msg) = self.parts();
        let outcome = json!({
            "resourceType": "OperationOutcome",
            "issue": [{
                "severity": "error",
                "code": code,
                "diagnostics": msg,
            }]
        });
        (status, Json(outcome)).into_response()
    }
}

impl From<CompositeError> for AppError {
    fn from(err: CompositeError) -> Self {
        match err {
            CompositeError::UnknownType(name) => {
                AppError::NotFound(format!("Unknown structured type: {}", name))
            }
            CompositeError::DriverUnavailable(_) | CompositeError::Database(_) => {
                AppError::Unavailable(err.to_string())
            }
            CompositeError::DuplicateField { .. }
            | CompositeError::UnknownField { .. }
            | CompositeError::InvalidIdentifier(_)
            | CompositeError::TypeMismatch(_)
            | CompositeError::NullViolation { .. }
            | CompositeError::ArityMismatch { .. }
            | CompositeError::Encoding(_)
            | CompositeError::MalformedLiteral(_) => AppError::BadRequest(err.to_string()),
            CompositeError::NotRegistered(_)
            | CompositeError::LayoutMismatch(_)
            | CompositeError::Catalogue(_) => AppError::Internal(err.to_string()),
        }
    }
}
