use thiserror::Error;

/// Errors raised by the structured type bridge
#[derive(Debug, Error)]
pub enum CompositeError {
    #[error("Duplicate field '{field}' in structured type '{type_name}'")]
    DuplicateField { type_name: String, field: String },

    #[error("Unknown structured type: {0}")]
    UnknownType(String),

    #[error("Unknown field '{field}' for structured type '{type_name}'")]
    UnknownField { type_name: String, field: String },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Field '{field}' of structured type '{type_name}' is not nullable")]
    NullViolation { type_name: String, field: String },

    #[error("Row for '{type_name}' has {found} positions, expected {expected}")]
    ArityMismatch {
        type_name: String,
        expected: usize,
        found: usize,
    },

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Malformed composite literal: {0}")]
    MalformedLiteral(String),

    #[error("Database driver unavailable: {0}")]
    DriverUnavailable(String),

    #[error("Structured type '{0}' is not registered with this connection")]
    NotRegistered(String),

    #[error("Layout mismatch: {0}")]
    LayoutMismatch(String),

    #[error("Invalid catalogue: {0}")]
    Catalogue(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl CompositeError {
    pub(crate) fn mismatch(type_name: &str, field: &str, expected: &str, found: &str) -> Self {
        CompositeError::TypeMismatch(format!(
            "field '{field}' of '{type_name}' expects {expected}, got {found}"
        ))
    }
}

pub type Result<T> = std::result::Result<T, CompositeError>;
