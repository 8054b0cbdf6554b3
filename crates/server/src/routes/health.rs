//! Health check endpoint

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    structured_types: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

/// GET /health - Check that a connection can be checked out with every
/// structured type registered on it
pub async fn check(State(state): State<AppState>) -> impl IntoResponse {
    let structured_types = state.types.registry().len();
    match state.types.connect(&state.pool).await {
        Ok(connection) => match connection.client().query_one("SELECT 1", &[]).await {
            Ok(_) => (
                StatusCode::OK,
                Json(HealthResponse {
                    status: "healthy".to_string(),
                    structured_types,
                    reason: None,
                }),
            ),
            Err(e) => {
                tracing::error!(error = %e, "Health check query failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(HealthResponse {
                        status: "unhealthy".to_string(),
                        structured_types,
                        reason: Some(format!("Database query failed: {}", e)),
                    }),
                )
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "Health check connection error");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "unhealthy".to_string(),
                    structured_types,
                    reason: Some(format!("Database connection failed: {}", e)),
                }),
            )
        }
    }
}
