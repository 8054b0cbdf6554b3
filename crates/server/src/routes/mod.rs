pub mod health;
pub mod literal;
pub mod types;

use axum::{
    Router,
    routing::{get, post},
};

use crate::AppState;

/// Build structured type catalogue routes
pub fn type_routes() -> Router<AppState> {
    Router::new()
        .route("/types", get(types::list))
        .route("/types/{name}", get(types::read))
        .route("/types/{name}/literal", post(literal::render))
}
