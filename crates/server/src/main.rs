//! fhir-server: structured type bootstrap and HTTP entrypoint.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fhir_server::AppState;
use fhir_server::config::Config;
use fhir_server::db::StructuredTypes;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    // Load configuration
    let config = Config::from_env();

    // Create database pool
    let pool = fhir_server::db::create_pool(&config.database_url)
        .await
        .expect("Failed to create database pool");

    // Define structured types and create them in the database
    let catalogue = config
        .load_catalogue()
        .expect("Failed to load structured type catalogue");
    let types =
        Arc::new(StructuredTypes::new(&catalogue).expect("Invalid structured type catalogue"));
    types
        .create_schema(&pool)
        .await
        .expect("Failed to create structured types");
    tracing::info!(
        count = types.registry().len(),
        "Structured types created and registered"
    );

    // Build application
    let state = AppState {
        pool: pool.clone(),
        types: Arc::clone(&types),
    };
    let app = fhir_server::build_app(state, &config);

    // Start server
    let addr: SocketAddr = config.bind_address.parse().expect("Invalid bind address");
    tracing::info!("Starting FHIR server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();

    if config.drop_types_on_shutdown {
        match types.drop_schema(&pool).await {
            Ok(()) => tracing::info!("Structured types dropped"),
            Err(e) => tracing::error!(error = %e, "Failed to drop structured types"),
        }
    }

    tracing::info!("Server shutdown complete");
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
