//! Server configuration

use std::path::PathBuf;

use fhir_composite::{Catalogue, CompositeError};

/// Server configuration loaded from environment variables
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub cors_origins: Vec<String>,
    /// JSON catalogue replacing the built-in FHIR datatypes
    pub catalogue_path: Option<PathBuf>,
    pub drop_types_on_shutdown: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "host=localhost user=postgres dbname=fhir".into()),
            bind_address: std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            catalogue_path: std::env::var_os("FHIR_CATALOGUE").map(PathBuf::from),
            drop_types_on_shutdown: std::env::var("DROP_TYPES_ON_SHUTDOWN")
                .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
        }
    }

    /// The configured catalogue, or the built-in FHIR datatypes.
    pub fn load_catalogue(&self) -> Result<Catalogue, CompositeError> {
        match &self.catalogue_path {
            Some(path) => {
                let json = std::fs::read_to_string(path).map_err(|e| {
                    CompositeError::Catalogue(format!("{}: {}", path.display(), e))
                })?;
                Catalogue::from_json(&json)
            }
            None => Ok(Catalogue::fhir_datatypes()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "host=localhost user=postgres dbname=fhir".into(),
            bind_address: "0.0.0.0:8080".into(),
            cors_origins: vec!["*".into()],
            catalogue_path: None,
            drop_types_on_shutdown: false,
        }
    }
}
