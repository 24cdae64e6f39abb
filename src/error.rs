use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrichError {
    #[error("Coordinate catalog for region {region} not found: {}", path.display())]
    CatalogNotFound { region: String, path: PathBuf },

    #[error("Missing required fields in {}: {}", path.display(), missing.join(", "))]
    Schema { path: PathBuf, missing: Vec<String> },

    /// A stage changed the number of rows in the batch. Always a bug.
    #[error("Row count changed during {stage}: expected {expected}, got {actual}")]
    RowCountMismatch {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Region task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EnrichError>;

/// Failure of a single geocoding attempt. Never aborts a batch.
#[derive(Error, Debug)]
pub enum GeocodeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Geocoder returned status {0}")]
    Status(u16),

    #[error("Could not decode geocoder response: {0}")]
    Decode(String),

    #[error("Geocoder returned an unusable coordinate: {0}")]
    InvalidCoordinate(String),
}
