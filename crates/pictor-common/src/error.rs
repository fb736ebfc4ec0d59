//! Error types for Pictor

use thiserror::Error;

/// Result type alias for Pictor operations
pub type Result<T> = std::result::Result<T, PictorError>;

/// Main error type for Pictor
#[derive(Error, Debug)]
pub enum PictorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Record in '{collection}' is missing the required 'id' field")]
    MissingId { collection: String },

    #[error("No queries configured")]
    NoQueries,
}
