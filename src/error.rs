use thiserror::Error;

/// Errors that can occur in cf-kge.
#[derive(Error, Debug)]
pub enum Error {
    /// Candle tensor error (shape mismatch, out-of-range index, device).
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Entity or relation not found in the vocabulary.
    #[error("Not found: {0}")]
    NotFound(String),
    /// Invalid input or configuration.
    #[error("Validation error: {0}")]
    Validation(String),
    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    /// Malformed line in a triple file.
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },
}

/// Result type alias for cf-kge.
pub type Result<T> = std::result::Result<T, Error>;
