//! Error types for RustCTC.

use thiserror::Error;

/// Main error type for acoustic model operations.
#[derive(Error, Debug)]
pub enum AmError {
    /// Model construction or weight loading errors.
    #[error("Model error: {0}")]
    Model(String),

    /// Forward pass errors (bad shapes, bad sequence lengths).
    #[error("Inference error: {0}")]
    Inference(String),

    /// Configuration errors.
    #[error("Config error: {0}")]
    Config(String),

    /// I/O errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Candle tensor errors.
    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    /// JSON parsing errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for acoustic model operations.
pub type AmResult<T> = Result<T, AmError>;
