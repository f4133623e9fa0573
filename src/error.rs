//! Error types for scrivener.

/// Result type alias using [`CaptionError`].
pub type Result<T> = std::result::Result<T, CaptionError>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum CaptionError {
    /// Learned matrices disagree with the declared dimensions, or a
    /// hyperparameter is out of range. Raised at construction time.
    #[error("configuration: {0}")]
    Configuration(String),

    /// Malformed input at a call boundary (wrong rank, wrong feature size,
    /// ragged batch, out-of-range token index).
    #[error("validation: {0}")]
    Validation(String),

    /// NaN or infinite values found by an opt-in numeric check.
    #[error("numeric instability: {0}")]
    NumericInstability(String),

    /// Corrupt or unsupported checkpoint file.
    #[error("checkpoint: {0}")]
    Checkpoint(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
