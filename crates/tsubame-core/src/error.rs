use thiserror::Error;

/// Errors that can occur during Tsubame core operations.
#[derive(Debug, Error)]
pub enum TsubameError {
    /// A tensor or feature set does not have the dimensions the model expects.
    #[error("shape mismatch in {context}: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Which quantity was being checked.
        context: &'static str,
        /// Expected size.
        expected: usize,
        /// Observed size.
        actual: usize,
    },

    /// The gold label sequence and the token sequence differ in length.
    #[error("label sequence has length {labels}, but token sequence has length {tokens}")]
    LengthMismatch {
        /// Number of tokens (emission rows).
        tokens: usize,
        /// Number of gold labels.
        labels: usize,
    },

    /// A label index or name that is not a real label of the tag set.
    #[error("invalid label: {0}")]
    InvalidLabel(String),

    /// A sparse feature index falls outside the base feature space.
    #[error("feature index {index} out of range (num_base_features = {limit})")]
    FeatureOutOfRange {
        /// Offending index.
        index: usize,
        /// Size of the base feature space.
        limit: usize,
    },

    /// A score, loss or gradient became NaN or infinite.
    #[error("numerical instability: {0}")]
    NumericalInstability(String),

    /// A configuration value is unusable (e.g. a zero-sized feature space).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The model files could not be loaded.
    #[error("failed to load model: {0}")]
    ModelLoadError(String),

    /// Candle tensor error while (de)serializing parameters.
    #[error("tensor error: {0}")]
    CandleError(String),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for Tsubame operations.
pub type Result<T> = std::result::Result<T, TsubameError>;
