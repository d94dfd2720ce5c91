//! Error types for the mmrag core library.
//!
//! Uses `thiserror` for structured error variants covering configuration,
//! dataset loading, encoding, retrieval and generation.

use std::path::PathBuf;

/// Top-level error type for the mmrag core library.
#[derive(Debug, thiserror::Error)]
pub enum MmragError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Dataset error: {0}")]
    Dataset(#[from] DatasetError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] RetrievalError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MmragError {
    /// Whether this error must abort the run instead of being recorded
    /// against a single question.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Config(_) | Self::Dataset(_) | Self::Io(_) | Self::Serialization(_) => true,
            Self::Retrieval(RetrievalError::Config(_)) => true,
            Self::Encoding(_) | Self::Retrieval(_) | Self::Generation(_) => false,
        }
    }
}

/// Configuration errors. Always fatal, raised before any question is processed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("top-k for {modality} must be positive")]
    InvalidTopK { modality: String },

    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("No generator registered for model family '{name}'")]
    UnknownBackend { name: String },

    #[error("Failed to load configuration: {message}")]
    Load { message: String },
}

/// Errors from reading top-level inputs and image files.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Failed to decode image {path}: {message}")]
    ImageDecode { path: PathBuf, message: String },
}

/// Errors from embedding encoders.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    #[error("Embedding request failed: {message}")]
    Request { message: String },

    #[error("Embedding response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Encoder returned {got} embeddings for {expected} inputs")]
    Cardinality { expected: usize, got: usize },
}

/// Errors from scoring and top-k selection.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("Candidate {index} has dimension {got}, query has {expected}")]
    DimensionMismatch {
        expected: usize,
        got: usize,
        index: usize,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised while invoking a generator.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Prompt has {placeholders} image placeholders but {images} images were supplied")]
    ImageCountMismatch { placeholders: usize, images: usize },

    #[error("Generation request failed: {message}")]
    Request { message: String },

    #[error("Generation response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Generation timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Generator backend error: {message}")]
    Backend { message: String },
}

pub type Result<T, E = MmragError> = std::result::Result<T, E>;
