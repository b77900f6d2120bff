use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Main error type for ragcore
#[derive(Error, Debug)]
pub enum RagError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Application configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// Retrieval profile values out of range, rejected at the profile store boundary
    #[error("Retrieval profile is invalid: {errors:?}")]
    ConfigurationInvalid { errors: Vec<ValidationError> },

    /// Retrieval profile not found
    #[error("Retrieval profile not found: {key}")]
    ProfileNotFound { key: String },

    /// Another profile already owns this key
    #[error("Retrieval profile key already exists: {key}")]
    ProfileConflict { key: String },

    /// Built-in profiles cannot be removed
    #[error("Built-in retrieval profile cannot be deleted: {key}")]
    BuiltinProfile { key: String },

    /// Library not found
    #[error("Library not found: {name}")]
    LibraryNotFound { name: String },

    /// A graph rebuild for this library is already running
    #[error("Graph rebuild already in progress for library {library_id}")]
    GraphRebuildConflict { library_id: Uuid },

    /// The enclosing request was cancelled
    #[error("Request cancelled")]
    Cancelled,

    /// A channel ran past its deadline
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Query rejected before retrieval
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Embedding capability failed
    #[error("Embedding error: {0}")]
    Embedding(#[from] crate::embedding::EmbeddingError),

    /// Chunk store or snapshot store failure
    #[error("Store error: {0}")]
    Store(String),

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Keyword index errors
    #[error("Keyword index error: {0}")]
    Index(#[from] tantivy::TantivyError),

    /// Pattern compilation errors
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A single validation failure, addressed by its dotted key path
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// Path to the key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Result type for ragcore operations
pub type Result<T> = std::result::Result<T, RagError>;
