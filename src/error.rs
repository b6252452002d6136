//! Error types for emat-storage

use thiserror::Error;

/// Result alias used throughout the crate
pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    /// A scope, design, experiment, metamodel or box does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Creation collides with an existing unique entity
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A column or reference is not declared in the scope
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A read omitted the source and several are stored
    #[error("Ambiguous source: {0}")]
    AmbiguousSource(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(what: impl Into<String>) -> Self {
        Self::InvalidArgument(what.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    pub fn is_ambiguous_source(&self) -> bool {
        matches!(self, Self::AmbiguousSource(_))
    }
}
