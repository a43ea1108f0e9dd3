//! Error types for `taskmerge`.

use crate::reconcile::MergeError;
use std::path::PathBuf;

/// Errors that can occur outside the merge pipeline itself.
///
/// Merge failures are carried in [`Error::Merge`] so callers that only care
/// about "did it commit" can use a single `Result`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON parsing error occurred.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A YAML parsing error occurred.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A `SQLite` database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A template error occurred.
    #[error("Template error: {0}")]
    Template(String),

    /// The model invocation service returned an error instead of a response.
    #[error("Model invocation failed: {0}")]
    Model(String),

    /// A merge operation was refused. The graph was left untouched.
    #[error(transparent)]
    Merge(#[from] MergeError),

    /// The task file does not exist.
    #[error("Task graph not found: {0}")]
    GraphNotFound(PathBuf),

    /// A loaded graph could not be used as-is.
    #[error("Invalid task graph: {0}")]
    InvalidGraph(String),
}

impl From<tera::Error> for Error {
    fn from(err: tera::Error) -> Self {
        // tera nests the useful message in the source chain
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }
        Self::Template(message)
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
