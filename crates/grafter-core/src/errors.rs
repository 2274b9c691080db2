//! Error types for the grafter core library.

use std::path::PathBuf;

/// Top-level error enum for the grafter core library.
#[derive(Debug, thiserror::Error)]
pub enum GraftError {
    #[error("Failed to {op} {path}: {source}")]
    FileSystem {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {path} at {line}:{column}: {message}")]
    Parse {
        path: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Build error: {0}")]
    Build(String),

    #[error("Merge conflict in {path}: {count} conflicting symbol(s)")]
    MergeConflict { path: String, count: usize },

    #[error("Dependency error in {path}: {message}")]
    Dependency { path: String, message: String },

    #[error("State file {path}: {message}")]
    StateFile { path: PathBuf, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No integration session in progress")]
    NoSession,

    #[error("Unknown file in session: {0}")]
    UnknownFile(String),

    #[error("{path} has no conflicts awaiting a resolution")]
    NotResolvable { path: String },
}

impl GraftError {
    pub fn fs(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GraftError::FileSystem {
            op,
            path: path.into(),
            source,
        }
    }

    /// Errors that leave the session without a reliable ledger or
    /// configuration and therefore abort it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            GraftError::StateFile { .. } | GraftError::Config(_) | GraftError::ConfigSource(_)
        )
    }
}

pub type GraftResult<T> = Result<T, GraftError>;
