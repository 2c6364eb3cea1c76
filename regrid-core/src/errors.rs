use std::path::PathBuf;
use thiserror::Error;

/// Error type for weight assembly and weight caching.
#[derive(Error, Debug)]
pub enum RegridError {
    #[error("Cannot build a spatial index over an empty point set")]
    EmptyIndex,

    #[error("Insufficient neighbours: requested {requested}, only {available} available")]
    InsufficientNeighbours { requested: usize, available: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Weight matrix validation failed for method '{method}' at row {row}: {reason}")]
    AssemblyInvariantViolation {
        method: String,
        row: usize,
        reason: String,
    },

    #[error("Corrupt weight cache entry {path}: {reason}")]
    CacheCorrupt { path: PathBuf, reason: String },

    #[error("Isolated computation of '{key}' did not complete: {reason}")]
    ChildProcessFailure { key: String, reason: String },

    #[error("Dimension mismatch for {what}: expected {expected}, got {got}")]
    DimensionMismatch {
        what: String,
        expected: usize,
        got: usize,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Serialisation error: {0}")]
    Serialisation(String),
}

/// Convenience type for `Result<T, RegridError>`.
pub type RegridResult<T> = Result<T, RegridError>;

impl From<serde_json::Error> for RegridError {
    fn from(e: serde_json::Error) -> Self {
        RegridError::Serialisation(e.to_string())
    }
}
