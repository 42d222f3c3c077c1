//! Error types for the search core.
//!
//! Only a few of these ever reach a caller as a job failure. Per-file problems
//! (`FileNotFound`, `PermissionDenied`, `IoError`, `EncodingError`) are produced
//! by the scanner, logged, and folded into an empty or partial
//! `FileSearchResults`; they never fail a job. `InvalidPattern` and `WorkerPool`
//! move a job to `Status::Error`. `InvalidState` is returned by job operations
//! that are called at the wrong point of the lifecycle and leaves the job
//! untouched.
//!
//! ```rust,ignore
//! match job.begin() {
//!     Ok(()) => {}
//!     Err(SearchError::InvalidPattern(msg)) => eprintln!("fix your regex: {msg}"),
//!     Err(e) => eprintln!("search failed: {e}"),
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::search::job::Status;

/// Result type for search operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Errors that can occur during search operations
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("Cannot {operation} a search job in {status} state")]
    InvalidState {
        operation: &'static str,
        status: Status,
    },
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Worker pool error: {0}")]
    WorkerPool(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid UTF-8 in file {path} at line {line}")]
    EncodingError { path: PathBuf, line: usize },
}

impl SearchError {
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound(path.into())
    }

    pub fn permission_denied(path: impl Into<PathBuf>) -> Self {
        Self::PermissionDenied(path.into())
    }

    pub fn invalid_pattern(pattern: impl Into<String>) -> Self {
        Self::InvalidPattern(pattern.into())
    }

    pub fn invalid_state(operation: &'static str, status: Status) -> Self {
        Self::InvalidState { operation, status }
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn worker_pool(msg: impl Into<String>) -> Self {
        Self::WorkerPool(msg.into())
    }

    pub fn encoding_error(path: impl Into<PathBuf>, line: usize) -> Self {
        Self::EncodingError {
            path: path.into(),
            line,
        }
    }

    /// Maps an `io::Error` raised while opening `path` to the matching variant.
    pub fn from_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::file_not_found(path),
            std::io::ErrorKind::PermissionDenied => Self::permission_denied(path),
            _ => Self::IoError(err),
        }
    }
}
