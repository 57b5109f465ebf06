//! Error types for portlock
//!
//! Only fatal conditions live here. A candidate that is busy, or whose marker
//! could not be opened or locked, is an `Acquire` outcome of the arbiter and
//! never becomes a `PortLockError`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PortLockError {
    #[error("No lockable port in range {start}-{end} ({attempted} candidates attempted)")]
    AllocationExhausted { start: u16, end: u16, attempted: usize },

    #[error("Invalid port range: {start}-{end}")]
    InvalidRange { start: u16, end: u16 },

    #[error("Invalid lock file prefix: {0:?}")]
    InvalidPrefix(String),

    #[error("Lock directory {} unavailable: {source}", .path.display())]
    LockDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl PortLockError {
    /// True for errors that mean the process could not reserve a port at all
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PortLockError::AllocationExhausted { .. })
    }
}

pub type Result<T> = std::result::Result<T, PortLockError>;
