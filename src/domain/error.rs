//! Errors raised by the persistence layer.

use thiserror::Error;

/// Errors from a credential store or token repository
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Underlying file or I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
