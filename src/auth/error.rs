//! Error types for the authentication services.

use thiserror::Error;

use crate::domain::{RepositoryError, Role};

/// Errors from the user directory
#[derive(Debug, Error)]
pub enum AuthError {
    /// No user registered under this username
    #[error("user '{0}' not found")]
    UserNotFound(String),

    /// Password did not match the stored hash
    #[error("incorrect password")]
    IncorrectPassword,

    /// Registration attempted with a taken username
    #[error("username '{0}' already exists")]
    DuplicateUsername(String),

    /// Role change to the role the user already has
    #[error("user '{username}' is already {role}")]
    AlreadyInRole { username: String, role: Role },

    /// The credential store failed to persist a change
    #[error(transparent)]
    Persist(#[from] RepositoryError),
}

/// Errors from session token validation
#[derive(Debug, Error)]
pub enum TokenError {
    /// No token on file for this username
    #[error("no session token on file for '{0}'")]
    NotFound(String),

    /// Presented secret does not match the stored one
    #[error("session token mismatch for '{0}'")]
    Mismatch(String),

    /// Token is past its expiry
    #[error("session token for '{0}' has expired")]
    Expired(String),

    /// The token repository failed to persist a change
    #[error(transparent)]
    Persist(#[from] RepositoryError),
}
