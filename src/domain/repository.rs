//! Repository traits required by the domain services.
//!
//! The auth services depend on these traits; the infrastructure layer
//! provides the concrete (file-backed) implementations.

use async_trait::async_trait;

use super::{RepositoryError, Token, User};

/// Durable store of registered users.
///
/// Loaded once at startup; registration appends. The interactive
/// login/registration console flow owns the file format.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load every registered user. A missing backing file yields an empty
    /// list, not an error.
    async fn load_users(&self) -> Result<Vec<User>, RepositoryError>;

    /// Append a newly registered user.
    async fn append_user(&self, user: &User) -> Result<(), RepositoryError>;
}

/// Durable store of session tokens, tolerant of process restart.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Load every persisted token record, including expired ones; the token
    /// store decides what to keep.
    async fn load_tokens(&self) -> Result<Vec<Token>, RepositoryError>;

    /// Append one freshly issued token.
    async fn append(&self, token: &Token) -> Result<(), RepositoryError>;

    /// Replace the whole file with the given records (used after a refresh).
    async fn rewrite_all(&self, tokens: &[Token]) -> Result<(), RepositoryError>;
}
