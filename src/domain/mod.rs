//! Core domain types and the repository traits implemented by the
//! infrastructure layer.

pub mod error;
pub mod repository;
pub mod token;
pub mod user;

pub use error::RepositoryError;
pub use repository::{CredentialStore, TokenRepository};
pub use token::Token;
pub use user::{Role, User};
