//! Authentication services: the user directory and the session token store.

pub mod directory;
pub mod error;
pub mod tokens;

pub use directory::UserDirectory;
pub use error::{AuthError, TokenError};
pub use tokens::TokenStore;
