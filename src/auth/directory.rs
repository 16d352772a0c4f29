//! User directory: credentials, roles and mute flags keyed by username.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::domain::{CredentialStore, RepositoryError, Role, User};

use super::error::AuthError;

/// Lock-guarded directory of registered users.
///
/// All lookups and mutations are keyed by username and safe to call from any
/// number of connection tasks; a mutation is visible to the next read. Users
/// are never deleted at runtime.
pub struct UserDirectory {
    users: Mutex<HashMap<String, User>>,
    store: Arc<dyn CredentialStore>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            store,
        }
    }

    /// Load all registered users from the credential store.
    ///
    /// # Returns
    ///
    /// The number of users loaded.
    pub async fn load(&self) -> Result<usize, RepositoryError> {
        let loaded = self.store.load_users().await?;
        let mut users = self.users.lock().await;
        for user in loaded {
            users.insert(user.username.clone(), user);
        }
        Ok(users.len())
    }

    /// Check a username/password pair against the directory.
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<User, AuthError> {
        let users = self.users.lock().await;
        let user = users
            .get(username)
            .ok_or_else(|| AuthError::UserNotFound(username.to_string()))?;
        if user.password_hash != password {
            return Err(AuthError::IncorrectPassword);
        }
        Ok(user.clone())
    }

    /// Register a new user with the default `user` role and append it to the
    /// credential store.
    pub async fn register(&self, username: &str, password: &str) -> Result<User, AuthError> {
        let mut users = self.users.lock().await;
        if users.contains_key(username) {
            return Err(AuthError::DuplicateUsername(username.to_string()));
        }
        let user = User::new(username.to_string(), password.to_string(), Role::User);
        self.store.append_user(&user).await?;
        users.insert(username.to_string(), user.clone());
        Ok(user)
    }

    /// Change a user's role.
    ///
    /// Fails with [`AuthError::AlreadyInRole`] when the user already holds
    /// the requested role, so promote/demote report a meaningful result.
    pub async fn set_role(&self, username: &str, role: Role) -> Result<(), AuthError> {
        let mut users = self.users.lock().await;
        let user = users
            .get_mut(username)
            .ok_or_else(|| AuthError::UserNotFound(username.to_string()))?;
        if user.role == role {
            return Err(AuthError::AlreadyInRole {
                username: username.to_string(),
                role,
            });
        }
        user.role = role;
        Ok(())
    }

    pub async fn set_muted(&self, username: &str, muted: bool) -> Result<(), AuthError> {
        let mut users = self.users.lock().await;
        let user = users
            .get_mut(username)
            .ok_or_else(|| AuthError::UserNotFound(username.to_string()))?;
        user.muted = muted;
        Ok(())
    }

    /// Whether the username is muted. Unknown usernames are not muted.
    pub async fn is_muted(&self, username: &str) -> bool {
        let users = self.users.lock().await;
        users.get(username).map(|u| u.muted).unwrap_or(false)
    }

    /// Whether the username holds the admin role. Unknown usernames are
    /// plain users.
    pub async fn is_admin(&self, username: &str) -> bool {
        let users = self.users.lock().await;
        users.get(username).map(|u| u.is_admin()).unwrap_or(false)
    }

    /// Role of the username, defaulting to `user` for unknown names.
    pub async fn role_of(&self, username: &str) -> Role {
        let users = self.users.lock().await;
        users.get(username).map(|u| u.role).unwrap_or(Role::User)
    }

    /// Sorted list of currently muted usernames.
    pub async fn muted_users(&self) -> Vec<String> {
        let users = self.users.lock().await;
        let mut muted: Vec<String> = users
            .values()
            .filter(|u| u.muted)
            .map(|u| u.username.clone())
            .collect();
        muted.sort();
        muted
    }
}
