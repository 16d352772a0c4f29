//! Session token store: issue, validate, refresh and persist tokens.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::common::time::Clock;
use crate::domain::{RepositoryError, Token, TokenRepository};

use super::error::TokenError;

/// Default token lifetime (seconds).
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Lock-guarded store of active session tokens, one per username.
///
/// Issued tokens are appended to the repository; a refresh rewrites the whole
/// file so restarts see the extended expiry. Expired entries are lazily
/// evicted when they are next checked.
pub struct TokenStore {
    tokens: Mutex<HashMap<String, Token>>,
    repo: Arc<dyn TokenRepository>,
    clock: Arc<dyn Clock>,
    ttl_secs: i64,
}

impl TokenStore {
    pub fn new(repo: Arc<dyn TokenRepository>, clock: Arc<dyn Clock>, ttl_secs: i64) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            repo,
            clock,
            ttl_secs,
        }
    }

    /// Reload persisted tokens, dropping any that expired while the process
    /// was down.
    ///
    /// # Returns
    ///
    /// The number of still-valid tokens kept.
    pub async fn load(&self) -> Result<usize, RepositoryError> {
        let now = self.clock.now_epoch_secs();
        let mut tokens = self.tokens.lock().await;
        for token in self.repo.load_tokens().await? {
            if token.is_expired(now) {
                tracing::info!(
                    "Dropping expired token for '{}' (expired at {})",
                    token.username,
                    token.expires_at
                );
                continue;
            }
            tokens.insert(token.username.clone(), token);
        }
        Ok(tokens.len())
    }

    /// Issue a fresh token for `username`, replacing any prior one.
    pub async fn issue(&self, username: &str) -> Result<Token, RepositoryError> {
        let token = Token::generate(username, self.clock.now_epoch_secs(), self.ttl_secs);
        self.repo.append(&token).await?;
        let mut tokens = self.tokens.lock().await;
        tokens.insert(username.to_string(), token.clone());
        Ok(token)
    }

    /// Validate a presented secret for `username`.
    ///
    /// On success the token's expiry is refreshed (the secret never changes)
    /// and the store is rewritten so the extension is durable. Expired
    /// entries are evicted here rather than by a background sweep.
    pub async fn validate(&self, username: &str, secret: &str) -> Result<Token, TokenError> {
        let now = self.clock.now_epoch_secs();
        let mut tokens = self.tokens.lock().await;
        let token = tokens
            .get_mut(username)
            .ok_or_else(|| TokenError::NotFound(username.to_string()))?;
        if token.is_expired(now) {
            tokens.remove(username);
            return Err(TokenError::Expired(username.to_string()));
        }
        if token.secret != secret {
            return Err(TokenError::Mismatch(username.to_string()));
        }
        token.refresh(now, self.ttl_secs);
        let refreshed = token.clone();
        // the rewrite happens under the token lock so concurrent refreshes
        // cannot commit their snapshots out of order
        let snapshot: Vec<Token> = tokens.values().cloned().collect();
        self.repo.rewrite_all(&snapshot).await?;
        Ok(refreshed)
    }
}
