//! Session token entity.

use uuid::Uuid;

/// An opaque, expiring credential that lets a user reconnect without
/// re-entering a password.
///
/// At most one token is active per username; issuing a new one replaces the
/// previous entry. Refreshing extends `expires_at` but never changes the
/// secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub username: String,
    pub secret: String,
    /// Unix timestamp (seconds) after which the token is invalid
    pub expires_at: i64,
}

impl Token {
    /// Generate a fresh token with a random secret valid for `ttl_secs`.
    pub fn generate(username: &str, now: i64, ttl_secs: i64) -> Self {
        Self {
            username: username.to_string(),
            secret: Uuid::new_v4().to_string(),
            expires_at: now + ttl_secs,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    /// Extend the expiry to `now + ttl_secs`. The secret stays stable.
    pub fn refresh(&mut self, now: i64, ttl_secs: i64) {
        self.expires_at = now + ttl_secs;
    }
}
