//! CSV-file repositories for users and session tokens.
//!
//! The user file carries a `username,password,role` header and is shared
//! with the registration flow; the token file is headerless
//! `username,secret,expires_at` lines. Both tolerate a missing file at
//! startup and skip malformed lines with a warning instead of failing the
//! whole load.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

use crate::domain::{CredentialStore, RepositoryError, Role, Token, TokenRepository, User};

const USERS_HEADER: &str = "username,password,role";

/// Credential store backed by a `users.csv` file.
pub struct CsvCredentialStore {
    path: PathBuf,
}

impl CsvCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialStore for CsvCredentialStore {
    async fn load_users(&self) -> Result<Vec<User>, RepositoryError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    "Could not load users from {}: file not found",
                    self.path.display()
                );
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut users = Vec::new();
        for line in content.lines() {
            if line.is_empty() || line.starts_with(USERS_HEADER) {
                continue;
            }
            let parts: Vec<&str> = line.split(',').collect();
            if parts.len() != 3 {
                tracing::warn!("Skipping malformed user record: {}", line);
                continue;
            }
            let username = parts[0].trim();
            let password = parts[1].trim();
            match Role::parse(parts[2].trim()) {
                Some(role) => {
                    users.push(User::new(username.to_string(), password.to_string(), role))
                }
                None => tracing::warn!("Invalid role for user: {}", username),
            }
        }
        Ok(users)
    }

    async fn append_user(&self, user: &User) -> Result<(), RepositoryError> {
        ensure_parent_dir(&self.path).await?;
        let fresh = !tokio::fs::try_exists(&self.path).await.unwrap_or(false);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        if fresh {
            file.write_all(format!("{USERS_HEADER}\n").as_bytes()).await?;
        }
        file.write_all(
            format!("{},{},{}\n", user.username, user.password_hash, user.role).as_bytes(),
        )
        .await?;
        file.flush().await?;
        Ok(())
    }
}

/// Token repository backed by a `tokens.csv` file.
///
/// Issuance appends; a refresh rewrites the whole file through
/// [`TokenRepository::rewrite_all`].
pub struct CsvTokenRepository {
    path: PathBuf,
}

impl CsvTokenRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn record(token: &Token) -> String {
        format!("{},{},{}\n", token.username, token.secret, token.expires_at)
    }
}

#[async_trait]
impl TokenRepository for CsvTokenRepository {
    async fn load_tokens(&self) -> Result<Vec<Token>, RepositoryError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut tokens = Vec::new();
        for line in content.lines() {
            if line.is_empty() {
                continue;
            }
            let parts: Vec<&str> = line.split(',').collect();
            let parsed = match parts.as_slice() {
                [username, secret, expires_at] => {
                    expires_at.trim().parse::<i64>().ok().map(|expires_at| Token {
                        username: username.trim().to_string(),
                        secret: secret.trim().to_string(),
                        expires_at,
                    })
                }
                _ => None,
            };
            match parsed {
                Some(token) => tokens.push(token),
                None => tracing::warn!("Skipping malformed token record: {}", line),
            }
        }
        Ok(tokens)
    }

    async fn append(&self, token: &Token) -> Result<(), RepositoryError> {
        ensure_parent_dir(&self.path).await?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(Self::record(token).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    async fn rewrite_all(&self, tokens: &[Token]) -> Result<(), RepositoryError> {
        ensure_parent_dir(&self.path).await?;
        let mut content = String::new();
        for token in tokens {
            content.push_str(&Self::record(token));
        }
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

async fn ensure_parent_dir(path: &Path) -> Result<(), RepositoryError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}
