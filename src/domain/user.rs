//! User entity and role value object.

use std::fmt;

/// Role assigned to a user. Moderation commands are gated on `Admin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    /// Parse a role from its stored textual form.
    ///
    /// Returns `None` for anything other than `"user"` or `"admin"` so that
    /// invalid records in the credential file can be skipped with a warning.
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered user.
///
/// Users are created at registration (or loaded from the credential store at
/// startup) and never deleted at runtime. Role and mute flags are keyed by
/// username and survive disconnects.
#[derive(Debug, Clone)]
pub struct User {
    pub username: String,
    pub password_hash: String,
    pub role: Role,
    pub muted: bool,
}

impl User {
    pub fn new(username: String, password_hash: String, role: Role) -> Self {
        Self {
            username,
            password_hash,
            role,
            muted: false,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
