//! Records exchanged with the [`Datastore`](super::Datastore).

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: String,
    /// Argon2 PHC string.
    pub password_hash: String,
    /// Base32 TOTP secret; `None` when no second factor is enrolled.
    pub totp_secret: Option<String>,
    /// Primary email address, if the user has one.
    pub email: Option<String>,
    /// Additional attributes exposed to policies as `subject.fields`.
    pub extra: Option<serde_json::Value>,
    pub deleted: bool,
}

impl User {
    #[must_use]
    pub fn has_second_factor(&self) -> bool {
        self.totp_secret
            .as_deref()
            .is_some_and(|secret| !secret.is_empty())
    }

    /// Display name, else "first last", else the username.
    #[must_use]
    pub fn resolved_display_name(&self) -> String {
        if !self.display_name.trim().is_empty() {
            return self.display_name.clone();
        }
        let joined = format!("{} {}", self.first_name.trim(), self.last_name.trim());
        let joined = joined.trim();
        if joined.is_empty() {
            self.username.clone()
        } else {
            joined.to_string()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EmailAddress {
    pub address: String,
    pub verified: bool,
}

/// A user found through one of their email addresses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserByEmail {
    pub user: User,
    pub verified: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedToken {
    pub token_id: String,
    pub user_id: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Stored API token. Only a hash of the secret value is persisted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiToken {
    pub id: String,
    pub token_hash: String,
    /// First characters of the plaintext token, shown when listing.
    pub redacted: String,
    pub description: String,
    pub user_id: String,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

impl ApiToken {
    /// Expired once `expires_at` lies strictly in the past.
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }
}
