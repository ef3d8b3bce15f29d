//! Bearer token payload.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

pub const TOKEN_VERSION: &str = "1";

/// Declared purpose of a token.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Scope {
    #[serde(rename = "access")]
    Access,
    #[serde(rename = "refresh")]
    Refresh,
    /// Issued after the password step while the second factor is outstanding.
    #[serde(rename = "2fa-pending")]
    SecondFactorPending,
}

/// How the session behind a token was established.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LoginKind {
    Password,
    Mfa,
    Webauthn,
    Api,
}

impl LoginKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Mfa => "mfa",
            Self::Webauthn => "webauthn",
            Self::Api => "api",
        }
    }
}

impl fmt::Display for LoginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Authorization {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppMetadata {
    pub token_version: String,
    #[serde(
        rename = "parent_token",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_token_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization: Option<Authorization>,
    #[serde(rename = "loginKind", default, skip_serializing_if = "Option::is_none")]
    pub login_kind: Option<LoginKind>,
}

/// Claims carried by every signed token.
///
/// Field names on the wire follow the registered JWT claim names.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    #[serde(rename = "aud", default, skip_serializing_if = "String::is_empty")]
    pub audience: String,
    #[serde(rename = "iss", default, skip_serializing_if = "String::is_empty")]
    pub issuer: String,
    #[serde(rename = "jti")]
    pub id: String,
    #[serde(rename = "iat")]
    pub issued_at: i64,
    #[serde(rename = "nbf")]
    pub not_before: i64,
    #[serde(rename = "exp")]
    pub expires_at: i64,
    #[serde(rename = "sub")]
    pub subject: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(
        rename = "displayName",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default)]
    pub scopes: Vec<Scope>,
    #[serde(
        rename = "app_metadata",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub app_metadata: Option<AppMetadata>,
}

impl Claims {
    #[must_use]
    pub fn has_scope(&self, scope: Scope) -> bool {
        self.scopes.contains(&scope)
    }

    /// Id of the refresh token this access token was derived from.
    #[must_use]
    pub fn parent_token_id(&self) -> Option<&str> {
        self.app_metadata
            .as_ref()
            .and_then(|meta| meta.parent_token_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    #[must_use]
    pub fn roles(&self) -> &[String] {
        self.app_metadata
            .as_ref()
            .and_then(|meta| meta.authorization.as_ref())
            .map(|auth| auth.roles.as_slice())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn login_kind(&self) -> Option<LoginKind> {
        self.app_metadata.as_ref().and_then(|meta| meta.login_kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> Claims {
        Claims {
            audience: "portcullis.dev".to_string(),
            issuer: "portcullis.dev".to_string(),
            id: "a6f0c1d2".to_string(),
            issued_at: 1_700_000_000,
            not_before: 1_700_000_000,
            expires_at: 1_700_003_600,
            subject: "user-1".to_string(),
            name: "alice".to_string(),
            display_name: "Alice".to_string(),
            email: String::new(),
            scopes: vec![Scope::Access],
            app_metadata: Some(AppMetadata {
                token_version: TOKEN_VERSION.to_string(),
                parent_token_id: Some("refresh-1".to_string()),
                authorization: Some(Authorization {
                    roles: vec!["admin".to_string()],
                }),
                login_kind: Some(LoginKind::Mfa),
            }),
        }
    }

    #[test]
    fn wire_names_follow_registered_claims() {
        let value = serde_json::to_value(claims()).unwrap_or_default();
        assert_eq!(value["jti"], "a6f0c1d2");
        assert_eq!(value["sub"], "user-1");
        assert_eq!(value["displayName"], "Alice");
        assert_eq!(value["scopes"][0], "access");
        assert_eq!(value["app_metadata"]["parent_token"], "refresh-1");
        assert_eq!(value["app_metadata"]["loginKind"], "mfa");
        assert!(value.get("email").is_none());
    }

    #[test]
    fn pending_scope_serializes_as_2fa_pending() {
        let value = serde_json::to_value(Scope::SecondFactorPending).unwrap_or_default();
        assert_eq!(value, "2fa-pending");
    }

    #[test]
    fn accessors() {
        let claims = claims();
        assert!(claims.has_scope(Scope::Access));
        assert!(!claims.has_scope(Scope::Refresh));
        assert_eq!(claims.parent_token_id(), Some("refresh-1"));
        assert_eq!(claims.roles(), ["admin".to_string()]);
        assert_eq!(claims.login_kind(), Some(LoginKind::Mfa));
    }

    #[test]
    fn empty_parent_is_no_parent() {
        let mut claims = claims();
        if let Some(meta) = claims.app_metadata.as_mut() {
            meta.parent_token_id = Some(String::new());
        }
        assert_eq!(claims.parent_token_id(), None);
    }
}
