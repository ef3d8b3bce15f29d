//! Input and result shapes exchanged with the external policy engine.

pub mod http;

pub use self::http::OpaHttpEngine;

use crate::{
    store::models::{Role, User},
    token::{Claims, LoginKind},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Policy package queried for forward-auth decisions.
pub const FORWARD_AUTH_PACKAGE: &str = "portcullis.forward_auth";

/// Request headers never forwarded to the policy engine.
const REDACTED_HEADERS: [&str; 2] = ["authorization", "cookie"];

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SubjectInput {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub roles: Vec<Role>,
    pub permissions: Vec<String>,
    /// The user's extra attributes.
    pub fields: Option<serde_json::Value>,
    pub token_kind: Option<LoginKind>,
}

impl SubjectInput {
    #[must_use]
    pub fn new(user: &User, claims: &Claims, roles: Vec<Role>, permissions: Vec<String>) -> Self {
        Self {
            id: user.id.clone(),
            username: user.username.clone(),
            display_name: user.resolved_display_name(),
            email: user.email.clone(),
            roles,
            permissions,
            fields: user.extra.clone(),
            token_kind: claims.login_kind(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ForwardAuthInput {
    pub subject: Option<SubjectInput>,
    pub method: String,
    pub path: String,
    pub host: String,
    pub headers: BTreeMap<String, String>,
    pub query: BTreeMap<String, Vec<String>>,
    pub client_ip: Option<String>,
}

impl ForwardAuthInput {
    /// Lower-cased header map; repeated headers are joined with `, ` and
    /// credential-bearing headers are dropped.
    #[must_use]
    pub fn collect_headers(headers: &axum::http::HeaderMap) -> BTreeMap<String, String> {
        let mut collected: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in headers {
            let name = name.as_str().to_ascii_lowercase();
            if REDACTED_HEADERS.contains(&name.as_str()) {
                continue;
            }
            let Ok(value) = value.to_str() else {
                continue;
            };
            collected
                .entry(name)
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }
        collected
    }

    #[must_use]
    pub fn parse_query(query: &str) -> BTreeMap<String, Vec<String>> {
        let mut parsed: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            parsed
                .entry(key.into_owned())
                .or_default()
                .push(value.into_owned());
        }
        parsed
    }
}

/// Decision document returned by the policy package.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ForwardAuthPolicyResult {
    #[serde(default)]
    pub allow: bool,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("policy engine returned status {0}")]
    Status(u16),
    #[error("invalid policy response: {0}")]
    Decode(String),
}

#[async_trait]
pub trait PolicyEngine: Send + Sync {
    /// Evaluate the forward-auth package. `Ok(None)` means the package has
    /// no opinion about this request.
    async fn evaluate_forward_auth(
        &self,
        input: &ForwardAuthInput,
    ) -> Result<Option<ForwardAuthPolicyResult>, PolicyError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn headers_are_lowercased_joined_and_redacted() {
        let mut headers = HeaderMap::new();
        headers.append("X-Team", HeaderValue::from_static("a"));
        headers.append("x-team", HeaderValue::from_static("b"));
        headers.insert("authorization", HeaderValue::from_static("Bearer x"));
        headers.insert("cookie", HeaderValue::from_static("a=b"));
        let collected = ForwardAuthInput::collect_headers(&headers);
        assert_eq!(collected.get("x-team").map(String::as_str), Some("a, b"));
        assert!(!collected.contains_key("authorization"));
        assert!(!collected.contains_key("cookie"));
    }

    #[test]
    fn query_parsing_keeps_repeats() {
        let query = ForwardAuthInput::parse_query("a=1&b=two%20words&a=3");
        assert_eq!(query["a"], vec!["1".to_string(), "3".to_string()]);
        assert_eq!(query["b"], vec!["two words".to_string()]);
        assert!(ForwardAuthInput::parse_query("").is_empty());
    }

    #[test]
    fn result_defaults() {
        let result: ForwardAuthPolicyResult = serde_json::from_str("{}").expect("json");
        assert!(!result.allow);
        assert_eq!(result.status_code, None);
        assert!(result.headers.is_empty());
    }

    #[test]
    fn subject_input_from_user() {
        let user = User {
            id: "u1".to_string(),
            username: "alice".to_string(),
            email: Some("alice@example.com".to_string()),
            extra: Some(serde_json::json!({"team": "red"})),
            ..User::default()
        };
        let claims = Claims {
            app_metadata: Some(crate::token::AppMetadata {
                login_kind: Some(LoginKind::Api),
                ..Default::default()
            }),
            ..Claims::default()
        };
        let subject = SubjectInput::new(&user, &claims, Vec::new(), vec!["p".to_string()]);
        assert_eq!(subject.display_name, "alice");
        assert_eq!(subject.token_kind, Some(LoginKind::Api));
        let value = serde_json::to_value(&subject).expect("json");
        assert_eq!(value["fields"]["team"], "red");
        assert_eq!(value["token_kind"], "api");
    }
}
