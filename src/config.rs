//! Immutable runtime configuration.
//!
//! Built once by the CLI dispatcher and shared as `Arc<IdpConfig>` with every
//! component; nothing reads settings from process state after startup.

use crate::{store::models::Role, token::codec::Algorithm};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: u64 = 60 * 60;
pub const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: u64 = 720 * 60 * 60;
pub const SECOND_FACTOR_PENDING_TTL_SECONDS: u64 = 5 * 60;
pub const DEFAULT_ACCESS_COOKIE_NAME: &str = "portcullis_access";
pub const DEFAULT_REFRESH_COOKIE_NAME: &str = "portcullis_refresh";
pub const DEFAULT_REFRESH_COOKIE_PATH: &str = "/v1/auth/refresh";
pub const DEFAULT_PUBLIC_URL: &str = "http://localhost:8080";
pub const DEFAULT_CLEANUP_INTERVAL_SECONDS: u64 = 60 * 60;

/// Per-user or per-role lifetime override. The last matching entry wins.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct TtlOverride {
    #[serde(default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub role_ids: Vec<String>,
    #[serde(default)]
    pub access_token_ttl_seconds: Option<u64>,
    #[serde(default)]
    pub refresh_token_ttl_seconds: Option<u64>,
}

impl TtlOverride {
    fn applies_to(&self, user_id: &str, roles: &[Role]) -> bool {
        self.user_ids.iter().any(|id| id == user_id)
            || roles
                .iter()
                .any(|role| self.role_ids.iter().any(|id| *id == role.id))
    }
}

#[derive(Clone, Debug)]
pub struct IdpConfig {
    jwt_secret: SecretString,
    signing_algorithm: Algorithm,
    audience: String,
    issuer: String,
    access_token_ttl: Duration,
    max_access_token_ttl: Option<Duration>,
    refresh_token_ttl: Duration,
    access_cookie_name: String,
    refresh_cookie_name: String,
    refresh_cookie_path: String,
    cookie_domain: Option<String>,
    secure_cookies: bool,
    public_url: String,
    login_redirect_url: Option<String>,
    refresh_redirect_url: Option<String>,
    ttl_overrides: Vec<TtlOverride>,
    allowed_redirect_domains: Vec<String>,
    login_by_email: bool,
    cleanup_interval: Duration,
}

impl IdpConfig {
    #[must_use]
    pub fn new(jwt_secret: SecretString) -> Self {
        Self {
            jwt_secret,
            signing_algorithm: Algorithm::default(),
            audience: String::new(),
            issuer: String::new(),
            access_token_ttl: Duration::from_secs(DEFAULT_ACCESS_TOKEN_TTL_SECONDS),
            max_access_token_ttl: None,
            refresh_token_ttl: Duration::from_secs(DEFAULT_REFRESH_TOKEN_TTL_SECONDS),
            access_cookie_name: DEFAULT_ACCESS_COOKIE_NAME.to_string(),
            refresh_cookie_name: DEFAULT_REFRESH_COOKIE_NAME.to_string(),
            refresh_cookie_path: DEFAULT_REFRESH_COOKIE_PATH.to_string(),
            cookie_domain: None,
            secure_cookies: true,
            public_url: DEFAULT_PUBLIC_URL.to_string(),
            login_redirect_url: None,
            refresh_redirect_url: None,
            ttl_overrides: Vec::new(),
            allowed_redirect_domains: Vec::new(),
            login_by_email: false,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECONDS),
        }
    }

    #[must_use]
    pub fn with_signing_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.signing_algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn with_audience(mut self, audience: String) -> Self {
        self.audience = audience;
        self
    }

    #[must_use]
    pub fn with_issuer(mut self, issuer: String) -> Self {
        self.issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_max_access_token_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.max_access_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_access_cookie_name(mut self, name: String) -> Self {
        self.access_cookie_name = name;
        self
    }

    #[must_use]
    pub fn with_refresh_cookie_name(mut self, name: String) -> Self {
        self.refresh_cookie_name = name;
        self
    }

    #[must_use]
    pub fn with_refresh_cookie_path(mut self, path: String) -> Self {
        self.refresh_cookie_path = path;
        self
    }

    #[must_use]
    pub fn with_cookie_domain(mut self, domain: Option<String>) -> Self {
        self.cookie_domain = domain.filter(|domain| !domain.is_empty());
        self
    }

    #[must_use]
    pub fn with_secure_cookies(mut self, secure: bool) -> Self {
        self.secure_cookies = secure;
        self
    }

    #[must_use]
    pub fn with_public_url(mut self, public_url: String) -> Self {
        self.public_url = public_url.trim_end_matches('/').to_string();
        self
    }

    #[must_use]
    pub fn with_login_redirect_url(mut self, template: Option<String>) -> Self {
        self.login_redirect_url = template;
        self
    }

    #[must_use]
    pub fn with_refresh_redirect_url(mut self, template: Option<String>) -> Self {
        self.refresh_redirect_url = template;
        self
    }

    #[must_use]
    pub fn with_ttl_overrides(mut self, overrides: Vec<TtlOverride>) -> Self {
        self.ttl_overrides = overrides;
        self
    }

    #[must_use]
    pub fn with_allowed_redirect_domains(mut self, domains: Vec<String>) -> Self {
        self.allowed_redirect_domains = domains;
        self
    }

    #[must_use]
    pub fn with_login_by_email(mut self, enabled: bool) -> Self {
        self.login_by_email = enabled;
        self
    }

    #[must_use]
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    #[must_use]
    pub fn jwt_secret(&self) -> &[u8] {
        self.jwt_secret.expose_secret().as_bytes()
    }

    #[must_use]
    pub fn signing_algorithm(&self) -> Algorithm {
        self.signing_algorithm
    }

    /// Audience claim; falls back to the public URL host.
    #[must_use]
    pub fn audience(&self) -> &str {
        if self.audience.is_empty() {
            self.public_host()
        } else {
            &self.audience
        }
    }

    /// Issuer claim; falls back to the public URL host.
    #[must_use]
    pub fn issuer(&self) -> &str {
        if self.issuer.is_empty() {
            self.public_host()
        } else {
            &self.issuer
        }
    }

    /// Default access token lifetime for `user_id`, after overrides.
    #[must_use]
    pub fn access_token_ttl_for(&self, user_id: &str, roles: &[Role]) -> Duration {
        self.ttl_overrides
            .iter()
            .filter(|o| o.applies_to(user_id, roles))
            .filter_map(|o| o.access_token_ttl_seconds.filter(|secs| *secs > 0))
            .last()
            .map_or(self.access_token_ttl, Duration::from_secs)
    }

    /// Refresh token lifetime for `user_id`, after overrides.
    #[must_use]
    pub fn refresh_token_ttl_for(&self, user_id: &str, roles: &[Role]) -> Duration {
        self.ttl_overrides
            .iter()
            .filter(|o| o.applies_to(user_id, roles))
            .filter_map(|o| o.refresh_token_ttl_seconds.filter(|secs| *secs > 0))
            .last()
            .map_or(self.refresh_token_ttl, Duration::from_secs)
    }

    /// Longest refresh token lifetime any user can receive.
    #[must_use]
    pub fn max_refresh_token_ttl(&self) -> Duration {
        self.ttl_overrides
            .iter()
            .filter_map(|o| o.refresh_token_ttl_seconds)
            .map(Duration::from_secs)
            .fold(self.refresh_token_ttl, Duration::max)
    }

    /// Hard ceiling for requested access token lifetimes.
    #[must_use]
    pub fn max_access_token_ttl(&self) -> Option<Duration> {
        self.max_access_token_ttl
    }

    #[must_use]
    pub fn access_cookie_name(&self) -> &str {
        &self.access_cookie_name
    }

    #[must_use]
    pub fn refresh_cookie_name(&self) -> &str {
        &self.refresh_cookie_name
    }

    #[must_use]
    pub fn refresh_cookie_path(&self) -> &str {
        &self.refresh_cookie_path
    }

    #[must_use]
    pub fn cookie_domain(&self) -> Option<&str> {
        self.cookie_domain.as_deref()
    }

    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.secure_cookies
    }

    #[must_use]
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// Login page template; `%s` is replaced with the encoded redirect target.
    #[must_use]
    pub fn login_redirect_url(&self) -> String {
        self.login_redirect_url
            .clone()
            .unwrap_or_else(|| format!("{}/login?redirect=%s", self.public_url))
    }

    /// Refresh page template; `%s` is replaced with the encoded redirect target.
    #[must_use]
    pub fn refresh_redirect_url(&self) -> String {
        self.refresh_redirect_url
            .clone()
            .unwrap_or_else(|| format!("{}/refresh?redirect=%s", self.public_url))
    }

    #[must_use]
    pub fn allowed_redirect_domains(&self) -> &[String] {
        &self.allowed_redirect_domains
    }

    #[must_use]
    pub fn login_by_email(&self) -> bool {
        self.login_by_email
    }

    #[must_use]
    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    fn public_host(&self) -> &str {
        let without_scheme = self
            .public_url
            .split_once("://")
            .map_or(self.public_url.as_str(), |(_, rest)| rest);
        without_scheme
            .split(['/', ':'])
            .next()
            .unwrap_or(without_scheme)
    }
}
