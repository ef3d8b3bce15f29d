//! Builds and signs claims for each token purpose.

use super::{
    claims::{AppMetadata, Authorization, Claims, LoginKind, Scope, TOKEN_VERSION},
    codec,
    cookie::{self, CookieAttributes},
};
use crate::{
    config::{IdpConfig, SECOND_FACTOR_PENDING_TTL_SECONDS},
    store::models::{Role, User},
};
use axum::http::{
    HeaderMap,
    header::{InvalidHeaderValue, SET_COOKIE},
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IssueError {
    #[error(transparent)]
    Codec(#[from] codec::Error),
    #[error("invalid cookie: {0}")]
    Cookie(#[from] InvalidHeaderValue),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub id: String,
    pub expires_at: i64,
}

#[derive(Clone, Debug)]
pub struct TokenIssuer {
    config: Arc<IdpConfig>,
}

impl TokenIssuer {
    #[must_use]
    pub fn new(config: Arc<IdpConfig>) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &IdpConfig {
        &self.config
    }

    /// Issue a refresh token and, with a sink, set the refresh cookie.
    ///
    /// # Errors
    ///
    /// Fails when signing fails or the cookie cannot be encoded.
    pub fn issue_refresh_token(
        &self,
        user: &User,
        roles: &[Role],
        kind: LoginKind,
        sink: Option<&mut HeaderMap>,
    ) -> Result<IssuedToken, IssueError> {
        let ttl = self.config.refresh_token_ttl_for(&user.id, roles);
        let claims = self.claims(user, roles, Scope::Refresh, ttl, None, Some(kind));
        let issued = self.sign(&claims)?;
        if let Some(headers) = sink {
            let value = cookie::build(
                self.config.refresh_cookie_name(),
                &issued.token,
                ttl.as_secs(),
                self.cookie_attributes(self.config.refresh_cookie_path()),
            )?;
            headers.append(SET_COOKIE, value);
        }
        Ok(issued)
    }

    /// Issue an access token. A zero `requested_ttl` selects the default
    /// lifetime; any other value is capped by the configured ceiling.
    ///
    /// # Errors
    ///
    /// Fails when signing fails or the cookie cannot be encoded.
    pub fn issue_access_token(
        &self,
        user: &User,
        roles: &[Role],
        requested_ttl: Duration,
        parent_token_id: Option<&str>,
        kind: LoginKind,
        sink: Option<&mut HeaderMap>,
    ) -> Result<IssuedToken, IssueError> {
        let ttl = self.access_ttl(user, roles, requested_ttl);
        let claims = self.claims(
            user,
            roles,
            Scope::Access,
            ttl,
            parent_token_id,
            Some(kind),
        );
        let issued = self.sign(&claims)?;
        if let Some(headers) = sink {
            let value = cookie::build(
                self.config.access_cookie_name(),
                &issued.token,
                ttl.as_secs(),
                self.cookie_attributes("/"),
            )?;
            headers.append(SET_COOKIE, value);
        }
        Ok(issued)
    }

    /// Issue the short-lived token that carries a user between the password
    /// and second-factor steps. It has no roles and is never set as a cookie.
    ///
    /// # Errors
    ///
    /// Fails when signing fails.
    pub fn issue_second_factor_pending_token(&self, user: &User) -> Result<IssuedToken, IssueError> {
        let claims = self.claims(
            user,
            &[],
            Scope::SecondFactorPending,
            Duration::from_secs(SECOND_FACTOR_PENDING_TTL_SECONDS),
            None,
            None,
        );
        self.sign(&claims)
    }

    /// Verify a token signed with the configured secret.
    ///
    /// # Errors
    ///
    /// See [`codec::parse_and_verify`].
    pub fn verify(&self, token: &str) -> Result<Claims, codec::Error> {
        codec::parse_and_verify(self.config.jwt_secret(), token)
    }

    /// Append expired access and refresh cookies to `headers`.
    ///
    /// # Errors
    ///
    /// Fails when a cookie cannot be encoded.
    pub fn clear_cookies(&self, headers: &mut HeaderMap) -> Result<(), IssueError> {
        headers.append(
            SET_COOKIE,
            cookie::clear(self.config.access_cookie_name(), self.cookie_attributes("/"))?,
        );
        headers.append(
            SET_COOKIE,
            cookie::clear(
                self.config.refresh_cookie_name(),
                self.cookie_attributes(self.config.refresh_cookie_path()),
            )?,
        );
        Ok(())
    }

    fn access_ttl(&self, user: &User, roles: &[Role], requested: Duration) -> Duration {
        let default = self.config.access_token_ttl_for(&user.id, roles);
        if requested.is_zero() {
            return default;
        }
        requested.min(self.config.max_access_token_ttl().unwrap_or(default))
    }

    fn claims(
        &self,
        user: &User,
        roles: &[Role],
        scope: Scope,
        ttl: Duration,
        parent_token_id: Option<&str>,
        kind: Option<LoginKind>,
    ) -> Claims {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let authorization = (scope != Scope::SecondFactorPending).then(|| Authorization {
            roles: roles.iter().map(|role| role.id.clone()).collect(),
        });
        Claims {
            audience: self.config.audience().to_string(),
            issuer: self.config.issuer().to_string(),
            id: Uuid::new_v4().to_string(),
            issued_at: now,
            not_before: now,
            expires_at: now.saturating_add(ttl),
            subject: user.id.clone(),
            name: user.username.clone(),
            display_name: user.resolved_display_name(),
            email: user.email.clone().unwrap_or_default(),
            scopes: vec![scope],
            app_metadata: Some(AppMetadata {
                token_version: TOKEN_VERSION.to_string(),
                parent_token_id: parent_token_id.map(str::to_string),
                authorization,
                login_kind: kind,
            }),
        }
    }

    fn sign(&self, claims: &Claims) -> Result<IssuedToken, IssueError> {
        let token = codec::sign(
            claims,
            self.config.jwt_secret(),
            self.config.signing_algorithm(),
        )?;
        Ok(IssuedToken {
            token,
            id: claims.id.clone(),
            expires_at: claims.expires_at,
        })
    }

    fn cookie_attributes<'a>(&'a self, path: &'a str) -> CookieAttributes<'a> {
        CookieAttributes {
            path,
            domain: self.config.cookie_domain(),
            secure: self.config.secure_cookies(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TtlOverride;
    use secrecy::SecretString;

    fn user() -> User {
        User {
            id: "u1".to_string(),
            username: "alice".to_string(),
            first_name: "Alice".to_string(),
            last_name: "Liddell".to_string(),
            email: Some("alice@example.com".to_string()),
            ..User::default()
        }
    }

    fn roles() -> Vec<Role> {
        vec![Role {
            id: "admin".to_string(),
            name: "Admin".to_string(),
            description: String::new(),
        }]
    }

    fn issuer(config: IdpConfig) -> TokenIssuer {
        TokenIssuer::new(Arc::new(config))
    }

    fn base_config() -> IdpConfig {
        IdpConfig::new(SecretString::from("issuer-test-secret"))
    }

    #[test]
    fn refresh_token_sets_path_scoped_cookie() {
        let issuer = issuer(base_config());
        let mut headers = HeaderMap::new();
        let issued = issuer
            .issue_refresh_token(&user(), &roles(), LoginKind::Password, Some(&mut headers))
            .expect("refresh");

        let claims = issuer.verify(&issued.token).expect("verify");
        assert_eq!(claims.id, issued.id);
        assert_eq!(claims.scopes, vec![Scope::Refresh]);
        assert_eq!(claims.parent_token_id(), None);
        assert_eq!(claims.roles(), ["admin".to_string()]);
        assert_eq!(claims.display_name, "Alice Liddell");
        assert_eq!(claims.email, "alice@example.com");

        let cookie = headers
            .get(SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(cookie.starts_with("portcullis_refresh="));
        assert!(cookie.contains("Path=/v1/auth/refresh"));
    }

    #[test]
    fn access_token_links_parent_and_sets_root_cookie() {
        let issuer = issuer(base_config());
        let mut headers = HeaderMap::new();
        let issued = issuer
            .issue_access_token(
                &user(),
                &roles(),
                Duration::ZERO,
                Some("refresh-1"),
                LoginKind::Mfa,
                Some(&mut headers),
            )
            .expect("access");
        let claims = issuer.verify(&issued.token).expect("verify");
        assert!(claims.has_scope(Scope::Access));
        assert_eq!(claims.parent_token_id(), Some("refresh-1"));
        assert_eq!(claims.login_kind(), Some(LoginKind::Mfa));
        assert_eq!(
            claims.expires_at - claims.issued_at,
            i64::try_from(crate::config::DEFAULT_ACCESS_TOKEN_TTL_SECONDS).unwrap_or_default()
        );
        let cookie = headers
            .get(SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        assert!(cookie.starts_with("portcullis_access="));
        assert!(cookie.contains("Path=/;"));
    }

    #[test]
    fn no_sink_means_no_cookie() {
        let issuer = issuer(base_config());
        let issued = issuer.issue_access_token(
            &user(),
            &roles(),
            Duration::ZERO,
            None,
            LoginKind::Password,
            None,
        );
        assert!(issued.is_ok());
    }

    #[test]
    fn requested_ttl_is_capped() {
        let issuer = issuer(
            base_config().with_max_access_token_ttl(Some(Duration::from_secs(600))),
        );
        let claims = |requested: u64| {
            let issued = issuer
                .issue_access_token(
                    &user(),
                    &roles(),
                    Duration::from_secs(requested),
                    None,
                    LoginKind::Password,
                    None,
                )
                .expect("access");
            let claims = issuer.verify(&issued.token).expect("verify");
            claims.expires_at - claims.issued_at
        };
        assert_eq!(claims(60), 60);
        assert_eq!(claims(7200), 600);
    }

    #[test]
    fn requested_ttl_capped_by_default_without_ceiling() {
        let issuer = issuer(base_config());
        let issued = issuer
            .issue_access_token(
                &user(),
                &roles(),
                Duration::from_secs(100_000),
                None,
                LoginKind::Password,
                None,
            )
            .expect("access");
        let claims = issuer.verify(&issued.token).expect("verify");
        assert_eq!(claims.expires_at - claims.issued_at, 3600);
    }

    #[test]
    fn overrides_change_default_ttls() {
        let issuer = issuer(base_config().with_ttl_overrides(vec![TtlOverride {
            role_ids: vec!["admin".to_string()],
            access_token_ttl_seconds: Some(120),
            refresh_token_ttl_seconds: Some(240),
            ..TtlOverride::default()
        }]));
        let access = issuer
            .issue_access_token(
                &user(),
                &roles(),
                Duration::ZERO,
                None,
                LoginKind::Password,
                None,
            )
            .expect("access");
        let access = issuer.verify(&access.token).expect("verify");
        assert_eq!(access.expires_at - access.issued_at, 120);

        let refresh = issuer
            .issue_refresh_token(&user(), &roles(), LoginKind::Password, None)
            .expect("refresh");
        let refresh = issuer.verify(&refresh.token).expect("verify");
        assert_eq!(refresh.expires_at - refresh.issued_at, 240);
    }

    #[test]
    fn pending_token_has_no_roles() {
        let issuer = issuer(base_config());
        let issued = issuer
            .issue_second_factor_pending_token(&user())
            .expect("pending");
        let claims = issuer.verify(&issued.token).expect("verify");
        assert_eq!(claims.scopes, vec![Scope::SecondFactorPending]);
        assert!(claims.roles().is_empty());
        assert_eq!(claims.expires_at - claims.issued_at, 300);
    }

    #[test]
    fn token_ids_are_unique() {
        let issuer = issuer(base_config());
        let a = issuer
            .issue_second_factor_pending_token(&user())
            .expect("a");
        let b = issuer
            .issue_second_factor_pending_token(&user())
            .expect("b");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn clear_cookies_expires_both() {
        let issuer = issuer(base_config());
        let mut headers = HeaderMap::new();
        issuer.clear_cookies(&mut headers).expect("clear");
        let cookies: Vec<_> = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().all(|c| c.contains("Max-Age=0")));
    }
}
