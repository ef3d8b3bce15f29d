//! Turns a presented bearer credential into a [`Principal`].

use super::{AuthError, AuthService};
use crate::{
    store::models::Role,
    token::{
        AppMetadata, Authorization, Claims, LoginKind, Scope, api_token, claims::TOKEN_VERSION,
        cookie,
    },
};
use axum::http::HeaderMap;
use chrono::Utc;
use tracing::{instrument, warn};

/// Credential kinds accepted on API calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BearerCredential {
    Jwt(String),
    ApiToken(String),
}

impl BearerCredential {
    /// Read the `Authorization` bearer token, falling back to the access cookie.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap, access_cookie_name: &str) -> Option<Self> {
        cookie::bearer(headers)
            .or_else(|| cookie::find(headers, access_cookie_name))
            .map(Self::classify)
    }

    #[must_use]
    pub fn classify(token: String) -> Self {
        if api_token::is_api_token(&token) {
            Self::ApiToken(token)
        } else {
            Self::Jwt(token)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PrincipalSource {
    /// Signed access token from a login session.
    Session,
    ApiToken { token_id: String, roles: Vec<Role> },
}

/// Authenticated caller. API tokens get synthesized access claims so
/// downstream code handles both kinds uniformly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub claims: Claims,
    pub source: PrincipalSource,
}

impl Principal {
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.claims.subject
    }

    #[must_use]
    pub fn is_api_token(&self) -> bool {
        matches!(self.source, PrincipalSource::ApiToken { .. })
    }
}

impl AuthService {
    /// Authenticate the credential found in `headers`.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` when no usable credential is present, `Expired` for
    /// an authentic but expired access token, `Internal` on store failures.
    pub async fn authenticate_headers(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let credential =
            BearerCredential::from_headers(headers, self.config.access_cookie_name())
                .ok_or(AuthError::Unauthenticated)?;
        self.authenticate(credential).await
    }

    /// # Errors
    ///
    /// See [`Self::authenticate_headers`].
    #[instrument(skip_all)]
    pub async fn authenticate(&self, credential: BearerCredential) -> Result<Principal, AuthError> {
        match credential {
            BearerCredential::Jwt(token) => self.authenticate_jwt(&token).await,
            BearerCredential::ApiToken(token) => self.authenticate_api_token(&token).await,
        }
    }

    async fn authenticate_jwt(&self, token: &str) -> Result<Principal, AuthError> {
        let claims = self.issuer.verify(token).map_err(|err| {
            if !err.is_expired() {
                warn!("Rejected access token: {err}");
            }
            AuthError::from(err)
        })?;
        if !claims.has_scope(Scope::Access) {
            warn!("Token {} presented without access scope", claims.id);
            return Err(AuthError::Unauthenticated);
        }
        if self.ledger.is_rejected(&claims).await? {
            warn!("Token {} has been revoked", claims.id);
            return Err(AuthError::Unauthenticated);
        }
        Ok(Principal {
            claims,
            source: PrincipalSource::Session,
        })
    }

    async fn authenticate_api_token(&self, token: &str) -> Result<Principal, AuthError> {
        let stored = match self.store.get_api_token_by_hash(&api_token::hash(token)).await {
            Ok(stored) => stored,
            Err(err) if err.is_not_found() => {
                warn!("Unknown API token");
                return Err(AuthError::Unauthenticated);
            }
            Err(err) => return Err(AuthError::internal(err)),
        };
        let now = Utc::now().timestamp();
        if stored.is_expired(now) {
            warn!("API token {} expired", stored.id);
            return Err(AuthError::Unauthenticated);
        }

        let user = match self.store.get_user_by_id(&stored.user_id).await {
            Ok(user) if !user.deleted => user,
            Ok(_) => return Err(AuthError::Unauthenticated),
            Err(err) if err.is_not_found() => return Err(AuthError::Unauthenticated),
            Err(err) => return Err(AuthError::internal(err)),
        };
        let roles = self.store.get_roles_for_api_token(&stored.id).await?;

        let claims = Claims {
            audience: self.config.audience().to_string(),
            issuer: self.config.issuer().to_string(),
            id: stored.id.clone(),
            issued_at: stored.created_at,
            not_before: stored.created_at,
            expires_at: stored.expires_at.unwrap_or(i64::MAX),
            subject: user.id.clone(),
            name: user.username.clone(),
            display_name: user.resolved_display_name(),
            email: user.email.clone().unwrap_or_default(),
            scopes: vec![Scope::Access],
            app_metadata: Some(AppMetadata {
                token_version: TOKEN_VERSION.to_string(),
                parent_token_id: None,
                authorization: Some(Authorization {
                    roles: roles.iter().map(|role| role.id.clone()).collect(),
                }),
                login_kind: Some(LoginKind::Api),
            }),
        };
        Ok(Principal {
            claims,
            source: PrincipalSource::ApiToken {
                token_id: stored.id,
                roles,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{Fixture, PASSWORD};
    use axum::http::{
        HeaderValue,
        header::{AUTHORIZATION, COOKIE},
    };
    use std::time::Duration;

    #[test]
    fn credential_dispatch() {
        let mut headers = HeaderMap::new();
        assert_eq!(BearerCredential::from_headers(&headers, "portcullis_access"), None);

        headers.insert(COOKIE, HeaderValue::from_static("portcullis_access=eyJ.abc"));
        assert_eq!(
            BearerCredential::from_headers(&headers, "portcullis_access"),
            Some(BearerCredential::Jwt("eyJ.abc".to_string()))
        );

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer it.secret"));
        assert_eq!(
            BearerCredential::from_headers(&headers, "portcullis_access"),
            Some(BearerCredential::ApiToken("it.secret".to_string()))
        );
    }

    #[tokio::test]
    async fn access_token_authenticates() {
        let fixture = Fixture::new().await;
        let session = fixture.password_login("alice", PASSWORD).await;
        let principal = fixture
            .service
            .authenticate(BearerCredential::Jwt(session.access_token.token.clone()))
            .await
            .expect("principal");
        assert_eq!(principal.user_id(), "u-alice");
        assert_eq!(principal.source, PrincipalSource::Session);
    }

    #[tokio::test]
    async fn refresh_token_is_not_an_access_credential() {
        let fixture = Fixture::new().await;
        let session = fixture.password_login("alice", PASSWORD).await;
        let refresh = session.refresh_token.expect("refresh token");
        let result = fixture
            .service
            .authenticate(BearerCredential::Jwt(refresh.token))
            .await;
        assert!(matches!(result, Err(AuthError::Unauthenticated)));
    }

    #[tokio::test]
    async fn garbage_is_unauthenticated() {
        let fixture = Fixture::new().await;
        let result = fixture
            .service
            .authenticate(BearerCredential::Jwt("garbage".to_string()))
            .await;
        assert!(matches!(result, Err(AuthError::Unauthenticated)));
        let result = fixture
            .service
            .authenticate(BearerCredential::ApiToken("it.unknown".to_string()))
            .await;
        assert!(matches!(result, Err(AuthError::Unauthenticated)));
    }

    #[tokio::test]
    async fn api_token_authenticates_with_its_roles() {
        let fixture = Fixture::new().await;
        let session = fixture.password_login("alice", PASSWORD).await;
        let owner = fixture.principal(&session).await;
        let generated = fixture
            .service
            .generate_api_token(&owner, Some(vec!["viewer".to_string()]), None, "ci")
            .await
            .expect("generate");

        let principal = fixture
            .service
            .authenticate(BearerCredential::classify(generated.token))
            .await
            .expect("principal");
        assert!(principal.is_api_token());
        assert_eq!(principal.claims.roles(), ["viewer".to_string()]);
        assert_eq!(principal.claims.login_kind(), Some(LoginKind::Api));
        let roles = fixture
            .service
            .principal_roles(&principal)
            .await
            .expect("roles");
        assert_eq!(roles.len(), 1);
    }

    #[tokio::test]
    async fn expired_access_token_reports_expired() {
        let fixture = Fixture::new().await;
        let user = fixture.user("alice").await;
        let mut claims = fixture
            .service
            .issuer()
            .verify(
                &fixture
                    .service
                    .issuer()
                    .issue_access_token(
                        &user,
                        &[],
                        Duration::ZERO,
                        None,
                        LoginKind::Password,
                        None,
                    )
                    .expect("issue")
                    .token,
            )
            .expect("verify");
        claims.issued_at -= 7200;
        claims.not_before -= 7200;
        claims.expires_at = Utc::now().timestamp() - 1;
        let token = crate::token::codec::sign(
            &claims,
            fixture.service.config().jwt_secret(),
            fixture.service.config().signing_algorithm(),
        )
        .expect("sign");
        let result = fixture
            .service
            .authenticate(BearerCredential::Jwt(token))
            .await;
        assert!(matches!(result, Err(AuthError::Expired)));
    }
}
