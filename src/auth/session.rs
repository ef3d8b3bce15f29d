//! Refresh, logout and introspection for established sessions.

use super::{AuthError, AuthService, Principal, Session, redirect};
use crate::{
    store::models::Role,
    token::{LoginKind, Scope, cookie},
};
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;

/// Read-only view of the authenticated user.
#[derive(ToSchema, Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    pub username: String,
    pub display_name: String,
    pub first_name: String,
    pub last_name: String,
    pub avatar: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub roles: Vec<Role>,
    pub login_kind: Option<LoginKind>,
}

impl AuthService {
    /// Trade the refresh cookie in `headers` for a new access token. The
    /// refresh token itself is not rotated.
    ///
    /// # Errors
    ///
    /// `Expired` for an authentic but expired refresh token, `Unauthenticated`
    /// for a missing, invalid or revoked one.
    #[instrument(skip_all)]
    pub async fn refresh(
        &self,
        headers: &HeaderMap,
        requested_ttl: Duration,
        requested_redirect: Option<&str>,
        sink: &mut HeaderMap,
    ) -> Result<Session, AuthError> {
        let token = cookie::find(headers, self.config.refresh_cookie_name())
            .ok_or(AuthError::Unauthenticated)?;
        let claims = self.issuer.verify(&token).map_err(|err| {
            if !err.is_expired() {
                warn!("Rejected refresh token: {err}");
            }
            AuthError::from(err)
        })?;
        if !claims.has_scope(Scope::Refresh) {
            warn!("Token {} presented without refresh scope", claims.id);
            return Err(AuthError::Unauthenticated);
        }
        if self.ledger.is_rejected(&claims).await? {
            warn!("Refresh token {} has been revoked", claims.id);
            return Err(AuthError::Unauthenticated);
        }

        let user = match self.store.get_user_by_id(&claims.subject).await {
            Ok(user) if !user.deleted => user,
            Ok(_) => return Err(AuthError::Unauthenticated),
            Err(err) if err.is_not_found() => return Err(AuthError::Unauthenticated),
            Err(err) => return Err(AuthError::internal(err)),
        };
        let roles = self.store.get_roles_for_user(&user.id).await?;
        let kind = claims.login_kind().unwrap_or(LoginKind::Password);
        let access_token = self.issuer.issue_access_token(
            &user,
            &roles,
            requested_ttl,
            Some(&claims.id),
            kind,
            Some(sink),
        )?;

        Ok(Session {
            user_id: user.id,
            login_kind: kind,
            access_token,
            refresh_token: None,
            redirect_to: requested_redirect.and_then(|requested| {
                redirect::allowed_redirect(requested, self.config.allowed_redirect_domains())
            }),
        })
    }

    /// Revoke the caller's access token and the refresh token it came from,
    /// then clear both cookies.
    ///
    /// # Errors
    ///
    /// `PermissionDenied` for API tokens, `Internal` when the ledger write fails.
    #[instrument(skip_all, fields(user_id = %principal.user_id()))]
    pub async fn logout(&self, principal: &Principal, sink: &mut HeaderMap) -> Result<(), AuthError> {
        if principal.is_api_token() {
            return Err(AuthError::PermissionDenied(
                "API tokens cannot log out; remove the token instead".to_string(),
            ));
        }
        self.ledger.end_session(&principal.claims).await?;
        self.issuer.clear_cookies(sink)?;
        info!("User {} logged out", principal.user_id());
        Ok(())
    }

    /// # Errors
    ///
    /// `Unauthenticated` when the user no longer exists.
    pub async fn introspect(&self, principal: &Principal) -> Result<Profile, AuthError> {
        let user = match self.store.get_user_by_id(principal.user_id()).await {
            Ok(user) if !user.deleted => user,
            Ok(_) => return Err(AuthError::Unauthenticated),
            Err(err) if err.is_not_found() => return Err(AuthError::Unauthenticated),
            Err(err) => return Err(AuthError::internal(err)),
        };
        let email = match self.store.get_primary_email(&user.id).await {
            Ok(email) => Some(email),
            Err(err) if err.is_not_found() => None,
            Err(err) => return Err(AuthError::internal(err)),
        };
        let roles = self.store.get_roles_for_user(&user.id).await?;
        Ok(Profile {
            display_name: user.resolved_display_name(),
            id: user.id,
            username: user.username,
            first_name: user.first_name,
            last_name: user.last_name,
            avatar: user.avatar,
            email_verified: email.as_ref().is_some_and(|e| e.verified),
            email: email.map(|e| e.address),
            roles,
            login_kind: principal.claims.login_kind(),
        })
    }
}
