//! Login state machine.
//!
//! `Unauthenticated -> SecondFactorPending -> Authenticated`. The password
//! step either completes the login or, for users with an enrolled second
//! factor, returns a short-lived pending token that the second step trades
//! for a session.

use super::{AuthError, AuthService, Principal, PrincipalSource, mfa, password, redirect};
use crate::{
    store::models::User,
    token::{IssuedToken, LoginKind, Scope},
};
use axum::http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{info, instrument, warn};

pub enum Credential {
    Password {
        username: String,
        password: SecretString,
    },
    /// Pending token from the password step plus a TOTP or recovery code.
    SecondFactor { pending_token: String, code: String },
}

pub struct LoginRequest {
    pub credential: Credential,
    /// Requested access token lifetime; zero selects the default.
    pub requested_ttl: Duration,
    pub no_refresh_token: bool,
    /// Base64url-encoded URL to return to after login.
    pub requested_redirect: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Session {
    pub user_id: String,
    pub login_kind: LoginKind,
    pub access_token: IssuedToken,
    pub refresh_token: Option<IssuedToken>,
    pub redirect_to: Option<String>,
}

#[derive(Clone, Debug)]
pub enum LoginOutcome {
    SecondFactorRequired { pending_token: IssuedToken },
    Authenticated(Session),
}

impl AuthService {
    /// Run one step of the login state machine, appending cookies to `sink`.
    ///
    /// A `current` session principal is revoked before the new credential is
    /// checked.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` for any credential failure; `Internal` for store or
    /// signing failures.
    #[instrument(skip_all)]
    pub async fn login(
        &self,
        request: LoginRequest,
        current: Option<Principal>,
        sink: &mut HeaderMap,
    ) -> Result<LoginOutcome, AuthError> {
        if let Some(current) = current.filter(|p| p.source == PrincipalSource::Session) {
            info!("Ending session of {} before new login", current.user_id());
            self.ledger.end_session(&current.claims).await?;
            self.issuer.clear_cookies(sink)?;
        }

        let (user, kind) = match request.credential {
            Credential::Password { username, password } => {
                let user = self.verify_password(&username, &password).await?;
                if user.has_second_factor() {
                    let pending_token = self.issuer.issue_second_factor_pending_token(&user)?;
                    info!("Second factor required for {}", user.id);
                    return Ok(LoginOutcome::SecondFactorRequired { pending_token });
                }
                (user, LoginKind::Password)
            }
            Credential::SecondFactor {
                pending_token,
                code,
            } => (
                self.verify_second_factor(&pending_token, &code).await?,
                LoginKind::Mfa,
            ),
        };

        let roles = self.store.get_roles_for_user(&user.id).await?;
        let refresh_token = if request.no_refresh_token {
            None
        } else {
            Some(
                self.issuer
                    .issue_refresh_token(&user, &roles, kind, Some(&mut *sink))?,
            )
        };
        let access_token = self.issuer.issue_access_token(
            &user,
            &roles,
            request.requested_ttl,
            refresh_token.as_ref().map(|t| t.id.as_str()),
            kind,
            Some(sink),
        )?;
        info!("User {} logged in ({kind})", user.id);

        Ok(LoginOutcome::Authenticated(Session {
            user_id: user.id,
            login_kind: kind,
            access_token,
            refresh_token,
            redirect_to: request.requested_redirect.as_deref().and_then(|requested| {
                redirect::allowed_redirect(requested, self.config.allowed_redirect_domains())
            }),
        }))
    }

    async fn verify_password(
        &self,
        username: &str,
        password: &SecretString,
    ) -> Result<User, AuthError> {
        let password = password.expose_secret();
        let Some(user) = self.find_login_user(username).await? else {
            password::verify_unknown_user(password);
            warn!("Login attempt for unknown user");
            return Err(AuthError::Unauthenticated);
        };
        if !password::verify_password(&user.password_hash, password) {
            warn!("Wrong password for {}", user.id);
            return Err(AuthError::Unauthenticated);
        }
        Ok(user)
    }

    /// Resolve a login name to an active user: by username, then by verified
    /// email when enabled.
    async fn find_login_user(&self, login: &str) -> Result<Option<User>, AuthError> {
        let login = login.trim();
        if login.is_empty() {
            return Ok(None);
        }
        match self.store.get_user_by_name(login).await {
            Ok(user) => return Ok(Some(user).filter(|u| !u.deleted)),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(AuthError::internal(err)),
        }
        if !self.config.login_by_email() {
            return Ok(None);
        }
        match self.store.get_user_by_email(login).await {
            Ok(found) if found.verified && !found.user.deleted => Ok(Some(found.user)),
            Ok(_) => {
                warn!("Login by unverified email address rejected");
                Ok(None)
            }
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(AuthError::internal(err)),
        }
    }

    async fn verify_second_factor(&self, pending_token: &str, code: &str) -> Result<User, AuthError> {
        let claims = self.issuer.verify(pending_token).map_err(|err| {
            warn!("Rejected pending token: {err}");
            AuthError::Unauthenticated
        })?;
        if !claims.has_scope(Scope::SecondFactorPending) {
            warn!("Token {} is not a second-factor pending token", claims.id);
            return Err(AuthError::Unauthenticated);
        }

        let user = match self.store.get_user_by_id(&claims.subject).await {
            Ok(user) if !user.deleted => user,
            Ok(_) => return Err(AuthError::Unauthenticated),
            Err(err) if err.is_not_found() => return Err(AuthError::Unauthenticated),
            Err(err) => return Err(AuthError::internal(err)),
        };
        let Some(secret) = user.totp_secret.as_deref().filter(|s| !s.is_empty()) else {
            return Err(AuthError::Unauthenticated);
        };

        if self.codes.validate(secret, code) {
            return Ok(user);
        }
        if let Some(code_hash) = mfa::recovery_code_hash(code) {
            if self
                .store
                .check_and_delete_recovery_code(&user.id, &code_hash)
                .await?
            {
                info!("Recovery code used by {}", user.id);
                return Ok(user);
            }
        }
        warn!("Invalid second factor for {}", user.id);
        Err(AuthError::Unauthenticated)
    }
}
