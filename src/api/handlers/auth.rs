//! Login, refresh, logout and introspection endpoints.
//!
//! Tokens are returned in the JSON body and as `HttpOnly` cookies.

use super::requested_ttl;
use crate::{
    auth::{
        AuthError, AuthService, Credential, ErrorBody, LoginOutcome, LoginRequest, Principal,
        Session, session::Profile,
    },
    token::{IssuedToken, LoginKind},
};
use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::IntoResponse,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Deserialize, Default, ToSchema)]
pub struct LoginBody {
    pub username: Option<String>,
    pub password: Option<String>,
    /// Pending token returned by the password step.
    pub pending_token: Option<String>,
    /// TOTP or recovery code.
    pub code: Option<String>,
    /// Requested access token lifetime in seconds.
    pub ttl: Option<u64>,
    #[serde(default)]
    pub no_refresh_token: bool,
    /// Base64url-encoded URL to return to.
    pub requested_redirect: Option<String>,
}

impl LoginBody {
    fn into_request(self) -> Result<LoginRequest, AuthError> {
        let credential = match (self.pending_token, self.code, self.username, self.password) {
            (Some(pending_token), Some(code), _, _) => Credential::SecondFactor {
                pending_token,
                code,
            },
            (Some(_), None, _, _) => {
                return Err(AuthError::InvalidArgument(
                    "code is required with pending_token".to_string(),
                ));
            }
            (None, _, Some(username), Some(password)) if !username.trim().is_empty() => {
                Credential::Password {
                    username: username.trim().to_string(),
                    password: SecretString::from(password),
                }
            }
            _ => {
                return Err(AuthError::InvalidArgument(
                    "username and password are required".to_string(),
                ));
            }
        };
        Ok(LoginRequest {
            credential,
            requested_ttl: requested_ttl(self.ttl),
            no_refresh_token: self.no_refresh_token,
            requested_redirect: self.requested_redirect,
        })
    }
}

#[derive(Deserialize, Default, ToSchema)]
pub struct RefreshBody {
    pub ttl: Option<u64>,
    pub requested_redirect: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct TokenResponse {
    pub token: String,
    pub id: String,
    pub expires_at: i64,
}

impl From<IssuedToken> for TokenResponse {
    fn from(token: IssuedToken) -> Self {
        Self {
            token: token.token,
            id: token.id,
            expires_at: token.expires_at,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct SessionResponse {
    pub user_id: String,
    pub login_kind: LoginKind,
    pub access_token: TokenResponse,
    pub refresh_token: Option<TokenResponse>,
    pub redirect_to: Option<String>,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            user_id: session.user_id,
            login_kind: session.login_kind,
            access_token: session.access_token.into(),
            refresh_token: session.refresh_token.map(TokenResponse::from),
            redirect_to: session.redirect_to,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, ToSchema)]
pub struct SecondFactorResponse {
    pub second_factor_required: bool,
    pub pending_token: TokenResponse,
}

/// A missing or invalid credential means no session to end; store failures
/// are not swallowed.
fn current_session(result: Result<Principal, AuthError>) -> Result<Option<Principal>, AuthError> {
    match result {
        Ok(principal) => Ok(Some(principal)),
        Err(err @ AuthError::Internal(_)) => Err(err),
        Err(_) => Ok(None),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginBody,
    responses(
        (status = 200, description = "Logged in", body = SessionResponse),
        (status = 202, description = "Second factor required", body = SecondFactorResponse),
        (status = 400, description = "Malformed request", body = ErrorBody),
        (status = 401, description = "Invalid credentials", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    auth: Extension<AuthService>,
    payload: Option<Json<LoginBody>>,
) -> Result<impl IntoResponse, AuthError> {
    let Some(Json(body)) = payload else {
        return Err(AuthError::InvalidArgument("missing payload".to_string()));
    };
    let request = body.into_request()?;
    // Any valid session on the request is ended by the new login.
    let current = current_session(auth.authenticate_headers(&headers).await)?;

    let mut cookies = HeaderMap::new();
    let response = match auth.login(request, current, &mut cookies).await? {
        LoginOutcome::SecondFactorRequired { pending_token } => (
            StatusCode::ACCEPTED,
            cookies,
            Json(SecondFactorResponse {
                second_factor_required: true,
                pending_token: pending_token.into(),
            }),
        )
            .into_response(),
        LoginOutcome::Authenticated(session) => {
            (StatusCode::OK, cookies, Json(SessionResponse::from(session))).into_response()
        }
    };
    Ok(response)
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    request_body = RefreshBody,
    responses(
        (status = 200, description = "New access token", body = SessionResponse),
        (status = 401, description = "Missing, invalid, expired or revoked refresh token", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn refresh(
    headers: HeaderMap,
    auth: Extension<AuthService>,
    payload: Option<Json<RefreshBody>>,
) -> Result<impl IntoResponse, AuthError> {
    let body = payload.map(|Json(body)| body).unwrap_or_default();
    let mut cookies = HeaderMap::new();
    let session = auth
        .refresh(
            &headers,
            requested_ttl(body.ttl),
            body.requested_redirect.as_deref(),
            &mut cookies,
        )
        .await?;
    Ok((StatusCode::OK, cookies, Json(SessionResponse::from(session))))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session revoked and cookies cleared"),
        (status = 401, description = "Not authenticated", body = ErrorBody),
        (status = 403, description = "API tokens cannot log out", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    auth: Extension<AuthService>,
) -> Result<impl IntoResponse, AuthError> {
    let principal = auth.authenticate_headers(&headers).await?;
    let mut response_headers = HeaderMap::new();
    auth.logout(&principal, &mut response_headers).await?;
    response_headers.insert(
        HeaderName::from_static("clear-site-data"),
        HeaderValue::from_static("\"cookies\""),
    );
    Ok((StatusCode::NO_CONTENT, response_headers))
}

#[utoipa::path(
    get,
    path = "/v1/auth/introspect",
    responses(
        (status = 200, description = "Authenticated principal", body = Profile),
        (status = 401, description = "Not authenticated", body = ErrorBody)
    ),
    tag = "auth"
)]
pub async fn introspect(
    headers: HeaderMap,
    auth: Extension<AuthService>,
) -> Result<Json<Profile>, AuthError> {
    let principal = auth.authenticate_headers(&headers).await?;
    Ok(Json(auth.introspect(&principal).await?))
}
