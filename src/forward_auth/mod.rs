//! Forward-authorization decisions for reverse proxies.
//!
//! The proxy forwards the original request line in `x-forwarded-*` headers
//! together with the client's credentials. The engine authenticates the
//! delegated request, consults static rules and the policy engine, and
//! answers with `200` plus identity headers, a login/refresh redirect, or a
//! denial.

pub mod proxy;
pub mod rules;

pub use self::{
    proxy::TrustedNetworks,
    rules::{ForwardAuthConfig, ForwardAuthRules, RuleError},
};

use self::rules::{RuleVerdict, StaticSubject};
use crate::{
    auth::{AuthError, AuthService, BearerCredential, Principal, redirect},
    permission::PermissionResolver,
    policy::{ForwardAuthInput, PolicyEngine, SubjectInput},
    store::models::{Role, User},
    token::cookie,
};
use axum::{
    Json,
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
        header::{
            ACCEPT, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_ORIGIN, LOCATION,
            ORIGIN, REFERER, VARY,
        },
    },
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::{net::IpAddr, sync::Arc};
use tracing::{debug, error, info_span, warn, Instrument};

pub const HEADER_USER_ID: &str = "remote-user-id";
pub const HEADER_USER: &str = "remote-user";
pub const HEADER_DISPLAY_NAME: &str = "remote-display-name";
pub const HEADER_MAIL: &str = "remote-mail";
pub const HEADER_MAIL_VERIFIED: &str = "remote-mail-verified";
pub const HEADER_ROLE: &str = "remote-role";
pub const HEADER_AVATAR_URL: &str = "remote-avatar-url";

const X_FORWARDED_METHOD: &str = "x-forwarded-method";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_URI: &str = "x-forwarded-uri";

/// Request line reconstructed from the proxy's `x-forwarded-*` headers.
#[derive(Clone, Debug)]
pub struct ForwardedRequest {
    pub method: String,
    pub scheme: String,
    pub host: String,
    pub path: String,
    pub query: String,
    pub client_ip: Option<IpAddr>,
    pub headers: HeaderMap,
}

impl ForwardedRequest {
    /// `peer` is the address of the connection; `x-forwarded-for` is only
    /// consulted when it belongs to `trusted`.
    #[must_use]
    pub fn from_headers(
        headers: HeaderMap,
        peer: Option<IpAddr>,
        trusted: &TrustedNetworks,
    ) -> Self {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .unwrap_or_default()
                .to_string()
        };
        let uri = get(X_FORWARDED_URI);
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), query.to_string()),
            None => (uri.clone(), String::new()),
        };
        let mut method = get(X_FORWARDED_METHOD).to_ascii_uppercase();
        if method.is_empty() {
            method = Method::GET.to_string();
        }
        Self {
            method,
            scheme: get(X_FORWARDED_PROTO),
            host: get(X_FORWARDED_HOST),
            path,
            query,
            client_ip: trusted.client_ip(&headers, peer),
            headers,
        }
    }

    /// `scheme://host/path?query`
    #[must_use]
    pub fn url(&self) -> String {
        let scheme = if self.scheme.is_empty() {
            "http"
        } else {
            &self.scheme
        };
        let mut url = format!("{scheme}://{}{}", self.host, self.path);
        if !self.query.is_empty() {
            url.push('?');
            url.push_str(&self.query);
        }
        url
    }

    fn wants_html(&self) -> bool {
        header_str(&self.headers, ACCEPT.as_str()).is_some_and(|accept| accept.contains("text/html"))
    }

    /// Where the user should return after logging in. Browsers go back to
    /// the URL they asked for; scripts to the page or origin that called.
    fn redirect_target(&self) -> String {
        if self.wants_html() {
            return self.url();
        }
        header_str(&self.headers, REFERER.as_str())
            .filter(|referer| url::Url::parse(referer).is_ok())
            .or_else(|| {
                header_str(&self.headers, ORIGIN.as_str())
                    .filter(|origin| url::Url::parse(origin).is_ok())
            })
            .map_or_else(|| self.url(), str::to_string)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// JSON body of a redirect answered with `403` for non-HTML clients.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct RedirectBody {
    pub location: String,
}

#[derive(Debug)]
pub enum Decision {
    Allow(HeaderMap),
    Redirect {
        location: String,
        html: bool,
        cors: HeaderMap,
    },
    Deny {
        status: StatusCode,
        headers: HeaderMap,
    },
    Error,
}

impl IntoResponse for Decision {
    fn into_response(self) -> Response {
        match self {
            Self::Allow(headers) => (StatusCode::OK, headers).into_response(),
            Self::Redirect {
                location,
                html: true,
                mut cors,
            } => match HeaderValue::from_str(&location) {
                Ok(value) => {
                    cors.insert(LOCATION, value);
                    (StatusCode::FOUND, cors).into_response()
                }
                Err(_) => (StatusCode::FORBIDDEN, cors, "not allowed").into_response(),
            },
            Self::Redirect {
                location,
                html: false,
                cors,
            } => (StatusCode::FORBIDDEN, cors, Json(RedirectBody { location })).into_response(),
            Self::Deny { status, headers } => (status, headers, "not allowed").into_response(),
            Self::Error => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        }
    }
}

/// Identity established for a delegated request.
enum Identity {
    User {
        principal: Principal,
        user: Box<User>,
    },
    Static {
        subject: StaticSubject,
        user: Option<Box<User>>,
    },
    Anonymous,
}

#[derive(Clone)]
pub struct ForwardAuthEngine {
    auth: AuthService,
    rules: Arc<ForwardAuthRules>,
    resolver: Arc<PermissionResolver>,
    policy: Option<Arc<dyn PolicyEngine>>,
    trusted: Arc<TrustedNetworks>,
}

impl ForwardAuthEngine {
    #[must_use]
    pub fn new(
        auth: AuthService,
        rules: ForwardAuthRules,
        resolver: Arc<PermissionResolver>,
        policy: Option<Arc<dyn PolicyEngine>>,
    ) -> Self {
        Self {
            auth,
            rules: Arc::new(rules),
            resolver,
            policy,
            trusted: Arc::default(),
        }
    }

    #[must_use]
    pub fn with_trusted_networks(mut self, trusted: TrustedNetworks) -> Self {
        self.trusted = Arc::new(trusted);
        self
    }

    /// Proxies allowed to report the client address in `x-forwarded-for`.
    #[must_use]
    pub fn trusted_networks(&self) -> &TrustedNetworks {
        &self.trusted
    }

    pub async fn decide(&self, request: &ForwardedRequest) -> Decision {
        let span = info_span!(
            "forward_auth.decide",
            method = %request.method,
            host = %request.host,
            path = %request.path,
        );
        self.decide_inner(request).instrument(span).await
    }

    async fn decide_inner(&self, request: &ForwardedRequest) -> Decision {
        if request.method == Method::OPTIONS.as_str() {
            return Decision::Allow(HeaderMap::new());
        }

        let url = request.url();
        let entry = self.rules.matching(&request.method, &url);
        let required = self.rules.required(entry);
        let bearer = cookie::bearer(&request.headers);

        let verdict = entry.map_or(RuleVerdict::NoMatch, |entry| {
            entry.evaluate(request.client_ip, bearer.as_deref())
        });
        if verdict == RuleVerdict::Deny {
            return self.deny(request, StatusCode::FORBIDDEN, HeaderMap::new());
        }

        let authenticated = match BearerCredential::from_headers(
            &request.headers,
            self.auth.config().access_cookie_name(),
        ) {
            Some(credential) => self.auth.authenticate(credential).await,
            None => Err(AuthError::Unauthenticated),
        };

        let identity = match (authenticated, verdict) {
            (Ok(principal), _) => match self.load_user(principal.user_id()).await {
                Ok(Some(user)) => Identity::User {
                    principal,
                    user: Box::new(user),
                },
                Ok(None) => {
                    warn!("Access token subject {} not found", principal.user_id());
                    return self.deny(request, StatusCode::FORBIDDEN, HeaderMap::new());
                }
                Err(err) => {
                    error!("Failed to load forward-auth subject: {err}");
                    return Decision::Error;
                }
            },
            (Err(AuthError::Unauthenticated | AuthError::Expired), RuleVerdict::Allow(subject)) => {
                match self.load_user(&subject.subject).await {
                    Ok(user) => Identity::Static {
                        subject,
                        user: user.map(Box::new),
                    },
                    Err(err) => {
                        error!("Failed to load static rule subject: {err}");
                        return Decision::Error;
                    }
                }
            }
            (Err(AuthError::Expired), _) if required => {
                return self.redirect(request, &self.auth.config().refresh_redirect_url());
            }
            (Err(AuthError::Unauthenticated), _) if required => {
                return self.redirect(request, &self.auth.config().login_redirect_url());
            }
            (Err(AuthError::Unauthenticated | AuthError::Expired), _) => Identity::Anonymous,
            (Err(err), _) => {
                error!("Forward-auth authentication failed: {err}");
                return Decision::Error;
            }
        };

        let (headers, subject) = match self.identity_headers(&identity).await {
            Ok(result) => result,
            Err(err) => {
                error!("Failed to build forward-auth identity: {err}");
                return Decision::Error;
            }
        };
        self.apply_policy(request, headers, subject).await
    }

    async fn load_user(&self, user_id: &str) -> Result<Option<User>, AuthError> {
        match self.auth.store().get_user_by_id(user_id).await {
            Ok(user) if !user.deleted => Ok(Some(user)),
            Ok(_) => Ok(None),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(AuthError::internal(err)),
        }
    }

    async fn permissions_for(&self, roles: &[Role]) -> Result<Vec<String>, AuthError> {
        let mut requested = Vec::new();
        for role in roles {
            requested.extend(self.auth.store().get_role_permissions(&role.id).await?);
        }
        Ok(self.resolver.resolve(requested))
    }

    async fn identity_headers(
        &self,
        identity: &Identity,
    ) -> Result<(HeaderMap, Option<SubjectInput>), AuthError> {
        let mut headers = HeaderMap::new();
        match identity {
            Identity::Anonymous => Ok((headers, None)),
            Identity::User { principal, user } => {
                let roles = self.auth.principal_roles(principal).await?;
                self.user_headers(&mut headers, user).await?;
                for role in &roles {
                    append(&mut headers, HEADER_ROLE, &role.id);
                }
                let permissions = self.permissions_for(&roles).await?;
                let subject = SubjectInput::new(user, &principal.claims, roles, permissions);
                Ok((headers, Some(subject)))
            }
            Identity::Static { subject, user } => {
                let mut roles = Vec::with_capacity(subject.roles.len());
                for role_id in &subject.roles {
                    append(&mut headers, HEADER_ROLE, role_id);
                    roles.push(Role {
                        id: role_id.clone(),
                        name: role_id.clone(),
                        description: String::new(),
                    });
                }
                let permissions = self.permissions_for(&roles).await?;
                let input = match user {
                    Some(user) => {
                        self.user_headers(&mut headers, user).await?;
                        SubjectInput {
                            roles,
                            permissions,
                            ..SubjectInput::new(user, &Default::default(), Vec::new(), Vec::new())
                        }
                    }
                    None => {
                        append(&mut headers, HEADER_USER_ID, &subject.subject);
                        SubjectInput {
                            id: subject.subject.clone(),
                            username: subject.subject.clone(),
                            display_name: subject.subject.clone(),
                            roles,
                            permissions,
                            ..SubjectInput::default()
                        }
                    }
                };
                Ok((headers, Some(input)))
            }
        }
    }

    async fn user_headers(&self, headers: &mut HeaderMap, user: &User) -> Result<(), AuthError> {
        append(headers, HEADER_USER_ID, &user.id);
        append(headers, HEADER_USER, &user.username);
        let display_name = user.resolved_display_name();
        if !display_name.is_empty() {
            append(headers, HEADER_DISPLAY_NAME, &display_name);
        }
        match self.auth.store().get_primary_email(&user.id).await {
            Ok(email) => {
                append(headers, HEADER_MAIL, &email.address);
                append(headers, HEADER_MAIL_VERIFIED, &email.verified.to_string());
            }
            Err(err) if err.is_not_found() => debug!("User {} has no primary mail", user.id),
            Err(err) => return Err(AuthError::internal(err)),
        }
        append(
            headers,
            HEADER_AVATAR_URL,
            &format!("{}/avatar/{}", self.auth.config().public_url(), user.id),
        );
        Ok(())
    }

    async fn apply_policy(
        &self,
        request: &ForwardedRequest,
        mut headers: HeaderMap,
        subject: Option<SubjectInput>,
    ) -> Decision {
        let Some(policy) = &self.policy else {
            return Decision::Allow(headers);
        };
        let input = ForwardAuthInput {
            subject,
            method: request.method.clone(),
            path: request.path.clone(),
            host: request.host.clone(),
            headers: ForwardAuthInput::collect_headers(&request.headers),
            query: ForwardAuthInput::parse_query(&request.query),
            client_ip: request.client_ip.map(|ip| ip.to_string()),
        };
        match policy.evaluate_forward_auth(&input).await {
            Ok(None) => Decision::Allow(headers),
            Ok(Some(result)) => {
                let mut policy_headers = HeaderMap::new();
                for (name, value) in &result.headers {
                    append(&mut policy_headers, name, value);
                }
                if result.allow {
                    headers.extend(policy_headers);
                    Decision::Allow(headers)
                } else {
                    let status = result
                        .status_code
                        .and_then(|code| StatusCode::from_u16(code).ok())
                        .unwrap_or(StatusCode::FORBIDDEN);
                    self.deny(request, status, policy_headers)
                }
            }
            Err(err) => {
                error!("Policy evaluation failed: {err}");
                Decision::Error
            }
        }
    }

    fn redirect(&self, request: &ForwardedRequest, template: &str) -> Decision {
        let target = request.redirect_target();
        if template.trim().is_empty() || target.is_empty() {
            return self.deny(request, StatusCode::FORBIDDEN, HeaderMap::new());
        }
        Decision::Redirect {
            location: redirect::fill_template(template, &target),
            html: request.wants_html(),
            cors: cors_headers(&request.headers),
        }
    }

    fn deny(&self, request: &ForwardedRequest, status: StatusCode, mut headers: HeaderMap) -> Decision {
        headers.extend(cors_headers(&request.headers));
        Decision::Deny { status, headers }
    }
}

/// Echo `Origin` with credentials so browser fetches can read the denial.
fn cors_headers(request: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(origin) = request.get(ORIGIN) {
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, origin.clone());
        headers.insert(
            ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        );
        headers.insert(VARY, HeaderValue::from_static("Origin"));
    }
    headers
}

/// Append a header, skipping values that cannot be encoded.
fn append(headers: &mut HeaderMap, name: &str, value: &str) {
    match (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        (Ok(name), Ok(value)) => {
            headers.append(name, value);
        }
        _ => warn!("Skipping unencodable header {name}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::test_support::{Fixture, PASSWORD},
        policy::{ForwardAuthPolicyResult, PolicyError},
    };
    use async_trait::async_trait;
    use axum::{body::to_bytes, http::header::AUTHORIZATION};
    use base64::{Engine, engine::general_purpose::URL_SAFE};
    use std::sync::Mutex;

    const PROXY: &str = "10.0.0.2";

    fn proxies() -> TrustedNetworks {
        TrustedNetworks::parse(["10.0.0.0/24"]).expect("networks")
    }

    fn forwarded(pairs: &[(&str, &str)]) -> ForwardedRequest {
        forwarded_from(None, pairs)
    }

    fn forwarded_from(peer: Option<&str>, pairs: &[(&str, &str)]) -> ForwardedRequest {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_METHOD, HeaderValue::from_static("GET"));
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static("https"));
        headers.insert(X_FORWARDED_HOST, HeaderValue::from_static("app.example.com"));
        headers.insert(X_FORWARDED_URI, HeaderValue::from_static("/dashboard?tab=1"));
        for (name, value) in pairs {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).expect("name"),
                HeaderValue::from_str(value).expect("value"),
            );
        }
        let peer = peer.and_then(|peer| peer.parse().ok());
        ForwardedRequest::from_headers(headers, peer, &proxies())
    }

    async fn engine(fixture: &Fixture, rules: &str, policy: Option<Arc<dyn PolicyEngine>>) -> ForwardAuthEngine {
        let config: ForwardAuthConfig = serde_json::from_str(rules).expect("rules");
        let mut tree = crate::permission::PermissionTree::default();
        tree.insert("idm:users:read");
        tree.insert("idm:users:write");
        ForwardAuthEngine::new(
            fixture.service.clone(),
            ForwardAuthRules::compile(config).expect("compile"),
            Arc::new(PermissionResolver::Tree(tree)),
            policy,
        )
    }

    fn values(headers: &HeaderMap, name: &str) -> Vec<String> {
        headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok().map(str::to_string))
            .collect()
    }

    struct RecordingPolicy {
        result: Option<ForwardAuthPolicyResult>,
        seen: Mutex<Vec<ForwardAuthInput>>,
    }

    #[async_trait]
    impl PolicyEngine for RecordingPolicy {
        async fn evaluate_forward_auth(
            &self,
            input: &ForwardAuthInput,
        ) -> Result<Option<ForwardAuthPolicyResult>, PolicyError> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push(input.clone());
            }
            Ok(self.result.clone())
        }
    }

    struct FailingPolicy;

    #[async_trait]
    impl PolicyEngine for FailingPolicy {
        async fn evaluate_forward_auth(
            &self,
            _input: &ForwardAuthInput,
        ) -> Result<Option<ForwardAuthPolicyResult>, PolicyError> {
            Err(PolicyError::Status(503))
        }
    }

    #[test]
    fn reconstructs_request_line() {
        let request = forwarded_from(
            Some(PROXY),
            &[("x-forwarded-for", "192.0.2.7, 10.0.0.1")],
        );
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/dashboard");
        assert_eq!(request.query, "tab=1");
        assert_eq!(request.url(), "https://app.example.com/dashboard?tab=1");
        assert_eq!(request.client_ip, "192.0.2.7".parse().ok());
        assert_eq!(request.redirect_target(), request.url());

        let request = forwarded_from(Some("192.0.2.99"), &[("x-forwarded-for", "10.0.0.7")]);
        assert_eq!(request.client_ip, "192.0.2.99".parse().ok());

        let request = forwarded(&[("origin", "https://spa.example.com")]);
        assert_eq!(request.redirect_target(), "https://spa.example.com");
        let request = forwarded(&[
            ("origin", "https://spa.example.com"),
            ("referer", "https://spa.example.com/page"),
        ]);
        assert_eq!(request.redirect_target(), "https://spa.example.com/page");

        let request = forwarded(&[
            ("accept", "text/html"),
            ("referer", "https://portal.example.com/links"),
        ]);
        assert_eq!(request.redirect_target(), request.url());
    }

    #[tokio::test]
    async fn html_login_redirect_returns_to_requested_url_not_referer() {
        let fixture = Fixture::new().await;
        let engine = engine(&fixture, "{}", None).await;
        let request = forwarded(&[
            ("accept", "text/html"),
            ("referer", "https://portal.example.com/links"),
        ]);
        let Decision::Redirect { location, html, .. } = engine.decide(&request).await else {
            panic!("expected redirect");
        };
        assert!(html);
        let encoded = URL_SAFE.encode("https://app.example.com/dashboard?tab=1");
        assert_eq!(
            location,
            format!("https://id.example.com/login?redirect={encoded}")
        );
    }

    #[tokio::test]
    async fn options_is_always_allowed() {
        let fixture = Fixture::new().await;
        let engine = engine(&fixture, "{}", None).await;
        let request = forwarded(&[("x-forwarded-method", "OPTIONS")]);
        assert!(matches!(engine.decide(&request).await, Decision::Allow(h) if h.is_empty()));
    }

    #[tokio::test]
    async fn html_client_without_credential_is_redirected_to_login() {
        let fixture = Fixture::new().await;
        let engine = engine(&fixture, "{}", None).await;
        let request = forwarded(&[("accept", "text/html,application/xhtml+xml")]);
        let Decision::Redirect { location, html, .. } = engine.decide(&request).await else {
            panic!("expected redirect");
        };
        assert!(html);
        let encoded = URL_SAFE.encode("https://app.example.com/dashboard?tab=1");
        assert_eq!(
            location,
            format!("https://id.example.com/login?redirect={encoded}")
        );
    }

    #[tokio::test]
    async fn api_client_gets_location_json() {
        let fixture = Fixture::new().await;
        let engine = engine(&fixture, "{}", None).await;
        let request = forwarded(&[("accept", "application/json"), ("origin", "https://spa.example.com")]);
        let response = engine.decide(&request).await.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response.headers().get(ACCESS_CONTROL_ALLOW_ORIGIN),
            Some(&HeaderValue::from_static("https://spa.example.com"))
        );
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let body: RedirectBody = serde_json::from_slice(&bytes).expect("json");
        assert!(body.location.starts_with("https://id.example.com/login?redirect="));
    }

    #[tokio::test]
    async fn expired_credential_goes_to_refresh() {
        let fixture = Fixture::new().await;
        let engine = engine(&fixture, "{}", None).await;
        let session = fixture.password_login("alice", PASSWORD).await;
        let mut claims = fixture
            .service
            .issuer()
            .verify(&session.access_token.token)
            .expect("claims");
        claims.expires_at = claims.issued_at - 1;
        claims.not_before = claims.issued_at - 10;
        let expired = crate::token::codec::sign(
            &claims,
            fixture.service.config().jwt_secret(),
            fixture.service.config().signing_algorithm(),
        )
        .expect("sign");
        let request = forwarded(&[
            ("accept", "text/html"),
            ("authorization", &format!("Bearer {expired}")),
        ]);
        let Decision::Redirect { location, .. } = engine.decide(&request).await else {
            panic!("expected redirect");
        };
        assert!(location.starts_with("https://id.example.com/refresh?redirect="));
    }

    #[tokio::test]
    async fn authenticated_user_gets_identity_headers() {
        let fixture = Fixture::new().await;
        let engine = engine(&fixture, "{}", None).await;
        let session = fixture.password_login("alice", PASSWORD).await;
        let request = forwarded(&[(
            "cookie",
            &format!("portcullis_access={}", session.access_token.token),
        )]);
        let Decision::Allow(headers) = engine.decide(&request).await else {
            panic!("expected allow");
        };
        assert_eq!(values(&headers, HEADER_USER_ID), ["u-alice"]);
        assert_eq!(values(&headers, HEADER_USER), ["alice"]);
        assert_eq!(values(&headers, HEADER_DISPLAY_NAME), ["Alice Liddell"]);
        assert_eq!(values(&headers, HEADER_MAIL), ["alice@example.com"]);
        assert_eq!(values(&headers, HEADER_MAIL_VERIFIED), ["true"]);
        assert_eq!(values(&headers, HEADER_ROLE), ["admin", "viewer"]);
        assert_eq!(
            values(&headers, HEADER_AVATAR_URL),
            ["https://id.example.com/avatar/u-alice"]
        );
    }

    #[tokio::test]
    async fn revoked_credential_is_redirected() {
        let fixture = Fixture::new().await;
        let engine = engine(&fixture, "{}", None).await;
        let session = fixture.password_login("alice", PASSWORD).await;
        let principal = fixture.principal(&session).await;
        fixture
            .service
            .logout(&principal, &mut HeaderMap::new())
            .await
            .expect("logout");
        let request = forwarded(&[
            ("accept", "text/html"),
            ("authorization", &format!("Bearer {}", session.access_token.token)),
        ]);
        let Decision::Redirect { location, .. } = engine.decide(&request).await else {
            panic!("expected redirect");
        };
        assert!(location.starts_with("https://id.example.com/login?redirect="));
    }

    #[tokio::test]
    async fn optional_urls_pass_anonymous_requests() {
        let fixture = Fixture::new().await;
        let engine = engine(
            &fixture,
            r#"{"entries": [{"url": "^https://app\\.example\\.com/dashboard", "required": false}]}"#,
            None,
        )
        .await;
        let Decision::Allow(headers) = engine.decide(&forwarded(&[])).await else {
            panic!("expected allow");
        };
        assert!(headers.is_empty());
    }

    #[tokio::test]
    async fn static_rules_grant_and_deny() {
        let fixture = Fixture::new().await;
        let engine = engine(
            &fixture,
            r#"{"entries": [{"url": ".*", "rules": [
                {"token": "machine-token", "subject": "svc-backup", "roles": ["backup"]},
                {"network": "203.0.113.0/24", "deny": true}
            ]}]}"#,
            None,
        )
        .await;

        let request = forwarded(&[(AUTHORIZATION.as_str(), "Bearer machine-token")]);
        let Decision::Allow(headers) = engine.decide(&request).await else {
            panic!("expected allow");
        };
        assert_eq!(values(&headers, HEADER_USER_ID), ["svc-backup"]);
        assert_eq!(values(&headers, HEADER_ROLE), ["backup"]);

        let request = forwarded_from(
            Some(PROXY),
            &[
                (AUTHORIZATION.as_str(), "Bearer machine-token"),
                ("x-forwarded-for", "203.0.113.9"),
            ],
        );
        assert!(matches!(
            engine.decide(&request).await,
            Decision::Deny { status: StatusCode::FORBIDDEN, .. }
        ));
    }

    #[tokio::test]
    async fn spoofed_forwarded_for_does_not_match_network_rules() {
        let fixture = Fixture::new().await;
        let engine = engine(
            &fixture,
            r#"{"entries": [{"url": ".*", "rules": [
                {"network": "10.0.0.0/8", "subject": "svc-internal", "roles": ["admin"]}
            ]}]}"#,
            None,
        )
        .await;

        let spoofed = forwarded_from(
            Some("198.51.100.7"),
            &[
                ("accept", "text/html"),
                ("x-forwarded-for", "10.1.2.3, 198.51.100.7"),
            ],
        );
        assert_eq!(spoofed.client_ip, "198.51.100.7".parse().ok());
        let Decision::Redirect { location, .. } = engine.decide(&spoofed).await else {
            panic!("expected login redirect");
        };
        assert!(location.starts_with("https://id.example.com/login?redirect="));

        let relayed = forwarded_from(Some(PROXY), &[("x-forwarded-for", "10.1.2.3")]);
        let Decision::Allow(headers) = engine.decide(&relayed).await else {
            panic!("expected allow");
        };
        assert_eq!(values(&headers, HEADER_USER_ID), ["svc-internal"]);
        assert_eq!(values(&headers, HEADER_ROLE), ["admin"]);
    }

    #[tokio::test]
    async fn policy_receives_subject_and_can_deny() {
        let fixture = Fixture::new().await;
        let policy = Arc::new(RecordingPolicy {
            result: Some(ForwardAuthPolicyResult {
                allow: false,
                status_code: Some(451),
                headers: [("x-reason".to_string(), "policy".to_string())].into(),
            }),
            seen: Mutex::new(Vec::new()),
        });
        let engine = engine(&fixture, "{}", Some(policy.clone())).await;
        let session = fixture.password_login("alice", PASSWORD).await;
        let request = forwarded(&[(
            "authorization",
            &format!("Bearer {}", session.access_token.token),
        )]);
        let Decision::Deny { status, headers } = engine.decide(&request).await else {
            panic!("expected deny");
        };
        assert_eq!(status.as_u16(), 451);
        assert_eq!(values(&headers, "x-reason"), ["policy"]);

        let seen = policy.seen.lock().expect("lock");
        let input = &seen[0];
        assert_eq!(input.method, "GET");
        assert_eq!(input.path, "/dashboard");
        assert_eq!(input.query["tab"], vec!["1".to_string()]);
        assert!(!input.headers.contains_key("authorization"));
        let subject = input.subject.as_ref().expect("subject");
        assert_eq!(subject.id, "u-alice");
        assert_eq!(
            subject.permissions,
            vec!["idm:users:read".to_string(), "idm:users:write".to_string()]
        );
        assert_eq!(subject.fields.as_ref().map(|f| f["team"].clone()), Some("wonderland".into()));
    }

    #[tokio::test]
    async fn policy_allow_appends_headers_and_none_allows() {
        let fixture = Fixture::new().await;
        let session = fixture.password_login("alice", PASSWORD).await;
        let request = forwarded(&[(
            "authorization",
            &format!("Bearer {}", session.access_token.token),
        )]);

        let allowing = Arc::new(RecordingPolicy {
            result: Some(ForwardAuthPolicyResult {
                allow: true,
                status_code: None,
                headers: [("x-tenant".to_string(), "blue".to_string())].into(),
            }),
            seen: Mutex::new(Vec::new()),
        });
        let engine_allow = engine(&fixture, "{}", Some(allowing)).await;
        let Decision::Allow(headers) = engine_allow.decide(&request).await else {
            panic!("expected allow");
        };
        assert_eq!(values(&headers, "x-tenant"), ["blue"]);
        assert_eq!(values(&headers, HEADER_USER_ID), ["u-alice"]);

        let silent = Arc::new(RecordingPolicy {
            result: None,
            seen: Mutex::new(Vec::new()),
        });
        let engine_silent = engine(&fixture, "{}", Some(silent)).await;
        assert!(matches!(engine_silent.decide(&request).await, Decision::Allow(_)));
    }

    #[tokio::test]
    async fn policy_errors_fail_closed() {
        let fixture = Fixture::new().await;
        let engine = engine(&fixture, r#"{"default_required": false}"#, Some(Arc::new(FailingPolicy))).await;
        let response = engine.decide(&forwarded(&[])).await.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
