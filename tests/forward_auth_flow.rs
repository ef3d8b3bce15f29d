//! End-to-end flow through the HTTP router: login, forward-auth with the
//! issued cookie, logout, and the redirect afterwards.

use anyhow::Result;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{
        HeaderMap, Request, StatusCode,
        header::{ACCEPT, CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE},
    },
};
use base64::{Engine, engine::general_purpose::URL_SAFE};
use portcullis::{
    api,
    auth::{AuthService, TotpValidator, password::hash_password},
    config::IdpConfig,
    forward_auth::{ForwardAuthConfig, ForwardAuthEngine, ForwardAuthRules},
    permission::{PermissionResolver, PermissionTree},
    store::memory::{MemoryStore, Seed},
};
use secrecy::SecretString;
use std::sync::Arc;
use tower::ServiceExt;

const PASSWORD: &str = "correct horse battery staple";

async fn app() -> Result<Router> {
    let seed: Seed = serde_json::from_value(serde_json::json!({
        "roles": [
            {"id": "ops", "name": "Operators", "permissions": ["infra"]}
        ],
        "users": [{
            "id": "u-dana",
            "username": "dana",
            "password_hash": hash_password(PASSWORD).map_err(|e| anyhow::anyhow!("{e}"))?,
            "display_name": "Dana Scully",
            "email": "dana@example.com",
            "email_verified": true,
            "roles": ["ops"]
        }]
    }))?;
    let store = Arc::new(MemoryStore::from_seed(seed).await);

    let config = Arc::new(
        IdpConfig::new(SecretString::from("integration-secret".to_string()))
            .with_public_url("https://id.example.com".to_string()),
    );
    let auth = AuthService::new(config, store, Arc::new(TotpValidator));

    let tree: PermissionTree = serde_json::from_value(serde_json::json!({
        "infra": {"servers": ["read", "reboot"]}
    }))?;
    let rules: ForwardAuthConfig = serde_json::from_value(serde_json::json!({
        "entries": [{"url": "^https://public\\.example\\.com/", "required": false}]
    }))?;
    let engine = ForwardAuthEngine::new(
        auth.clone(),
        ForwardAuthRules::compile(rules)?,
        Arc::new(PermissionResolver::Tree(tree)),
        None,
    );
    api::app(auth, engine)
}

fn forward_auth(host: &str, uri: &str, extra: &[(&str, &str)]) -> Result<Request<Body>> {
    let mut builder = Request::get("/forward-auth")
        .header("x-forwarded-method", "GET")
        .header("x-forwarded-proto", "https")
        .header("x-forwarded-host", host)
        .header("x-forwarded-uri", uri);
    for (name, value) in extra {
        builder = builder.header(*name, *value);
    }
    Ok(builder.body(Body::empty())?)
}

fn cookie_pairs(headers: &HeaderMap) -> String {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .filter_map(|value| value.split(';').next())
        .collect::<Vec<_>>()
        .join("; ")
}

#[tokio::test]
async fn browser_session_through_forward_auth() -> Result<()> {
    let app = app().await?;

    // Anonymous browser request to a protected URL.
    let response = app
        .clone()
        .oneshot(forward_auth(
            "app.example.com",
            "/reports?year=2024",
            &[(ACCEPT.as_str(), "text/html")],
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::FOUND);
    let expected = format!(
        "https://id.example.com/login?redirect={}",
        URL_SAFE.encode("https://app.example.com/reports?year=2024")
    );
    assert_eq!(
        response.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
        Some(expected.as_str())
    );

    // Optional URLs pass anonymous requests.
    let response = app
        .clone()
        .oneshot(forward_auth("public.example.com", "/", &[])?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("remote-user-id").is_none());

    // Log in and replay the cookies.
    let response = app
        .clone()
        .oneshot(
            Request::post("/v1/auth/login")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({"username": "dana", "password": PASSWORD}).to_string(),
                ))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let cookies = cookie_pairs(response.headers());
    assert!(cookies.contains("portcullis_access="));

    let response = app
        .clone()
        .oneshot(forward_auth(
            "app.example.com",
            "/reports",
            &[(COOKIE.as_str(), cookies.as_str())],
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers.get("remote-user-id").map(|v| v.as_bytes()), Some(&b"u-dana"[..]));
    assert_eq!(headers.get("remote-user").map(|v| v.as_bytes()), Some(&b"dana"[..]));
    assert_eq!(
        headers.get("remote-display-name").map(|v| v.as_bytes()),
        Some(&b"Dana Scully"[..])
    );
    assert_eq!(
        headers.get("remote-mail").map(|v| v.as_bytes()),
        Some(&b"dana@example.com"[..])
    );
    assert_eq!(headers.get("remote-role").map(|v| v.as_bytes()), Some(&b"ops"[..]));

    // Logout revokes the session; the same cookie now leads back to login.
    let response = app
        .clone()
        .oneshot(
            Request::post("/v1/auth/logout")
                .header(COOKIE, cookies.as_str())
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(forward_auth(
            "app.example.com",
            "/reports",
            &[(COOKIE.as_str(), cookies.as_str()), (ACCEPT.as_str(), "application/json")],
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = to_bytes(response.into_body(), usize::MAX).await?;
    let body: serde_json::Value = serde_json::from_slice(&body)?;
    assert!(
        body["location"]
            .as_str()
            .is_some_and(|location| location.starts_with("https://id.example.com/login?redirect="))
    );
    Ok(())
}

#[tokio::test]
async fn health_and_request_id() -> Result<()> {
    let response = app()
        .await?
        .oneshot(Request::get("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    assert!(response.headers().contains_key("x-app"));
    Ok(())
}
