//! `Set-Cookie` helpers for the access and refresh cookies.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{AUTHORIZATION, COOKIE, InvalidHeaderValue},
};

/// Attributes shared by every cookie this service sets.
#[derive(Clone, Copy, Debug)]
pub struct CookieAttributes<'a> {
    pub path: &'a str,
    pub domain: Option<&'a str>,
    pub secure: bool,
}

/// Build an `HttpOnly`, `SameSite=Lax` cookie holding `value` for `max_age_seconds`.
pub fn build(
    name: &str,
    value: &str,
    max_age_seconds: u64,
    attributes: CookieAttributes<'_>,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{name}={value}; Path={}", attributes.path);
    if let Some(domain) = attributes.domain {
        cookie.push_str("; Domain=");
        cookie.push_str(domain);
    }
    cookie.push_str(&format!("; Max-Age={max_age_seconds}; HttpOnly; SameSite=Lax"));
    if attributes.secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Build an expired cookie that makes the browser drop `name`.
pub fn clear(name: &str, attributes: CookieAttributes<'_>) -> Result<HeaderValue, InvalidHeaderValue> {
    build(name, "", 0, attributes)
}

/// Return the value of cookie `name` from any `Cookie` header.
#[must_use]
pub fn find(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|header| header.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (key, val) = pair.trim().split_once('=')?;
            (key.trim() == name && !val.trim().is_empty()).then(|| val.trim().to_string())
        })
}

/// Return the bearer token from the `Authorization` header, if any.
#[must_use]
pub fn bearer(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
