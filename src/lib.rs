//! # Portcullis (Identity Provider Core)
//!
//! `portcullis` authenticates principals, issues and revokes bearer credentials
//! and renders coarse-grained authorization decisions for downstream services
//! and reverse proxies.
//!
//! ## Tokens
//!
//! Access, refresh and second-factor-pending tokens are HMAC-signed JWTs. Each
//! token carries exactly one scope. Access tokens minted from a refresh token
//! carry its id as `parent_token`, so revoking the refresh token revokes every
//! access token derived from it (one hop, no enumeration).
//!
//! API tokens are opaque `it.`-prefixed strings looked up in the datastore.
//!
//! ## Login
//!
//! Password first, then an optional second factor (TOTP or a single-use
//! recovery code) presented together with the short-lived pending token.
//! Refresh tokens are never rotated.
//!
//! ## Forward authorization
//!
//! `/forward-auth` is consumed by reverse proxies. It reconstructs the original
//! request from `x-forwarded-*` headers, authenticates it like any API call and
//! answers with identity headers (`remote-user-id`, `remote-role`, ...) or a
//! redirect to the login/refresh page.

pub mod api;
pub mod auth;
pub mod cli;
pub mod config;
pub mod forward_auth;
pub mod permission;
pub mod policy;
pub mod store;
pub mod token;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
