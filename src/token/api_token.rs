//! Opaque API tokens.
//!
//! The plaintext value is returned once at creation; only its SHA-256 digest
//! is stored and used for lookups.

use anyhow::{Context, Result};
use base64::Engine;
use rand::{RngCore, rngs::OsRng};

pub const API_TOKEN_PREFIX: &str = "it.";

/// Characters of the plaintext kept for listings.
pub const REDACTED_LENGTH: usize = 6;

const SECRET_BYTES: usize = 48;

/// Generate a new `it.`-prefixed token.
///
/// # Errors
///
/// Fails when the operating system RNG is unavailable.
pub fn generate() -> Result<String> {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate API token")?;
    Ok(format!(
        "{API_TOKEN_PREFIX}{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
    ))
}

#[must_use]
pub fn is_api_token(token: &str) -> bool {
    token.starts_with(API_TOKEN_PREFIX)
}

/// Hex SHA-256 digest of the plaintext token.
#[must_use]
pub fn hash(token: &str) -> String {
    super::sha256_hex(token)
}

/// Prefix shown in listings, e.g. `it.abc`.
#[must_use]
pub fn redact(token: &str) -> String {
    token.chars().take(REDACTED_LENGTH).collect()
}
