//! Bearer credentials: signed claims, issuance, cookies and opaque API tokens.

pub mod api_token;
pub mod claims;
pub mod codec;
pub mod cookie;
pub mod issuer;

pub use self::claims::{AppMetadata, Authorization, Claims, LoginKind, Scope};
pub use self::issuer::{IssueError, IssuedToken, TokenIssuer};

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 digest, the lookup key for secrets stored at rest.
#[must_use]
pub fn sha256_hex(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}
