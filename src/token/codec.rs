//! Sign and verify [`Claims`] as compact HMAC JWS.
//!
//! Only the HMAC family is accepted. Verification checks the signature first
//! and the validity window second, so [`Error::Expired`] is only reported for
//! tokens that were genuinely issued with this secret.

use super::claims::Claims;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Signing algorithms accepted for issued tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    HS256,
    HS384,
    #[default]
    HS512,
}

impl Algorithm {
    pub const ALL: [Self; 3] = [Self::HS256, Self::HS384, Self::HS512];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HS256 => "HS256",
            Self::HS384 => "HS384",
            Self::HS512 => "HS512",
        }
    }

    const fn jwt(self) -> jsonwebtoken::Algorithm {
        match self {
            Self::HS256 => jsonwebtoken::Algorithm::HS256,
            Self::HS384 => jsonwebtoken::Algorithm::HS384,
            Self::HS512 => jsonwebtoken::Algorithm::HS512,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|alg| alg.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnsupportedAlgorithm(s.to_string()))
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("missing signing secret")]
    MissingSecret,
    #[error("token expired")]
    Expired,
    #[error("token not yet valid")]
    NotYetValid,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("failed to encode token: {0}")]
    Encode(String),
}

impl Error {
    /// True when the token is authentic but its validity window has passed.
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        matches!(self, Self::Expired)
    }
}

/// Serialize and sign `claims`.
///
/// # Errors
///
/// Returns an error if the secret is empty or the claims cannot be encoded.
pub fn sign(claims: &Claims, secret: &[u8], algorithm: Algorithm) -> Result<String, Error> {
    if secret.is_empty() {
        return Err(Error::MissingSecret);
    }

    jsonwebtoken::encode(
        &Header::new(algorithm.jwt()),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|err| Error::Encode(err.to_string()))
}

/// Parse `token`, verify its signature and validity window and return the claims.
///
/// # Errors
///
/// Returns [`Error::Expired`] when only the expiry check failed, and another
/// variant for any malformed, forged or not-yet-valid token.
pub fn parse_and_verify(secret: &[u8], token: &str) -> Result<Claims, Error> {
    if secret.is_empty() {
        return Err(Error::MissingSecret);
    }

    let mut validation = Validation::new(Algorithm::default().jwt());
    validation.algorithms = Algorithm::ALL.iter().map(|alg| alg.jwt()).collect();
    validation.leeway = 0;
    validation.validate_exp = true;
    validation.validate_nbf = true;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp", "sub"]);

    jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation)
        .map(|data| data.claims)
        .map_err(|err| match err.kind() {
            ErrorKind::ExpiredSignature => Error::Expired,
            ErrorKind::ImmatureSignature => Error::NotYetValid,
            ErrorKind::InvalidSignature => Error::InvalidSignature,
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                Error::UnsupportedAlgorithm(err.to_string())
            }
            _ => Error::Malformed(err.to_string()),
        })
}
