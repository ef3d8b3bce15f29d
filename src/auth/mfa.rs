//! Second-factor checks: TOTP codes and single-use recovery codes.

use totp_rs::{Algorithm, Secret, TOTP};

const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP: u64 = 30;

/// Validates a one-time code against a user's enrolled secret.
pub trait CodeValidator: Send + Sync {
    fn validate(&self, secret: &str, code: &str) -> bool;
}

/// RFC 6238 validator over a base32 secret (SHA-1, 6 digits, 30s step, one
/// step of skew).
#[derive(Clone, Copy, Debug, Default)]
pub struct TotpValidator;

impl TotpValidator {
    fn totp(secret: &str) -> Option<TOTP> {
        let bytes = Secret::Encoded(secret.trim().to_string()).to_bytes().ok()?;
        Some(TOTP::new_unchecked(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP,
            bytes,
            Some("portcullis".to_string()),
            String::new(),
        ))
    }
}

impl CodeValidator for TotpValidator {
    fn validate(&self, secret: &str, code: &str) -> bool {
        let code = code.trim();
        if code.len() != TOTP_DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
            return false;
        }
        Self::totp(secret).is_some_and(|totp| totp.check_current(code).unwrap_or(false))
    }
}

/// Canonical form of a recovery code: ASCII alphanumerics, upper-cased.
#[must_use]
pub fn normalize_recovery_code(input: &str) -> String {
    input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect()
}

/// Lookup key stored for a recovery code; `None` for blank input.
#[must_use]
pub fn recovery_code_hash(input: &str) -> Option<String> {
    let normalized = normalize_recovery_code(input);
    if normalized.is_empty() {
        return None;
    }
    Some(crate::token::sha256_hex(&normalized))
}
