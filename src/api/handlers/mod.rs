pub mod api_tokens;
pub mod auth;
pub mod forward_auth;
pub mod health;

use std::time::Duration;

/// Requested access token lifetime from an optional body field.
fn requested_ttl(seconds: Option<u64>) -> Duration {
    Duration::from_secs(seconds.unwrap_or_default())
}
