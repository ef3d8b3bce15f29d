//! Redirect targets carried as URL-safe base64.

use base64::{
    Engine,
    engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD},
};
use url::Url;

/// Encode `target` for a `%s` slot in a login or refresh URL template.
#[must_use]
pub fn encode_target(target: &str) -> String {
    URL_SAFE.encode(target.as_bytes())
}

/// Substitute the encoded target into `template`.
#[must_use]
pub fn fill_template(template: &str, target: &str) -> String {
    template.replacen("%s", &encode_target(target), 1)
}

/// Decode a requested redirect and return it when its host is allowed.
///
/// An entry starting with `.` matches any subdomain; other entries must
/// equal the host.
#[must_use]
pub fn allowed_redirect(requested: &str, allowed_domains: &[String]) -> Option<String> {
    let requested = requested.trim();
    if requested.is_empty() {
        return None;
    }
    let bytes = URL_SAFE
        .decode(requested)
        .or_else(|_| URL_SAFE_NO_PAD.decode(requested.trim_end_matches('=')))
        .ok()?;
    let target = String::from_utf8(bytes).ok()?;
    let url = Url::parse(&target).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    let host = url.host_str()?.to_ascii_lowercase();
    let permitted = allowed_domains.iter().any(|domain| {
        let domain = domain.trim().to_ascii_lowercase();
        if domain.starts_with('.') {
            host.ends_with(&domain)
        } else {
            !domain.is_empty() && host == domain
        }
    });
    permitted.then_some(target)
}
