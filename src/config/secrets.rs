//! Secret handling utilities.
//!
//! Re-exports the secrecy types used for the database URL and provides a
//! redacted form of it that is safe to log.

pub use secrecy::{ExposeSecret, SecretString};

/// The database URL with any password replaced by `***`.
///
/// `postgres://app:hunter2@db:5432/tickets` becomes
/// `postgres://app:***@db:5432/tickets`.
pub fn redacted_database_url(url: &SecretString) -> String {
    let url = url.expose_secret();
    let Some(scheme_end) = url.find("://").map(|i| i + 3) else {
        return "***".to_string();
    };
    let rest = &url[scheme_end..];
    let Some(at) = rest.rfind('@') else {
        return url.to_string();
    };
    let userinfo = &rest[..at];
    let user = userinfo.split(':').next().unwrap_or_default();
    if user.len() == userinfo.len() {
        return url.to_string();
    }
    format!("{}{user}:***{}", &url[..scheme_end], &rest[at..])
}
