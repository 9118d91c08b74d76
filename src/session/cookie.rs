//! Session cookie issuance and extraction.

use axum::http::header::{InvalidHeaderValue, COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::session::model::Session;

/// Fixed security attributes for the session cookie.
///
/// `HttpOnly`, `SameSite=Strict` and `Path=/` are always set; `Secure` follows
/// the deployment.
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    name: String,
    secure: bool,
}

impl CookiePolicy {
    pub fn new(name: impl Into<String>, secure: bool) -> Self {
        Self {
            name: name.into(),
            secure,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.cookie_name.clone(), config.secure_cookies)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    /// `Set-Cookie` value carrying the session id and its remaining lifetime.
    pub fn issue(&self, session: &Session) -> Result<HeaderValue, InvalidHeaderValue> {
        self.issue_at(session, Instant::now())
    }

    pub fn issue_at(&self, session: &Session, now: Instant) -> Result<HeaderValue, InvalidHeaderValue> {
        let max_age = session.remaining(now).as_secs();
        HeaderValue::try_from(self.format(session.id().as_str(), max_age))
    }

    /// `Set-Cookie` value that makes the browser drop the cookie.
    pub fn removal(&self) -> Result<HeaderValue, InvalidHeaderValue> {
        HeaderValue::try_from(self.format("", 0))
    }

    fn format(&self, value: &str, max_age: u64) -> String {
        let secure_flag = if self.secure { "; Secure" } else { "" };
        format!(
            "{}={value}; Path=/; Max-Age={max_age}; HttpOnly; SameSite=Strict{secure_flag}",
            self.name
        )
    }
}

/// Find the value of cookie `name` across all `Cookie` headers.
pub fn session_id_from(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"').to_string())
}
