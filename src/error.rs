//! Request rejection taxonomy.
//!
//! Every security outcome is terminal for its request and is resolved inside
//! the middleware chain. Each kind maps to a fixed status; the body depends
//! only on whether the client asked for an HTMX fragment.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::time::Duration;
use thiserror::Error;

use crate::http::response::{fragment_error, page_error};
use crate::observability::metrics;
use crate::security::ThreatKind;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityError {
    /// No session, or one without identity.
    #[error("authentication required")]
    NotFound,
    /// The session existed but has run out.
    #[error("session expired")]
    Expired,
    /// The verifier refused the access token or could not be reached.
    #[error("access token rejected")]
    Invalid,
    #[error("missing or invalid CSRF token")]
    Forbidden,
    #[error("rate limit exceeded")]
    RateLimited { retry_after: Duration },
    #[error("malformed input: {0}")]
    MalformedInput(ThreatKind),
}

impl SecurityError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound | Self::Expired | Self::Invalid => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::MalformedInput(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Expired => "expired",
            Self::Invalid => "invalid",
            Self::Forbidden => "forbidden",
            Self::RateLimited { .. } => "rate_limited",
            Self::MalformedInput(_) => "malformed_input",
        }
    }

    /// True for the outcomes that tell the user their session ran out.
    pub fn is_expiry(&self) -> bool {
        matches!(self, Self::Expired | Self::Invalid)
    }

    /// User-facing text.
    pub fn message(&self) -> &'static str {
        match self {
            Self::NotFound => "Authentication required. Please sign in to continue.",
            Self::Expired | Self::Invalid => "Your session has expired. Please sign in again.",
            Self::Forbidden => "Invalid or missing CSRF token.",
            Self::RateLimited { .. } => "Too many requests. Please try again later.",
            Self::MalformedInput(_) => "The request contained invalid input.",
        }
    }

    /// Record the rejection: warn for attacks and abuse, debug for routine misses.
    pub fn log(&self, client: &str, path: &str) {
        match self {
            Self::NotFound | Self::Expired => {
                tracing::debug!(client = %client, path = %path, reason = %self, "Request rejected");
            }
            _ => {
                tracing::warn!(client = %client, path = %path, reason = %self, "Request rejected");
            }
        }
        metrics::record_rejection(self.kind());
    }

    /// Status-and-body response without logging.
    pub fn into_response_for(self, fragment: bool) -> Response {
        let status = self.status();
        let mut response = if fragment {
            fragment_error(status, self.message())
        } else {
            page_error(status, self.message())
        };

        if let Self::RateLimited { retry_after } = self {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(retry_after.as_secs()));
        }
        response
    }

    /// Log and build the response in one step.
    pub fn reject(self, client: &str, path: &str, fragment: bool) -> Response {
        self.log(client, path);
        self.into_response_for(fragment)
    }
}

impl IntoResponse for SecurityError {
    fn into_response(self) -> Response {
        self.into_response_for(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(SecurityError::NotFound.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(SecurityError::Invalid.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(SecurityError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            SecurityError::RateLimited { retry_after: Duration::from_secs(60) }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            SecurityError::MalformedInput(ThreatKind::SqlInjection).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_retry_after_header() {
        let response = SecurityError::RateLimited { retry_after: Duration::from_secs(60) }
            .into_response_for(true);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");
    }

    #[test]
    fn test_fragment_and_page_share_status() {
        let fragment = SecurityError::Forbidden.into_response_for(true);
        let page = SecurityError::Forbidden.into_response_for(false);
        assert_eq!(fragment.status(), page.status());
        assert_ne!(
            fragment.headers()[header::CONTENT_TYPE],
            page.headers()[header::CONTENT_TYPE]
        );
    }

    #[test]
    fn test_expiry_messaging() {
        assert!(SecurityError::Invalid.is_expiry());
        assert!(!SecurityError::NotFound.is_expiry());
        assert_ne!(SecurityError::Invalid.message(), SecurityError::NotFound.message());
    }
}
