//! Denylist input sanitizer.
//!
//! A heuristic second line of defence on paths and form fields. It catches
//! obvious traversal, script and SQL payloads; it does not replace output
//! encoding in templates.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use percent_encoding::percent_decode_str;
use regex::RegexSet;
use std::fmt;
use std::sync::Arc;

use crate::error::SecurityError;
use crate::http::request::{buffer_form, client_key, is_fragment_request, is_safe_method};

/// Category of a denylist match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreatKind {
    PathTraversal,
    ScriptInjection,
    SqlInjection,
}

impl fmt::Display for ThreatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PathTraversal => "path traversal",
            Self::ScriptInjection => "script injection",
            Self::SqlInjection => "sql injection",
        })
    }
}

const RULES: &[(ThreatKind, &str)] = &[
    (ThreatKind::PathTraversal, r"(^|[/\\])\.\.([/\\]|$)"),
    (ThreatKind::PathTraversal, r"(?i)%2e%2e|%252e|%c0%ae"),
    (ThreatKind::PathTraversal, r"\x00|(?i)%00"),
    (ThreatKind::ScriptInjection, r"(?i)<\s*/?\s*(script|iframe|object|embed)\b"),
    (ThreatKind::ScriptInjection, r"(?i)(javascript|vbscript)\s*:"),
    (ThreatKind::ScriptInjection, r"(?i)<[^>]*\bon[a-z]+\s*="),
    (ThreatKind::ScriptInjection, r"(?i)data\s*:\s*text/html"),
    (ThreatKind::SqlInjection, r"(?i)\bunion\b\s+(all\s+)?\bselect\b"),
    (ThreatKind::SqlInjection, r"(?i)\bdrop\s+(table|database)\b"),
    (ThreatKind::SqlInjection, r"(?i)\binsert\s+into\s+\w+\s*(\(|\bvalues\b)"),
    (ThreatKind::SqlInjection, r"(?i)\bdelete\s+from\s+\w+\s+where\b"),
    (ThreatKind::SqlInjection, r"(?i)'\s*(or|and)\s+'?\w+'?\s*=\s*'?\w+"),
    (ThreatKind::SqlInjection, r";\s*--"),
];

/// Compiled denylist.
pub struct InputSanitizer {
    patterns: RegexSet,
}

impl InputSanitizer {
    /// Build the sanitizer from the built-in rules.
    ///
    /// # Panics
    ///
    /// Panics if a built-in rule is not a valid regex (compile-time invariant).
    pub fn new() -> Self {
        let patterns = RegexSet::new(RULES.iter().map(|(_, pattern)| *pattern))
            .expect("built-in sanitizer rules are valid regexes");
        tracing::debug!(rules = RULES.len(), "Input sanitizer initialized");
        Self { patterns }
    }

    /// Check raw (possibly percent-encoded) input. `+` counts as a space.
    pub fn inspect(&self, input: &str) -> Option<ThreatKind> {
        let spaced = input.replace('+', " ");
        let decoded = percent_decode_str(&spaced).decode_utf8_lossy();
        self.inspect_decoded(&decoded)
            .or_else(|| self.inspect_decoded(input))
    }

    /// Check input that is already decoded, such as parsed form values.
    pub fn inspect_decoded(&self, input: &str) -> Option<ThreatKind> {
        self.patterns
            .matches(input)
            .iter()
            .next()
            .map(|index| RULES[index].0)
    }
}

impl Default for InputSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

/// State for the sanitizer middleware.
#[derive(Clone)]
pub struct SanitizerState {
    pub sanitizer: Arc<InputSanitizer>,
    pub enabled: bool,
    pub max_body_size: usize,
}

/// Reject requests whose path, query or form fields match the denylist.
pub async fn sanitize_middleware(
    State(state): State<SanitizerState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.enabled {
        return next.run(request).await;
    }

    let fragment = is_fragment_request(request.headers());
    let client = client_key(&request);
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    if let Some(kind) = state.sanitizer.inspect(&target) {
        return SecurityError::MalformedInput(kind).reject(&client, &target, fragment);
    }

    if is_safe_method(request.method()) {
        return next.run(request).await;
    }

    let (request, fields) = match buffer_form(request, state.max_body_size).await {
        Ok(buffered) => buffered,
        Err(status) => return status.into_response(),
    };

    // Field values are already form-decoded once; `inspect` decodes again
    // to catch double-encoded payloads, as on the path.
    let threat = fields.iter().find_map(|(name, value)| {
        state
            .sanitizer
            .inspect(name)
            .or_else(|| state.sanitizer.inspect(value))
    });
    if let Some(kind) = threat {
        return SecurityError::MalformedInput(kind).reject(&client, &target, fragment);
    }

    next.run(request).await
}
