//! Error response bodies.
//!
//! HTMX requests get a small HTML fragment the page can swap in; everything
//! else gets plain text. Status codes never differ between the two.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};

/// Alert fragment for HTMX swaps.
pub fn fragment_error(status: StatusCode, message: &str) -> Response {
    let body = format!(
        r#"<div class="alert alert-error" role="alert" data-status="{}">{}</div>"#,
        status.as_u16(),
        message
    );
    (status, Html(body)).into_response()
}

/// Plain-text body for full-page requests.
pub fn page_error(status: StatusCode, message: &str) -> Response {
    (status, message.to_string()).into_response()
}
