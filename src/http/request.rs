//! Request inspection helpers shared by the middleware.

use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{header, HeaderMap, Method, Request, StatusCode};
use std::net::SocketAddr;

/// Header HTMX sets on every request it issues.
pub const HX_REQUEST: &str = "hx-request";

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// True when the request came from HTMX and expects a fragment.
pub fn is_fragment_request(headers: &HeaderMap) -> bool {
    headers
        .get(HX_REQUEST)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Methods that must not change state.
pub fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE)
}

/// Client identity: first `X-Forwarded-For` hop, else the peer address.
pub fn client_key<B>(request: &Request<B>) -> String {
    let forwarded = request
        .headers()
        .get(X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty());

    if let Some(hop) = forwarded {
        return hop.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn is_urlencoded_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"))
}

/// Read an urlencoded body into fields and hand back an equivalent request.
///
/// Requests with any other content type pass through untouched with no
/// fields. Bodies over `limit` bytes are refused with 413.
pub async fn buffer_form(
    request: Request<Body>,
    limit: usize,
) -> Result<(Request<Body>, Vec<(String, String)>), StatusCode> {
    if !is_urlencoded_form(request.headers()) {
        return Ok((request, Vec::new()));
    }

    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, limit).await.map_err(|e| {
        tracing::debug!(error = %e, "Form body rejected");
        StatusCode::PAYLOAD_TOO_LARGE
    })?;

    let fields = url::form_urlencoded::parse(&bytes).into_owned().collect();
    Ok((Request::from_parts(parts, Body::from(bytes)), fields))
}
