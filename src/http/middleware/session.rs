//! Session attachment middleware.
//!
//! Loads the session named by the request cookie, or starts an anonymous one,
//! and places it in the request extensions for everything downstream.

use axum::{
    body::Body,
    extract::State,
    http::{header::SET_COOKIE, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::session::{session_id_from, SessionManager, SessionOrigin};

/// Attach the session, plus its [`SessionOrigin`], to the request.
///
/// A session started for a request that the rate limiter turns away is
/// dropped again and no cookie is sent.
pub async fn session_middleware(
    State(sessions): State<SessionManager>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let cookie = session_id_from(request.headers(), sessions.cookies().name());
    let (session, origin) = sessions.load_or_create(cookie.as_deref());

    let set_cookie = if origin.is_new() {
        match sessions.cookies().issue(&session) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode session cookie");
                None
            }
        }
    } else {
        None
    };

    let id = session.id().clone();
    request.extensions_mut().insert(session);
    request.extensions_mut().insert(origin);
    let mut response = next.run(request).await;

    if origin.is_new() && response.status() == StatusCode::TOO_MANY_REQUESTS {
        sessions.store().delete(id.as_str());
        return response;
    }

    if let Some(value) = set_cookie {
        // A handler that saved the session already issued a fresher cookie.
        let prefix = format!("{}=", sessions.cookies().name());
        let already_set = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .any(|v| v.as_bytes().starts_with(prefix.as_bytes()));
        if !already_set {
            response.headers_mut().append(SET_COOKIE, value);
        }
    }
    response
}
