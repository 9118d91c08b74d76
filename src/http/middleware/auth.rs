//! Authentication gate.
//!
//! Requires an attached session with an identity and an access token, and
//! asks the token verifier whether the token is still honoured before the
//! protected handler runs. Every failure is treated as a rejection.

use axum::{
    body::Body,
    extract::State,
    http::{header::SET_COOKIE, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;

use crate::auth::{TokenVerifier, VerifyError};
use crate::error::SecurityError;
use crate::http::request::{client_key, is_fragment_request};
use crate::session::{Session, SessionManager, SessionOrigin};

/// Characters escaped when the original path travels as a query value.
const RETURN_TO: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'&')
    .add(b'+')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// State required for the authentication gate.
#[derive(Clone)]
pub struct AuthState {
    pub sessions: SessionManager,
    pub verifier: Arc<dyn TokenVerifier>,
    pub login_path: String,
    pub verify_timeout: Duration,
}

impl AuthState {
    /// Login URL that brings the user back to `target` afterwards.
    pub fn login_redirect(&self, target: &str, expired: bool) -> String {
        let mut url = format!(
            "{}?redirect={}",
            self.login_path,
            utf8_percent_encode(target, RETURN_TO)
        );
        if expired {
            url.push_str("&expired=1");
        }
        url
    }

    fn reject(
        &self,
        request: &Request<Body>,
        error: SecurityError,
        cookie: Option<HeaderValue>,
    ) -> Response {
        let target = request
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| request.uri().path().to_string());
        error.log(&client_key(request), &target);

        let mut response = if is_fragment_request(request.headers()) {
            error.into_response_for(true)
        } else {
            let location = self.login_redirect(&target, error.is_expiry());
            Redirect::to(&location).into_response()
        };

        if let Some(cookie) = cookie {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
        response
    }
}

pub async fn auth_gate_middleware(
    State(state): State<AuthState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let session = request
        .extensions()
        .get::<Session>()
        .filter(|s| s.is_authenticated())
        .cloned();

    let Some(mut session) = session else {
        let replaced = request.extensions().get::<SessionOrigin>() == Some(&SessionOrigin::Replaced);
        let error = if replaced {
            SecurityError::Expired
        } else {
            SecurityError::NotFound
        };
        return state.reject(&request, error, None);
    };

    let token = session.access_token.clone().unwrap_or_default();
    let outcome = time::timeout(state.verify_timeout, state.verifier.verify(&token)).await;

    match outcome {
        Ok(Ok(true)) => return next.run(request).await,
        Ok(Ok(false)) => {}
        Ok(Err(e)) => {
            tracing::warn!(session = ?session.id(), error = %e, "Token verification failed");
        }
        Err(_) => {
            tracing::warn!(session = ?session.id(), error = %VerifyError::Timeout, "Token verification failed");
        }
    }

    let cookie = match state.sessions.clear(&mut session) {
        Ok(cookie) => Some(cookie),
        Err(e) => {
            tracing::error!(error = %e, "Failed to persist cleared session");
            None
        }
    };
    state.reject(&request, SecurityError::Invalid, cookie)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClearPolicy;
    use crate::session::{CookiePolicy, LoginGrant, SessionStore};
    use async_trait::async_trait;
    use axum::http::{header::LOCATION, StatusCode};
    use axum::{middleware::from_fn_with_state, routing::get, Router};
    use tower::ServiceExt;

    struct Fixed(Result<bool, ()>);

    #[async_trait]
    impl TokenVerifier for Fixed {
        async fn verify(&self, _token: &str) -> Result<bool, VerifyError> {
            self.0.map_err(|_| VerifyError::UnexpectedStatus(502))
        }
    }

    struct Hanging;

    #[async_trait]
    impl TokenVerifier for Hanging {
        async fn verify(&self, _token: &str) -> Result<bool, VerifyError> {
            std::future::pending().await
        }
    }

    fn state(verifier: Arc<dyn TokenVerifier>) -> AuthState {
        AuthState {
            sessions: SessionManager::new(
                SessionStore::new(),
                CookiePolicy::new("alchemorsel-session", false),
                Duration::from_secs(1800),
                ClearPolicy::Anonymize,
            ),
            verifier,
            login_path: "/login".into(),
            verify_timeout: Duration::from_secs(5),
        }
    }

    fn signed_in(state: &AuthState) -> Session {
        let (mut session, _) = state.sessions.load_or_create(None);
        state
            .sessions
            .login(
                &mut session,
                LoginGrant {
                    user_id: "u1".into(),
                    access_token: "token".into(),
                    refresh_token: "refresh".into(),
                    username: None,
                    email: None,
                },
            )
            .unwrap();
        session
    }

    async fn call(state: AuthState, session: Option<Session>, fragment: bool) -> Response {
        let app = Router::new()
            .route("/dashboard", get(|| async { "secret" }))
            .route_layer(from_fn_with_state(state, auth_gate_middleware));

        let mut builder = Request::get("/dashboard?tab=recipes");
        if fragment {
            builder = builder.header("HX-Request", "true");
        }
        let mut request = builder.body(Body::empty()).unwrap();
        if let Some(session) = session {
            request.extensions_mut().insert(session);
        }
        app.oneshot(request).await.unwrap()
    }

    #[tokio::test]
    async fn test_login_redirect_encoding() {
        let state = state(Arc::new(Fixed(Ok(true))));
        assert_eq!(state.login_redirect("/dashboard", false), "/login?redirect=/dashboard");
        assert_eq!(
            state.login_redirect("/recipes?page=2&q=a b", true),
            "/login?redirect=/recipes%3Fpage%3D2%26q%3Da%20b&expired=1"
        );
    }

    #[tokio::test]
    async fn test_no_session_redirects() {
        let response = call(state(Arc::new(Fixed(Ok(true)))), None, false).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers()[LOCATION],
            "/login?redirect=/dashboard%3Ftab%3Drecipes"
        );
    }

    #[tokio::test]
    async fn test_anonymous_fragment_gets_401() {
        let state = state(Arc::new(Fixed(Ok(true))));
        let (anonymous, _) = state.sessions.load_or_create(None);
        let response = call(state, Some(anonymous), true).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!response.headers().contains_key(SET_COOKIE));
    }

    #[tokio::test]
    async fn test_replaced_session_reports_expiry() {
        let state = state(Arc::new(Fixed(Ok(true))));
        let (fresh, _) = state.sessions.load_or_create(None);

        let app = Router::new()
            .route("/dashboard", get(|| async { "secret" }))
            .route_layer(from_fn_with_state(state, auth_gate_middleware));
        let mut request = Request::get("/dashboard").body(Body::empty()).unwrap();
        request.extensions_mut().insert(fresh);
        request.extensions_mut().insert(SessionOrigin::Replaced);

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(
            response.headers()[LOCATION],
            "/login?redirect=/dashboard&expired=1"
        );
    }

    #[tokio::test]
    async fn test_verified_session_passes() {
        let state = state(Arc::new(Fixed(Ok(true))));
        let session = signed_in(&state);
        let response = call(state, Some(session), false).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rejected_token_clears_session() {
        let state = state(Arc::new(Fixed(Ok(false))));
        let session = signed_in(&state);
        let store = state.sessions.store().clone();

        let response = call(state, Some(session.clone()), false).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(response.headers()[LOCATION].to_str().unwrap().ends_with("&expired=1"));
        assert!(response.headers()[SET_COOKIE]
            .to_str()
            .unwrap()
            .contains(session.id().as_str()));

        let stored = store.lookup(session.id().as_str()).unwrap();
        assert!(!stored.is_authenticated());
    }

    #[tokio::test]
    async fn test_verifier_error_fails_closed() {
        let state = state(Arc::new(Fixed(Err(()))));
        let session = signed_in(&state);
        let response = call(state, Some(session), true).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("expired"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_verifier_timeout_fails_closed() {
        let state = state(Arc::new(Hanging));
        let session = signed_in(&state);
        let response = call(state, Some(session), true).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
