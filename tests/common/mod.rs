//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use alchemorsel_gate::auth::{TokenVerifier, VerifyError};
use alchemorsel_gate::config::GateConfig;
use alchemorsel_gate::security::CsrfToken;
use alchemorsel_gate::session::{LoginGrant, Session, SessionManager};
use alchemorsel_gate::{HttpServer, Security};
use async_trait::async_trait;
use axum::{
    extract::{Form, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Extension, Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;

pub const VALID_TOKEN: &str = "valid-access-token";

/// Verifier that honours exactly one token and counts its calls.
pub struct StubVerifier {
    calls: AtomicUsize,
}

impl StubVerifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenVerifier for StubVerifier {
    async fn verify(&self, token: &str) -> Result<bool, VerifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(token == VALID_TOKEN)
    }
}

/// Defaults suitable for plain-HTTP tests.
pub fn test_config() -> GateConfig {
    let mut config = GateConfig::default();
    config.session.secure_cookies = false;
    config.csrf.secret = Some("integration-test-secret".to_string());
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config
}

#[derive(Deserialize)]
struct FavoriteForm {
    recipe: String,
}

/// A small application behind the full pipeline.
pub fn app(security: &Security) -> Router {
    let public = Router::new()
        .route("/", get(|| async { "home" }))
        .route("/health", get(|| async { "ok" }))
        .route(
            "/token",
            get(|token: Option<Extension<CsrfToken>>| async move {
                token.map(|Extension(CsrfToken(t))| t).unwrap_or_default()
            }),
        );

    let pages = security.protect(Router::new().route("/dashboard", get(|| async { "dashboard" })));

    let fragments = security.protect_fragments(
        Router::new()
            .route(
                "/fragments/favorites",
                post(|Form(form): Form<FavoriteForm>| async move {
                    Html(format!("<li>{}</li>", form.recipe))
                }),
            )
            .route("/logout", post(logout)),
    );

    public
        .merge(pages)
        .merge(fragments)
        .with_state(security.sessions().clone())
}

async fn logout(
    State(sessions): State<SessionManager>,
    Extension(mut session): Extension<Session>,
) -> Response {
    match sessions.clear(&mut session) {
        Ok(cookie) => ([(header::SET_COOKIE, cookie)], Redirect::to("/")).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// The fully layered router, ready for `oneshot`.
pub fn router(security: Security) -> Router {
    let app = app(&security);
    HttpServer::new(security, app).router()
}

/// Store a signed-in session and return its `Cookie` header value.
pub fn sign_in(security: &Security, access_token: &str) -> (String, String) {
    let sessions = security.sessions();
    let mut session = sessions
        .store()
        .create(security.config().session.lifetime());
    sessions
        .login(
            &mut session,
            LoginGrant {
                user_id: "user-1".to_string(),
                access_token: access_token.to_string(),
                refresh_token: "refresh".to_string(),
                username: Some("chef".to_string()),
                email: Some("chef@example.com".to_string()),
            },
        )
        .unwrap();

    let id = session.id().as_str().to_string();
    let cookie = format!("{}={}", sessions.cookies().name(), id);
    (cookie, id)
}

/// All `Set-Cookie` values on a response.
pub fn set_cookies(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect()
}

/// Start a stand-in for the backend's token verification endpoint.
///
/// `GET /api/v1/auth/verify` answers 200 for [`VALID_TOKEN`] and 401 otherwise.
pub async fn start_verify_backend() -> SocketAddr {
    async fn verify(headers: HeaderMap) -> StatusCode {
        let expected = format!("Bearer {VALID_TOKEN}");
        match headers.get(header::AUTHORIZATION) {
            Some(value) if value.as_bytes() == expected.as_bytes() => StatusCode::OK,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/api/v1/auth/verify", get(verify));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
