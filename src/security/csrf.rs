//! Stateless anti-forgery tokens.
//!
//! A token is `base64url(HMAC-SHA256(key, session_id ":" window))` where the
//! window is the current Unix time divided into fixed-width slots. Nothing is
//! stored server side; verification re-derives the tokens for the current and
//! the previous slot and compares them in constant time.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use subtle::ConstantTimeEq;

use crate::config::CsrfConfig;
use crate::error::SecurityError;
use crate::http::request::{buffer_form, client_key, is_fragment_request, is_safe_method};
use crate::session::Session;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the token on HTMX and fetch requests.
pub const CSRF_HEADER: &str = "x-csrf-token";

/// Form field carrying the token on plain form posts.
pub const CSRF_FORM_FIELD: &str = "csrf_token";

/// Token minted for the current session, available to handlers on safe requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken(pub String);

pub struct CsrfGuard {
    key: [u8; 32],
    window_secs: u64,
}

impl CsrfGuard {
    /// Key the guard with a secret of any length.
    pub fn new(secret: &[u8], window: Duration) -> Self {
        let mut key = [0u8; 32];
        key.copy_from_slice(&Sha256::digest(secret));
        Self {
            key,
            window_secs: window.as_secs().max(1),
        }
    }

    /// Key the guard with fresh random bytes. Tokens die with the process.
    pub fn random(window: Duration) -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self::new(&secret, window)
    }

    pub fn from_config(config: &CsrfConfig) -> Self {
        let window = Duration::from_secs(config.window_secs);
        match &config.secret {
            Some(secret) => Self::new(secret.as_bytes(), window),
            None => {
                tracing::warn!("No CSRF secret configured, using a random per-process key");
                Self::random(window)
            }
        }
    }

    pub fn mint(&self, session_id: &str) -> String {
        self.mint_at(session_id, unix_now())
    }

    pub fn verify(&self, session_id: &str, token: &str) -> bool {
        self.verify_at(session_id, token, unix_now())
    }

    fn mint_at(&self, session_id: &str, unix_secs: u64) -> String {
        URL_SAFE_NO_PAD.encode(self.derive(session_id, self.window_of(unix_secs)))
    }

    fn verify_at(&self, session_id: &str, token: &str, unix_secs: u64) -> bool {
        let provided = URL_SAFE_NO_PAD.decode(token).unwrap_or_default();
        let window = self.window_of(unix_secs);

        // Both slots are always derived and compared so timing does not
        // depend on which one matches.
        let current = self.derive(session_id, window);
        let previous = self.derive(session_id, window.saturating_sub(1));
        let matches = provided.as_slice().ct_eq(&current) | provided.as_slice().ct_eq(&previous);

        bool::from(matches) && !session_id.is_empty()
    }

    fn window_of(&self, unix_secs: u64) -> u64 {
        unix_secs / self.window_secs
    }

    fn derive(&self, session_id: &str, window: u64) -> [u8; 32] {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.key)
            .expect("HMAC accepts any key size");
        mac.update(session_id.as_bytes());
        mac.update(b":");
        mac.update(&window.to_be_bytes());
        let mut tag = [0u8; 32];
        tag.copy_from_slice(&mac.finalize().into_bytes());
        tag
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// State for the CSRF middleware.
#[derive(Clone)]
pub struct CsrfState {
    pub guard: Arc<CsrfGuard>,
    pub max_body_size: usize,
}

fn attached_session_id<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<Session>()
        .map(|s| s.id().as_str().to_string())
        .unwrap_or_default()
}

fn attach_token(guard: &CsrfGuard, request: &mut Request<Body>) {
    let session_id = attached_session_id(request);
    if !session_id.is_empty() {
        let token = CsrfToken(guard.mint(&session_id));
        request.extensions_mut().insert(token);
    }
}

/// Make a token available to handlers of safe requests. Never rejects.
pub async fn csrf_token_middleware(
    State(state): State<CsrfState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if is_safe_method(request.method()) {
        attach_token(&state.guard, &mut request);
    }
    next.run(request).await
}

/// Mint tokens on safe requests; demand a valid one on everything else.
pub async fn csrf_middleware(
    State(state): State<CsrfState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if is_safe_method(request.method()) {
        attach_token(&state.guard, &mut request);
        return next.run(request).await;
    }

    let session_id = attached_session_id(&request);

    let fragment = is_fragment_request(request.headers());
    let client = client_key(&request);
    let path = request.uri().path().to_string();

    let header_token = request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let (request, token) = match header_token {
        Some(token) => (request, token),
        None => match buffer_form(request, state.max_body_size).await {
            Ok((request, fields)) => {
                let token = fields
                    .into_iter()
                    .find(|(name, _)| name == CSRF_FORM_FIELD)
                    .map(|(_, value)| value)
                    .unwrap_or_default();
                (request, token)
            }
            Err(status) => return status.into_response(),
        },
    };

    if state.guard.verify(&session_id, &token) {
        next.run(request).await
    } else {
        SecurityError::Forbidden.reject(&client, &path, fragment)
    }
}
