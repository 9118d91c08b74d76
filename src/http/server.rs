//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Compose the security middleware chain around an application router
//! - Wire up ambient layers (tracing, timeout, body limit, request ID)
//! - Bind server to listener
//! - Supervise background tasks (session reaper, rate-limit evictor)
//! - Drain and stop everything on the shutdown signal

use axum::{middleware::from_fn_with_state, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::auth::TokenVerifier;
use crate::config::GateConfig;
use crate::http::middleware::{auth_gate_middleware, session_middleware, AuthState};
use crate::lifecycle::Shutdown;
use crate::security::csrf::{csrf_middleware, csrf_token_middleware, CsrfState};
use crate::security::headers;
use crate::security::rate_limit::{rate_limit_middleware, RateLimiterState};
use crate::security::sanitizer::{sanitize_middleware, SanitizerState};
use crate::security::{CsrfGuard, InputSanitizer, RateLimitEvictor, RateLimiter};
use crate::session::{SessionManager, SessionReaper, SessionStore};

/// Every piece of shared security state, built once per server.
#[derive(Clone)]
pub struct Security {
    config: GateConfig,
    sessions: SessionManager,
    verifier: Arc<dyn TokenVerifier>,
    csrf: Arc<CsrfGuard>,
    limiter: Arc<RateLimiter>,
    sanitizer: Arc<InputSanitizer>,
}

impl Security {
    pub fn new(config: GateConfig, verifier: Arc<dyn TokenVerifier>) -> Self {
        let sessions = SessionManager::from_config(SessionStore::new(), &config.session);
        let csrf = Arc::new(CsrfGuard::from_config(&config.csrf));
        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));

        Self {
            config,
            sessions,
            verifier,
            csrf,
            limiter,
            sanitizer: Arc::new(InputSanitizer::new()),
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn csrf(&self) -> &CsrfGuard {
        &self.csrf
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn auth_state(&self) -> AuthState {
        AuthState {
            sessions: self.sessions.clone(),
            verifier: self.verifier.clone(),
            login_path: self.config.auth.login_path.clone(),
            verify_timeout: Duration::from_millis(self.config.auth.verify_timeout_ms),
        }
    }

    /// Require a verified session on every route of `router`.
    pub fn protect<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router.route_layer(from_fn_with_state(self.auth_state(), auth_gate_middleware))
    }

    /// CSRF check, then the sanitizer, without requiring a signed-in user.
    ///
    /// For anonymous forms such as sign-in.
    pub fn guard_forms<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let max_body_size = self.config.security.max_body_size;
        let sanitizer = SanitizerState {
            sanitizer: self.sanitizer.clone(),
            enabled: self.config.security.strict_validation,
            max_body_size,
        };
        let csrf = CsrfState {
            guard: self.csrf.clone(),
            max_body_size,
        };

        // Later layers wrap earlier ones.
        router
            .route_layer(from_fn_with_state(sanitizer, sanitize_middleware))
            .route_layer(from_fn_with_state(csrf, csrf_middleware))
    }

    /// Auth gate, then CSRF, then the sanitizer, for state-changing fragments.
    pub fn protect_fragments<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        self.protect(self.guard_forms(router))
    }

    /// Session attachment, security headers and rate limiting for every route.
    ///
    /// Also mints CSRF tokens on safe requests so pages can embed them.
    pub fn wrap<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let limiter = RateLimiterState {
            limiter: self.limiter.clone(),
            enabled: self.config.rate_limit.enabled,
        };
        let csrf = CsrfState {
            guard: self.csrf.clone(),
            max_body_size: self.config.security.max_body_size,
        };

        let router = router
            .layer(from_fn_with_state(csrf, csrf_token_middleware))
            .layer(from_fn_with_state(limiter, rate_limit_middleware));
        let router = if self.config.security.enable_headers {
            headers::apply(router, self.config.session.secure_cookies)
        } else {
            router
        };
        router.layer(from_fn_with_state(self.sessions.clone(), session_middleware))
    }

    /// Start the reaper and the evictor; both stop on `shutdown`.
    pub fn spawn_background_tasks(&self, shutdown: &Shutdown) -> Vec<JoinHandle<()>> {
        let reaper = SessionReaper::new(
            self.sessions.store().clone(),
            self.config.session.reap_interval(),
        );
        let evictor = RateLimitEvictor::new(
            self.limiter.clone(),
            Duration::from_secs(self.config.rate_limit.eviction_interval_secs),
        );

        vec![
            tokio::spawn(reaper.run(shutdown.subscribe())),
            tokio::spawn(evictor.run(shutdown.subscribe())),
        ]
    }
}

/// HTTP server for the gate.
pub struct HttpServer {
    router: Router,
    config: GateConfig,
    security: Security,
}

impl HttpServer {
    /// Wrap `app` in the security chain and the ambient layers.
    ///
    /// `app` is expected to have used `security.protect` and
    /// `security.protect_fragments` on its own routes already.
    pub fn new(security: Security, app: Router) -> Self {
        let config = security.config().clone();
        let router = Self::build_router(&config, &security, app);
        Self {
            router,
            config,
            security,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GateConfig, security: &Security, app: Router) -> Router {
        security
            .wrap(app)
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router, for driving the server in-process.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let tasks = self.security.spawn_background_tasks(&shutdown);

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let mut signal = shutdown.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = signal.recv().await;
            })
            .await?;

        // The server only returns on shutdown, so the tasks are already stopping.
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Background task failed");
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
