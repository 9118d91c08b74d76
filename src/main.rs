//! Alchemorsel security gate.
//!
//! Runs the session and request-security pipeline in front of a small
//! demonstration route table.
//!
//! ```text
//! /                      public, shows the CSRF token minted for the session
//! /health                public, JSON status with the stored session count
//! /login                 sign-in form; CSRF-checked POST stores the credentials
//! /dashboard             protected page
//! /fragments/favorites   protected, CSRF-checked and sanitized fragment
//! /logout                protected, CSRF-checked, clears the session
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    extract::{Form, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Extension, Router,
};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use alchemorsel_gate::config::{load_config, GateConfig};
use alchemorsel_gate::lifecycle::{wait_for_signal, Shutdown};
use alchemorsel_gate::observability::{logging, metrics};
use alchemorsel_gate::security::CsrfToken;
use alchemorsel_gate::session::{Flash, FlashLevel, LoginGrant, PersistError, Session, SessionManager};
use alchemorsel_gate::{HttpServer, HttpTokenVerifier, Security};

#[derive(Parser)]
#[command(name = "alchemorsel-gate")]
#[command(about = "Session and request-security gate for the Alchemorsel web front end", long_about = None)]
struct Cli {
    /// TOML configuration file; built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => GateConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
    }

    logging::init(&config.observability);
    tracing::info!("alchemorsel-gate v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        session_lifetime_secs = config.session.lifetime_secs,
        rate_limit = config.rate_limit.max_requests,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let verifier = Arc::new(HttpTokenVerifier::from_config(&config.auth)?);
    tracing::info!(endpoint = %verifier.endpoint(), "Token verifier configured");

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let security = Security::new(config, verifier);
    let app = routes(&security);

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        trigger.trigger();
    });

    HttpServer::new(security, app).run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn routes(security: &Security) -> Router {
    let public = Router::new()
        .route("/", get(home))
        .route("/health", get(health));

    let forms = security.guard_forms(Router::new().route("/login", get(login_form).post(login)));

    let pages = security.protect(Router::new().route("/dashboard", get(dashboard)));

    let fragments = security.protect_fragments(
        Router::new()
            .route("/fragments/favorites", post(add_favorite))
            .route("/logout", post(logout)),
    );

    public
        .merge(forms)
        .merge(pages)
        .merge(fragments)
        .with_state(security.sessions().clone())
}

async fn health(State(sessions): State<SessionManager>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": sessions.store().len(),
    }))
}

async fn home(session: Extension<Session>, token: Option<Extension<CsrfToken>>) -> Html<String> {
    let who = session
        .attributes
        .username
        .as_deref()
        .unwrap_or("guest");
    let token = token.map(|Extension(CsrfToken(t))| t).unwrap_or_default();
    Html(format!(
        "<h1>Alchemorsel</h1><p>Signed in as {}</p><meta name=\"csrf-token\" content=\"{token}\">",
        escape(who)
    ))
}

#[derive(Deserialize)]
struct LoginQuery {
    redirect: Option<String>,
    expired: Option<String>,
}

async fn login_form(Query(query): Query<LoginQuery>, token: Option<Extension<CsrfToken>>) -> Html<String> {
    let notice = if query.expired.is_some() {
        "<p class=\"alert\">Your session has expired. Please sign in again.</p>"
    } else {
        ""
    };
    let token = token.map(|Extension(CsrfToken(t))| t).unwrap_or_default();
    let redirect = query.redirect.unwrap_or_else(|| "/dashboard".to_string());
    Html(format!(
        "{notice}<form method=\"post\" action=\"/login\">\
         <input type=\"hidden\" name=\"csrf_token\" value=\"{token}\">\
         <input type=\"hidden\" name=\"redirect\" value=\"{}\">\
         <input name=\"username\"><input name=\"access_token\" type=\"password\">\
         <button>Sign in</button></form>",
        escape(&redirect)
    ))
}

#[derive(Deserialize)]
struct LoginForm {
    username: String,
    access_token: String,
    redirect: Option<String>,
}

/// Store the submitted credentials; the gate checks the token on every
/// protected request.
async fn login(
    State(sessions): State<SessionManager>,
    Extension(mut session): Extension<Session>,
    Form(form): Form<LoginForm>,
) -> Result<Response, AppError> {
    let grant = LoginGrant {
        user_id: form.username.clone(),
        access_token: form.access_token,
        refresh_token: String::new(),
        username: Some(form.username),
        email: None,
    };
    sessions.login(&mut session, grant)?;
    session.attributes.flash = Some(Flash {
        level: FlashLevel::Success,
        message: "Welcome back.".to_string(),
    });
    let cookie = sessions.save(&session)?;

    // Only local paths; anything else lands on the dashboard.
    let target = form
        .redirect
        .filter(|r| r.starts_with('/') && !r.starts_with("//"))
        .unwrap_or_else(|| "/dashboard".to_string());
    Ok(([(header::SET_COOKIE, cookie)], Redirect::to(&target)).into_response())
}

async fn dashboard(
    State(sessions): State<SessionManager>,
    Extension(mut session): Extension<Session>,
) -> Result<Response, AppError> {
    let flash = session.take_flash();
    let name = session.attributes.username.clone().unwrap_or_default();

    let mut body = String::new();
    if let Some(flash) = &flash {
        body.push_str(&format!("<div class=\"flash {:?}\">{}</div>", flash.level, escape(&flash.message)));
    }
    body.push_str(&format!("<h1>Dashboard</h1><p>Hello, {}</p>", escape(&name)));

    if flash.is_some() {
        let cookie = sessions.save(&session)?;
        return Ok(([(header::SET_COOKIE, cookie)], Html(body)).into_response());
    }
    Ok(Html(body).into_response())
}

#[derive(Deserialize)]
struct FavoriteForm {
    recipe: String,
}

async fn add_favorite(Form(form): Form<FavoriteForm>) -> Html<String> {
    Html(format!("<li class=\"favorite\">{}</li>", escape(&form.recipe)))
}

async fn logout(
    State(sessions): State<SessionManager>,
    Extension(mut session): Extension<Session>,
) -> Result<Response, AppError> {
    let cookie = sessions.clear(&mut session)?;
    Ok(([(header::SET_COOKIE, cookie)], Redirect::to("/")).into_response())
}

/// Handler failure that is not a security rejection.
struct AppError(PersistError);

impl From<PersistError> for AppError {
    fn from(e: PersistError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self.0, "Failed to persist session");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
