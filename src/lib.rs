//! Session lifecycle and request-security middleware for the Alchemorsel
//! web front end.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──▶ request id / trace / timeout
//!     ──▶ session attachment ──▶ security headers ──▶ rate limiter
//!     ──▶ [auth gate] ──▶ [csrf guard] ──▶ [input sanitizer]
//!     ──▶ application handler
//!
//!     Background: session reaper, rate-limit evictor
//! ```
//!
//! Bracketed stages run only on the routes that opt into them through
//! [`Security::protect`] and [`Security::protect_fragments`].

// Core subsystems
pub mod auth;
pub mod config;
pub mod http;
pub mod session;

// Cross-cutting concerns
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use auth::{HttpTokenVerifier, TokenVerifier};
pub use config::schema::GateConfig;
pub use error::SecurityError;
pub use http::{HttpServer, Security};
pub use lifecycle::Shutdown;
pub use session::{Session, SessionManager, SessionStore};
