//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, ambient layers, background tasks)
//!     → middleware/session.rs (attach or create the session)
//!     → security headers, rate limiter
//!     → middleware/auth.rs (protected routes only)
//!     → csrf, sanitizer (state-changing fragments only)
//!     → application handler
//!     → response.rs (rejection bodies for pages and fragments)
//! ```

pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::{client_key, is_fragment_request, HX_REQUEST};
pub use server::{HttpServer, Security};
