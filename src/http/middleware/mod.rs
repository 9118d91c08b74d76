//! Request-scoped middleware that is not a standalone security primitive.

pub mod auth;
pub mod session;

pub use auth::{auth_gate_middleware, AuthState};
pub use session::session_middleware;
