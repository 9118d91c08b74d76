//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Every request:
//!     → headers.rs (hardening response headers)
//!     → rate_limit.rs (per-client sliding window)
//! State-changing fragment endpoints, after the auth gate:
//!     → csrf.rs (keyed, windowed token check)
//!     → sanitizer.rs (denylist on path and form fields)
//! ```
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Fail closed: reject on any security check failure
//! - No trust in client input

pub mod csrf;
pub mod headers;
pub mod rate_limit;
pub mod sanitizer;

pub use csrf::{CsrfGuard, CsrfToken, CSRF_FORM_FIELD, CSRF_HEADER};
pub use rate_limit::{Admission, RateLimitEvictor, RateLimiter};
pub use sanitizer::{InputSanitizer, ThreatKind};
