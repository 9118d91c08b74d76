//! Authentication collaborators.
//!
//! The gate itself lives in `http::middleware::auth`; this module holds the
//! token verification capability it consults.

pub mod verifier;

pub use verifier::{HttpTokenVerifier, TokenVerifier, VerifyError};
