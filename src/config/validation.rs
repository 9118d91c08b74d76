//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (lifetimes, windows and ceilings > 0; lifetimes
//!   and sweep intervals bounded above)
//! - Validate addresses and URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GateConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

use crate::config::schema::GateConfig;
use crate::session::model::MAX_LIFETIME;

/// Upper bound for background sweep intervals (one day).
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("{field} must be at most {max} seconds")]
    TooLarge { field: &'static str, max: u64 },
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("{field} is not a valid socket address: {value}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("auth.login_path must start with '/': {0}")]
    InvalidLoginPath(String),
    #[error("auth.api_base_url is not a valid URL: {0}")]
    InvalidUrl(String),
}

pub fn validate_config(config: &GateConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let positive = [
        ("session.lifetime_secs", config.session.lifetime_secs),
        ("session.reap_interval_secs", config.session.reap_interval_secs),
        ("csrf.window_secs", config.csrf.window_secs),
        ("rate_limit.max_requests", u64::from(config.rate_limit.max_requests)),
        ("rate_limit.window_secs", config.rate_limit.window_secs),
        ("rate_limit.eviction_interval_secs", config.rate_limit.eviction_interval_secs),
        ("auth.verify_timeout_ms", config.auth.verify_timeout_ms),
        ("timeouts.request_secs", config.timeouts.request_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    let bounded = [
        ("session.lifetime_secs", config.session.lifetime_secs, MAX_LIFETIME),
        ("session.reap_interval_secs", config.session.reap_interval_secs, MAX_INTERVAL),
        ("rate_limit.eviction_interval_secs", config.rate_limit.eviction_interval_secs, MAX_INTERVAL),
    ];
    for (field, value, max) in bounded {
        if value > max.as_secs() {
            errors.push(ValidationError::TooLarge { field, max: max.as_secs() });
        }
    }

    if config.session.cookie_name.trim().is_empty() {
        errors.push(ValidationError::Empty { field: "session.cookie_name" });
    }
    if matches!(&config.csrf.secret, Some(secret) if secret.is_empty()) {
        errors.push(ValidationError::Empty { field: "csrf.secret" });
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if !config.auth.login_path.starts_with('/') {
        errors.push(ValidationError::InvalidLoginPath(config.auth.login_path.clone()));
    }
    if url::Url::parse(&config.auth.api_base_url).is_err() {
        errors.push(ValidationError::InvalidUrl(config.auth.api_base_url.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
