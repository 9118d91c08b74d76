//! Sliding-window rate limiting middleware.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::config::validation::MAX_INTERVAL;
use crate::config::RateLimitConfig;
use crate::error::SecurityError;
use crate::http::request::{client_key, is_fragment_request};
use crate::observability::metrics;

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { retry_after: Duration },
}

/// Per-client sliding-window limiter.
///
/// Each key keeps the instants of its admitted requests inside the trailing
/// window. Updates to one key happen under that key's shard lock, so
/// concurrent requests from the same client are linearized.
pub struct RateLimiter {
    entries: DashMap<String, VecDeque<Instant>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            max_requests: max_requests as usize,
            window,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_requests, config.window())
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit one request for `key` if it is under quota.
    pub fn admit(&self, key: &str) -> Admission {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_default();
        let stamps = entry.value_mut();

        while stamps
            .front()
            .is_some_and(|t| now.saturating_duration_since(*t) >= self.window)
        {
            stamps.pop_front();
        }

        if stamps.len() < self.max_requests {
            stamps.push_back(now);
            Admission::Allowed
        } else {
            Admission::Denied {
                retry_after: self.window,
            }
        }
    }

    /// Drop keys with no admissions inside the window.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, stamps| {
            let active = stamps
                .back()
                .is_some_and(|t| now.saturating_duration_since(*t) < self.window);
            if !active {
                removed += 1;
            }
            active
        });
        removed
    }

    /// Number of tracked client keys.
    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}

/// Background task that evicts idle limiter keys.
pub struct RateLimitEvictor {
    limiter: Arc<RateLimiter>,
    interval: Duration,
}

impl RateLimitEvictor {
    /// `interval` is clamped to between one second and [`MAX_INTERVAL`].
    pub fn new(limiter: Arc<RateLimiter>, interval: Duration) -> Self {
        Self {
            limiter,
            interval: interval.clamp(Duration::from_secs(1), MAX_INTERVAL),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Rate limit evictor starting");

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.limiter.evict_idle();
                    if removed > 0 {
                        tracing::debug!(removed, tracked = self.limiter.tracked_keys(), "Evicted idle rate limit keys");
                    }
                    metrics::record_rate_limit_evicted(removed);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rate limit evictor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

/// State for the rate limiting middleware.
#[derive(Clone)]
pub struct RateLimiterState {
    pub limiter: Arc<RateLimiter>,
    pub enabled: bool,
}

/// Middleware function for per-client rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<RateLimiterState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.enabled {
        return next.run(request).await;
    }

    let key = client_key(&request);
    match state.limiter.admit(&key) {
        Admission::Allowed => next.run(request).await,
        Admission::Denied { retry_after } => SecurityError::RateLimited { retry_after }.reject(
            &key,
            request.uri().path(),
            is_fragment_request(request.headers()),
        ),
    }
}
