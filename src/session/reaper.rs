//! Periodic removal of expired sessions.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::config::validation::MAX_INTERVAL;
use crate::observability::metrics;
use crate::session::store::SessionStore;

pub struct SessionReaper {
    store: SessionStore,
    interval: Duration,
}

impl SessionReaper {
    /// `interval` is clamped to between one second and [`MAX_INTERVAL`].
    pub fn new(store: SessionStore, interval: Duration) -> Self {
        Self {
            store,
            interval: interval.clamp(Duration::from_secs(1), MAX_INTERVAL),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Session reaper starting");

        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Session reaper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn sweep(&self) {
        let removed = self.store.reap();
        if removed > 0 {
            tracing::info!(removed, remaining = self.store.len(), "Reaped expired sessions");
        } else {
            tracing::debug!(remaining = self.store.len(), "Reaper found no expired sessions");
        }
        metrics::record_sessions_reaped(removed);
        metrics::record_active_sessions(self.store.len());
    }
}
