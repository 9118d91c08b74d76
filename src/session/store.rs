//! In-memory session storage.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::observability::metrics;
use crate::session::model::{Session, SessionId};

/// Store-level failures. Callers treat both variants as "no session".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,
    #[error("session expired")]
    Expired,
}

/// A thread-safe store of live sessions.
///
/// Backed by a sharded map, so every operation locks only the shard owning
/// the key and readers of different shards never contend. Each public method
/// is a single critical section with no I/O inside it.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<DashMap<SessionId, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and insert a new anonymous session.
    pub fn create(&self, lifetime: Duration) -> Session {
        loop {
            let session = Session::new(SessionId::generate(), lifetime);
            // A collision on 384 random bits does not happen in practice,
            // but an occupied slot must never be overwritten.
            if let Entry::Vacant(slot) = self.inner.entry(session.id().clone()) {
                slot.insert(session.clone());
                metrics::record_session_created();
                return session;
            }
        }
    }

    /// Fetch a live session. Expired records are removed on the way out.
    pub fn lookup(&self, id: &str) -> Result<Session, SessionError> {
        let now = Instant::now();
        let session = self
            .inner
            .get(id)
            .map(|r| r.value().clone())
            .ok_or(SessionError::NotFound)?;

        if session.is_expired_at(now) {
            self.inner.remove_if(id, |_, s| s.is_expired_at(now));
            return Err(SessionError::Expired);
        }
        Ok(session)
    }

    /// Replace the stored record carrying the same identifier.
    ///
    /// A record that was deleted or reaped in the meantime is not recreated.
    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        match self.inner.get_mut(session.id().as_str()) {
            Some(mut entry) => {
                *entry.value_mut() = session.clone();
                Ok(())
            }
            None => Err(SessionError::NotFound),
        }
    }

    /// Remove a session. Removing an absent id is a no-op.
    pub fn delete(&self, id: &str) {
        self.inner.remove(id);
    }

    /// Remove every expired session, returning how many were dropped.
    pub fn reap(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.inner.retain(|_, session| {
            let keep = !session.is_expired_at(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Number of stored records, expired-but-unreaped included.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.inner.contains_key(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::LoginGrant;
    use std::collections::HashSet;

    const LIFETIME: Duration = Duration::from_secs(30 * 60);

    #[tokio::test]
    async fn test_create_then_lookup() {
        let store = SessionStore::new();
        let session = store.create(LIFETIME);

        let found = store.lookup(session.id().as_str()).unwrap();
        assert_eq!(found.id(), session.id());
        assert_eq!(found.expires_at(), session.expires_at());
        assert!(found.user_id.is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_unknown() {
        let store = SessionStore::new();
        assert_eq!(store.lookup("nope").unwrap_err(), SessionError::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_is_never_returned() {
        let store = SessionStore::new();
        let session = store.create(Duration::from_secs(10));
        let id = session.id().as_str().to_string();

        tokio::time::advance(Duration::from_secs(10)).await;

        assert_eq!(store.lookup(&id).unwrap_err(), SessionError::Expired);
        assert!(!store.contains(&id));
        assert_eq!(store.lookup(&id).unwrap_err(), SessionError::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reap_removes_only_expired() {
        let store = SessionStore::new();
        let short = store.create(Duration::from_secs(5));
        let long = store.create(LIFETIME);

        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(store.reap(), 1);
        assert!(!store.contains(short.id().as_str()));
        assert!(store.lookup(long.id().as_str()).is_ok());
        assert_eq!(store.reap(), 0);
    }

    #[tokio::test]
    async fn test_save_updates_in_place() {
        let store = SessionStore::new();
        let mut session = store.create(LIFETIME);
        session.login(LoginGrant {
            user_id: "u1".into(),
            access_token: "a".into(),
            refresh_token: "r".into(),
            username: None,
            email: None,
        });
        store.save(&session).unwrap();

        let found = store.lookup(session.id().as_str()).unwrap();
        assert_eq!(found.user_id.as_deref(), Some("u1"));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_session_stays_until_expiry() {
        let store = SessionStore::new();
        let mut session = store.create(Duration::from_secs(60));
        session.user_id = Some("u1".into());
        session.access_token = Some("a".into());
        store.save(&session).unwrap();

        session.clear();
        store.save(&session).unwrap();

        let found = store.lookup(session.id().as_str()).unwrap();
        assert_eq!(found.id(), session.id());
        assert!(!found.is_authenticated());
        assert!(found.attributes.is_empty());

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(store.lookup(session.id().as_str()).is_err());
    }

    #[tokio::test]
    async fn test_save_does_not_resurrect() {
        let store = SessionStore::new();
        let session = store.create(LIFETIME);
        store.delete(session.id().as_str());
        store.delete(session.id().as_str());

        assert_eq!(store.save(&session).unwrap_err(), SessionError::NotFound);
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_create_yields_unique_ids() {
        let store = SessionStore::new();
        let tasks: Vec<_> = (0..200)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.create(LIFETIME).id().clone() })
            })
            .collect();

        let mut ids = HashSet::new();
        for task in tasks {
            ids.insert(task.await.unwrap());
        }

        assert_eq!(ids.len(), 200);
        assert_eq!(store.len(), 200);
        for id in &ids {
            assert!(store.lookup(id.as_str()).is_ok());
        }
    }
}
