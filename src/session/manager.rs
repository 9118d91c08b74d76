//! Request-facing session operations.

use axum::http::header::InvalidHeaderValue;
use axum::http::HeaderValue;
use std::time::Duration;
use thiserror::Error;

use crate::config::{ClearPolicy, SessionConfig};
use crate::session::cookie::CookiePolicy;
use crate::session::model::{LoginGrant, Session, SessionId};
use crate::session::store::{SessionError, SessionStore};

/// Failure while persisting a session and issuing its cookie.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Store(#[from] SessionError),
    #[error("cookie could not be encoded: {0}")]
    Cookie(#[from] InvalidHeaderValue),
}

/// How the session attached to a request came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    /// The cookie named a live session.
    Existing,
    /// No usable cookie; a fresh session was started.
    Created,
    /// The cookie named a session that had run out; a fresh one replaced it.
    Replaced,
}

impl SessionOrigin {
    /// True when a new record was stored and its cookie must be sent.
    pub fn is_new(self) -> bool {
        !matches!(self, Self::Existing)
    }
}

/// Store, cookie policy and clear policy composed for request handling.
#[derive(Clone)]
pub struct SessionManager {
    store: SessionStore,
    cookies: CookiePolicy,
    lifetime: Duration,
    clear_policy: ClearPolicy,
}

impl SessionManager {
    pub fn new(
        store: SessionStore,
        cookies: CookiePolicy,
        lifetime: Duration,
        clear_policy: ClearPolicy,
    ) -> Self {
        Self {
            store,
            cookies,
            lifetime,
            clear_policy,
        }
    }

    pub fn from_config(store: SessionStore, config: &SessionConfig) -> Self {
        Self::new(
            store,
            CookiePolicy::from_config(config),
            config.lifetime(),
            config.clear_policy,
        )
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn cookies(&self) -> &CookiePolicy {
        &self.cookies
    }

    /// Resolve the session named by the client cookie, or start a new one.
    ///
    /// An expired record is only reported as [`SessionOrigin::Replaced`]
    /// while it is still stored; once reaped it reads as unknown.
    pub fn load_or_create(&self, cookie_value: Option<&str>) -> (Session, SessionOrigin) {
        if let Some(id) = cookie_value.and_then(SessionId::parse) {
            match self.store.lookup(id.as_str()) {
                Ok(session) => return (session, SessionOrigin::Existing),
                Err(SessionError::Expired) => {
                    tracing::debug!(session = ?id, "Session expired, starting a new one");
                    return (self.store.create(self.lifetime), SessionOrigin::Replaced);
                }
                Err(SessionError::NotFound) => {
                    tracing::debug!(session = ?id, "Session not found, starting a new one");
                }
            }
        } else if cookie_value.is_some() {
            tracing::debug!("Malformed session cookie ignored");
        }

        (self.store.create(self.lifetime), SessionOrigin::Created)
    }

    /// Persist the session and return its `Set-Cookie` value.
    pub fn save(&self, session: &Session) -> Result<HeaderValue, PersistError> {
        self.store.save(session)?;
        Ok(self.cookies.issue(session)?)
    }

    /// Promote the session to an authenticated one with fresh credentials.
    pub fn login(&self, session: &mut Session, grant: LoginGrant) -> Result<HeaderValue, PersistError> {
        session.login(grant);
        self.save(session)
    }

    /// Strip identity from the session according to the clear policy.
    pub fn clear(&self, session: &mut Session) -> Result<HeaderValue, PersistError> {
        session.clear();
        match self.clear_policy {
            ClearPolicy::Anonymize => match self.store.save(session) {
                Ok(()) => Ok(self.cookies.issue(session)?),
                // Already gone; nothing left to anonymize.
                Err(_) => Ok(self.cookies.removal()?),
            },
            ClearPolicy::Evict => {
                self.store.delete(session.id().as_str());
                Ok(self.cookies.removal()?)
            }
        }
    }
}
