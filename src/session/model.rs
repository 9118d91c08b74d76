//! Session record and identifiers.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use std::borrow::Borrow;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Random bytes per identifier (384 bits).
const ID_BYTES: usize = 48;

/// Encoded identifier length for `ID_BYTES` of unpadded base64url.
const ID_LEN: usize = 64;

/// Shortest lifetime a session can be created with.
const MIN_LIFETIME: Duration = Duration::from_secs(1);

/// Longest lifetime a session can be created with (one year).
pub const MAX_LIFETIME: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Opaque, unguessable session identifier.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh identifier from the OS random source.
    pub fn generate() -> Self {
        let mut bytes = [0u8; ID_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Accept a client-supplied identifier only if it has the shape we issue.
    pub fn parse(value: &str) -> Option<Self> {
        let well_formed = value.len() == ID_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        well_formed.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SessionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Only a prefix is printed so identifiers never land in logs whole.
impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({}…)", &self.0[..self.0.len().min(8)])
    }
}

/// Severity of a one-shot flash message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A message shown once on the next rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flash {
    pub level: FlashLevel,
    pub message: String,
}

/// Typed attributes carried by a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionAttributes {
    /// Display name of the signed-in user.
    pub username: Option<String>,
    pub email: Option<String>,
    /// Path to continue to after signing in.
    pub return_to: Option<String>,
    pub flash: Option<Flash>,
}

impl SessionAttributes {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Fresh credentials obtained from a successful sign-in.
#[derive(Clone)]
pub struct LoginGrant {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub username: Option<String>,
    pub email: Option<String>,
}

/// Server-side session record.
#[derive(Clone)]
pub struct Session {
    id: SessionId,
    created_at: Instant,
    expires_at: Instant,
    pub user_id: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub attributes: SessionAttributes,
}

impl Session {
    /// Create an anonymous session that lives for `lifetime`, clamped to
    /// between one second and [`MAX_LIFETIME`].
    pub fn new(id: SessionId, lifetime: Duration) -> Self {
        let created_at = Instant::now();
        let lifetime = lifetime.clamp(MIN_LIFETIME, MAX_LIFETIME);
        let expires_at = created_at
            .checked_add(lifetime)
            .or_else(|| created_at.checked_add(MIN_LIFETIME))
            .unwrap_or(created_at);
        Self {
            id,
            created_at,
            expires_at,
            user_id: None,
            access_token: None,
            refresh_token: None,
            attributes: SessionAttributes::default(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.expires_at <= now
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Remaining lifetime, zero once expired.
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }

    /// True when the session carries both an identity and an access token.
    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some() && self.access_token.is_some()
    }

    /// Copy fresh credentials into this record, keeping its identifier.
    pub fn login(&mut self, grant: LoginGrant) {
        self.user_id = Some(grant.user_id);
        self.access_token = Some(grant.access_token);
        self.refresh_token = Some(grant.refresh_token);
        self.attributes.username = grant.username;
        self.attributes.email = grant.email;
    }

    /// Drop identity, tokens and attributes. Identifier and expiry are kept.
    pub fn clear(&mut self) {
        self.user_id = None;
        self.access_token = None;
        self.refresh_token = None;
        self.attributes = SessionAttributes::default();
    }

    /// Take the pending flash message, if any.
    pub fn take_flash(&mut self) -> Option<Flash> {
        self.attributes.flash.take()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("attributes", &self.attributes)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
