//! Session lifecycle subsystem.
//!
//! # Data Flow
//! ```text
//! Cookie header
//!     → cookie.rs (extract id)
//!     → manager.rs (load or create via store.rs)
//!     → request extensions (Session)
//!     → handlers mutate and save through manager.rs
//!     → cookie.rs (Set-Cookie with remaining Max-Age)
//!
//! Background:
//!     reaper.rs sweeps expired records every interval
//! ```
//!
//! # Design Decisions
//! - Expired, deleted and unknown sessions look the same to callers
//! - Clearing keeps the identifier unless the clear policy evicts
//! - No persistence; a restart signs everyone out

pub mod cookie;
pub mod manager;
pub mod model;
pub mod reaper;
pub mod store;

pub use cookie::{session_id_from, CookiePolicy};
pub use manager::{PersistError, SessionManager, SessionOrigin};
pub use model::{Flash, FlashLevel, LoginGrant, Session, SessionAttributes, SessionId};
pub use reaper::SessionReaper;
pub use store::{SessionError, SessionStore};
