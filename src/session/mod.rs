//! Session management for SAML authentication.
//!
//! In-memory session storage behind the [`SessionStore`] trait, signed cookie
//! binding and background cleanup.

pub mod cleanup;
pub mod cookie;
pub mod store;
pub mod types;

pub use cleanup::{spawn_cleanup_task, DEFAULT_CLEANUP_INTERVAL_SECS};
pub use cookie::{CookieSettings, SessionCookie};
pub use store::{AssertionReplayed, MemorySessionStore, SessionStore};
pub use types::{Session, SessionId};
