//! Session records.

use chrono::{DateTime, Duration, Utc};
use std::fmt;

use crate::saml::IdentityAssertion;

const SESSION_ID_LEN: usize = 16;

/// Opaque session handle: 128 random bits, hex-encoded in cookies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId([u8; SESSION_ID_LEN]);

impl SessionId {
    pub fn generate() -> Self {
        Self(rand::random())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the hex form. Anything but exactly 32 hex digits is `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let mut bytes = [0u8; SESSION_ID_LEN];
        hex::decode_to_slice(s, &mut bytes).ok()?;
        Some(Self(bytes))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Server-side login state for one browser.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    /// Identity established at login (owned copy).
    pub identity: IdentityAssertion,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Bumped on every successful lookup.
    pub last_accessed: DateTime<Utc>,
}

impl Session {
    /// Fresh session for `identity`, valid for `ttl_secs`.
    pub fn new(identity: IdentityAssertion, ttl_secs: u64) -> Self {
        let created_at = Utc::now();
        let expires_at = i64::try_from(ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            id: SessionId::generate(),
            identity,
            created_at,
            expires_at,
            last_accessed: created_at,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }

    /// NameID of the logged-in user.
    pub fn user_id(&self) -> &str {
        self.identity.subject_id()
    }
}
