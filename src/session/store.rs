//! Session storage.
//!
//! [`SessionStore`] is the seam the controller talks to; the in-memory
//! [`MemorySessionStore`] is the default backend. Stores also remember which
//! assertion IDs already produced a session so a captured response cannot be
//! replayed.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;

use super::types::{Session, SessionId};

/// Returned by [`SessionStore::create`] when the session's assertion was
/// already used.
#[derive(Debug, Error)]
#[error("SAML assertion replay detected: {0}")]
pub struct AssertionReplayed(pub String);

/// Server-side session storage.
pub trait SessionStore: Send + Sync {
    /// Store a new session. Fails with [`AssertionReplayed`] if its assertion
    /// was already used.
    ///
    /// The assertion ID is remembered until the session expires or until
    /// `assertion_valid_until`, whichever is later.
    fn create(&self, session: Session, assertion_valid_until: DateTime<Utc>) -> Result<SessionId>;

    /// Get a live session by ID, updating its last access time.
    ///
    /// Expired or destroyed sessions are `None`.
    fn lookup(&self, id: SessionId) -> Result<Option<Session>>;

    /// Remove a session. Returns whether one existed; absent IDs are a no-op.
    fn destroy(&self, id: SessionId) -> Result<bool>;

    /// Check if an assertion ID has been used (replay prevention).
    fn is_assertion_used(&self, assertion_id: &str) -> Result<bool>;

    /// Evict expired sessions and assertion records. Returns sessions evicted.
    fn evict_expired(&self) -> Result<usize>;

    /// Number of stored sessions.
    fn session_count(&self) -> Result<usize>;
}

/// In-memory session store.
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,

    /// Used assertion IDs and how long to remember them.
    assertions: RwLock<HashMap<String, DateTime<Utc>>>,

    /// Maximum number of sessions to keep.
    max_sessions: usize,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::with_capacity(100_000)
    }

    pub fn with_capacity(max_sessions: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            assertions: RwLock::new(HashMap::new()),
            max_sessions,
        }
    }

    /// Evict least recently accessed session.
    fn evict_lru(sessions: &mut HashMap<SessionId, Session>) {
        if let Some(oldest_id) = sessions
            .iter()
            .min_by_key(|(_, s)| s.last_accessed)
            .map(|(id, _)| *id)
        {
            debug!(session_id = %oldest_id, "Evicting least recently used session");
            sessions.remove(&oldest_id);
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, session: Session, assertion_valid_until: DateTime<Utc>) -> Result<SessionId> {
        let id = session.id;
        let assertion_id = session.identity.assertion_id().to_string();

        // Check and mark under one lock so two racing requests cannot both pass.
        {
            let mut assertions = self
                .assertions
                .write()
                .map_err(|_| anyhow!("Assertion lock poisoned"))?;
            if assertions.contains_key(&assertion_id) {
                bail!(AssertionReplayed(assertion_id));
            }
            assertions.insert(assertion_id, session.expires_at.max(assertion_valid_until));
        }

        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow!("Session lock poisoned"))?;
        if sessions.len() >= self.max_sessions {
            sessions.retain(|_, s| !s.is_expired());
            if sessions.len() >= self.max_sessions {
                Self::evict_lru(&mut sessions);
            }
        }
        sessions.insert(id, session);

        Ok(id)
    }

    fn lookup(&self, id: SessionId) -> Result<Option<Session>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow!("Session lock poisoned"))?;

        match sessions.get_mut(&id) {
            Some(session) if session.is_expired() => {
                sessions.remove(&id);
                Ok(None)
            }
            Some(session) => {
                session.touch();
                Ok(Some(session.clone()))
            }
            None => Ok(None),
        }
    }

    fn destroy(&self, id: SessionId) -> Result<bool> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| anyhow!("Session lock poisoned"))?;
        Ok(sessions.remove(&id).is_some())
    }

    fn is_assertion_used(&self, assertion_id: &str) -> Result<bool> {
        let assertions = self
            .assertions
            .read()
            .map_err(|_| anyhow!("Assertion lock poisoned"))?;
        Ok(assertions.contains_key(assertion_id))
    }

    fn evict_expired(&self) -> Result<usize> {
        let now = Utc::now();

        let evicted = {
            let mut sessions = self
                .sessions
                .write()
                .map_err(|_| anyhow!("Session lock poisoned"))?;
            let before = sessions.len();
            sessions.retain(|_, session| !session.is_expired());
            before - sessions.len()
        };

        let mut assertions = self
            .assertions
            .write()
            .map_err(|_| anyhow!("Assertion lock poisoned"))?;
        assertions.retain(|_, expires_at| now <= *expires_at);

        Ok(evicted)
    }

    fn session_count(&self) -> Result<usize> {
        let sessions = self
            .sessions
            .read()
            .map_err(|_| anyhow!("Session lock poisoned"))?;
        Ok(sessions.len())
    }
}
