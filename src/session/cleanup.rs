//! Background session cleanup task.
//!
//! Periodically evicts expired sessions, spent assertion records and stale
//! pending AuthnRequests.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

use super::store::SessionStore;
use crate::saml::PendingRequests;

/// Default cleanup interval in seconds.
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 300; // 5 minutes

/// Spawn a background task that periodically cleans up expired state.
///
/// Returns a `JoinHandle` that can be used to abort the task.
pub fn spawn_cleanup_task(
    session_store: Arc<dyn SessionStore>,
    pending: Arc<PendingRequests>,
    cleanup_interval_secs: u64,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(cleanup_interval_secs.max(1)));

        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            ticker.tick().await;

            match session_store.evict_expired() {
                Ok(count) if count > 0 => {
                    info!(evicted = count, "Session cleanup completed");
                }
                Ok(_) => debug!("Session cleanup: no expired sessions"),
                Err(e) => warn!(error = %e, "Session cleanup failed"),
            }

            match pending.evict_expired() {
                Ok(count) if count > 0 => {
                    debug!(evicted = count, "Expired pending AuthnRequests removed");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Pending request cleanup failed"),
            }

            match session_store.session_count() {
                Ok(count) => {
                    debug!(
                        active_sessions = count,
                        pending_requests = pending.len(),
                        "Session store status"
                    );
                }
                Err(e) => debug!(error = %e, "Failed to get session count"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saml::IdentityAssertion;
    use crate::session::store::MemorySessionStore;
    use crate::session::types::Session;

    #[tokio::test]
    async fn test_cleanup_task_evicts_expired() {
        let store = Arc::new(MemorySessionStore::new());
        let pending = Arc::new(PendingRequests::new(0));

        store
            .create(
                Session::new(
                    IdentityAssertion::for_tests("live@example.com", "valid-assertion"),
                    3600,
                ),
                chrono::Utc::now(),
            )
            .unwrap();
        let mut expired = Session::new(
            IdentityAssertion::for_tests("gone@example.com", "expired-assertion"),
            3600,
        );
        expired.expires_at = chrono::Utc::now() - chrono::Duration::seconds(10);
        store.create(expired, chrono::Utc::now()).unwrap();
        pending
            .insert("state".to_string(), "_id".to_string(), "/".to_string())
            .unwrap();

        assert_eq!(store.session_count().unwrap(), 2);

        // Spawn cleanup with very short interval for testing
        let handle = spawn_cleanup_task(store.clone(), Arc::clone(&pending), 1);

        // Wait for at least one cleanup cycle
        tokio::time::sleep(Duration::from_millis(1500)).await;
        handle.abort();

        assert_eq!(store.session_count().unwrap(), 1, "Valid session should not be cleaned up");
        assert_eq!(pending.len(), 0);
    }
}
