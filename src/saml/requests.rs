//! Outstanding AuthnRequests keyed by their RelayState correlation value.
//!
//! An entry is created when the browser is sent to the IdP and consumed
//! exactly once when the response comes back. Responses whose RelayState
//! has no entry are unsolicited.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// A request we sent to the IdP and have not seen answered yet.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// AuthnRequest ID; the response must carry it as InResponseTo.
    pub request_id: String,
    /// Local path to return the browser to after login.
    pub return_to: String,
    /// When this request stops being acceptable.
    pub expires_at: DateTime<Utc>,
}

impl PendingRequest {
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// In-memory tracker of pending requests.
pub struct PendingRequests {
    entries: RwLock<HashMap<String, PendingRequest>>,
    ttl_secs: u64,
    max_entries: usize,
}

impl PendingRequests {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl_secs,
            max_entries: 10000,
        }
    }

    /// Record a request under its correlation value.
    pub fn insert(&self, relay_state: String, request_id: String, return_to: String) -> Result<()> {
        let request = PendingRequest {
            request_id,
            return_to,
            expires_at: Utc::now() + Duration::seconds(self.ttl_secs as i64),
        };

        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("Pending request lock poisoned"))?;

        if entries.len() >= self.max_entries {
            entries.retain(|_, r| !r.is_expired());
            if entries.len() >= self.max_entries {
                evict_oldest(&mut entries);
            }
        }

        entries.insert(relay_state, request);
        Ok(())
    }

    /// Remove and return the request for a correlation value.
    ///
    /// Expired entries are removed but reported as absent.
    pub fn take(&self, relay_state: &str) -> Result<Option<PendingRequest>> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("Pending request lock poisoned"))?;

        match entries.remove(relay_state) {
            Some(request) if request.is_expired() => {
                debug!(request_id = %request.request_id, "Pending request expired");
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Drop all expired entries. Returns how many were removed.
    pub fn evict_expired(&self) -> Result<usize> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("Pending request lock poisoned"))?;
        let before = entries.len();
        entries.retain(|_, r| !r.is_expired());
        Ok(before - entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }
}

fn evict_oldest(entries: &mut HashMap<String, PendingRequest>) {
    if let Some(oldest) = entries
        .iter()
        .min_by_key(|(_, r)| r.expires_at)
        .map(|(k, _)| k.clone())
    {
        entries.remove(&oldest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_is_single_use() {
        let requests = PendingRequests::new(300);
        requests
            .insert("state-1".to_string(), "_id1".to_string(), "/profile".to_string())
            .unwrap();
        assert_eq!(requests.len(), 1);

        let taken = requests.take("state-1").unwrap().unwrap();
        assert_eq!(taken.request_id, "_id1");
        assert_eq!(taken.return_to, "/profile");

        assert!(requests.take("state-1").unwrap().is_none());
        assert_eq!(requests.len(), 0);
    }

    #[test]
    fn test_unknown_state() {
        let requests = PendingRequests::new(300);
        assert!(requests.take("never-issued").unwrap().is_none());
    }

    #[test]
    fn test_expired_request_is_absent() {
        let requests = PendingRequests::new(0);
        requests
            .insert("state-1".to_string(), "_id1".to_string(), "/".to_string())
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(requests.take("state-1").unwrap().is_none());
    }

    #[test]
    fn test_evict_expired() {
        let requests = PendingRequests::new(0);
        requests
            .insert("a".to_string(), "_a".to_string(), "/".to_string())
            .unwrap();
        requests
            .insert("b".to_string(), "_b".to_string(), "/".to_string())
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(requests.evict_expired().unwrap(), 2);
        assert_eq!(requests.len(), 0);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let mut requests = PendingRequests::new(300);
        requests.max_entries = 2;
        for i in 0..5 {
            requests
                .insert(format!("s{}", i), format!("_id{}", i), "/".to_string())
                .unwrap();
        }
        assert_eq!(requests.len(), 2);
    }
}
