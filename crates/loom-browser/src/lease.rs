//! Tab-lease table (spec §4.8, §5): exclusive mutation token scoped to a
//! browser tab with an expiry. Mutating actions against a tab held by
//! another session's lease fail `E_LEASE` regardless of priority.
//!
//! No teacher analog; grounded structurally on the `DashMap`-backed
//! registries the teacher uses throughout (`session.rs`'s
//! `SessionRegistry`, `tools/registry.rs`'s dispatch table).

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use loom_core::error::{ErrorCode, LoomError};

#[derive(Clone, Debug)]
pub struct Lease {
    pub owner: String,
    pub tab_id: String,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

pub struct LeaseTable {
    leases: DashMap<String, Lease>,
}

impl LeaseTable {
    pub fn new() -> Self {
        Self { leases: DashMap::new() }
    }

    /// Acquire or renew a lease. Fails `E_LEASE` if another owner holds
    /// an unexpired lease on this tab.
    pub fn acquire(&self, tab_id: &str, owner: &str, ttl: Duration) -> Result<Lease, LoomError> {
        let now = Utc::now();
        if let Some(existing) = self.leases.get(tab_id) {
            if existing.owner != owner && !existing.is_expired(now) {
                return Err(LoomError::coded(
                    ErrorCode::ELease,
                    format!("tab '{}' is locked by another session", tab_id),
                ));
            }
        }
        let lease = Lease {
            owner: owner.to_string(),
            tab_id: tab_id.to_string(),
            expires_at: now + ttl,
        };
        self.leases.insert(tab_id.to_string(), lease.clone());
        Ok(lease)
    }

    pub fn heartbeat(&self, tab_id: &str, owner: &str, ttl: Duration) -> Result<Lease, LoomError> {
        self.acquire(tab_id, owner, ttl)
    }

    pub fn release(&self, tab_id: &str, owner: &str) -> Result<(), LoomError> {
        if let Some(existing) = self.leases.get(tab_id) {
            if existing.owner != owner {
                return Err(LoomError::coded(
                    ErrorCode::ELease,
                    "cannot release a lease owned by another session",
                ));
            }
        }
        self.leases.remove(tab_id);
        Ok(())
    }

    /// Required before any mutating action: the presented owner must
    /// match the tab's active, unexpired lease.
    pub fn check(&self, tab_id: &str, owner: &str) -> Result<(), LoomError> {
        let now = Utc::now();
        match self.leases.get(tab_id) {
            Some(lease) if lease.owner == owner && !lease.is_expired(now) => Ok(()),
            _ => Err(LoomError::coded(
                ErrorCode::ELease,
                format!("no valid lease held by '{}' on tab '{}'", owner, tab_id),
            )),
        }
    }

    pub fn status(&self, tab_id: &str) -> Option<Lease> {
        self.leases.get(tab_id).map(|l| l.clone())
    }
}

impl Default for LeaseTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_acquire_succeeds() {
        let table = LeaseTable::new();
        assert!(table.acquire("tab-1", "session-a", Duration::seconds(30)).is_ok());
    }

    #[test]
    fn second_session_cannot_acquire_an_unexpired_lease() {
        let table = LeaseTable::new();
        table.acquire("tab-1", "session-a", Duration::seconds(30)).unwrap();
        let err = table.acquire("tab-1", "session-b", Duration::seconds(30)).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ELease));
    }

    #[test]
    fn owner_can_renew_via_heartbeat() {
        let table = LeaseTable::new();
        table.acquire("tab-1", "session-a", Duration::seconds(30)).unwrap();
        assert!(table.heartbeat("tab-1", "session-a", Duration::seconds(30)).is_ok());
    }

    #[test]
    fn mismatched_owner_fails_check_with_e_lease() {
        let table = LeaseTable::new();
        table.acquire("tab-1", "session-a", Duration::seconds(30)).unwrap();
        let err = table.check("tab-1", "session-b").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ELease));
    }

    #[test]
    fn expired_lease_can_be_acquired_by_a_new_owner() {
        let table = LeaseTable::new();
        table.acquire("tab-1", "session-a", Duration::milliseconds(-1)).unwrap();
        assert!(table.acquire("tab-1", "session-b", Duration::seconds(30)).is_ok());
    }

    #[test]
    fn release_by_non_owner_is_rejected() {
        let table = LeaseTable::new();
        table.acquire("tab-1", "session-a", Duration::seconds(30)).unwrap();
        let err = table.release("tab-1", "session-b").unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::ELease));
    }
}
