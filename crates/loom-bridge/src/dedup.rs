//! Invocation-id-keyed duplicate-invoke suppression (spec §3/§4.9).
//!
//! A client that retries an in-flight invoke after a dropped ack sends
//! the same `(session_id, invocation_id)` pair again. The second frame
//! must not run the tool twice — it must replay the exact response
//! envelope the first invoke produced. An invocation id reused with
//! different arguments is a caller bug, not a retry, and is rejected
//! with `E_ARGS` rather than silently replayed or silently re-run.
//!
//! No teacher analog — grounded structurally on the `DashMap`-backed
//! registries used throughout the teacher (`tools/registry.rs`,
//! `session.rs`).

use dashmap::DashMap;
use loom_core::error::ErrorCode;
use std::time::{Duration, Instant};

const MAX_FINGERPRINT_BYTES: usize = 4096;

/// The response an invoke produced, cached verbatim so a replay can
/// return the identical envelope (spec §8#4: "both clients receive the
/// same result envelope").
#[derive(Clone, Debug)]
pub enum Outcome {
    Success(serde_json::Value),
    Failure(ErrorCode, String),
}

struct CachedEntry {
    fingerprint: String,
    outcome: Outcome,
    seen_at: Instant,
}

/// What a lookup against a prior `(session_id, invocation_id)` yields.
pub enum Lookup {
    /// No live entry — proceed with a real invoke.
    Fresh,
    /// Same invocation id, same fingerprint, still within the TTL —
    /// replay this outcome rather than invoking again.
    Replay(Outcome),
    /// Same invocation id, but the arguments changed — the caller
    /// reused an id instead of retrying the original call.
    Mismatch,
}

pub struct FingerprintCache {
    entries: DashMap<(String, String), CachedEntry>,
    ttl: Duration,
    max_entries: usize,
}

impl FingerprintCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self { entries: DashMap::new(), ttl, max_entries }
    }

    pub fn fingerprint(tool: &str, args: &serde_json::Value, session_id: Option<&str>) -> String {
        let raw = format!("{}|{}|{}", tool, args, session_id.unwrap_or(""));
        if raw.len() <= MAX_FINGERPRINT_BYTES {
            raw
        } else {
            raw[..MAX_FINGERPRINT_BYTES].to_string()
        }
    }

    /// Look up a prior response keyed by `(session_id, invocation_id)`.
    pub fn lookup(&self, session_id: &str, invocation_id: &str, fingerprint: &str) -> Lookup {
        self.evict_expired();
        let key = (session_id.to_string(), invocation_id.to_string());
        match self.entries.get(&key) {
            Some(entry) if Instant::now().duration_since(entry.seen_at) < self.ttl => {
                if entry.fingerprint == fingerprint {
                    Lookup::Replay(entry.outcome.clone())
                } else {
                    Lookup::Mismatch
                }
            }
            _ => Lookup::Fresh,
        }
    }

    /// Record the outcome of a fresh invoke under its `(session_id,
    /// invocation_id)` key so a retry can replay it.
    pub fn record(&self, session_id: &str, invocation_id: &str, fingerprint: &str, outcome: Outcome) {
        if self.entries.len() >= self.max_entries {
            self.evict_oldest();
        }
        let key = (session_id.to_string(), invocation_id.to_string());
        self.entries.insert(key, CachedEntry { fingerprint: fingerprint.to_string(), outcome, seen_at: Instant::now() });
    }

    fn evict_expired(&self) {
        let ttl = self.ttl;
        let now = Instant::now();
        self.entries.retain(|_, entry| now.duration_since(entry.seen_at) < ttl);
    }

    fn evict_oldest(&self) {
        if let Some(oldest_key) = self.entries.iter().min_by_key(|e| e.value().seen_at).map(|e| e.key().clone()) {
            self.entries.remove(&oldest_key);
        }
    }
}
