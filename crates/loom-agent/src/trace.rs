//! Event/Trace Fabric (spec §4.12): synchronous in-process dispatch to
//! subscribers plus async persistence to the session store.
//!
//! Generalizes the teacher's `ConsciousnessLoop` output stream
//! (`agenticlaw-agent/src/queue.rs`'s `OutputEvent` enum fanned out over
//! a single `broadcast::Sender`) from one output stream into a
//! per-[`TraceKind`] subscriber table plus a wildcard tier, and adds the
//! bounded [`TraceFabric::stream_trace`] read API the teacher never
//! needed since it only ever streamed live.

use loom_core::types::{SessionKey, TraceEvent, TraceKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::store::SessionStore;

pub trait TraceSubscriber: Send + Sync {
    fn on_event(&self, event: &TraceEvent);
}

struct Subscription {
    kind: Option<TraceKind>,
    subscriber: Arc<dyn TraceSubscriber>,
}

/// Emits and persists trace events for every session, dispatching to
/// per-kind and wildcard subscribers synchronously before handing the
/// event to the store (spec invariant v: "trace writes never block tool
/// execution" — persistence failures are logged, never propagated to
/// the caller driving the turn).
pub struct TraceFabric {
    store: Arc<SessionStore>,
    subscriptions: RwLock<Vec<Subscription>>,
    sequence: AtomicU64,
}

impl TraceFabric {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store, subscriptions: RwLock::new(Vec::new()), sequence: AtomicU64::new(0) }
    }

    /// Subscribe to a single kind. Copy-on-read: readers never block a
    /// concurrent `subscribe`/`emit`.
    pub fn subscribe(&self, kind: TraceKind, subscriber: Arc<dyn TraceSubscriber>) {
        self.subscriptions.write().unwrap().push(Subscription { kind: Some(kind), subscriber });
    }

    /// Subscribe to every kind.
    pub fn subscribe_all(&self, subscriber: Arc<dyn TraceSubscriber>) {
        self.subscriptions.write().unwrap().push(Subscription { kind: None, subscriber });
    }

    /// Build, dispatch, and persist a trace event. Sequence numbers are
    /// monotonic per fabric instance (one per process), matching the
    /// "ordered by monotonic local sequence" data-model invariant.
    pub fn emit(&self, session_id: &SessionKey, kind: TraceKind, payload: serde_json::Value) -> TraceEvent {
        let event = TraceEvent {
            session_id: session_id.clone(),
            trace_id: Uuid::new_v4(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
            kind,
            timestamp: chrono::Utc::now(),
            payload,
        };

        let subs = self.subscriptions.read().unwrap().iter().filter(|s| matches!(s.kind, None) || s.kind == Some(kind)).map(|s| s.subscriber.clone()).collect::<Vec<_>>();
        for sub in subs {
            let event_ref = &event;
            // One subscriber's panic must not abort emit for the rest,
            // nor for the persistence step that follows.
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| sub.on_event(event_ref)));
            if result.is_err() {
                tracing::error!(session = session_id.as_str(), ?kind, "trace subscriber panicked");
            }
        }

        if let Err(e) = self.store.append_trace_event(session_id, &event) {
            tracing::warn!(session = session_id.as_str(), error = %e, "trace persistence failed");
        }
        event
    }

    /// Bounded read: walks trace events for `session` from the start,
    /// stopping once either cap is hit. Reports which cap (if any) cut
    /// the stream short.
    pub fn stream_trace(&self, session: &SessionKey, max_events: usize, max_bytes: usize) -> Result<TraceSlice, loom_core::error::LoomError> {
        let all = self.store.read_trace_events(session)?;
        let mut returned = Vec::new();
        let mut bytes = 0usize;
        let mut cut_by = None;

        for event in all.iter() {
            if returned.len() >= max_events {
                cut_by = Some(CutBy::MaxEvents);
                break;
            }
            let size = serde_json::to_vec(event).map(|v| v.len()).unwrap_or(0);
            if bytes + size > max_bytes && !returned.is_empty() {
                cut_by = Some(CutBy::MaxBytes);
                break;
            }
            bytes += size;
            returned.push(event.clone());
        }

        Ok(TraceSlice { truncated: cut_by.is_some(), cut_by, returned_bytes: bytes, returned_events: returned })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CutBy {
    MaxEvents,
    MaxBytes,
}

pub struct TraceSlice {
    pub truncated: bool,
    pub cut_by: Option<CutBy>,
    pub returned_events: Vec<TraceEvent>,
    pub returned_bytes: usize,
}
