//! Session management (spec §4.2): a DAG of sessions, each a chain of
//! entries rooted either at genesis or a fork point in another session.
//!
//! Generalizes the teacher's `SessionRegistry`/`Session` pair
//! (`agenticlaw-agent/src/session.rs`) — a `DashMap`-backed registry
//! caching per-session state behind `RwLock`s — from a flat
//! `Vec<LlmMessage>` onto the branching `Entry`/`SessionMeta` model in
//! `loom_core::types`, with persistence delegated to [`crate::store::SessionStore`]
//! instead of the teacher's single `.ctx` file per session.

use crate::store::SessionStore;
use chrono::Utc;
use dashmap::DashMap;
use loom_core::error::{LoomError, Result};
use loom_core::types::{ConversationContext, Entry, EntryId, EntryRole, ForkOrigin, SessionKey, SessionMeta, SessionStatus};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// A single session's live leaf pointer and cached entry chain, cached
/// in front of the store the way the teacher's `Session` caches its
/// message vector in front of the `.ctx` file.
struct SessionState {
    meta: RwLock<SessionMeta>,
}

pub struct SessionManager {
    store: Arc<SessionStore>,
    cache: DashMap<SessionKey, Arc<SessionState>>,
}

impl SessionManager {
    pub fn new(workspace: impl AsRef<Path>) -> Result<Self> {
        let store = SessionStore::new(workspace);
        store.bootstrap()?;
        Ok(Self { store: Arc::new(store), cache: DashMap::new() })
    }

    pub fn with_store(store: Arc<SessionStore>) -> Self {
        Self { store, cache: DashMap::new() }
    }

    /// Create a new, empty session (genesis, no fork origin).
    pub fn create(&self, title: impl Into<String>) -> Result<SessionMeta> {
        let meta = SessionMeta {
            id: SessionKey::generate(),
            title: title.into(),
            created_at: Utc::now(),
            forked_from: None,
            shared_tab_hint: None,
            llm_route: None,
            leaf: None,
            status: SessionStatus::Idle,
        };
        self.store.write_meta(&meta)?;
        self.cache.insert(meta.id.clone(), Arc::new(SessionState { meta: RwLock::new(meta.clone()) }));
        info!(session = meta.id.as_str(), "session created");
        Ok(meta)
    }

    async fn state(&self, id: &SessionKey) -> Result<Arc<SessionState>> {
        if let Some(state) = self.cache.get(id) {
            return Ok(state.clone());
        }
        let meta = self
            .store
            .read_meta(id)?
            .ok_or_else(|| LoomError::SessionNotFound(id.as_str().to_string()))?;
        let state = Arc::new(SessionState { meta: RwLock::new(meta) });
        self.cache.insert(id.clone(), state.clone());
        Ok(state)
    }

    pub async fn meta(&self, id: &SessionKey) -> Result<SessionMeta> {
        Ok(self.state(id).await?.meta.read().await.clone())
    }

    pub async fn set_status(&self, id: &SessionKey, status: SessionStatus) -> Result<()> {
        let state = self.state(id).await?;
        let mut meta = state.meta.write().await;
        meta.status = status;
        self.store.write_meta(&meta)?;
        Ok(())
    }

    /// Append an entry to a session's live branch, advancing its leaf
    /// pointer. `parent_id` defaults to the current leaf when `None`.
    pub async fn append_entry(
        &self,
        id: &SessionKey,
        role: EntryRole,
        content: impl Into<String>,
        tool_calls: Vec<loom_core::types::ToolCallMeta>,
        tool_result: Option<loom_core::types::ToolResultMeta>,
    ) -> Result<Entry> {
        let state = self.state(id).await?;
        let mut meta = state.meta.write().await;
        let entry = Entry {
            id: EntryId::generate(),
            parent_id: meta.leaf.clone(),
            role,
            content: content.into(),
            tool_calls,
            tool_result,
            timestamp: Utc::now(),
        };
        self.store.append_entry(id, &entry)?;
        meta.leaf = Some(entry.id.clone());
        self.store.write_meta(&meta)?;
        Ok(entry)
    }

    /// Fork a new session rooted at `leaf_id` within `source`, per
    /// spec §4.2's "forked session" semantics (used both for explicit
    /// forking and for regenerate-on-historical-entry).
    pub async fn fork(&self, source: &SessionKey, leaf_id: &EntryId, title: impl Into<String>) -> Result<SessionMeta> {
        // Validate the fork point exists in the source branch.
        let source_entries = self.get_branch(source, Some(leaf_id.clone())).await?;
        if !source_entries.iter().any(|e| &e.id == leaf_id) {
            return Err(LoomError::coded(
                loom_core::error::ErrorCode::EArgs,
                format!("fork point {} not found in session {}", leaf_id.as_str(), source.as_str()),
            ));
        }
        let meta = SessionMeta {
            id: SessionKey::generate(),
            title: title.into(),
            created_at: Utc::now(),
            forked_from: Some(ForkOrigin { session_id: source.clone(), leaf_id: leaf_id.clone() }),
            shared_tab_hint: None,
            llm_route: None,
            leaf: Some(leaf_id.clone()),
            status: SessionStatus::Idle,
        };
        self.store.write_meta(&meta)?;
        self.cache.insert(meta.id.clone(), Arc::new(SessionState { meta: RwLock::new(meta.clone()) }));
        info!(session = meta.id.as_str(), forked_from = source.as_str(), "session forked");
        Ok(meta)
    }

    /// Walk a session's branch from `from` (or the current leaf) back
    /// to genesis, continuing into the fork origin at the boundary, and
    /// return entries in chronological order. Cycle-safe: a session
    /// graph with a fork cycle terminates rather than looping forever.
    pub async fn get_branch(&self, id: &SessionKey, from: Option<EntryId>) -> Result<Vec<Entry>> {
        let mut visited_sessions = std::collections::HashSet::new();
        let mut chain: Vec<Entry> = Vec::new();
        let mut current_session = id.clone();
        let mut cursor = match from {
            Some(leaf) => Some(leaf),
            None => self.meta(id).await?.leaf,
        };

        loop {
            if !visited_sessions.insert(current_session.clone()) {
                tracing::warn!(session = current_session.as_str(), "fork cycle detected, stopping branch walk");
                break;
            }
            let entries = self.store.read_all_entries(&current_session)?;
            let by_id: std::collections::HashMap<&EntryId, &Entry> = entries.iter().map(|e| (&e.id, e)).collect();

            let mut local_chain = Vec::new();
            let mut cur = cursor.clone();
            while let Some(eid) = cur {
                let Some(&entry) = by_id.get(&eid) else { break };
                local_chain.push(entry.clone());
                cur = entry.parent_id.clone();
            }
            local_chain.reverse();
            chain.splice(0..0, local_chain);

            let meta = self.meta(&current_session).await?;
            match meta.forked_from {
                Some(origin) => {
                    current_session = origin.session_id;
                    cursor = Some(origin.leaf_id);
                }
                None => break,
            }
        }
        Ok(chain)
    }

    /// Assemble the context an orchestrator turn needs: the branch's
    /// entries plus the latest compaction summary, if any, prepended as
    /// a `SystemSummary` entry (spec §4.2/§4.11 compaction handoff).
    pub async fn build_session_context(&self, id: &SessionKey, system_prompt: impl Into<String>) -> Result<ConversationContext> {
        let entries = self.get_branch(id, None).await?;
        let compaction_summary = entries
            .iter()
            .rev()
            .find(|e| e.role == EntryRole::SystemSummary)
            .cloned();
        Ok(ConversationContext { entries, compaction_summary, system_prompt: system_prompt.into() })
    }

    pub fn list(&self) -> Result<Vec<SessionKey>> {
        self.store.list_sessions()
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_workspace() -> std::path::PathBuf {
        let id = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos();
        std::env::temp_dir().join(format!("loom-session-test-{}-{}", std::process::id(), id))
    }

    #[tokio::test]
    async fn append_entry_advances_leaf_and_persists() {
        let ws = test_workspace();
        let mgr = SessionManager::new(&ws).unwrap();
        let meta = mgr.create("t").unwrap();
        let e1 = mgr.append_entry(&meta.id, EntryRole::User, "hi", vec![], None).await.unwrap();
        let e2 = mgr.append_entry(&meta.id, EntryRole::Assistant, "hello", vec![], None).await.unwrap();
        assert_eq!(e2.parent_id, Some(e1.id.clone()));
        let reread = mgr.meta(&meta.id).await.unwrap();
        assert_eq!(reread.leaf, Some(e2.id));
        let _ = std::fs::remove_dir_all(&ws);
    }

    #[tokio::test]
    async fn get_branch_returns_chronological_chain() {
        let ws = test_workspace();
        let mgr = SessionManager::new(&ws).unwrap();
        let meta = mgr.create("t").unwrap();
        mgr.append_entry(&meta.id, EntryRole::User, "a", vec![], None).await.unwrap();
        mgr.append_entry(&meta.id, EntryRole::Assistant, "b", vec![], None).await.unwrap();
        mgr.append_entry(&meta.id, EntryRole::User, "c", vec![], None).await.unwrap();
        let branch = mgr.get_branch(&meta.id, None).await.unwrap();
        let contents: Vec<&str> = branch.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
        let _ = std::fs::remove_dir_all(&ws);
    }

    #[tokio::test]
    async fn fork_continues_into_source_branch() {
        let ws = test_workspace();
        let mgr = SessionManager::new(&ws).unwrap();
        let root = mgr.create("root").unwrap();
        let e1 = mgr.append_entry(&root.id, EntryRole::User, "a", vec![], None).await.unwrap();
        let e2 = mgr.append_entry(&root.id, EntryRole::Assistant, "b", vec![], None).await.unwrap();
        mgr.append_entry(&root.id, EntryRole::User, "ignored-after-fork", vec![], None).await.unwrap();

        let forked = mgr.fork(&root.id, &e2.id, "branch").await.unwrap();
        mgr.append_entry(&forked.id, EntryRole::Assistant, "new-branch-reply", vec![], None).await.unwrap();

        let branch = mgr.get_branch(&forked.id, None).await.unwrap();
        let contents: Vec<&str> = branch.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "new-branch-reply"]);
        assert_eq!(branch[0].id, e1.id);
        let _ = std::fs::remove_dir_all(&ws);
    }

    #[tokio::test]
    async fn build_session_context_prepends_latest_summary() {
        let ws = test_workspace();
        let mgr = SessionManager::new(&ws).unwrap();
        let meta = mgr.create("t").unwrap();
        mgr.append_entry(&meta.id, EntryRole::User, "a", vec![], None).await.unwrap();
        mgr.append_entry(&meta.id, EntryRole::SystemSummary, "summary", vec![], None).await.unwrap();
        mgr.append_entry(&meta.id, EntryRole::User, "b", vec![], None).await.unwrap();
        let ctx = mgr.build_session_context(&meta.id, "sys").await.unwrap();
        assert_eq!(ctx.compaction_summary.unwrap().content, "summary");
        assert_eq!(ctx.system_prompt, "sys");
        let _ = std::fs::remove_dir_all(&ws);
    }
}
