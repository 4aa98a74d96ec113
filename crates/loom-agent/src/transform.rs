//! Message Transform (spec §4.3): produces LLM-consumable history from
//! mixed branch entries.
//!
//! Generalizes the root `src/transform.rs` pairing logic — index tool
//! results by id in a first pass, pair them against tool-use
//! declarations in a second pass, drop what doesn't pair — from that
//! module's already-complete `Record`/`ContentBlock` model onto live
//! `loom_core::types::Entry` branches, and extends it with the
//! abandoned/compacted policy split and deterministic id normalization
//! that a post-hoc transform over already-finished records never needed.

use loom_core::types::{Entry, EntryRole, ToolCallMeta};
use loom_llm::types::{ContentBlock, LlmContent, LlmMessage};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

/// Whether the branch being transformed was abandoned mid-flight (a
/// crash, an unhandled error) or deliberately compacted. Drives the
/// policy split in [`transform`] for assistant entries with unresolved
/// tool_calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BranchStatus {
    Abandoned,
    Compacted,
}

/// Transform a chronological entry chain into provider-ready messages.
pub fn transform(entries: &[Entry], status: BranchStatus) -> Vec<LlmMessage> {
    let tool_results: HashMap<&str, &Entry> = entries
        .iter()
        .filter(|e| e.role == EntryRole::Tool)
        .filter_map(|e| e.tool_result.as_ref().map(|r| (r.tool_call_id.as_str(), e)))
        .collect();

    let mut messages = Vec::new();

    for entry in entries {
        match entry.role {
            EntryRole::User => {
                messages.push(LlmMessage { role: "user".into(), content: LlmContent::Text(entry.content.clone()) });
            }
            EntryRole::SystemSummary => {
                messages.push(LlmMessage { role: "user".into(), content: LlmContent::Text(entry.content.clone()) });
            }
            EntryRole::Tool => {
                // Paired in below via the assistant branch that declared it.
            }
            EntryRole::Assistant => {
                let mut blocks = Vec::new();
                if !entry.content.is_empty() {
                    blocks.push(ContentBlock::Text { text: entry.content.clone() });
                }
                let mut result_blocks = Vec::new();

                for call in &entry.tool_calls {
                    let emitted_id = normalize_tool_call_id(&call.id);
                    match tool_results.get(call.id.as_str()) {
                        Some(result_entry) => {
                            blocks.push(ContentBlock::ToolUse { id: emitted_id.clone(), name: call.name.clone(), input: call.arguments.clone() });
                            let result = result_entry.tool_result.as_ref().expect("tool entry without tool_result");
                            result_blocks.push(ContentBlock::ToolResult {
                                tool_use_id: emitted_id,
                                content: result_entry.content.clone(),
                                is_error: if result.ok { None } else { Some(true) },
                            });
                        }
                        None => match status {
                            BranchStatus::Abandoned => {
                                blocks.push(ContentBlock::ToolUse { id: emitted_id.clone(), name: call.name.clone(), input: call.arguments.clone() });
                                result_blocks.push(ContentBlock::ToolResult {
                                    tool_use_id: emitted_id,
                                    content: "aborted: branch ended before a result was recorded".into(),
                                    is_error: Some(true),
                                });
                            }
                            BranchStatus::Compacted => {
                                // Strip: the declaration is omitted entirely.
                            }
                        },
                    }
                }

                if !blocks.is_empty() {
                    messages.push(LlmMessage { role: "assistant".into(), content: LlmContent::Blocks(blocks) });
                }
                if !result_blocks.is_empty() {
                    messages.push(LlmMessage { role: "user".into(), content: LlmContent::Blocks(result_blocks) });
                }
            }
        }
    }

    messages
}

/// ASCII-safe tool_call ids (letters, digits, `_`, `-`) pass through
/// unchanged; anything else is replaced with a deterministic
/// hash-derived id so providers that reject arbitrary identifiers
/// never see the original. Persisted entries are never rewritten —
/// this only affects the emitted history.
fn normalize_tool_call_id(id: &str) -> String {
    if !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-') {
        return id.to_string();
    }
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    id.hash(&mut hasher);
    format!("tc_{:016x}", hasher.finish())
}

/// Whether `entries` (as emitted by [`transform`]) contains a tool-role
/// message without a preceding assistant message declaring its id —
/// the invariant [`transform`] itself must never violate.
pub fn has_dangling_tool_result(messages: &[LlmMessage]) -> bool {
    let mut declared = std::collections::HashSet::new();
    for message in messages {
        let LlmContent::Blocks(blocks) = &message.content else { continue };
        for block in blocks {
            match block {
                ContentBlock::ToolUse { id, .. } => {
                    declared.insert(id.clone());
                }
                ContentBlock::ToolResult { tool_use_id, .. } => {
                    if !declared.contains(tool_use_id) {
                        return true;
                    }
                }
                _ => {}
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use loom_core::types::{EntryId, ToolResultMeta};

    fn user(content: &str) -> Entry {
        Entry { id: EntryId::generate(), parent_id: None, role: EntryRole::User, content: content.into(), tool_calls: vec![], tool_result: None, timestamp: Utc::now() }
    }

    fn assistant_with_call(call_id: &str) -> Entry {
        Entry {
            id: EntryId::generate(),
            parent_id: None,
            role: EntryRole::Assistant,
            content: "".into(),
            tool_calls: vec![ToolCallMeta { id: call_id.into(), name: "fs.read_text".into(), arguments: serde_json::json!({"path": "a.txt"}) }],
            tool_result: None,
            timestamp: Utc::now(),
        }
    }

    fn tool_result(call_id: &str, ok: bool) -> Entry {
        Entry {
            id: EntryId::generate(),
            parent_id: None,
            role: EntryRole::Tool,
            content: "contents".into(),
            tool_calls: vec![],
            tool_result: Some(ToolResultMeta { tool_call_id: call_id.into(), ok, payload: serde_json::Value::Null }),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn pairs_assistant_tool_call_with_its_result() {
        let entries = vec![user("do it"), assistant_with_call("call_1"), tool_result("call_1", true)];
        let messages = transform(&entries, BranchStatus::Abandoned);
        assert_eq!(messages.len(), 3);
        assert!(!has_dangling_tool_result(&messages));
    }

    #[test]
    fn orphan_tool_result_without_declaring_assistant_is_dropped() {
        let entries = vec![user("do it"), tool_result("call_orphan", true)];
        let messages = transform(&entries, BranchStatus::Abandoned);
        assert_eq!(messages.len(), 1);
        assert!(!has_dangling_tool_result(&messages));
    }

    #[test]
    fn abandoned_branch_synthesizes_an_aborted_result() {
        let entries = vec![user("do it"), assistant_with_call("call_1")];
        let messages = transform(&entries, BranchStatus::Abandoned);
        assert_eq!(messages.len(), 3);
        let LlmContent::Blocks(blocks) = &messages[2].content else { panic!("expected blocks") };
        let ContentBlock::ToolResult { is_error, .. } = &blocks[0] else { panic!("expected tool result") };
        assert_eq!(*is_error, Some(true));
    }

    #[test]
    fn compacted_branch_strips_unresolved_tool_call() {
        let entries = vec![user("do it"), assistant_with_call("call_1")];
        let messages = transform(&entries, BranchStatus::Compacted);
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn non_ascii_safe_ids_are_normalized_deterministically() {
        let a = normalize_tool_call_id("call with spaces/漢字");
        let b = normalize_tool_call_id("call with spaces/漢字");
        assert_eq!(a, b);
        assert!(a.starts_with("tc_"));
        assert_eq!(normalize_tool_call_id("safe_id-1"), "safe_id-1");
    }
}
