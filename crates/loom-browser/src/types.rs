//! Shared types for the execution engine (spec §4.8).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SnapshotId(pub String);

/// A short-lived token identifying a node in a specific snapshot (e.g.
/// `e12`). Valid only until the next `snapshot()` call.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeRef(pub String);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Node {
    #[serde(rename = "ref")]
    pub node_ref: NodeRef,
    pub backend_node_id: u64,
    pub selector_hints: Vec<String>,
    pub role: String,
    pub name: String,
    pub frame_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: SnapshotId,
    pub nodes: Vec<Node>,
    pub frame_tree: serde_json::Value,
}

/// A browser action (spec §4.8): dispatched by preferring the
/// backend-node command, falling back to selector candidates from the
/// same node.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Action {
    Click { target: ActionTarget },
    Fill { target: ActionTarget, value: String },
    Navigate { url: String },
    Hover { target: ActionTarget },
    Type { target: ActionTarget, text: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionTarget {
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub node_ref: Option<NodeRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionResult {
    pub evidence: serde_json::Value,
    pub used_fallback_selector: bool,
}

/// Verify predicates (spec §4.8). Polled within a bounded window.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum VerifyPredicate {
    TextIncludes { target: ActionTarget, text: String },
    SelectorExists { selector: String },
    UrlChanged {
        #[serde(rename = "previousUrl")]
        previous_url: String,
    },
    DomAttributeEquals { target: ActionTarget, attribute: String, value: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerifyResult {
    pub verified: bool,
    pub evidence: serde_json::Value,
}

/// Classification of a failed verify, driven by capability policy
/// (spec §4.8, §4.11).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyFailureClass {
    HardFailure,
    ProgressUncertain,
}

#[derive(Clone, Debug)]
pub struct SnapshotState {
    pub snapshot_id: SnapshotId,
    /// ref -> backend_node_id, valid only until the next snapshot.
    pub ref_map: HashMap<NodeRef, u64>,
}
