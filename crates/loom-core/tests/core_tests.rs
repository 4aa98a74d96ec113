//! Integration tests for loom-core: data model, protocol, error codes.

use chrono::Utc;
use loom_core::*;

// ===========================================================================
// SessionKey / EntryId
// ===========================================================================

#[test]
fn session_key_new_and_display() {
    let key = SessionKey::new("abc-123");
    assert_eq!(key.as_str(), "abc-123");
    assert_eq!(format!("{}", key), "abc-123");
}

#[test]
fn session_key_equality_and_hash() {
    use std::collections::HashSet;
    let a = SessionKey::new("same");
    let b = SessionKey::new("same");
    let c = SessionKey::new("different");
    assert_eq!(a, b);
    assert_ne!(a, c);
    let mut set = HashSet::new();
    set.insert(a.clone());
    assert!(set.contains(&b));
    assert!(!set.contains(&c));
}

#[test]
fn entry_id_generate_is_unique() {
    let a = EntryId::generate();
    let b = EntryId::generate();
    assert_ne!(a, b);
}

// ===========================================================================
// Entry / Session data model (spec §3)
// ===========================================================================

#[test]
fn entry_serde_roundtrip_with_tool_call() {
    let entry = Entry {
        id: EntryId::generate(),
        parent_id: None,
        role: EntryRole::Assistant,
        content: "calling a tool".into(),
        tool_calls: vec![ToolCallMeta {
            id: "tc-1".into(),
            name: "fs.read_text".into(),
            arguments: serde_json::json!({"path": "README.md"}),
        }],
        tool_result: None,
        timestamp: Utc::now(),
    };
    let json = serde_json::to_string(&entry).unwrap();
    let back: Entry = serde_json::from_str(&json).unwrap();
    assert_eq!(back.role, EntryRole::Assistant);
    assert_eq!(back.tool_calls.len(), 1);
    assert_eq!(back.tool_calls[0].name, "fs.read_text");
}

#[test]
fn entry_tool_calls_omitted_when_empty() {
    let entry = Entry {
        id: EntryId::generate(),
        parent_id: None,
        role: EntryRole::User,
        content: "hi".into(),
        tool_calls: vec![],
        tool_result: None,
        timestamp: Utc::now(),
    };
    let json = serde_json::to_string(&entry).unwrap();
    assert!(!json.contains("tool_calls"));
}

#[test]
fn session_status_defaults_to_idle() {
    assert_eq!(SessionStatus::default(), SessionStatus::Idle);
}

#[test]
fn lease_is_valid_for_matching_owner_and_not_expired() {
    let now = Utc::now();
    let lease = Lease {
        tab_id: "tab-1".into(),
        owner_id: "owner-a".into(),
        session_id: SessionKey::new("s1"),
        expiry: now + chrono::Duration::seconds(5),
    };
    assert!(lease.is_valid_for("owner-a", now));
    assert!(!lease.is_valid_for("owner-b", now));
}

#[test]
fn invocation_envelope_roundtrip() {
    let env = InvocationEnvelope {
        invocation_id: "inv-1".into(),
        session_id: SessionKey::new("s1"),
        parent_session_id: None,
        agent_id: None,
        requested_tool_name: "bash".into(),
        canonical_tool_name: "command.run".into(),
        arguments: serde_json::json!({"commandId": "ls"}),
        fingerprint: "abc".into(),
    };
    let json = serde_json::to_string(&env).unwrap();
    let back: InvocationEnvelope = serde_json::from_str(&json).unwrap();
    assert_eq!(back.canonical_tool_name, "command.run");
}

// ===========================================================================
// Error codes (spec §7)
// ===========================================================================

#[test]
fn error_code_strings_match_spec() {
    for (code, expected) in [
        (ErrorCode::EArgs, "E_ARGS"),
        (ErrorCode::ETool, "E_TOOL"),
        (ErrorCode::EPath, "E_PATH"),
        (ErrorCode::ECmd, "E_CMD"),
        (ErrorCode::EBusy, "E_BUSY"),
        (ErrorCode::ETimeout, "E_TIMEOUT"),
        (ErrorCode::EPatch, "E_PATCH"),
        (ErrorCode::ELease, "E_LEASE"),
        (ErrorCode::ENoProvider, "E_NO_PROVIDER"),
        (ErrorCode::EHookBlock, "E_HOOK_BLOCK"),
    ] {
        assert_eq!(code.as_str(), expected);
    }
}

#[test]
fn coded_error_carries_retryability() {
    let e = LoomError::coded(ErrorCode::EBusy, "too many invocations");
    assert!(e.retryable());
    assert_eq!(e.code(), Some(ErrorCode::EBusy));

    let e = LoomError::coded(ErrorCode::EArgs, "bad args");
    assert!(!e.retryable());
}

#[test]
fn coded_error_with_hint_serializes_in_tool_payload() {
    let payload = ToolErrorPayload {
        canonical_tool: "command.run".into(),
        error_code: ErrorCode::ETimeout,
        retryable: true,
        repair_hint: Some("reduce scope".into()),
    };
    let json = serde_json::to_string(&payload).unwrap();
    assert!(json.contains("E_TIMEOUT"));
    assert!(json.contains("reduce scope"));
}

// ===========================================================================
// Bridge wire protocol (spec §6)
// ===========================================================================

#[test]
fn invoke_request_parses_full_envelope() {
    let json = r#"{"type":"invoke","id":"i1","tool":"fs.read_text","args":{"path":"a.txt"},"sessionId":"s1"}"#;
    let req: InvokeRequest = serde_json::from_str(json).unwrap();
    assert_eq!(req.id, "i1");
    assert_eq!(req.tool, "fs.read_text");
    assert_eq!(req.session_id.as_deref(), Some("s1"));
}

#[test]
fn invoke_success_serializes_ok_true() {
    let resp = InvokeSuccess::new("i1", serde_json::json!({"content": "hi"}));
    let json = serde_json::to_string(&resp).unwrap();
    assert!(json.contains(r#""ok":true"#));
    assert!(json.contains("hi"));
}

#[test]
fn invoke_failure_carries_stable_code() {
    let resp = InvokeFailure::new("i1", ErrorCode::EPath, "outside workspace root");
    let json = serde_json::to_string(&resp).unwrap();
    assert!(json.contains(r#""ok":false"#));
    assert!(json.contains("E_PATH"));
}

#[test]
fn bridge_event_finished_payload() {
    let evt = BridgeEvent::finished("i1", true, true);
    let json = serde_json::to_string(&evt).unwrap();
    assert!(json.contains(r#""deduped":true"#));
    assert!(json.contains(r#""cacheHit":true"#));
    assert!(json.contains("invoke_finished"));
}

#[test]
fn canonical_tool_name_resolves_aliases() {
    assert_eq!(canonical_tool_name("read_file"), "fs.read_text");
    assert_eq!(canonical_tool_name("bash"), "command.run");
}

// ===========================================================================
// Config (ambient)
// ===========================================================================

#[test]
fn runtime_config_defaults() {
    let cfg = RuntimeConfig::default();
    assert_eq!(cfg.port, 18789);
    assert!(!cfg.strict.enabled);
}

#[test]
fn runtime_config_load_without_file_uses_defaults() {
    let cfg = RuntimeConfig::load(None).unwrap();
    assert_eq!(cfg.max_concurrency, 4);
}
