//! Command whitelist (spec §4.10): `command.run` only ever executes a
//! fixed table of canonical command ids, each bound to a concrete
//! executable and a static argument prefix the caller cannot override.
//! Grounded on the teacher's `bash.rs`, which instead shells out to
//! arbitrary strings; the whitelist is the spec's tightening of that.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandRisk {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone)]
pub struct CommandEntry {
    pub executable: String,
    pub static_args: Vec<String>,
    pub max_user_args: usize,
    pub risk: CommandRisk,
    pub allow_in_strict: bool,
}

#[derive(Default)]
pub struct CommandWhitelist {
    entries: std::collections::HashMap<String, CommandEntry>,
}

impl CommandWhitelist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, canonical_id: impl Into<String>, entry: CommandEntry) {
        self.entries.insert(canonical_id.into(), entry);
    }

    pub fn get(&self, canonical_id: &str) -> Option<&CommandEntry> {
        self.entries.get(canonical_id)
    }

    /// The default table: a small set of read-only inspection commands
    /// safe enough to ship enabled out of the box.
    pub fn with_defaults() -> Self {
        let mut wl = Self::new();
        wl.register(
            "git.status",
            CommandEntry {
                executable: "git".into(),
                static_args: vec!["status".into(), "--short".into()],
                max_user_args: 0,
                risk: CommandRisk::Low,
                allow_in_strict: true,
            },
        );
        wl.register(
            "git.diff",
            CommandEntry {
                executable: "git".into(),
                static_args: vec!["diff".into()],
                max_user_args: 1,
                risk: CommandRisk::Low,
                allow_in_strict: true,
            },
        );
        wl.register(
            "fs.list",
            CommandEntry {
                executable: "ls".into(),
                static_args: vec!["-la".into()],
                max_user_args: 1,
                risk: CommandRisk::Low,
                allow_in_strict: true,
            },
        );
        wl.register(
            "proc.kill",
            CommandEntry {
                executable: "kill".into(),
                static_args: vec![],
                max_user_args: 1,
                risk: CommandRisk::High,
                allow_in_strict: false,
            },
        );
        wl
    }
}
