//! Local Executor (spec §4.10): whitelisted file read/write/patch and
//! command execution with root-confined filesystem guard, argument
//! validation, output/time caps.

pub mod guard;
pub mod patch;
pub mod read;
pub mod shell;
pub mod whitelist;
pub mod write;

pub use guard::PathGuard;
pub use patch::PatchTool;
pub use read::ReadTool;
pub use shell::ShellTool;
pub use whitelist::{CommandEntry, CommandRisk, CommandWhitelist};
pub use write::WriteTool;
