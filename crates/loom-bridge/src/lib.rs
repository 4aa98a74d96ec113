//! The executor bridge: an authenticated duplex channel between an
//! external client and the runtime's tool surface (spec §4.9, §6).
//!
//! This crate is protocol-level only — framing, auth, concurrency
//! gating, dedup — and dispatches actual tool execution through
//! [`invoker::BridgeInvoker`], which the root binary wires to
//! `loom-agent`.

pub mod auth;
pub mod dedup;
pub mod gate;
pub mod invoker;
pub mod server;
pub mod ws;

pub use invoker::BridgeInvoker;
pub use server::serve;
