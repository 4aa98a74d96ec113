//! Browser execution engine: snapshot, action dispatch and bounded
//! verify over a debugging-protocol transport, gated by per-tab leases
//! (spec §4.8).

pub mod engine;
pub mod lease;
pub mod provider;
pub mod transport;
pub mod types;

pub use engine::ExecutionEngine;
pub use lease::{Lease, LeaseTable};
pub use provider::BrowserProvider;
pub use transport::DebugProtocolTransport;
pub use types::*;
