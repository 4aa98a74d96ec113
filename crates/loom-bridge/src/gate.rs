//! Concurrency gate: caps the number of in-flight invokes (spec §4.9).
//!
//! A request past the cap fails fast with `E_BUSY` rather than queueing
//! — the client decides whether to retry. Grounded structurally on the
//! teacher's bounded-worker patterns; no teacher file gates connection
//! concurrency directly.

use loom_core::error::{ErrorCode, LoomError};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyGate {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    pub fn try_acquire(&self) -> Result<OwnedSemaphorePermit, LoomError> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .map_err(|_| LoomError::coded(ErrorCode::EBusy, "max concurrency reached"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquires_up_to_the_configured_limit() {
        let gate = ConcurrencyGate::new(2);
        let _a = gate.try_acquire().unwrap();
        let _b = gate.try_acquire().unwrap();
        let err = gate.try_acquire().unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::EBusy));
    }

    #[test]
    fn releasing_a_permit_frees_a_slot() {
        let gate = ConcurrencyGate::new(1);
        let permit = gate.try_acquire().unwrap();
        assert!(gate.try_acquire().is_err());
        drop(permit);
        assert!(gate.try_acquire().is_ok());
    }
}
