//! The single-operation-in-flight discipline (§4.4.1, §5, §11).
//!
//! `initialize`, `record`, and `sync` all acquire this guard as their
//! first step. A second acquisition while one is held fails with
//! `Busy` immediately — there is no queue. The guard clears itself on
//! every exit path (success, error, or an early return) via `Drop`,
//! the same scoped-acquisition idiom `std::sync::MutexGuard` uses for
//! general mutual exclusion, applied here to a single boolean flag
//! instead.

use std::sync::Arc;

use tokio::sync::Mutex;

use super::error::EngineError;

#[derive(Debug, Default)]
pub struct OperationLock {
    busy: Arc<Mutex<()>>,
}

impl OperationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to acquire the lock without waiting. Returns
    /// `EngineError::Busy` if another operation already holds it.
    pub fn try_acquire(&self) -> Result<OperationGuard<'_>, EngineError> {
        match self.busy.try_lock() {
            Ok(guard) => Ok(OperationGuard { _guard: guard }),
            Err(_) => Err(EngineError::Busy),
        }
    }
}

/// Held for the duration of one `initialize`/`record`/`sync` call.
/// Dropping it (on every exit path) releases the lock.
pub struct OperationGuard<'a> {
    _guard: tokio::sync::MutexGuard<'a, ()>,
}
