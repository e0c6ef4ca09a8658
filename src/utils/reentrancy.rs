//! Operation-scoped reentrancy guard.
//!
//! An external collaborator call made mid-operation can lead back into the
//! component that issued it. The guard is set on entry and cleared on exit
//! (via `Drop`), so a nested call observes the flag and fails fast instead
//! of reaching a ledger that is mid-update.

use crate::error::ServiceError;
use std::sync::atomic::{AtomicBool, Ordering};

/// Single-entry flag shared by all state-changing operations of a component.
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    entered: AtomicBool,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self {
            entered: AtomicBool::new(false),
        }
    }

    /// Claim the guard for the duration of one operation.
    ///
    /// Fails with [`ServiceError::ReentrantCall`] if an operation is
    /// already in flight. The permit releases the guard when dropped.
    pub fn enter(&self) -> Result<EntryPermit<'_>, ServiceError> {
        if self.entered.swap(true, Ordering::Acquire) {
            return Err(ServiceError::ReentrantCall);
        }
        Ok(EntryPermit { guard: self })
    }
}

/// RAII permit proving the guard is held.
#[derive(Debug)]
#[must_use = "dropping the permit releases the reentrancy guard"]
pub struct EntryPermit<'a> {
    guard: &'a ReentrancyGuard,
}

impl Drop for EntryPermit<'_> {
    fn drop(&mut self) {
        self.guard.entered.store(false, Ordering::Release);
    }
}
