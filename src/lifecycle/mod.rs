//! Session-scoped resource kernel: every timer, interval, listener and
//! subscription started by a balance session is registered here and torn
//! down exactly once when the session closes.

pub mod events;
pub mod registry;
pub mod scope;

pub use events::{EventEmitter, ListenerId};
pub use registry::{ActiveFlag, CleanupHandle, CleanupRegistry, ResourceCounts, ResourceKind};
pub use scope::ResourceScope;

use std::sync::{Mutex, MutexGuard, PoisonError};

// Internal helper that recovers a guard from a poisoned lock.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
