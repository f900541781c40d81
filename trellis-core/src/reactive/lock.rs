//! Readonly Write Lock
//!
//! A process-wide flag gating writes through readonly wrappers. While the
//! flag is set (the default), set/delete operations on readonly wrappers are
//! reported as successful but perform nothing. Unlocking is the escape hatch
//! for controlled internal mutation of otherwise-readonly data; the engine
//! itself never flips the flag - its lifecycle belongs to the caller.

use std::sync::atomic::{AtomicBool, Ordering};

static LOCKED: AtomicBool = AtomicBool::new(true);

/// Engage the readonly write lock.
pub fn lock() {
    LOCKED.store(true, Ordering::SeqCst);
}

/// Release the readonly write lock, allowing writes through readonly
/// wrappers to reach the underlying data.
pub fn unlock() {
    LOCKED.store(false, Ordering::SeqCst);
}

/// Whether the readonly write lock is currently engaged.
pub fn is_locked() -> bool {
    LOCKED.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_is_engaged_by_default() {
        assert!(is_locked());
    }
}
