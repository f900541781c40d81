//! Effect Stack
//!
//! The stack of currently-executing effects. When an effect runs, it is
//! pushed here; every tracked read that happens during the run attributes
//! itself to the top of the stack. Nested runs (an effect that reads a
//! computed, whose runner executes inside it) push on top of their caller,
//! so a read always attributes to the innermost still-running effect.
//!
//! The stack is thread-local: tracking attribution never crosses threads,
//! which keeps the common single-threaded case free of synchronization.

use std::cell::RefCell;
use std::sync::Arc;

use super::effect::{EffectBody, EffectId};

thread_local! {
    static EFFECT_STACK: RefCell<Vec<Arc<EffectBody>>> = RefCell::new(Vec::new());
}

/// Guard that pops the effect stack when dropped.
///
/// Ensures the stack stays balanced even if the computation panics.
pub(crate) struct StackFrame {
    id: EffectId,
}

impl StackFrame {
    /// Push `effect` as the currently-running effect.
    pub(crate) fn enter(effect: Arc<EffectBody>) -> StackFrame {
        let id = effect.id();
        EFFECT_STACK.with(|stack| stack.borrow_mut().push(effect));
        StackFrame { id }
    }
}

impl Drop for StackFrame {
    fn drop(&mut self) {
        EFFECT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            if let Some(effect) = popped {
                debug_assert_eq!(
                    effect.id(),
                    self.id,
                    "effect stack mismatch: expected {:?}, got {:?}",
                    self.id,
                    effect.id()
                );
            }
        });
    }
}

/// The effect reads currently attribute to, if any.
pub(crate) fn current() -> Option<Arc<EffectBody>> {
    EFFECT_STACK.with(|stack| stack.borrow().last().cloned())
}

/// Whether `id` is anywhere on the stack - i.e. that effect is currently
/// running (possibly as an outer frame of a nested run).
pub(crate) fn contains(id: EffectId) -> bool {
    EFFECT_STACK.with(|stack| stack.borrow().iter().any(|effect| effect.id() == id))
}

/// Whether any effect is currently running on this thread. Reads made while
/// this is `false` are untracked.
pub fn is_tracking() -> bool {
    EFFECT_STACK.with(|stack| !stack.borrow().is_empty())
}
