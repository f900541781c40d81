//! Reference Holder
//!
//! A `Reference` is a single reactive cell with a tracked `value` slot.
//! The interception handlers consume it through a narrow interface: the
//! capability check ([`crate::value::Value::is_ref`]) and the `value`
//! accessor pair below. Wrappers unwrap a stored reference on read and
//! route assignments through its setter, so the holder keeps its identity
//! across reassignment of the slot it lives in.

use std::sync::Arc;

use parking_lot::RwLock;

use super::dep::{self, DepKey, TrackOp, TriggerOp};
use crate::value::{next_raw_id, PropKey, Value};

/// A shared reference cell. Cloning shares the cell and its identity.
pub struct Reference {
    inner: Arc<RefInner>,
}

struct RefInner {
    id: u64,
    value: RwLock<Value>,
}

fn value_key() -> DepKey {
    DepKey::Prop(PropKey::from("value"))
}

impl Reference {
    /// Create a reference holding `value`.
    pub fn new(value: impl Into<Value>) -> Reference {
        Reference {
            inner: Arc::new(RefInner {
                id: next_raw_id(),
                value: RwLock::new(value.into()),
            }),
        }
    }

    /// The holder's unique identity.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Read the inner value, attributing the read to the running effect.
    pub fn get(&self) -> Value {
        dep::track_raw(self.inner.id, TrackOp::Get, value_key());
        self.inner.value.read().clone()
    }

    /// Read the inner value without establishing a dependency.
    pub fn get_untracked(&self) -> Value {
        self.inner.value.read().clone()
    }

    /// Replace the inner value, notifying subscribers when it changed.
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();
        let changed = {
            let mut slot = self.inner.value.write();
            if Value::same(&slot, &value) {
                false
            } else {
                *slot = value;
                true
            }
        };
        if changed {
            dep::trigger_raw(self.inner.id, TriggerOp::Set, Some(value_key()));
        }
    }
}

impl Clone for Reference {
    fn clone(&self) -> Self {
        Reference {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reference")
            .field("id", &self.id())
            .field("value", &self.get_untracked())
            .finish()
    }
}
