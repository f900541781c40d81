//! Interception Handlers
//!
//! [`Observed`] is the interception wrapper around a raw [`Obj`]. Every
//! keyed operation routes through the dependency store:
//!
//! - reads (`get`, `has`, `keys`, `len`) track the running effect;
//! - writes (`set`, `delete`, `clear`, `push`) trigger the subscribers of
//!   what actually changed, and only when something actually changed.
//!
//! Three variants share this handler set. The mutable variant wraps nested
//! objects mutable on read; the readonly variant wraps them readonly; the
//! shallow-readonly variant returns nested values raw. Both readonly
//! variants gate writes behind the process-wide lock: while locked, a write
//! is reported as successful but performs nothing - a diagnostic, not an
//! error, so call sites never have to handle write failures.
//!
//! Stored values are always raw: incoming wrappers are unwrapped before the
//! write lands. Stored reference holders are transparent - reads return the
//! inner value, and assignments route through the holder's setter so its
//! identity survives reassignment.

use std::sync::Arc;

use super::dep::{track, trigger, DepKey, TrackOp, TriggerOp};
use super::lock;
use super::registry;
use crate::value::{Obj, PropKey, PropRemove, PropWrite, Value};

/// The wrapper variant.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ObserveKind {
    /// Deeply reactive, writable.
    Mutable,
    /// Deeply readonly while the write lock is engaged.
    Readonly,
    /// Root-level readonly; nested values keep their own identity.
    ShallowReadonly,
}

/// An interception wrapper observing one raw object.
///
/// Obtained from `reactive`, `readonly`, or `shallow_readonly` - never
/// constructed directly, so one raw object has at most one wrapper per
/// registry pair and re-wrapping returns the existing wrapper.
pub struct Observed {
    pub(crate) body: Arc<ObservedBody>,
}

pub(crate) struct ObservedBody {
    target: Obj,
    kind: ObserveKind,
}

impl Observed {
    pub(crate) fn new(target: Obj, kind: ObserveKind) -> Observed {
        Observed {
            body: Arc::new(ObservedBody { target, kind }),
        }
    }

    /// The wrapper variant.
    pub fn kind(&self) -> ObserveKind {
        self.body.kind
    }

    /// The underlying raw object.
    pub fn raw(&self) -> Obj {
        self.body.target.clone()
    }

    /// Wrapper identity: do `a` and `b` name the same wrapper?
    pub fn ptr_eq(a: &Observed, b: &Observed) -> bool {
        Arc::ptr_eq(&a.body, &b.body)
    }

    /// Whether the underlying object is a record.
    pub fn is_record(&self) -> bool {
        self.body.target.is_record()
    }

    /// Whether the underlying object is a list.
    pub fn is_list(&self) -> bool {
        self.body.target.is_list()
    }

    /// Tracked read.
    ///
    /// Missing keys read as [`Value::Null`]. Stored reference holders are
    /// unwrapped to their inner value (the holder's own accessor does the
    /// tracking in that case). Nested objects come back wrapped according
    /// to the variant; the shallow-readonly variant returns them raw.
    pub fn get(&self, key: impl Into<PropKey>) -> Value {
        let key = key.into();
        let target = &self.body.target;
        let res = target.read_prop(&key);

        if self.body.kind == ObserveKind::ShallowReadonly {
            track(target, TrackOp::Get, key);
            return res;
        }

        if let Value::Ref(holder) = &res {
            return holder.get();
        }

        track(target, TrackOp::Get, key);
        match res {
            Value::Obj(obj) => match self.body.kind {
                ObserveKind::Mutable => registry::reactive(Value::Obj(obj)),
                _ => registry::readonly(Value::Obj(obj)),
            },
            other => other,
        }
    }

    /// Tracked existence check.
    pub fn has(&self, key: impl Into<PropKey>) -> bool {
        let key = key.into();
        let result = self.body.target.has_prop(&key);
        track(&self.body.target, TrackOp::Has, key);
        result
    }

    /// Tracked key enumeration in storage order.
    pub fn keys(&self) -> Vec<PropKey> {
        track(&self.body.target, TrackOp::Iterate, DepKey::Iterate);
        self.body.target.own_keys()
    }

    /// Tracked entry count.
    pub fn len(&self) -> usize {
        track(&self.body.target, TrackOp::Iterate, DepKey::Iterate);
        self.body.target.len()
    }

    /// Tracked emptiness check.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write one slot.
    ///
    /// On the mutable variant: triggers `Add` for a new key, `Set` for a
    /// changed value, nothing for an unchanged one. On the readonly
    /// variants: while the write lock is engaged, reports success without
    /// mutating; when unlocked, behaves like the mutable variant.
    pub fn set(&self, key: impl Into<PropKey>, value: impl Into<Value>) -> bool {
        let key = key.into();
        if self.write_locked("set", &key) {
            return true;
        }
        base_set(&self.body.target, &key, value.into())
    }

    /// Remove one slot, triggering `Delete` only if the key existed.
    /// Readonly gating as for [`Observed::set`].
    pub fn delete(&self, key: impl Into<PropKey>) -> bool {
        let key = key.into();
        if self.write_locked("delete", &key) {
            return true;
        }
        base_delete(&self.body.target, &key)
    }

    /// Append to a list (equivalent to `set(len, value)`).
    pub fn push(&self, value: impl Into<Value>) -> bool {
        let index = self.body.target.len();
        self.set(index, value)
    }

    /// Remove every entry at once, notifying all subscribers of the target.
    /// Readonly gating as for [`Observed::set`].
    pub fn clear(&self) -> bool {
        if self.body.kind != ObserveKind::Mutable && lock::is_locked() {
            tracing::warn!(
                target_id = self.body.target.id(),
                "clear ignored: target is readonly"
            );
            return true;
        }
        if self.body.target.clear_all() {
            trigger(&self.body.target, TriggerOp::Clear, None);
        }
        true
    }

    fn write_locked(&self, op: &'static str, key: &PropKey) -> bool {
        if self.body.kind != ObserveKind::Mutable && lock::is_locked() {
            tracing::warn!(
                target_id = self.body.target.id(),
                key = %key,
                "{op} ignored: target is readonly"
            );
            true
        } else {
            false
        }
    }
}

/// The shared mutable write path.
fn base_set(target: &Obj, key: &PropKey, value: Value) -> bool {
    // Storage always holds raw data; never store a wrapper verbatim.
    let value = registry::to_raw(value);

    match target.write_prop(key, value) {
        PropWrite::Added => {
            trigger(target, TriggerOp::Add, Some(DepKey::Prop(key.clone())));
            true
        }
        PropWrite::Changed => {
            trigger(target, TriggerOp::Set, Some(DepKey::Prop(key.clone())));
            true
        }
        PropWrite::Unchanged => true,
        PropWrite::RouteRef { holder, value } => {
            // The slot holds a reference and the incoming value is not one:
            // the assignment goes through the holder, preserving its
            // identity. The holder's setter does its own triggering.
            holder.set(value);
            true
        }
        PropWrite::OutOfBounds => {
            tracing::warn!(
                target_id = target.id(),
                key = %key,
                len = target.len(),
                "set ignored: list index out of range"
            );
            false
        }
        PropWrite::KeyMismatch => {
            tracing::warn!(
                target_id = target.id(),
                key = %key,
                "set ignored: key shape does not match the target"
            );
            false
        }
    }
}

/// The shared mutable delete path.
fn base_delete(target: &Obj, key: &PropKey) -> bool {
    match target.remove_prop(key) {
        PropRemove::Removed => {
            trigger(target, TriggerOp::Delete, Some(DepKey::Prop(key.clone())));
            true
        }
        // Deleting an absent key succeeds without notifying anyone.
        PropRemove::Missing => true,
        PropRemove::KeyMismatch => {
            tracing::warn!(
                target_id = target.id(),
                key = %key,
                "delete ignored: key shape does not match the target"
            );
            false
        }
    }
}

impl Clone for Observed {
    fn clone(&self) -> Self {
        Observed {
            body: Arc::clone(&self.body),
        }
    }
}

impl std::fmt::Debug for Observed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observed")
            .field("target_id", &self.body.target.id())
            .field("kind", &self.body.kind)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::effect::Effect;
    use crate::reactive::registry::{reactive, readonly, shallow_readonly};
    use crate::reactive::Reference;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn observed(value: Value) -> Observed {
        match reactive(value) {
            Value::Observed(observed) => observed,
            other => panic!("expected a wrapper, got {other:?}"),
        }
    }

    fn observed_readonly(value: Value) -> Observed {
        match readonly(value) {
            Value::Observed(observed) => observed,
            other => panic!("expected a wrapper, got {other:?}"),
        }
    }

    #[test]
    fn set_reruns_readers_once_per_change() {
        let obs = observed(Value::Obj(Obj::record_from([("a", 1)])));
        let runs = Arc::new(AtomicI32::new(0));

        let obs_clone = obs.clone();
        let runs_clone = runs.clone();
        let _effect = Effect::new(move || {
            let _ = obs_clone.get("a");
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        obs.set("a", 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // Unchanged assignment does not retrigger.
        obs.set("a", 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn enumeration_is_sensitive_to_the_key_set_only() {
        let obs = observed(Value::Obj(Obj::record_from([("a", 1)])));
        let runs = Arc::new(AtomicI32::new(0));

        let obs_clone = obs.clone();
        let runs_clone = runs.clone();
        let _effect = Effect::new(move || {
            let _ = obs_clone.keys();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        obs.set("a", 99);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        obs.set("b", 2);
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        obs.delete("b");
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        // Deleting an absent key succeeds but notifies nobody.
        assert!(obs.delete("b"));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn adding_a_key_reruns_readers_of_that_key() {
        let obs = observed(Value::Obj(Obj::record()));
        let seen = Arc::new(AtomicI32::new(-1));

        let obs_clone = obs.clone();
        let seen_clone = seen.clone();
        let _effect = Effect::new(move || {
            let value = match obs_clone.get("pending") {
                Value::Int(n) => n as i32,
                _ => -1,
            };
            seen_clone.store(value, Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), -1);

        obs.set("pending", 7);
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn nested_objects_come_back_wrapped_by_variant() {
        let inner = Obj::record_from([("x", 1)]);
        let outer = Obj::record_from([("inner", inner)]);

        let mutable = observed(Value::Obj(outer.clone()));
        match mutable.get("inner") {
            Value::Observed(nested) => assert_eq!(nested.kind(), ObserveKind::Mutable),
            other => panic!("expected a wrapper, got {other:?}"),
        }

        let locked = observed_readonly(Value::Obj(outer.clone()));
        match locked.get("inner") {
            Value::Observed(nested) => assert_eq!(nested.kind(), ObserveKind::Readonly),
            other => panic!("expected a wrapper, got {other:?}"),
        }
    }

    #[test]
    fn shallow_readonly_returns_nested_values_raw() {
        let inner = Obj::record_from([("x", 1)]);
        let outer = Obj::record_from([("inner", inner.clone())]);

        let Value::Observed(shallow) = shallow_readonly(Value::Obj(outer)) else {
            panic!("expected a wrapper");
        };

        match shallow.get("inner") {
            Value::Obj(raw) => assert_eq!(raw.id(), inner.id()),
            other => panic!("expected the raw object, got {other:?}"),
        }
    }

    #[test]
    fn readonly_writes_are_reported_successful_no_ops() {
        let obs = observed_readonly(Value::Obj(Obj::record_from([("a", 1)])));

        assert!(obs.set("a", 2));
        assert_eq!(obs.raw().get("a"), Value::Int(1));

        assert!(obs.delete("a"));
        assert!(obs.raw().contains("a"));

        assert!(obs.clear());
        assert_eq!(obs.raw().len(), 1);
    }

    #[test]
    fn wrapped_values_are_stored_raw() {
        let child = Obj::record_from([("x", 1)]);
        let Value::Observed(wrapped_child) = reactive(Value::Obj(child.clone())) else {
            panic!("expected a wrapper");
        };

        let obs = observed(Value::Obj(Obj::record()));
        obs.set("child", Value::Observed(wrapped_child));

        // The raw storage holds the raw child, not the wrapper.
        match obs.raw().get("child") {
            Value::Obj(stored) => assert_eq!(stored.id(), child.id()),
            other => panic!("expected raw storage, got {other:?}"),
        }
    }

    #[test]
    fn reference_slots_unwrap_and_keep_identity() {
        let holder = Reference::new(1);
        let obj = Obj::record();
        obj.insert("count", holder.clone());

        let obs = observed(Value::Obj(obj));
        let runs = Arc::new(AtomicI32::new(0));

        let obs_clone = obs.clone();
        let runs_clone = runs.clone();
        let _effect = Effect::new(move || {
            // Reads the unwrapped inner value, subscribing to the holder.
            let _ = obs_clone.get("count");
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Property-level read is transparent.
        assert_eq!(obs.get("count"), Value::Int(1));

        // Assigning a plain value routes through the holder.
        obs.set("count", 2);
        assert_eq!(holder.get_untracked(), Value::Int(2));
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // The slot still holds the same holder.
        match obs.raw().get("count") {
            Value::Ref(stored) => assert_eq!(stored.id(), holder.id()),
            other => panic!("expected the holder, got {other:?}"),
        }
    }

    #[test]
    fn list_append_and_length_tracking() {
        let obs = observed(Value::Obj(Obj::list_from([1, 2])));
        let lengths = Arc::new(AtomicI32::new(0));

        let obs_clone = obs.clone();
        let lengths_clone = lengths.clone();
        let _effect = Effect::new(move || {
            lengths_clone.store(obs_clone.len() as i32, Ordering::SeqCst);
        });
        assert_eq!(lengths.load(Ordering::SeqCst), 2);

        obs.push(3);
        assert_eq!(lengths.load(Ordering::SeqCst), 3);

        obs.delete(0usize);
        assert_eq!(lengths.load(Ordering::SeqCst), 2);

        // In-place reassignment does not change the length.
        obs.set(0usize, 99);
        assert_eq!(lengths.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn list_write_past_the_end_is_rejected() {
        let obs = observed(Value::Obj(Obj::list_from([1])));

        assert!(!obs.set(5usize, 9));
        assert_eq!(obs.raw().len(), 1);
    }

    #[test]
    fn clear_notifies_every_subscriber() {
        let obs = observed(Value::Obj(Obj::record_from([("a", 1), ("b", 2)])));
        let runs = Arc::new(AtomicI32::new(0));

        let obs_clone = obs.clone();
        let runs_clone = runs.clone();
        let _reader = Effect::new(move || {
            let _ = obs_clone.get("a");
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        let obs_clone = obs.clone();
        let runs_clone = runs.clone();
        let _counter = Effect::new(move || {
            let _ = obs_clone.len();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        obs.clear();
        assert_eq!(runs.load(Ordering::SeqCst), 4);
        assert!(obs.raw().is_empty());

        // Clearing an already-empty object changes nothing.
        obs.clear();
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn has_tracks_the_literal_key() {
        let obs = observed(Value::Obj(Obj::record()));
        let present = Arc::new(AtomicI32::new(0));

        let obs_clone = obs.clone();
        let present_clone = present.clone();
        let _effect = Effect::new(move || {
            present_clone.store(obs_clone.has("flag") as i32, Ordering::SeqCst);
        });
        assert_eq!(present.load(Ordering::SeqCst), 0);

        obs.set("flag", true);
        assert_eq!(present.load(Ordering::SeqCst), 1);

        obs.delete("flag");
        assert_eq!(present.load(Ordering::SeqCst), 0);
    }
}
