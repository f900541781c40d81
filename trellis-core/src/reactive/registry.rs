//! Identity Registry & Wrapping Entry Points
//!
//! One raw object gets at most one mutable wrapper and at most one readonly
//! wrapper, system-wide. The registry records raw identity → weak wrapper
//! for each pair (the wrapper itself carries wrapper → raw), making every
//! entry point idempotent: wrapping an already-wrapped value returns the
//! existing wrapper.
//!
//! The shallow-readonly variant shares the readonly registry pair, so for a
//! given raw object whichever readonly flavor is requested first is the one
//! later requests observe.
//!
//! Readonly status cannot be downgraded: observing a readonly wrapper with
//! [`reactive`] yields the readonly wrapper itself, and a raw object
//! pre-marked readonly routes to [`readonly`] even through the mutable
//! entry point.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::RwLock;

use super::handlers::{Observed, ObservedBody, ObserveKind};
use crate::value::{Obj, Value};

static RAW_TO_REACTIVE: OnceLock<RwLock<HashMap<u64, Weak<ObservedBody>>>> = OnceLock::new();
static RAW_TO_READONLY: OnceLock<RwLock<HashMap<u64, Weak<ObservedBody>>>> = OnceLock::new();

fn raw_to_reactive() -> &'static RwLock<HashMap<u64, Weak<ObservedBody>>> {
    RAW_TO_REACTIVE.get_or_init(|| RwLock::new(HashMap::new()))
}

fn raw_to_readonly() -> &'static RwLock<HashMap<u64, Weak<ObservedBody>>> {
    RAW_TO_READONLY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Wrap `value` in a mutable, deeply-reactive wrapper.
///
/// Non-object values are returned unchanged with a diagnostic. A value that
/// is already a wrapper is returned as-is - in particular, observing a
/// readonly wrapper yields that readonly wrapper. A raw object pre-marked
/// readonly yields its readonly wrapper instead.
pub fn reactive(value: Value) -> Value {
    match value {
        Value::Observed(_) => value,
        Value::Obj(obj) => {
            if obj.is_marked_readonly() {
                return readonly(Value::Obj(obj));
            }
            create_observed(obj, ObserveKind::Mutable)
        }
        other => {
            tracing::warn!(kind = other.kind_name(), "value cannot be made reactive");
            other
        }
    }
}

/// Wrap `value` in a deeply-readonly wrapper.
///
/// Given a mutable wrapper, wraps the underlying raw object - the raw data,
/// never the wrapper itself. Given a readonly wrapper, returns it unchanged.
pub fn readonly(value: Value) -> Value {
    create_readonly(value, ObserveKind::Readonly)
}

/// Wrap `value` in a root-level readonly wrapper that does not recurse into
/// nested values. Shares the readonly identity registry with [`readonly`].
pub fn shallow_readonly(value: Value) -> Value {
    create_readonly(value, ObserveKind::ShallowReadonly)
}

fn create_readonly(value: Value, kind: ObserveKind) -> Value {
    match value {
        Value::Observed(observed) => match observed.kind() {
            ObserveKind::Mutable => create_observed(observed.raw(), kind),
            _ => Value::Observed(observed),
        },
        Value::Obj(obj) => create_observed(obj, kind),
        other => {
            tracing::warn!(kind = other.kind_name(), "value cannot be made readonly");
            other
        }
    }
}

/// The common construction contract behind every entry point.
fn create_observed(target: Obj, kind: ObserveKind) -> Value {
    if target.is_marked_non_reactive() {
        return Value::Obj(target);
    }

    let registry = match kind {
        ObserveKind::Mutable => raw_to_reactive(),
        _ => raw_to_readonly(),
    };

    let mut entries = registry.write();
    if let Some(body) = entries.get(&target.id()).and_then(Weak::upgrade) {
        return Value::Observed(Observed { body });
    }

    let observed = Observed::new(target.clone(), kind);
    entries.insert(target.id(), Arc::downgrade(&observed.body));
    Value::Observed(observed)
}

/// Whether `value` is a mutable reactive wrapper.
pub fn is_reactive(value: &Value) -> bool {
    matches!(value, Value::Observed(observed) if observed.kind() == ObserveKind::Mutable)
}

/// Whether `value` is a readonly (deep or shallow) wrapper.
pub fn is_readonly(value: &Value) -> bool {
    matches!(value, Value::Observed(observed) if observed.kind() != ObserveKind::Mutable)
}

/// The underlying raw identity of a wrapper, or the input unchanged for
/// anything that is not a wrapper.
pub fn to_raw(value: Value) -> Value {
    match value {
        Value::Observed(observed) => Value::Obj(observed.raw()),
        other => other,
    }
}

/// Pre-mark a raw object as readonly: from now on the mutable entry point
/// yields its readonly wrapper. Settable once; never cleared.
pub fn mark_readonly(value: &Value) {
    match value {
        Value::Obj(obj) => obj.mark_readonly(),
        other => {
            tracing::warn!(
                kind = other.kind_name(),
                "only raw objects can be marked readonly"
            );
        }
    }
}

/// Pre-mark a raw object as non-observable: every entry point passes it
/// through unchanged. Settable once; never cleared.
pub fn mark_non_reactive(value: &Value) {
    match value {
        Value::Obj(obj) => obj.mark_non_reactive(),
        other => {
            tracing::warn!(
                kind = other.kind_name(),
                "only raw objects can be marked non-reactive"
            );
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
