//! Dependency Store
//!
//! The store is the central registry connecting data to the computations
//! that read it. It maps a raw object's identity to a per-key set of
//! subscriber effect ids.
//!
//! # How It Works
//!
//! 1. When a wrapped object is read inside a running effect, [`track`]
//!    records the effect as a subscriber of that (object, key) pair.
//!
//! 2. The effect keeps a back-reference to every dependency set it joined,
//!    so it can fully unsubscribe before its next run.
//!
//! 3. When a wrapped object is written, [`trigger`] gathers the subscribers
//!    of the written key - plus the subscribers of the reserved iteration
//!    key when the key set itself changed - and re-runs each one (or invokes
//!    its scheduler instead).
//!
//! Dependency sets are created lazily on first tracked read and never
//! explicitly destroyed; an empty set is harmless.
//!
//! # Fan-out ordering
//!
//! Computed runners are invoked before plain effects. A plain effect that
//! reads a computed value during its re-run is therefore guaranteed to see
//! the computed's dirty flag already refreshed.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use super::context;
use super::effect::{self, EffectBody, EffectId, EffectKind};
use crate::value::{Obj, PropKey};

/// The kind of read being tracked. Informational except that iteration
/// reads are recorded under the reserved [`DepKey::Iterate`] key.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TrackOp {
    /// A keyed value read.
    Get,
    /// A keyed existence check.
    Has,
    /// A key enumeration or size read.
    Iterate,
}

impl std::fmt::Display for TrackOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TrackOp::Get => "get",
            TrackOp::Has => "has",
            TrackOp::Iterate => "iterate",
        })
    }
}

/// The kind of write being triggered. `Add` and `Delete` change the key set
/// and therefore also notify iteration subscribers; `Clear` notifies every
/// subscriber of the target.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TriggerOp {
    /// An existing key was reassigned to a different value.
    Set,
    /// A key was added.
    Add,
    /// A key was removed.
    Delete,
    /// Every entry was removed at once.
    Clear,
}

impl std::fmt::Display for TriggerOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TriggerOp::Set => "set",
            TriggerOp::Add => "add",
            TriggerOp::Delete => "delete",
            TriggerOp::Clear => "clear",
        })
    }
}

/// A key in the dependency store: either a concrete property key or the
/// reserved iteration marker that enumeration-sensitive reads subscribe to.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum DepKey {
    /// A concrete property key.
    Prop(PropKey),
    /// The reserved iteration marker.
    Iterate,
}

impl From<PropKey> for DepKey {
    fn from(key: PropKey) -> Self {
        DepKey::Prop(key)
    }
}

impl From<&str> for DepKey {
    fn from(key: &str) -> Self {
        DepKey::Prop(PropKey::from(key))
    }
}

impl From<String> for DepKey {
    fn from(key: String) -> Self {
        DepKey::Prop(PropKey::from(key))
    }
}

impl From<usize> for DepKey {
    fn from(index: usize) -> Self {
        DepKey::Prop(PropKey::from(index))
    }
}

impl std::fmt::Display for DepKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DepKey::Prop(key) => write!(f, "{key}"),
            DepKey::Iterate => f.write_str("<iterate>"),
        }
    }
}

/// One dependency set: the effects subscribed to one (object, key) pair.
type Dep = HashSet<EffectId>;

/// Per-target map of key → dependency set.
type KeyDeps = HashMap<DepKey, Dep>;

// Global store of target identity → key → subscribers.
static TARGET_MAP: OnceLock<RwLock<HashMap<u64, KeyDeps>>> = OnceLock::new();

fn target_map() -> &'static RwLock<HashMap<u64, KeyDeps>> {
    TARGET_MAP.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Record that the currently-running effect depends on `(target, key)`.
///
/// A no-op when no effect is running or the running effect has been
/// stopped. Exposed so collaborators implementing parallel handler tables
/// can participate in the same dependency graph.
pub fn track(target: &Obj, op: TrackOp, key: impl Into<DepKey>) {
    track_raw(target.id(), op, key.into());
}

pub(crate) fn track_raw(target_id: u64, op: TrackOp, key: DepKey) {
    let Some(effect) = context::current() else {
        return;
    };
    if !effect.is_active() {
        return;
    }

    // Enumeration reads all land on the reserved key, whatever the caller
    // passed alongside the op.
    let key = if op == TrackOp::Iterate {
        DepKey::Iterate
    } else {
        key
    };

    tracing::trace!(target_id, op = %op, key = %key, effect = ?effect.id(), "track");
    subscribe(target_id, key, &effect);
}

/// Add `effect` to the dependency set for `(target_id, key)`, creating the
/// set if absent, and record the back-reference on the effect. Subscribing
/// an effect that is already a member is a no-op (set semantics).
pub(crate) fn subscribe(target_id: u64, key: DepKey, effect: &Arc<EffectBody>) {
    let inserted = {
        let mut map = target_map().write();
        map.entry(target_id)
            .or_default()
            .entry(key.clone())
            .or_default()
            .insert(effect.id())
    };

    if inserted {
        effect.push_dep((target_id, key));
    }
}

/// Remove `effect_id` from the dependency set for `(target_id, key)`.
/// The set itself is left in place; emptiness is harmless.
pub(crate) fn remove_subscriber(target_id: u64, key: &DepKey, effect_id: EffectId) {
    let mut map = target_map().write();
    if let Some(keymap) = map.get_mut(&target_id) {
        if let Some(dep) = keymap.get_mut(key) {
            dep.remove(&effect_id);
        }
    }
}

/// Notify every computation depending on `(target, key)` that it changed.
///
/// Gathers the literal key's subscribers, unioned with the iteration
/// subscribers for key-set changes (`Add`/`Delete`) and with every
/// subscriber of the target for `Clear`. Computed runners are invoked
/// first, plain effects second; an effect with a scheduler has the
/// scheduler invoked instead of being re-run. Triggering a target nothing
/// ever tracked is a guaranteed no-op.
pub fn trigger(target: &Obj, op: TriggerOp, key: Option<DepKey>) {
    trigger_raw(target.id(), op, key);
}

pub(crate) fn trigger_raw(target_id: u64, op: TriggerOp, key: Option<DepKey>) {
    let mut ids: HashSet<EffectId> = HashSet::new();
    {
        let map = target_map().read();
        let Some(keymap) = map.get(&target_id) else {
            return;
        };

        if op == TriggerOp::Clear {
            for dep in keymap.values() {
                ids.extend(dep.iter().copied());
            }
        } else {
            if let Some(key) = &key {
                if let Some(dep) = keymap.get(key) {
                    ids.extend(dep.iter().copied());
                }
            }
            if matches!(op, TriggerOp::Add | TriggerOp::Delete) {
                if let Some(dep) = keymap.get(&DepKey::Iterate) {
                    ids.extend(dep.iter().copied());
                }
            }
        }
    }

    if ids.is_empty() {
        return;
    }

    // Resolve ids to live effects, partitioned by kind for the two-pass
    // ordering. Effects whose last handle was dropped are pruned here.
    let mut computed_runners = Vec::new();
    let mut plain_effects = Vec::new();
    let mut dead = Vec::new();
    for id in &ids {
        match effect::lookup(*id) {
            Some(body) => match body.kind() {
                EffectKind::Computed => computed_runners.push(body),
                EffectKind::Plain => plain_effects.push(body),
            },
            None => dead.push(*id),
        }
    }

    if !dead.is_empty() {
        let mut map = target_map().write();
        if let Some(keymap) = map.get_mut(&target_id) {
            for dep in keymap.values_mut() {
                for id in &dead {
                    dep.remove(id);
                }
            }
        }
    }

    tracing::trace!(
        target_id,
        op = %op,
        key = ?key,
        scheduled = computed_runners.len() + plain_effects.len(),
        "trigger"
    );

    // No store lock is held while subscribers run; their own reads and
    // writes re-enter the store freely.
    for body in &computed_runners {
        EffectBody::schedule(body);
    }
    for body in &plain_effects {
        EffectBody::schedule(body);
    }
}
