//! Reactive Core
//!
//! This module implements the dependency-tracking runtime: observed
//! wrappers, effects, and computed values.
//!
//! # Concepts
//!
//! ## Observed wrappers
//!
//! [`reactive`] wraps a raw object in an interception wrapper. Reads
//! through the wrapper register the running computation as a dependent of
//! the exact (object, key) pair that was read; writes notify exactly those
//! dependents. [`readonly`] and [`shallow_readonly`] produce the
//! write-gated variants.
//!
//! ## Effects
//!
//! An [`Effect`] is a computation that re-runs when anything it read
//! through a wrapper changes. Dependencies are rebuilt from scratch on
//! every run, so conditional reads shrink and reshape the dependency set
//! run over run.
//!
//! ## Computed values
//!
//! A [`Computed`] is a cached derived value. It evaluates lazily on first
//! read, and a dependency change only marks it stale - the next read pays
//! for recomputation.
//!
//! # Implementation Notes
//!
//! Reads attribute themselves to the top of a thread-local effect stack;
//! no explicit subscription wiring is needed. This transparent-tracking
//! approach is the one used by SolidJS, Vue 3, and MobX.

mod computed;
mod context;
mod dep;
mod effect;
mod handlers;
mod lock;
mod reference;
mod registry;

pub use computed::Computed;
pub use context::is_tracking;
pub use dep::{track, trigger, DepKey, TrackOp, TriggerOp};
pub use effect::{Effect, EffectId, EffectKind, EffectOptions, Scheduler};
pub use handlers::{ObserveKind, Observed};
pub use lock::{is_locked, lock, unlock};
pub use reference::Reference;
pub use registry::{
    is_reactive, is_readonly, mark_non_reactive, mark_readonly, reactive, readonly,
    shallow_readonly, to_raw,
};
