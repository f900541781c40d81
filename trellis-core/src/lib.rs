//! Trellis Core
//!
//! This crate provides the core dependency-tracking runtime for the
//! Trellis reactive framework. It implements:
//!
//! - A dynamic value model with identity-carrying objects
//! - Interception wrappers (mutable, readonly, shallow-readonly)
//! - Effects with automatic, per-key dependency tracking
//! - Lazily-cached computed values
//!
//! Callers write ordinary reads and writes against wrapped data and
//! dependent computations stay consistent without manual subscription
//! wiring.
//!
//! # Architecture
//!
//! The crate is organized into two modules:
//!
//! - `value`: the dynamic `Value`/`Obj` data model the engine observes
//! - `reactive`: dependency store, effects, wrappers, computed values
//!
//! # Example
//!
//! ```rust,ignore
//! use trellis_core::reactive::{reactive, Computed, Effect};
//! use trellis_core::value::{Obj, Value};
//!
//! let Value::Observed(state) = reactive(Value::Obj(Obj::record_from([("count", 0)]))) else {
//!     unreachable!()
//! };
//!
//! // A derived value, evaluated lazily and cached.
//! let state_for_computed = state.clone();
//! let doubled = Computed::new(move || match state_for_computed.get("count") {
//!     Value::Int(n) => n * 2,
//!     _ => 0,
//! });
//!
//! // An effect that re-runs whenever its reads change.
//! let doubled_for_effect = doubled.clone();
//! let effect = Effect::new(move || {
//!     println!("doubled: {}", doubled_for_effect.value());
//! });
//!
//! state.set("count", 5);
//! // Effect automatically re-runs, prints: "doubled: 10"
//! ```

pub mod reactive;
pub mod value;
