//! Dynamic Value Model
//!
//! The reactive engine observes dynamic data aggregates rather than static
//! structs. This module provides that data model: a [`Value`] tree of
//! scalars, shared objects ([`Obj`]), reference holders, and interception
//! wrappers.
//!
//! # Identity
//!
//! Every [`Obj`] (and every [`Reference`]) carries a unique `u64` identity
//! assigned at construction. The engine's side tables (the dependency store,
//! the wrapper registries) key on that identity and never own the data.
//! Cloning an `Obj` clones a handle to the same underlying aggregate; the
//! identity is shared.
//!
//! # Raw access
//!
//! All accessors on `Obj` itself are raw: they do not track reads and do not
//! notify observers on writes. Observation happens through the `Observed`
//! wrapper produced by `reactive::reactive` and friends.

use std::fmt::Debug;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::reactive::{Observed, Reference};

/// Counter for raw identities.
///
/// Shared by objects and reference holders so that identities never collide
/// inside the identity-keyed side tables.
static RAW_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique raw identity.
pub(crate) fn next_raw_id() -> u64 {
    RAW_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A property key addressing one slot of an [`Obj`].
///
/// Records are addressed by string keys, lists by indices.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum PropKey {
    /// A record field name.
    Str(Arc<str>),
    /// A list position.
    Index(usize),
}

impl From<&str> for PropKey {
    fn from(key: &str) -> Self {
        PropKey::Str(Arc::from(key))
    }
}

impl From<String> for PropKey {
    fn from(key: String) -> Self {
        PropKey::Str(Arc::from(key.as_str()))
    }
}

impl From<Arc<str>> for PropKey {
    fn from(key: Arc<str>) -> Self {
        PropKey::Str(key)
    }
}

impl From<usize> for PropKey {
    fn from(index: usize) -> Self {
        PropKey::Index(index)
    }
}

impl std::fmt::Display for PropKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropKey::Str(key) => write!(f, "{key}"),
            PropKey::Index(index) => write!(f, "{index}"),
        }
    }
}

/// A dynamic value.
///
/// Scalars are stored inline; strings, objects, references, and wrappers are
/// cheap handle clones. `Value` equality is structural for scalars and
/// identity-based for objects, references, and wrappers (see
/// [`Value::same`]).
#[derive(Clone, Debug, Default)]
pub enum Value {
    /// The absent/unset value. Reading a missing key yields `Null`.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A signed integer.
    Int(i64),
    /// A double-precision float.
    Float(f64),
    /// An immutable shared string.
    Str(Arc<str>),
    /// A raw, unobserved object.
    Obj(Obj),
    /// A reference holder (see `reactive::Reference`).
    Ref(Reference),
    /// An interception wrapper (see `reactive::Observed`).
    Observed(Observed),
}

impl Value {
    /// A short name for the value's kind, used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Obj(_) => "object",
            Value::Ref(_) => "reference",
            Value::Observed(_) => "observed object",
        }
    }

    /// Capability check: is this value a reference holder?
    pub fn is_ref(&self) -> bool {
        matches!(self, Value::Ref(_))
    }

    /// Change detection used by the write handlers.
    ///
    /// Identical to `==` except that two NaN floats compare as unchanged,
    /// so re-assigning NaN over NaN does not retrigger observers.
    pub fn same(a: &Value, b: &Value) -> bool {
        if let (Value::Float(x), Value::Float(y)) = (a, b) {
            return x == y || (x.is_nan() && y.is_nan());
        }
        a == b
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => a.id() == b.id(),
            (Value::Ref(a), Value::Ref(b)) => a.id() == b.id(),
            (Value::Observed(a), Value::Observed(b)) => Observed::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v.as_str()))
    }
}

impl From<Obj> for Value {
    fn from(v: Obj) -> Self {
        Value::Obj(v)
    }
}

impl From<Reference> for Value {
    fn from(v: Reference) -> Self {
        Value::Ref(v)
    }
}

impl From<Observed> for Value {
    fn from(v: Observed) -> Self {
        Value::Observed(v)
    }
}

/// Error returned by the strict [`TryFrom`] conversions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected {expected}, found {found}")]
pub struct TypeMismatch {
    /// The kind the conversion required.
    pub expected: &'static str,
    /// The kind the value actually had.
    pub found: &'static str,
}

macro_rules! strict_conversion {
    ($ty:ty, $variant:ident, $expected:literal) => {
        impl TryFrom<Value> for $ty {
            type Error = TypeMismatch;

            fn try_from(value: Value) -> Result<Self, Self::Error> {
                match value {
                    Value::$variant(v) => Ok(v.into()),
                    other => Err(TypeMismatch {
                        expected: $expected,
                        found: other.kind_name(),
                    }),
                }
            }
        }
    };
}

strict_conversion!(bool, Bool, "bool");
strict_conversion!(i64, Int, "int");
strict_conversion!(f64, Float, "float");
strict_conversion!(Obj, Obj, "object");

impl TryFrom<Value> for String {
    type Error = TypeMismatch;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Str(v) => Ok(v.as_ref().to_owned()),
            other => Err(TypeMismatch {
                expected: "string",
                found: other.kind_name(),
            }),
        }
    }
}

// Marker flag bits on an object's identity.
const FLAG_READONLY: u8 = 0b01;
const FLAG_NON_REACTIVE: u8 = 0b10;

/// A shared dynamic aggregate: a record (ordered string-keyed map) or a list.
///
/// `Obj` is a handle; cloning shares the underlying data and identity.
pub struct Obj {
    inner: Arc<ObjInner>,
}

struct ObjInner {
    id: u64,
    flags: AtomicU8,
    data: RwLock<ObjData>,
}

enum ObjData {
    Record(IndexMap<Arc<str>, Value>),
    List(Vec<Value>),
}

/// Outcome of a keyed write, reported to the interception handlers.
pub(crate) enum PropWrite {
    /// The key did not previously exist.
    Added,
    /// The key existed and the stored value changed.
    Changed,
    /// The key existed and the new value is the same as the old.
    Unchanged,
    /// The existing slot holds a reference and the incoming value is not
    /// one; the assignment must route through the holder's own setter.
    RouteRef { holder: Reference, value: Value },
    /// List write past the end.
    OutOfBounds,
    /// Key shape does not match the aggregate shape.
    KeyMismatch,
}

/// Outcome of a keyed removal.
pub(crate) enum PropRemove {
    Removed,
    Missing,
    KeyMismatch,
}

impl Obj {
    fn from_data(data: ObjData) -> Obj {
        Obj {
            inner: Arc::new(ObjInner {
                id: next_raw_id(),
                flags: AtomicU8::new(0),
                data: RwLock::new(data),
            }),
        }
    }

    /// Create an empty record.
    pub fn record() -> Obj {
        Obj::from_data(ObjData::Record(IndexMap::new()))
    }

    /// Create a record from key/value pairs, preserving their order.
    pub fn record_from<K, V, I>(pairs: I) -> Obj
    where
        K: Into<Arc<str>>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let map = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Obj::from_data(ObjData::Record(map))
    }

    /// Create an empty list.
    pub fn list() -> Obj {
        Obj::from_data(ObjData::List(Vec::new()))
    }

    /// Create a list from values.
    pub fn list_from<V, I>(values: I) -> Obj
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        let items = values.into_iter().map(Into::into).collect();
        Obj::from_data(ObjData::List(items))
    }

    /// The object's unique identity.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether this object is a record.
    pub fn is_record(&self) -> bool {
        matches!(&*self.inner.data.read(), ObjData::Record(_))
    }

    /// Whether this object is a list.
    pub fn is_list(&self) -> bool {
        matches!(&*self.inner.data.read(), ObjData::List(_))
    }

    /// Raw read. Returns [`Value::Null`] for missing keys. Does not track.
    pub fn get(&self, key: impl Into<PropKey>) -> Value {
        self.read_prop(&key.into())
    }

    /// Raw record insert. Does not notify observers.
    ///
    /// Returns `false` (with a diagnostic) when called on a list.
    pub fn insert(&self, key: impl Into<Arc<str>>, value: impl Into<Value>) -> bool {
        let mut data = self.inner.data.write();
        match &mut *data {
            ObjData::Record(map) => {
                map.insert(key.into(), value.into());
                true
            }
            ObjData::List(_) => {
                tracing::warn!(target_id = self.id(), "insert called on a list");
                false
            }
        }
    }

    /// Raw list append. Does not notify observers.
    ///
    /// Returns `false` (with a diagnostic) when called on a record.
    pub fn push(&self, value: impl Into<Value>) -> bool {
        let mut data = self.inner.data.write();
        match &mut *data {
            ObjData::List(items) => {
                items.push(value.into());
                true
            }
            ObjData::Record(_) => {
                tracing::warn!(target_id = self.id(), "push called on a record");
                false
            }
        }
    }

    /// Raw removal. Returns whether the key was present. Does not notify.
    pub fn remove(&self, key: impl Into<PropKey>) -> bool {
        matches!(self.remove_prop(&key.into()), PropRemove::Removed)
    }

    /// Raw existence check. Does not track.
    pub fn contains(&self, key: impl Into<PropKey>) -> bool {
        self.has_prop(&key.into())
    }

    /// Raw key enumeration in storage order. Does not track.
    pub fn keys(&self) -> Vec<PropKey> {
        self.own_keys()
    }

    /// Number of entries. Does not track.
    pub fn len(&self) -> usize {
        match &*self.inner.data.read() {
            ObjData::Record(map) => map.len(),
            ObjData::List(items) => items.len(),
        }
    }

    /// Whether the aggregate has no entries. Does not track.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn read_prop(&self, key: &PropKey) -> Value {
        let data = self.inner.data.read();
        match (&*data, key) {
            (ObjData::Record(map), PropKey::Str(k)) => {
                map.get(k.as_ref()).cloned().unwrap_or(Value::Null)
            }
            (ObjData::List(items), PropKey::Index(i)) => {
                items.get(*i).cloned().unwrap_or(Value::Null)
            }
            _ => Value::Null,
        }
    }

    pub(crate) fn has_prop(&self, key: &PropKey) -> bool {
        let data = self.inner.data.read();
        match (&*data, key) {
            (ObjData::Record(map), PropKey::Str(k)) => map.contains_key(k.as_ref()),
            (ObjData::List(items), PropKey::Index(i)) => *i < items.len(),
            _ => false,
        }
    }

    pub(crate) fn own_keys(&self) -> Vec<PropKey> {
        let data = self.inner.data.read();
        match &*data {
            ObjData::Record(map) => map.keys().cloned().map(PropKey::Str).collect(),
            ObjData::List(items) => (0..items.len()).map(PropKey::Index).collect(),
        }
    }

    /// Write one slot under a single lock acquisition, reporting what
    /// happened so the caller can decide whether and how to trigger.
    pub(crate) fn write_prop(&self, key: &PropKey, value: Value) -> PropWrite {
        let mut data = self.inner.data.write();
        match (&mut *data, key) {
            (ObjData::Record(map), PropKey::Str(k)) => match map.get(k.as_ref()) {
                Some(old) => {
                    if let Value::Ref(holder) = old {
                        if !value.is_ref() {
                            let holder = holder.clone();
                            return PropWrite::RouteRef { holder, value };
                        }
                    }
                    let changed = !Value::same(old, &value);
                    map.insert(k.clone(), value);
                    if changed {
                        PropWrite::Changed
                    } else {
                        PropWrite::Unchanged
                    }
                }
                None => {
                    map.insert(k.clone(), value);
                    PropWrite::Added
                }
            },
            (ObjData::List(items), PropKey::Index(i)) => {
                if *i < items.len() {
                    let old = &items[*i];
                    if let Value::Ref(holder) = old {
                        if !value.is_ref() {
                            let holder = holder.clone();
                            return PropWrite::RouteRef { holder, value };
                        }
                    }
                    let changed = !Value::same(old, &value);
                    items[*i] = value;
                    if changed {
                        PropWrite::Changed
                    } else {
                        PropWrite::Unchanged
                    }
                } else if *i == items.len() {
                    items.push(value);
                    PropWrite::Added
                } else {
                    PropWrite::OutOfBounds
                }
            }
            _ => PropWrite::KeyMismatch,
        }
    }

    pub(crate) fn remove_prop(&self, key: &PropKey) -> PropRemove {
        let mut data = self.inner.data.write();
        match (&mut *data, key) {
            (ObjData::Record(map), PropKey::Str(k)) => {
                // shift_remove keeps the remaining enumeration order stable.
                if map.shift_remove(k.as_ref()).is_some() {
                    PropRemove::Removed
                } else {
                    PropRemove::Missing
                }
            }
            (ObjData::List(items), PropKey::Index(i)) => {
                if *i < items.len() {
                    items.remove(*i);
                    PropRemove::Removed
                } else {
                    PropRemove::Missing
                }
            }
            _ => PropRemove::KeyMismatch,
        }
    }

    /// Remove every entry. Returns whether anything was removed.
    pub(crate) fn clear_all(&self) -> bool {
        let mut data = self.inner.data.write();
        match &mut *data {
            ObjData::Record(map) => {
                let had = !map.is_empty();
                map.clear();
                had
            }
            ObjData::List(items) => {
                let had = !items.is_empty();
                items.clear();
                had
            }
        }
    }

    pub(crate) fn mark_readonly(&self) {
        self.inner.flags.fetch_or(FLAG_READONLY, Ordering::Release);
    }

    pub(crate) fn is_marked_readonly(&self) -> bool {
        self.inner.flags.load(Ordering::Acquire) & FLAG_READONLY != 0
    }

    pub(crate) fn mark_non_reactive(&self) {
        self.inner
            .flags
            .fetch_or(FLAG_NON_REACTIVE, Ordering::Release);
    }

    pub(crate) fn is_marked_non_reactive(&self) -> bool {
        self.inner.flags.load(Ordering::Acquire) & FLAG_NON_REACTIVE != 0
    }
}

impl Clone for Obj {
    fn clone(&self) -> Self {
        Obj {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Debug for Obj {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shape = if self.is_record() { "record" } else { "list" };
        f.debug_struct("Obj")
            .field("id", &self.id())
            .field("shape", &shape)
            .field("len", &self.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Serde support
// ----------------------------------------------------------------------------

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(v) => serializer.serialize_bool(*v),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Str(v) => serializer.serialize_str(v),
            Value::Obj(obj) => obj.serialize(serializer),
            // Wrappers and references serialize through to the data they
            // stand in front of.
            Value::Observed(observed) => observed.raw().serialize(serializer),
            Value::Ref(holder) => holder.get_untracked().serialize(serializer),
        }
    }
}

impl Serialize for Obj {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let data = self.inner.data.read();
        match &*data {
            ObjData::Record(map) => {
                let mut state = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    state.serialize_entry(key.as_ref(), value)?;
                }
                state.end()
            }
            ObjData::List(items) => {
                let mut state = serializer.serialize_seq(Some(items.len()))?;
                for value in items {
                    state.serialize_element(value)?;
                }
                state.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ValueVisitor;

        impl<'de> Visitor<'de> for ValueVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a scalar, sequence, or map")
            }

            fn visit_unit<E>(self) -> Result<Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Value::Null)
            }

            fn visit_none<E>(self) -> Result<Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Value::Null)
            }

            fn visit_some<D>(self, deserializer: D) -> Result<Value, D::Error>
            where
                D: Deserializer<'de>,
            {
                Deserialize::deserialize(deserializer)
            }

            fn visit_bool<E>(self, v: bool) -> Result<Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Value::Bool(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Value::Int(v))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Value, E>
            where
                E: serde::de::Error,
            {
                if v <= i64::MAX as u64 {
                    Ok(Value::Int(v as i64))
                } else {
                    Ok(Value::Float(v as f64))
                }
            }

            fn visit_f64<E>(self, v: f64) -> Result<Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Value::Float(v))
            }

            fn visit_str<E>(self, v: &str) -> Result<Value, E>
            where
                E: serde::de::Error,
            {
                Ok(Value::Str(Arc::from(v)))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let obj = Obj::list();
                while let Some(value) = seq.next_element::<Value>()? {
                    obj.push(value);
                }
                Ok(Value::Obj(obj))
            }

            fn visit_map<A>(self, mut map: A) -> Result<Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let obj = Obj::record();
                while let Some((key, value)) = map.next_entry::<String, Value>()? {
                    obj.insert(key, value);
                }
                Ok(Value::Obj(obj))
            }
        }

        deserializer.deserialize_any(ValueVisitor)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
