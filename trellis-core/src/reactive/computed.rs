//! Computed Value Implementation
//!
//! A computed value is a cached derived value backed by one lazy effect.
//!
//! # How Computed Values Work
//!
//! 1. Construction does not evaluate anything; the dirty flag starts set.
//!
//! 2. On first read, the runner effect executes the getter, tracking what
//!    it reads, and the result is cached.
//!
//! 3. When a dependency changes, the runner's scheduler only sets the
//!    dirty flag - no eager recomputation. Unread computed values never
//!    waste work.
//!
//! 4. On the next read, a set dirty flag causes one re-evaluation.
//!
//! # Reading a computed inside another effect
//!
//! The runner - not the outer effect - is what subscribes to the underlying
//! data, and its scheduler only flips the dirty flag. For the outer effect
//! to re-run when that data changes, every dependency set the runner
//! belongs to also gains the outer effect as a subscriber after each read.
//! Because computed runners are triggered before plain effects, the outer
//! effect always re-reads through a freshly-marked dirty flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::context;
use super::dep;
use super::effect::{Effect, EffectBody, EffectKind, EffectOptions};

/// A lazily-evaluated, cached derived value.
///
/// Cloning shares the cache and the backing runner.
pub struct Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    body: Arc<ComputedBody<T>>,
}

struct ComputedBody<T>
where
    T: Clone + Send + Sync + 'static,
{
    runner: Effect,
    dirty: Arc<AtomicBool>,
    cache: Arc<RwLock<Option<T>>>,
    setter: Option<Box<dyn Fn(T) + Send + Sync>>,
}

impl<T> Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a readonly computed value from a getter.
    ///
    /// Writes through [`Computed::set_value`] are reported and ignored.
    pub fn new<G>(getter: G) -> Computed<T>
    where
        G: Fn() -> T + Send + Sync + 'static,
    {
        Computed::build(getter, None)
    }

    /// Create a writable computed value: reads go through the cached
    /// getter, writes are delegated to `setter`.
    pub fn with_setter<G, S>(getter: G, setter: S) -> Computed<T>
    where
        G: Fn() -> T + Send + Sync + 'static,
        S: Fn(T) + Send + Sync + 'static,
    {
        Computed::build(getter, Some(Box::new(setter)))
    }

    fn build<G>(getter: G, setter: Option<Box<dyn Fn(T) + Send + Sync>>) -> Computed<T>
    where
        G: Fn() -> T + Send + Sync + 'static,
    {
        let dirty = Arc::new(AtomicBool::new(true));
        let cache: Arc<RwLock<Option<T>>> = Arc::new(RwLock::new(None));

        let runner = {
            let cache = Arc::clone(&cache);
            let scheduler_dirty = Arc::clone(&dirty);
            Effect::with_options(
                move || {
                    *cache.write() = Some(getter());
                },
                EffectOptions {
                    lazy: true,
                    kind: EffectKind::Computed,
                    scheduler: Some(Box::new(move |_effect| {
                        scheduler_dirty.store(true, Ordering::Release);
                    })),
                    on_stop: None,
                },
            )
        };

        Computed {
            body: Arc::new(ComputedBody {
                runner,
                dirty,
                cache,
                setter,
            }),
        }
    }

    /// Read the current value, re-evaluating the getter only if a
    /// dependency changed since the last read.
    ///
    /// When called inside a running effect, that effect inherits every
    /// dependency of the getter, so changes to the underlying data re-run
    /// it even though it never read that data itself.
    pub fn value(&self) -> T {
        if self.body.dirty.load(Ordering::Acquire) {
            self.body.runner.run();
            self.body.dirty.store(false, Ordering::Release);
        }

        track_child_run(self.body.runner.body());

        self.body
            .cache
            .read()
            .clone()
            .expect("evaluated computed has a cached value")
    }

    /// Write through the configured setter. Without one, the write is
    /// reported and ignored.
    pub fn set_value(&self, value: T) {
        match &self.body.setter {
            Some(setter) => setter(value),
            None => {
                tracing::warn!(
                    effect = ?self.body.runner.id(),
                    "write ignored: computed value is readonly"
                );
            }
        }
    }

    /// The backing runner effect.
    pub fn runner(&self) -> &Effect {
        &self.body.runner
    }

    /// Whether the next read will re-evaluate the getter.
    pub fn is_dirty(&self) -> bool {
        self.body.dirty.load(Ordering::Acquire)
    }
}

/// Propagate the runner's subscriptions to the effect currently running,
/// if any: the outer effect joins every dependency set the runner belongs
/// to, as if it had performed those reads itself.
fn track_child_run(runner: &Arc<EffectBody>) {
    let Some(outer) = context::current() else {
        return;
    };
    if !outer.is_active() {
        return;
    }

    for (target_id, key) in runner.deps_snapshot() {
        dep::subscribe(target_id, key, &outer);
    }
}

impl<T> Clone for Computed<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Computed {
            body: Arc::clone(&self.body),
        }
    }
}

impl<T> std::fmt::Debug for Computed<T>
where
    T: Clone + Send + Sync + std::fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Computed")
            .field("dirty", &self.is_dirty())
            .field("cached", &*self.body.cache.read())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
