//! Effect Implementation
//!
//! An effect is the unit of "a computation that depends on reactive reads".
//!
//! # How Effects Work
//!
//! 1. When created (unless lazy), the effect runs its function immediately
//!    to establish initial dependencies.
//!
//! 2. Every run starts by fully unsubscribing from the previous run's
//!    dependency sets, so branches no longer taken stop being tracked. The
//!    reads performed during the run then re-populate the subscriptions.
//!
//! 3. When any dependency changes, the effect is re-run synchronously - or,
//!    if it carries a scheduler, the scheduler is invoked instead. Computed
//!    values are built on exactly this hook: their scheduler only marks
//!    them stale.
//!
//! An effect that writes data it also reads would re-trigger itself; the
//! run entry point skips an effect that is already on the stack, which
//! bounds such self-retrigger loops to the current run.
//!
//! # Lifecycle
//!
//! Stopping an effect detaches it from every dependency set and makes
//! further runs untracked pass-throughs. Dropping the last handle to an
//! effect detaches it as well.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;

use super::context;
use super::dep::{self, DepKey};

/// Counter for generating unique effect ids.
static EFFECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique effect id.
fn next_effect_id() -> EffectId {
    EffectId(EFFECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Unique identifier for an effect.
///
/// Dependency sets hold effect ids rather than owning references, so the
/// subscriber graph stays free of reference cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectId(u64);

/// What kind of computation an effect backs.
///
/// Computed runners are re-run before plain effects during trigger fan-out,
/// so a plain effect re-reading a computed always observes a fresh dirty
/// flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EffectKind {
    /// An ordinary side-effecting computation.
    #[default]
    Plain,
    /// The runner backing a computed value.
    Computed,
}

/// A custom re-run strategy, invoked instead of re-running the effect when
/// one of its dependencies triggers.
pub type Scheduler = Box<dyn Fn(&Effect) + Send + Sync>;

/// Configuration for [`Effect::with_options`].
#[derive(Default)]
pub struct EffectOptions {
    /// Suppress the immediate first run.
    pub lazy: bool,
    /// Fan-out priority class.
    pub kind: EffectKind,
    /// Override for "just re-run" on trigger.
    pub scheduler: Option<Scheduler>,
    /// Invoked once when the effect is stopped.
    pub on_stop: Option<Box<dyn Fn() + Send + Sync>>,
}

/// A back-reference to one dependency set the effect belongs to.
pub(crate) type DepRef = (u64, DepKey);

// Global registry of live effects, keyed by id. Holds weak references so a
// dropped effect simply disappears from trigger fan-out.
static REGISTRY: OnceLock<RwLock<HashMap<EffectId, Weak<EffectBody>>>> = OnceLock::new();

fn registry() -> &'static RwLock<HashMap<EffectId, Weak<EffectBody>>> {
    REGISTRY.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Resolve an effect id to a live effect, if it still exists.
pub(crate) fn lookup(id: EffectId) -> Option<Arc<EffectBody>> {
    registry().read().get(&id).and_then(Weak::upgrade)
}

fn register(body: &Arc<EffectBody>) {
    registry().write().insert(body.id, Arc::downgrade(body));
}

fn unregister(id: EffectId) {
    registry().write().remove(&id);
}

/// Shared state of one effect.
pub(crate) struct EffectBody {
    id: EffectId,
    kind: EffectKind,
    active: AtomicBool,
    func: Box<dyn Fn() + Send + Sync>,
    scheduler: Option<Scheduler>,
    on_stop: Option<Box<dyn Fn() + Send + Sync>>,
    deps: Mutex<SmallVec<[DepRef; 4]>>,
    run_count: AtomicU64,
}

impl EffectBody {
    pub(crate) fn id(&self) -> EffectId {
        self.id
    }

    pub(crate) fn kind(&self) -> EffectKind {
        self.kind
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Record membership in one more dependency set.
    pub(crate) fn push_dep(&self, dep: DepRef) {
        self.deps.lock().push(dep);
    }

    /// A copy of the dependency sets this effect currently belongs to.
    pub(crate) fn deps_snapshot(&self) -> SmallVec<[DepRef; 4]> {
        self.deps.lock().clone()
    }

    /// Run the computation.
    ///
    /// A stopped effect executes its body untracked. An effect already on
    /// the stack is skipped entirely (self-retrigger guard). Otherwise the
    /// effect unsubscribes from every previous dependency, pushes itself
    /// onto the stack, and executes; reads during execution rebuild the
    /// dependency set from scratch.
    pub(crate) fn run(this: &Arc<Self>) {
        if !this.is_active() {
            (this.func)();
            return;
        }
        if context::contains(this.id) {
            return;
        }

        this.cleanup();
        let _frame = context::StackFrame::enter(Arc::clone(this));
        this.run_count.fetch_add(1, Ordering::Relaxed);
        (this.func)();
    }

    /// Invoke the scheduler if one is configured, otherwise re-run.
    pub(crate) fn schedule(this: &Arc<Self>) {
        match &this.scheduler {
            Some(scheduler) => scheduler(&Effect {
                body: Arc::clone(this),
            }),
            None => EffectBody::run(this),
        }
    }

    /// Detach from every dependency set recorded by the previous run.
    fn cleanup(&self) {
        let deps = std::mem::take(&mut *self.deps.lock());
        for (target_id, key) in deps {
            dep::remove_subscriber(target_id, &key, self.id);
        }
    }
}

impl Drop for EffectBody {
    fn drop(&mut self) {
        // Last handle gone: make sure nothing in the store still points here.
        unregister(self.id);
        let deps = std::mem::take(self.deps.get_mut());
        for (target_id, key) in deps {
            dep::remove_subscriber(target_id, &key, self.id);
        }
    }
}

/// A handle to a registered effect.
///
/// Cloning shares the underlying effect. The effect participates in
/// triggering for as long as a handle (or an owner such as a computed
/// value) keeps it alive and it has not been stopped.
pub struct Effect {
    body: Arc<EffectBody>,
}

impl Effect {
    /// Register a computation and run it immediately to establish its
    /// initial dependencies.
    pub fn new<F>(func: F) -> Effect
    where
        F: Fn() + Send + Sync + 'static,
    {
        Effect::with_options(func, EffectOptions::default())
    }

    /// Register a computation with explicit configuration.
    pub fn with_options<F>(func: F, options: EffectOptions) -> Effect
    where
        F: Fn() + Send + Sync + 'static,
    {
        let body = Arc::new(EffectBody {
            id: next_effect_id(),
            kind: options.kind,
            active: AtomicBool::new(true),
            func: Box::new(func),
            scheduler: options.scheduler,
            on_stop: options.on_stop,
            deps: Mutex::new(SmallVec::new()),
            run_count: AtomicU64::new(0),
        });
        register(&body);

        let effect = Effect { body };
        if !options.lazy {
            effect.run();
        }
        effect
    }

    /// The effect's unique id.
    pub fn id(&self) -> EffectId {
        self.body.id
    }

    /// The effect's fan-out priority class.
    pub fn kind(&self) -> EffectKind {
        self.body.kind
    }

    /// Whether the effect still participates in tracking.
    pub fn is_active(&self) -> bool {
        self.body.is_active()
    }

    /// Re-run the computation now: stopped effects execute untracked, an
    /// effect already running is skipped.
    pub fn run(&self) {
        EffectBody::run(&self.body);
    }

    /// Stop the effect: detach it from every dependency set and exclude it
    /// from all future tracking. Invokes the `on_stop` hook once.
    pub fn stop(&self) {
        if self.body.active.swap(false, Ordering::SeqCst) {
            self.body.cleanup();
            unregister(self.body.id);
            if let Some(hook) = &self.body.on_stop {
                hook();
            }
        }
    }

    /// Number of completed tracked runs.
    pub fn run_count(&self) -> u64 {
        self.body.run_count.load(Ordering::Relaxed)
    }

    /// Number of dependency sets the effect currently belongs to.
    pub fn dependency_count(&self) -> usize {
        self.body.deps.lock().len()
    }

    pub(crate) fn body(&self) -> &Arc<EffectBody> {
        &self.body
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Effect {
            body: Arc::clone(&self.body),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("active", &self.is_active())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::dep::{track, trigger, TrackOp, TriggerOp};
    use crate::value::Obj;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn effect_runs_on_creation() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let effect = Effect::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn lazy_effect_does_not_run_on_creation() {
        let runs = Arc::new(AtomicI32::new(0));
        let runs_clone = runs.clone();

        let effect = Effect::with_options(
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            },
            EffectOptions {
                lazy: true,
                ..Default::default()
            },
        );

        assert_eq!(runs.load(Ordering::SeqCst), 0);

        effect.run();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn rerun_rebuilds_the_dependency_set() {
        let obj = Obj::record_from([("a", 1), ("b", 2)]);
        let use_a = Arc::new(AtomicBool::new(true));
        let runs = Arc::new(AtomicI32::new(0));

        let obj_clone = obj.clone();
        let use_a_clone = use_a.clone();
        let runs_clone = runs.clone();
        let effect = Effect::new(move || {
            if use_a_clone.load(Ordering::SeqCst) {
                track(&obj_clone, TrackOp::Get, "a");
            } else {
                track(&obj_clone, TrackOp::Get, "b");
            }
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(effect.dependency_count(), 1);

        // Flip the branch and re-run once; the old subscription must be gone.
        use_a.store(false, Ordering::SeqCst);
        effect.run();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        trigger(&obj, TriggerOp::Set, Some("a".into()));
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        trigger(&obj, TriggerOp::Set, Some("b".into()));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn stopped_effect_is_detached_and_untracked() {
        let obj = Obj::record_from([("a", 1)]);
        let runs = Arc::new(AtomicI32::new(0));

        let obj_clone = obj.clone();
        let runs_clone = runs.clone();
        let effect = Effect::new(move || {
            track(&obj_clone, TrackOp::Get, "a");
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        effect.stop();
        assert!(!effect.is_active());
        assert_eq!(effect.dependency_count(), 0);

        // Triggers no longer reach it.
        trigger(&obj, TriggerOp::Set, Some("a".into()));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // Manual runs still execute the body, but without tracking.
        effect.run();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(effect.dependency_count(), 0);

        trigger(&obj, TriggerOp::Set, Some("a".into()));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stop_invokes_hook_once() {
        let stops = Arc::new(AtomicI32::new(0));
        let stops_clone = stops.clone();

        let effect = Effect::with_options(
            || {},
            EffectOptions {
                on_stop: Some(Box::new(move || {
                    stops_clone.fetch_add(1, Ordering::SeqCst);
                })),
                ..Default::default()
            },
        );

        effect.stop();
        effect.stop();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn scheduler_replaces_direct_rerun() {
        let obj = Obj::record_from([("a", 1)]);
        let runs = Arc::new(AtomicI32::new(0));
        let scheduled = Arc::new(AtomicI32::new(0));

        let obj_clone = obj.clone();
        let runs_clone = runs.clone();
        let scheduled_clone = scheduled.clone();
        let effect = Effect::with_options(
            move || {
                track(&obj_clone, TrackOp::Get, "a");
                runs_clone.fetch_add(1, Ordering::SeqCst);
            },
            EffectOptions {
                scheduler: Some(Box::new(move |_effect| {
                    scheduled_clone.fetch_add(1, Ordering::SeqCst);
                })),
                ..Default::default()
            },
        );
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        trigger(&obj, TriggerOp::Set, Some("a".into()));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(scheduled.load(Ordering::SeqCst), 1);

        // The handle passed to the scheduler can re-run on its own terms.
        effect.run();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn self_retrigger_is_bounded_by_the_stack_guard() {
        let obj = Obj::record_from([("n", 0)]);
        let runs = Arc::new(AtomicI32::new(0));

        let obj_clone = obj.clone();
        let runs_clone = runs.clone();
        let _effect = Effect::new(move || {
            track(&obj_clone, TrackOp::Get, "n");
            runs_clone.fetch_add(1, Ordering::SeqCst);
            // Write to our own dependency mid-run. The resulting trigger
            // must not re-enter this effect.
            trigger(&obj_clone, TriggerOp::Set, Some("n".into()));
        });

        assert_eq!(runs.load(Ordering::SeqCst), 1);

        trigger(&obj, TriggerOp::Set, Some("n".into()));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn dropping_the_last_handle_detaches_the_effect() {
        let obj = Obj::record_from([("a", 1)]);
        let runs = Arc::new(AtomicI32::new(0));

        let obj_clone = obj.clone();
        let runs_clone = runs.clone();
        let effect = Effect::new(move || {
            track(&obj_clone, TrackOp::Get, "a");
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        drop(effect);
        trigger(&obj, TriggerOp::Set, Some("a".into()));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn effect_clone_shares_state() {
        let first = Effect::new(|| {});
        let second = first.clone();

        assert_eq!(first.id(), second.id());

        first.stop();
        assert!(!second.is_active());
    }
}
