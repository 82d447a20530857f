//! Executor implementation: state core, dispatch protocol, task lifecycle

use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use tokio::sync::{broadcast, watch};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, warn};

use crate::descriptor::{Destination, RepeatPolicy, Transition};
use crate::error::ExecError;
use crate::handlers::{DescriptorFn, Handler, HandlerFn, RecoverFn};
use crate::registry::HandlerRegistry;
use crate::types::{ActionRole, BackgroundMarker, ExecResult, MachineAction, MachineState, NoMarker};

/// Default capacity of the action-occurred broadcast stream.
const ACTION_STREAM_CAPACITY: usize = 64;

/// Concurrent, guarded state-transition executor for one machine.
///
/// The executor owns the single current state, a registry of async handlers
/// keyed by action kind, and the action-to-descriptor mapping supplied at
/// construction. Dispatching an action runs a fixed protocol: lookup and
/// zero-handler check, guard and collision evaluation, immediate state
/// effects, then concurrent handler fan-out on a spawned task, and finally
/// settlement (destination commit or error handling, bookkeeping release).
///
/// Cloning is cheap; all clones share the same machine. Dispatch entry
/// points must be called from within a Tokio runtime.
pub struct Executor<S, A: MachineAction, M = NoMarker> {
    shared: Arc<Shared<S, A, M>>,
}

impl<S, A: MachineAction, M> Clone for Executor<S, A, M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

struct Shared<S, A: MachineAction, M> {
    core: Mutex<Core<S, A::Key, M>>,
    registry: RwLock<HandlerRegistry<A>>,
    descriptors: DescriptorFn<S, A, M>,
    action_tx: broadcast::Sender<A>,
    state_rx: watch::Receiver<S>,
    error_rx: watch::Receiver<Option<ExecError>>,
    markers_rx: watch::Receiver<HashSet<M>>,
}

/// Mutable machine state, guarded by one mutex. Never held across an await.
struct Core<S, K, M> {
    state_tx: watch::Sender<S>,
    error_tx: watch::Sender<Option<ExecError>>,
    markers_tx: watch::Sender<HashSet<M>>,
    /// Active markers with a count per marker value, so overlapping
    /// dispatches sharing a marker keep it active until the last one ends.
    markers: HashMap<M, usize>,
    in_flight: HashMap<K, InFlight<M>>,
    foreground: Option<Claim<K>>,
    generation: u64,
}

/// Bookkeeping for one live dispatch task.
struct InFlight<M> {
    generation: u64,
    abort: AbortHandle,
    marker: Option<M>,
    foreground: bool,
}

/// The foreground occupancy slot: which dispatch currently owns the
/// machine's single visible transition.
#[derive(Clone, Copy)]
struct Claim<K> {
    key: K,
    generation: u64,
}

/// Everything a spawned dispatch task needs, captured before the spawn.
struct Dispatch<S, A: MachineAction, M> {
    action: A,
    generation: u64,
    origin: S,
    destination: Option<Destination<S>>,
    recovery: Option<RecoverFn>,
    debounce: Option<Duration>,
    marker: Option<M>,
    background: bool,
    handlers: Vec<HandlerFn<A>>,
}

impl<S, K, M> Core<S, K, M>
where
    S: MachineState,
    K: Copy + Debug + Eq + Hash,
    M: BackgroundMarker,
{
    fn current_state(&self) -> S {
        self.state_tx.borrow().clone()
    }

    fn commit_state(&mut self, next: S) {
        debug!("State committed: {:?}", next);
        let _ = self.state_tx.send(next);
    }

    fn record_error(&mut self, err: ExecError) {
        debug!("Error recorded: {}", err);
        let _ = self.error_tx.send(Some(err));
    }

    fn next_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// True while the dispatch identified by `(key, generation)` still owns
    /// its in-flight entry. A false result means a canceller or preempting
    /// dispatch removed the entry and reversed the bookkeeping already.
    fn owns(&self, key: K, generation: u64) -> bool {
        self.in_flight
            .get(&key)
            .map(|entry| entry.generation == generation)
            .unwrap_or(false)
    }

    fn add_marker(&mut self, marker: M) {
        let count = self.markers.entry(marker).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.publish_markers();
        }
    }

    fn remove_marker(&mut self, marker: &M) {
        if let Some(count) = self.markers.get_mut(marker) {
            *count -= 1;
            if *count == 0 {
                self.markers.remove(marker);
                self.publish_markers();
            }
        }
    }

    fn publish_markers(&mut self) {
        let _ = self.markers_tx.send(self.markers.keys().cloned().collect());
    }

    fn release_claim(&mut self, key: K, generation: u64) {
        if let Some(claim) = self.foreground {
            if claim.key == key && claim.generation == generation {
                self.foreground = None;
            }
        }
    }

    /// Abort one in-flight dispatch and reverse its bookkeeping. Returns
    /// false if nothing was in flight for `key`.
    fn cancel_entry(&mut self, key: K) -> bool {
        match self.in_flight.remove(&key) {
            Some(entry) => {
                entry.abort.abort();
                if let Some(marker) = &entry.marker {
                    self.remove_marker(marker);
                }
                if entry.foreground {
                    self.release_claim(key, entry.generation);
                }
                true
            }
            None => false,
        }
    }

    /// Abort every in-flight dispatch, clear the foreground slot and all
    /// markers.
    fn cancel_all_entries(&mut self) {
        for (_, entry) in self.in_flight.drain() {
            entry.abort.abort();
        }
        self.foreground = None;
        if !self.markers.is_empty() {
            self.markers.clear();
            self.publish_markers();
        }
    }

    /// Settle an unrecovered failure. With a designated error state the
    /// whole machine fault-stops: every other in-flight dispatch is
    /// cancelled and the machine lands in the error state. Without one the
    /// failure stays local: `rollback` (the dispatch's origin state, for
    /// foreground dispatches) is restored and everything else keeps
    /// running.
    fn apply_error_policy(&mut self, err: ExecError, rollback: Option<S>) {
        match S::error_state() {
            Some(error_state) => {
                self.cancel_all_entries();
                self.commit_state(error_state);
                self.record_error(err);
            }
            None => {
                if let Some(origin) = rollback {
                    self.commit_state(origin);
                }
                self.record_error(err);
            }
        }
    }
}

impl<S, A, M> Executor<S, A, M>
where
    S: MachineState,
    A: MachineAction,
    M: BackgroundMarker,
{
    /// Create an executor in `S::initial()` with the given
    /// action-to-descriptor mapping.
    ///
    /// The mapping must be total: it is consulted once per dispatch with
    /// the action and the state current at that moment.
    pub fn new<D>(descriptors: D) -> Self
    where
        D: Fn(&A, &S) -> Transition<S, M> + Send + Sync + 'static,
    {
        Self::with_action_capacity(descriptors, ACTION_STREAM_CAPACITY)
    }

    /// Like [`Executor::new`], with an explicit capacity for the
    /// action-occurred broadcast stream. Slow subscribers that fall more
    /// than `capacity` actions behind observe a lag error, not a stall.
    pub fn with_action_capacity<D>(descriptors: D, capacity: usize) -> Self
    where
        D: Fn(&A, &S) -> Transition<S, M> + Send + Sync + 'static,
    {
        let (state_tx, state_rx) = watch::channel(S::initial());
        let (error_tx, error_rx) = watch::channel(None);
        let (markers_tx, markers_rx) = watch::channel(HashSet::new());
        let (action_tx, _) = broadcast::channel(capacity.max(1));

        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core {
                    state_tx,
                    error_tx,
                    markers_tx,
                    markers: HashMap::new(),
                    in_flight: HashMap::new(),
                    foreground: None,
                    generation: 0,
                }),
                registry: RwLock::new(HandlerRegistry::new()),
                descriptors: Box::new(descriptors),
                action_tx,
                state_rx,
                error_rx,
                markers_rx,
            }),
        }
    }

    /// Register an async closure handler for one action kind.
    ///
    /// Handlers accumulate: all handlers of a kind run concurrently on each
    /// dispatch, each with its own clone of the action.
    pub fn add_handler<F, Fut>(&self, key: A::Key, handler: F)
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ExecResult<()>> + Send + 'static,
    {
        let func: HandlerFn<A> = Arc::new(move |action| Box::pin(handler(action)));
        self.shared
            .registry
            .write()
            .expect("lock poisoned")
            .register(key, func);
    }

    /// Register an object-safe [`Handler`] for one action kind.
    pub fn add_hook(&self, key: A::Key, hook: Arc<dyn Handler<A>>) {
        let func: HandlerFn<A> = Arc::new(move |action| {
            let hook = Arc::clone(&hook);
            Box::pin(async move { hook.handle(action).await })
        });
        self.shared
            .registry
            .write()
            .expect("lock poisoned")
            .register(key, func);
    }

    /// Dispatch an action without waiting for it to settle.
    ///
    /// Everything up to the immediate state effects happens before this
    /// returns; handler fan-out continues on a spawned task.
    pub fn dispatch(&self, action: A) {
        let _ = self.begin(action, false);
    }

    /// Dispatch an action as background work: no foreground claim, no state
    /// commits, only the descriptor's marker held active while handlers
    /// run.
    pub fn dispatch_background(&self, action: A) {
        let _ = self.begin(action, true);
    }

    /// Dispatch an action and wait until it fully settles: handlers
    /// finished, final state committed, bookkeeping released.
    ///
    /// A dispatch dropped by a guard or collision policy settles
    /// immediately; one cancelled mid-flight settles when its task is torn
    /// down.
    pub async fn send(&self, action: A) {
        settle(self.begin(action, false)).await;
    }

    /// Background counterpart of [`Executor::send`].
    pub async fn send_background(&self, action: A) {
        settle(self.begin(action, true)).await;
    }

    /// Cancel the in-flight dispatch of one action kind, if any.
    ///
    /// The task is aborted at its next await point; the marker and
    /// foreground claim it held are released. States already committed stay
    /// committed.
    pub fn cancel(&self, key: A::Key) {
        let mut core = self.lock_core();
        if core.cancel_entry(key) {
            debug!("Cancelled in-flight dispatch of {:?}", key);
        }
    }

    /// Cancel every in-flight dispatch and clear all markers.
    pub fn cancel_all(&self) {
        let mut core = self.lock_core();
        let count = core.in_flight.len();
        core.cancel_all_entries();
        if count > 0 {
            debug!("Cancelled {} in-flight dispatches", count);
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> S {
        self.shared.state_rx.borrow().clone()
    }

    /// The most recent unrecovered failure, if any. Never cleared
    /// automatically; each new failure replaces the previous one.
    pub fn last_error(&self) -> Option<ExecError> {
        self.shared.error_rx.borrow().clone()
    }

    /// Snapshot of the currently active background markers.
    pub fn active_markers(&self) -> HashSet<M> {
        self.shared.markers_rx.borrow().clone()
    }

    /// True while a dispatch of `key` is in flight (debounce wait
    /// included).
    pub fn is_in_flight(&self, key: A::Key) -> bool {
        self.lock_core().in_flight.contains_key(&key)
    }

    /// Number of in-flight dispatches, foreground and background.
    pub fn in_flight_count(&self) -> usize {
        self.lock_core().in_flight.len()
    }

    /// Watch the current state. The receiver always holds the latest
    /// value; intermediate commits between reads may be skipped.
    pub fn watch_state(&self) -> watch::Receiver<S> {
        self.shared.state_rx.clone()
    }

    /// Watch the most recent unrecovered failure.
    pub fn watch_error(&self) -> watch::Receiver<Option<ExecError>> {
        self.shared.error_rx.clone()
    }

    /// Watch the set of active background markers.
    pub fn watch_markers(&self) -> watch::Receiver<HashSet<M>> {
        self.shared.markers_rx.clone()
    }

    /// Subscribe to the action-occurred stream: every dispatched action is
    /// published here before any protocol step runs, dropped ones
    /// included.
    pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
        self.shared.action_tx.subscribe()
    }

    fn lock_core(&self) -> MutexGuard<'_, Core<S, A::Key, M>> {
        self.shared.core.lock().expect("lock poisoned")
    }

    /// Run the dispatch protocol up to the spawn. Returns the task handle
    /// when handler fan-out is in flight, `None` when the dispatch settled
    /// inline (dropped, or a cancel action).
    fn begin(&self, action: A, background: bool) -> Option<JoinHandle<()>> {
        // The action-occurred stream sees every dispatch attempt, before
        // any protocol step can drop it.
        let _ = self.shared.action_tx.send(action.clone());

        match action.role() {
            ActionRole::Normal => self.spawn_normal(action, background),
            ActionRole::Cancel => {
                self.run_cancel(&action);
                None
            }
            ActionRole::Inject(err) => Some(self.spawn_injected(action, err)),
        }
    }

    /// A cancel-role action: tear down all in-flight work, then apply the
    /// descriptor's state commits inline. No handlers run.
    fn run_cancel(&self, action: &A) {
        let mut core = self.lock_core();
        debug!("Cancel action {:?} dispatched", action.key());
        core.cancel_all_entries();

        let state = core.current_state();
        let desc = (self.shared.descriptors)(action, &state);
        if let Some(intermediate) = desc.intermediate {
            core.commit_state(intermediate);
        }
        if let Some(Destination::To(destination)) = desc.destination {
            core.commit_state(destination);
        }
    }

    /// An error-injection action: skip handlers entirely and hand the
    /// carried error to the descriptor's recovery handler, then to the
    /// error policy.
    fn spawn_injected(&self, action: A, err: ExecError) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        let key = action.key();

        let mut core = self.lock_core();
        let state = core.current_state();
        let recovery = (shared.descriptors)(&action, &state).recovery;
        debug!("Error action {:?} dispatched: {}", key, err);

        // A still-running injection for the same kind is preempted.
        core.cancel_entry(key);
        let generation = core.next_generation();
        let handle = tokio::spawn(run_injected(
            Arc::clone(&shared),
            key,
            generation,
            err,
            recovery,
        ));
        core.in_flight.insert(
            key,
            InFlight {
                generation,
                abort: handle.abort_handle(),
                marker: None,
                foreground: false,
            },
        );
        handle
    }

    /// Phases before the spawn for a normal-role action: zero-handler
    /// check, guards, collision policy, occupancy, immediate effects.
    fn spawn_normal(&self, action: A, background: bool) -> Option<JoinHandle<()>> {
        let key = action.key();
        let handlers = self
            .shared
            .registry
            .read()
            .expect("lock poisoned")
            .handlers_for(key);
        if handlers.is_empty() {
            error!("Dispatch of {:?} dropped: no handlers registered", key);
            return None;
        }

        let mut core = self.lock_core();
        let state = core.current_state();
        let desc = (self.shared.descriptors)(&action, &state);

        // Guards evaluate against the state before any effect.
        if let Some(required) = &desc.required {
            if required.is_empty() {
                warn!("Dispatch of {:?} dropped: required-states list is empty", key);
                return None;
            }
            if !required.contains(&state) {
                debug!(
                    "Dispatch of {:?} dropped by required-states guard in {:?}",
                    key, state
                );
                return None;
            }
        }
        if let Some(invalid) = &desc.invalid {
            if invalid.is_empty() {
                warn!("Invalid-states list of {:?} is empty", key);
            } else if invalid.contains(&state) {
                debug!(
                    "Dispatch of {:?} dropped by invalid-states guard in {:?}",
                    key, state
                );
                return None;
            }
        }

        // Same-kind collision. Under Ignore the newcomer is dropped here;
        // under Cancel the in-flight dispatch is preempted below, after the
        // newcomer's effects are in place, so a shared marker never
        // flickers off.
        let preempt = core.in_flight.contains_key(&key);
        if preempt && desc.repeat == RepeatPolicy::Ignore {
            debug!("Dispatch of {:?} dropped: already in flight", key);
            return None;
        }

        let effective_background = background || desc.is_background();
        let generation = core.next_generation();

        if !effective_background {
            if let Some(claim) = core.foreground {
                if claim.key != key {
                    warn!(
                        "Foreground dispatch of {:?} started while {:?} holds the slot",
                        key, claim.key
                    );
                }
            }
            core.foreground = Some(Claim { key, generation });
        }

        // Immediate effects: intermediate commit (foreground only) and
        // marker activation (background only).
        let origin = state;
        if !effective_background {
            if let Some(intermediate) = desc.intermediate.clone() {
                core.commit_state(intermediate);
            }
        }
        let marker = if effective_background {
            desc.marker.clone()
        } else {
            None
        };
        if let Some(m) = marker.clone() {
            core.add_marker(m);
        }

        if preempt {
            debug!("Preempting in-flight dispatch of {:?}", key);
            core.cancel_entry(key);
        }

        debug!(
            "Dispatching {:?} ({} handlers, background: {})",
            key,
            handlers.len(),
            effective_background
        );

        let plan = Dispatch {
            action,
            generation,
            origin,
            destination: desc.destination.clone(),
            recovery: desc.recovery.clone(),
            debounce: desc.debounce,
            marker: marker.clone(),
            background: effective_background,
            handlers,
        };
        let handle = tokio::spawn(run_dispatch(Arc::clone(&self.shared), plan));
        core.in_flight.insert(
            key,
            InFlight {
                generation,
                abort: handle.abort_handle(),
                marker,
                foreground: !effective_background,
            },
        );
        Some(handle)
    }
}

/// Debounce wait, handler fan-out, and settlement for one normal dispatch.
/// Runs on its own task so cancellation can abort it as a unit.
async fn run_dispatch<S, A, M>(shared: Arc<Shared<S, A, M>>, plan: Dispatch<S, A, M>)
where
    S: MachineState,
    A: MachineAction,
    M: BackgroundMarker,
{
    if let Some(delay) = plan.debounce {
        tokio::time::sleep(delay).await;
    }

    let runs = plan.handlers.iter().map(|handler| {
        contain_panic(handler(plan.action.clone()), |msg| {
            ExecError::Handler(format!("handler panicked: {}", msg))
        })
    });
    // Failures never cancel sibling handlers; the dispatch settles once
    // every handler has finished. The first failure in registration order
    // becomes the candidate error.
    let results = join_all(runs).await;
    let candidate = results.into_iter().find_map(Result::err);

    let settled = match candidate {
        None => None,
        Some(err) => resolve_failure(err, plan.recovery.as_ref()).await,
    };

    let key = plan.action.key();
    let mut core = shared.core.lock().expect("lock poisoned");
    if !core.owns(key, plan.generation) {
        // Cancelled or preempted while running; whoever removed the entry
        // reversed this dispatch's bookkeeping already.
        return;
    }
    core.in_flight.remove(&key);

    match settled {
        Some(err) => {
            debug!("Dispatch of {:?} failed: {}", key, err);
            let rollback = (!plan.background).then(|| plan.origin.clone());
            core.apply_error_policy(err, rollback);
        }
        None if !plan.background => match plan.destination {
            Some(Destination::To(destination)) => core.commit_state(destination),
            Some(Destination::Back) => core.commit_state(plan.origin.clone()),
            None => {}
        },
        None => {}
    }

    core.release_claim(key, plan.generation);
    if let Some(marker) = &plan.marker {
        core.remove_marker(marker);
    }
}

/// Recovery and settlement for an injected error.
async fn run_injected<S, A, M>(
    shared: Arc<Shared<S, A, M>>,
    key: A::Key,
    generation: u64,
    err: ExecError,
    recovery: Option<RecoverFn>,
) where
    S: MachineState,
    A: MachineAction,
    M: BackgroundMarker,
{
    let settled = resolve_failure(err, recovery.as_ref()).await;

    let mut core = shared.core.lock().expect("lock poisoned");
    if !core.owns(key, generation) {
        return;
    }
    core.in_flight.remove(&key);
    if let Some(err) = settled {
        core.apply_error_policy(err, None);
    }
}

/// Run the recovery handler, if any, against the candidate error. `None`
/// means the failure was resolved and the dispatch settles as a success.
async fn resolve_failure(err: ExecError, recovery: Option<&RecoverFn>) -> Option<ExecError> {
    match recovery {
        None => Some(err),
        Some(recover) => {
            let outcome = contain_panic(recover(err.clone()), |msg| {
                ExecError::Recovery(format!("recovery handler panicked: {}", msg))
            })
            .await;
            match outcome {
                Ok(()) => {
                    debug!("Failure resolved by recovery handler: {}", err);
                    None
                }
                Err(replacement) => Some(replacement),
            }
        }
    }
}

/// Await a user-supplied future, converting a panic into an error through
/// `wrap` so settlement always runs.
async fn contain_panic<F>(fut: F, wrap: fn(String) -> ExecError) -> ExecResult<()>
where
    F: Future<Output = ExecResult<()>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(wrap(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Await a dispatch task handle; a cancelled task is a normal settlement.
async fn settle(handle: Option<JoinHandle<()>>) {
    if let Some(handle) = handle {
        match handle.await {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {}
            Err(err) => warn!("Dispatch task failed: {}", err),
        }
    }
}
