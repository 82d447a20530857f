//! Concurrent, guarded state-transition executor for interactive
//! applications.
//!
//! `sendstate` implements a small dispatch core: a machine owns one current
//! state from a user-defined closed state space, and **actions** dispatched
//! against it drive async handler work plus declarative state effects. Each
//! action kind maps to a [`Transition`] descriptor saying what the dispatch
//! does to the state (commit an intermediate value immediately, commit a
//! destination on success, loop back to the origin, or run purely in the
//! background under a named marker) and under which conditions it may run
//! at all.
//!
//! The engine is intentionally small:
//! - Handlers are async, registered per action kind, and fan out
//!   concurrently; the machine settles a dispatch only when all of them
//!   have finished.
//! - State effects are declared, not coded: descriptors carry the commits,
//!   guards, collision policy, debounce window, and recovery handler.
//! - The [`Executor`] stores only the current state, the active background
//!   markers, and the last unrecovered error; everything else lives in the
//!   dispatch bookkeeping and is released when a dispatch settles.
//!
//! ## Why this crate exists
//!
//! Interactive applications (UI shells, editor frontends, long-running
//! request loops) keep hitting the same coordination problems: a button
//! pressed twice starts two fetches, a slow load finishes after the user
//! already navigated away, a failure leaves the app stuck on a spinner
//! screen. The usual fix is a pile of ad-hoc booleans (`is_loading`,
//! `fetch_in_progress`) guarding ad-hoc task handles.
//!
//! `sendstate` replaces that pile with one machine and one protocol:
//! - a single **foreground occupancy slot**, so only one visible transition
//!   runs at a time and overlaps are at least loudly reported;
//! - an **in-flight table** keyed by action kind, so redispatch is a policy
//!   (`preempt` or `drop`) instead of an accident;
//! - **background markers**, so concurrent auxiliary work is visible
//!   without touching the state;
//! - a fixed **error policy**, so a failed dispatch either rolls back to
//!   where it started or fault-stops the whole machine in a designated
//!   error state. Nothing is left half-committed.
//!
//! ## Quick start
//!
//! A loading screen: dispatching `Load` commits `Loading` immediately, runs
//! the fetch handler, and commits `Content` once it succeeds.
//!
//! ```rust
//! use sendstate::{Executor, MachineAction, MachineState, Transition};
//!
//! #[derive(Clone, Debug, PartialEq)]
//! enum Screen {
//!     Idle,
//!     Loading,
//!     Content,
//! }
//!
//! impl MachineState for Screen {
//!     fn initial() -> Self {
//!         Screen::Idle
//!     }
//! }
//!
//! #[derive(Clone, Debug)]
//! enum Cmd {
//!     Load { query: String },
//!     Reset,
//! }
//!
//! #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
//! enum CmdKey {
//!     Load,
//!     Reset,
//! }
//!
//! impl MachineAction for Cmd {
//!     type Key = CmdKey;
//!
//!     fn key(&self) -> CmdKey {
//!         match self {
//!             Cmd::Load { .. } => CmdKey::Load,
//!             Cmd::Reset => CmdKey::Reset,
//!         }
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let executor: Executor<Screen, Cmd> = Executor::new(|action, _state| match action {
//!         Cmd::Load { .. } => Transition::to(Screen::Content).via(Screen::Loading),
//!         Cmd::Reset => Transition::to(Screen::Idle),
//!     });
//!
//!     executor.add_handler(CmdKey::Load, |action: Cmd| async move {
//!         if let Cmd::Load { query } = action {
//!             // Fetch and store results for `query` here.
//!             let _ = query;
//!         }
//!         Ok(())
//!     });
//!     executor.add_handler(CmdKey::Reset, |_: Cmd| async { Ok(()) });
//!
//!     executor.send(Cmd::Load { query: "rust".into() }).await;
//!     assert_eq!(executor.state(), Screen::Content);
//!
//!     executor.send(Cmd::Reset).await;
//!     assert_eq!(executor.state(), Screen::Idle);
//! }
//! ```
//!
//! [`Executor::send`] waits for a dispatch to settle; [`Executor::dispatch`]
//! is the fire-and-forget form for event-loop call sites that must not
//! block.
//!
//! ## The dispatch protocol
//!
//! Every dispatch runs the same fixed sequence:
//!
//! 1. The action value is published on the action-occurred stream
//!    ([`Executor::subscribe_actions`]), then its descriptor is resolved. A
//!    kind with no registered handlers is dropped with an error log.
//! 2. Guards run against the current state (`required`/`invalid` lists),
//!    and the collision policy decides what a redispatch of an in-flight
//!    kind does: preempt it (default) or drop the newcomer.
//! 3. Immediate effects commit atomically: the foreground slot is claimed,
//!    the descriptor's intermediate state is committed, or for background
//!    work the marker turns on. All of this happens before the dispatch
//!    call returns.
//! 4. Handlers fan out concurrently on a spawned task (after the optional
//!    debounce wait). When all of them have finished, the dispatch settles:
//!    destination commit on success, recovery/error policy on failure, and
//!    the slot and marker are released.
//!
//! ## Background work
//!
//! Auxiliary work runs outside the foreground slot and never touches the
//! state; instead it holds a named **marker** in the active set while its
//! handlers run. Markers are what a frontend binds small progress
//! indicators to.
//!
//! ```rust
//! use std::time::Duration;
//! use sendstate::{Executor, MachineAction, MachineState, Transition};
//!
//! #[derive(Clone, Debug, PartialEq)]
//! enum Phase {
//!     Ready,
//! }
//!
//! impl MachineState for Phase {
//!     fn initial() -> Self {
//!         Phase::Ready
//!     }
//! }
//!
//! #[derive(Clone, Debug)]
//! enum Job {
//!     Sync,
//! }
//!
//! #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
//! enum JobKey {
//!     Sync,
//! }
//!
//! #[derive(Clone, Debug, PartialEq, Eq, Hash)]
//! enum Activity {
//!     Syncing,
//! }
//!
//! impl MachineAction for Job {
//!     type Key = JobKey;
//!
//!     fn key(&self) -> JobKey {
//!         JobKey::Sync
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let executor: Executor<Phase, Job, Activity> =
//!         Executor::new(|action, _| match action {
//!             Job::Sync => Transition::background(Activity::Syncing),
//!         });
//!     executor.add_handler(JobKey::Sync, |_: Job| async {
//!         tokio::time::sleep(Duration::from_millis(10)).await;
//!         Ok(())
//!     });
//!
//!     executor.dispatch_background(Job::Sync);
//!     // The marker is active from the moment the dispatch call returns.
//!     assert!(executor.active_markers().contains(&Activity::Syncing));
//!     assert_eq!(executor.state(), Phase::Ready);
//!
//!     let mut markers = executor.watch_markers();
//!     markers.wait_for(|active| active.is_empty()).await.unwrap();
//! }
//! ```
//!
//! A descriptor built with [`Transition::background`] runs in the
//! background whichever entry point dispatched it; a foreground descriptor
//! with a [`Transition::when_background`] marker only does so when sent
//! through the background entry points.
//!
//! ## Failures, recovery, rollback
//!
//! A handler failure never cancels its sibling handlers; the first failure
//! in registration order becomes the dispatch's candidate error once all
//! handlers finished. The descriptor's [`Transition::recover`] handler gets
//! a chance to resolve it. If the failure stands, the error policy applies:
//!
//! - Without a designated error state ([`MachineState::error_state`]
//!   returns `None`), the failure stays local: a foreground dispatch rolls
//!   the state back to where it started, and the error is recorded as
//!   [`Executor::last_error`].
//! - With a designated error state, the machine fault-stops: every other
//!   in-flight dispatch is cancelled, all markers clear, and the machine
//!   lands in the error state.
//!
//! ```rust
//! use sendstate::{ExecError, Executor, MachineAction, MachineState, Transition};
//!
//! #[derive(Clone, Debug, PartialEq)]
//! enum Screen {
//!     Idle,
//!     Loading,
//!     Content,
//! }
//!
//! impl MachineState for Screen {
//!     fn initial() -> Self {
//!         Screen::Idle
//!     }
//! }
//!
//! #[derive(Clone, Debug)]
//! enum Cmd {
//!     Load,
//! }
//!
//! #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
//! enum CmdKey {
//!     Load,
//! }
//!
//! impl MachineAction for Cmd {
//!     type Key = CmdKey;
//!
//!     fn key(&self) -> CmdKey {
//!         CmdKey::Load
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let executor: Executor<Screen, Cmd> =
//!         Executor::new(|_, _| Transition::to(Screen::Content).via(Screen::Loading));
//!     executor.add_handler(CmdKey::Load, |_: Cmd| async {
//!         Err(ExecError::handler("backend unreachable"))
//!     });
//!
//!     executor.send(Cmd::Load).await;
//!     // No designated error state: the failed dispatch rolled back.
//!     assert_eq!(executor.state(), Screen::Idle);
//!     assert!(executor.last_error().is_some());
//! }
//! ```
//!
//! Two action roles hook external control into the same machinery
//! ([`MachineAction::role`]): a **cancel** action tears down all in-flight
//! work and applies its own commits without running handlers, and an
//! **error** action injects an externally observed failure straight into
//! recovery and the error policy.
//!
//! ## Collisions, debounce, cancellation
//!
//! Redispatching an action kind that is already in flight is resolved by
//! its descriptor's [`RepeatPolicy`]: `Cancel` (default) preempts the old
//! dispatch, `Ignore` drops the new one. Combined with
//! [`Transition::debounce`], the default policy coalesces rapid bursts
//! (type-ahead search being the canonical case): each redispatch cancels
//! the one still waiting out its delay, so only the last burst member runs
//! its handlers.
//!
//! [`Executor::cancel`] and [`Executor::cancel_all`] abort in-flight
//! dispatch tasks at their next await point and release their bookkeeping.
//! States already committed stay committed; cancellation never rewrites
//! history.
//!
//! ## Observation
//!
//! All reads are lock-free snapshots ([`Executor::state`],
//! [`Executor::last_error`], [`Executor::active_markers`]) backed by watch
//! channels; [`Executor::watch_state`], [`Executor::watch_error`] and
//! [`Executor::watch_markers`] hand out receivers for change-driven
//! consumers. Watch semantics are last-value-wins: a slow reader sees the
//! latest value, not every intermediate one. The action-occurred broadcast
//! stream ([`Executor::subscribe_actions`]) is the place to observe every
//! dispatch attempt, including dropped ones.

// Module declarations
pub mod descriptor;
pub mod error;
pub mod executor;
pub mod handlers;
pub mod registry;
pub mod types;

// Re-export main types for convenience
pub use descriptor::{RepeatPolicy, Transition};
pub use error::ExecError;
pub use executor::Executor;
pub use registry::HandlerRegistry;
pub use types::{ActionRole, BackgroundMarker, ExecResult, MachineAction, MachineState, NoMarker};

// Re-export handler types for advanced usage
pub use handlers::{DescriptorFn, Handler, HandlerFn, RecoverFn};

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    enum TestState {
        Idle,
        Busy,
        Done,
    }

    impl MachineState for TestState {
        fn initial() -> Self {
            TestState::Idle
        }
    }

    #[derive(Clone, Debug)]
    enum TestAction {
        Run,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    enum TestKey {
        Run,
    }

    impl MachineAction for TestAction {
        type Key = TestKey;

        fn key(&self) -> TestKey {
            TestKey::Run
        }
    }

    #[tokio::test]
    async fn test_basic_dispatch() {
        let executor: Executor<TestState, TestAction> = Executor::new(|action, _| match action {
            TestAction::Run => Transition::to(TestState::Done).via(TestState::Busy),
        });
        executor.add_handler(TestKey::Run, |_: TestAction| async { Ok(()) });

        assert_eq!(executor.state(), TestState::Idle);
        executor.send(TestAction::Run).await;
        assert_eq!(executor.state(), TestState::Done);
        assert!(executor.last_error().is_none());
    }
}
