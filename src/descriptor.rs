//! Declarative transition descriptors, one per dispatched action

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ExecError;
use crate::handlers::RecoverFn;
use crate::types::ExecResult;

/// Where a foreground dispatch commits once its handlers settle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Destination<S> {
    /// Commit a fixed destination state.
    To(S),
    /// Commit the state that was current when the dispatch started.
    Back,
}

/// Collision policy when an action kind is redispatched while a dispatch of
/// the same kind is still in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RepeatPolicy {
    /// Cancel the in-flight dispatch and start over. This is the default,
    /// and is what makes a debounced action coalesce rapid redispatches.
    #[default]
    Cancel,
    /// Drop the new dispatch; the in-flight one keeps running.
    Ignore,
}

/// Describes what one action does to the machine when dispatched.
///
/// Built with the factory constructors ([`Transition::none`],
/// [`Transition::to`], [`Transition::looping`], [`Transition::background`])
/// and refined with the chaining methods. The executor resolves one
/// descriptor per dispatch through the mapping supplied at construction.
#[derive(Clone)]
pub struct Transition<S, M> {
    pub(crate) intermediate: Option<S>,
    pub(crate) destination: Option<Destination<S>>,
    pub(crate) marker: Option<M>,
    pub(crate) required: Option<Vec<S>>,
    pub(crate) invalid: Option<Vec<S>>,
    pub(crate) repeat: RepeatPolicy,
    pub(crate) debounce: Option<Duration>,
    pub(crate) recovery: Option<RecoverFn>,
}

impl<S, M> Transition<S, M> {
    fn empty() -> Self {
        Self {
            intermediate: None,
            destination: None,
            marker: None,
            required: None,
            invalid: None,
            repeat: RepeatPolicy::default(),
            debounce: None,
            recovery: None,
        }
    }

    /// A descriptor with no state effects; registered handlers still run.
    pub fn none() -> Self {
        Self::empty()
    }

    /// Transition to `destination` once every handler has succeeded.
    pub fn to(destination: S) -> Self {
        Self {
            destination: Some(Destination::To(destination)),
            ..Self::empty()
        }
    }

    /// Commit `intermediate` immediately, run the handlers, then return to
    /// whatever state was current when the dispatch started.
    pub fn looping(intermediate: S) -> Self {
        Self {
            intermediate: Some(intermediate),
            destination: Some(Destination::Back),
            ..Self::empty()
        }
    }

    /// A pure background descriptor: no state effects, only `marker` active
    /// while the handlers run. Dispatches of it never claim the foreground
    /// slot, whichever dispatch entry point is used.
    pub fn background(marker: M) -> Self {
        Self {
            marker: Some(marker),
            ..Self::empty()
        }
    }

    /// Commit `intermediate` immediately when the dispatch starts, before
    /// any handler runs.
    pub fn via(mut self, intermediate: S) -> Self {
        self.intermediate = Some(intermediate);
        self
    }

    /// Marker to hold active if this action is dispatched as background
    /// work.
    pub fn when_background(mut self, marker: M) -> Self {
        self.marker = Some(marker);
        self
    }

    /// States the machine must currently be in for the dispatch to proceed;
    /// otherwise it is dropped before any effect.
    pub fn required(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.required = Some(states.into_iter().collect());
        self
    }

    /// States the machine must NOT currently be in for the dispatch to
    /// proceed; otherwise it is dropped before any effect.
    pub fn invalid(mut self, states: impl IntoIterator<Item = S>) -> Self {
        self.invalid = Some(states.into_iter().collect());
        self
    }

    /// Collision policy for redispatch of the same action kind.
    pub fn on_repeat(mut self, policy: RepeatPolicy) -> Self {
        self.repeat = policy;
        self
    }

    /// Delay between the immediate state effects and the handler run.
    /// Redispatching the same action kind inside the window cancels the
    /// waiting dispatch (under the default repeat policy), so rapid bursts
    /// coalesce into one handler run.
    pub fn debounce(mut self, delay: Duration) -> Self {
        self.debounce = Some(delay);
        self
    }

    /// Install a recovery handler consulted when any handler of this
    /// dispatch fails. Completing without error resolves the failure;
    /// returning an error replaces it.
    pub fn recover<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(ExecError) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ExecResult<()>> + Send + 'static,
    {
        self.recovery = Some(Arc::new(move |err| Box::pin(handler(err))));
        self
    }

    /// True when the descriptor carries no state effect: no intermediate,
    /// no destination, no marker. Guards, debounce and recovery do not
    /// count; a none descriptor still runs its handlers.
    pub fn is_none(&self) -> bool {
        self.intermediate.is_none() && self.destination.is_none() && self.marker.is_none()
    }

    /// True for a pure background descriptor: a marker and no state
    /// commits. Such actions run in the background regardless of the
    /// dispatch entry point used.
    pub fn is_background(&self) -> bool {
        self.marker.is_some() && self.intermediate.is_none() && self.destination.is_none()
    }
}

impl<S: fmt::Debug, M: fmt::Debug> fmt::Debug for Transition<S, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("intermediate", &self.intermediate)
            .field("destination", &self.destination)
            .field("marker", &self.marker)
            .field("required", &self.required)
            .field("invalid", &self.invalid)
            .field("repeat", &self.repeat)
            .field("debounce", &self.debounce)
            .field("recovery", &self.recovery.is_some())
            .finish()
    }
}
