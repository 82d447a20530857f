//! Core traits binding user-defined state, action, and marker types to the
//! executor

use std::fmt::Debug;
use std::hash::Hash;

use crate::error::ExecError;

/// Trait for the closed, finite state space of one machine.
///
/// The executor owns exactly one current value of this type at any moment;
/// callers only ever observe snapshots. `initial` seeds a freshly
/// constructed executor.
pub trait MachineState: Clone + Debug + PartialEq + Send + Sync + 'static {
    /// The state a freshly constructed executor starts in.
    fn initial() -> Self;

    /// The designated error state, if this state space declares one.
    ///
    /// Returning `Some` switches failure handling from local rollback to a
    /// global fault-stop: any unrecovered dispatch failure force-transitions
    /// the machine here and cancels all other in-flight work.
    fn error_state() -> Option<Self> {
        None
    }
}

/// Trait for named, optionally payload-carrying requests to the executor.
pub trait MachineAction: Clone + Debug + Send + Sync + 'static {
    /// Stable identity of the action kind, shared by every payload of the
    /// same variant. Indexes the handler registry, the in-flight table, and
    /// the foreground occupancy slot.
    type Key: Copy + Debug + Eq + Hash + Send + Sync + 'static;

    /// The action-kind key of this value, independent of payload.
    fn key(&self) -> Self::Key;

    /// Classify this value at dispatch time.
    ///
    /// Most actions are [`ActionRole::Normal`]; override for the designated
    /// cancel and error-injection variants.
    fn role(&self) -> ActionRole {
        ActionRole::Normal
    }
}

/// Classification of an action value at dispatch time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionRole {
    /// Regular action: full guard, occupancy, and handler fan-out protocol.
    Normal,
    /// Designated cancel action: cancels all in-flight dispatches, applies
    /// its own state commits, and never runs handlers.
    Cancel,
    /// Designated error action: injects an externally observed failure into
    /// the recovery/error machinery, and never runs handlers.
    Inject(ExecError),
}

/// Trait for named concurrent activities tracked independently of the single
/// foreground occupancy slot.
///
/// Blanket-implemented for any hashable value type; custom enums are the
/// usual choice.
pub trait BackgroundMarker: Clone + Debug + Eq + Hash + Send + Sync + 'static {}

impl<T: Clone + Debug + Eq + Hash + Send + Sync + 'static> BackgroundMarker for T {}

/// Marker type for executors that use no background activities.
///
/// This is the default marker parameter of [`crate::Executor`]; being
/// uninhabited, it makes background dispatch unrepresentable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NoMarker {}

/// A boxed future that is Send
pub type BoxFuture<'a, T> = std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Result type for handler and recovery functions
pub type ExecResult<T> = Result<T, ExecError>;
