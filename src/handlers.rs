//! Handler type aliases and the object-safe handler seam

use std::sync::Arc;

use crate::descriptor::Transition;
use crate::error::ExecError;
use crate::types::{BoxFuture, ExecResult, MachineAction};

/// Type alias for registered action handlers
///
/// Each handler registered for an action kind is invoked with its own clone
/// of the dispatched action and runs concurrently with its siblings. The
/// dispatch settles only after every handler has finished.
pub type HandlerFn<A> = Arc<dyn Fn(A) -> BoxFuture<'static, ExecResult<()>> + Send + Sync>;

/// Type alias for descriptor-attached recovery handlers
///
/// Invoked with the candidate error of a failed dispatch. Completing without
/// error resolves the failure; returning an error replaces it.
pub type RecoverFn = Arc<dyn Fn(ExecError) -> BoxFuture<'static, ExecResult<()>> + Send + Sync>;

/// Type alias for the action-to-descriptor mapping supplied at construction
///
/// Must be total: every action value resolves to exactly one descriptor.
/// The state current at dispatch time is provided for mappings that depend
/// on it.
pub type DescriptorFn<S, A, M> = Box<dyn Fn(&A, &S) -> Transition<S, M> + Send + Sync>;

/// Object-safe alternative to plain closure handlers.
///
/// Useful when a handler carries long-lived dependencies of its own
/// (service clients, stores, channels); register implementations with
/// [`crate::Executor::add_hook`].
#[async_trait::async_trait]
pub trait Handler<A: MachineAction>: Send + Sync {
    /// Perform this handler's unit of work for one dispatched action.
    async fn handle(&self, action: A) -> ExecResult<()>;
}
