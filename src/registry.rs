//! Per-action-kind handler registration and lookup

use std::collections::HashMap;

use crate::handlers::HandlerFn;
use crate::types::MachineAction;

/// Ordered collection of handler functions, keyed by action kind.
///
/// Registration order is preserved and determines which failure wins when
/// several handlers of one dispatch fail, but not execution order: all
/// handlers of a kind are launched together.
pub struct HandlerRegistry<A: MachineAction> {
    funcs: HashMap<A::Key, Vec<HandlerFn<A>>>,
}

impl<A: MachineAction> HandlerRegistry<A> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            funcs: HashMap::new(),
        }
    }

    /// Append a handler to the given action kind's list.
    pub fn register(&mut self, key: A::Key, handler: HandlerFn<A>) {
        self.funcs.entry(key).or_default().push(handler);
    }

    /// Snapshot of the handlers registered for `key`, in registration
    /// order; empty if none.
    ///
    /// Snapshots are cheap (`Arc` clones) and isolate an in-flight dispatch
    /// from registrations that happen after it started.
    pub fn handlers_for(&self, key: A::Key) -> Vec<HandlerFn<A>> {
        self.funcs.get(&key).cloned().unwrap_or_default()
    }

    /// True if at least one handler is registered for `key`.
    pub fn is_registered(&self, key: A::Key) -> bool {
        self.funcs.get(&key).is_some_and(|v| !v.is_empty())
    }

    /// Number of handlers registered for `key`.
    pub fn handler_count(&self, key: A::Key) -> usize {
        self.funcs.get(&key).map_or(0, Vec::len)
    }
}

impl<A: MachineAction> Default for HandlerRegistry<A> {
    fn default() -> Self {
        Self::new()
    }
}
