//! Method interceptors.
//!
//! An interceptor observes calls to one method at one position: before
//! the body runs (prefix), after it returns successfully (postfix), or
//! unconditionally on the way out (finalizer). Multiple interceptors at
//! the same position combine; removal takes out exactly the registration
//! it names and the last removal leaves the method clean.

use std::collections::HashMap;
use std::sync::Arc;

use periscope_types::HookPosition;

use crate::class::MethodSlot;
use crate::value::{ObjectId, Value};

/// Largest method arity an interceptor can observe.
pub const MAX_HOOK_ARITY: usize = 10;

/// Identity of one interceptor registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct InterceptorId(pub u64);

/// What an interceptor sees on each firing.
#[derive(Clone, Debug)]
pub struct InterceptEvent {
    pub method: MethodSlot,
    pub position: HookPosition,
    pub instance: Option<ObjectId>,
    /// Arguments as passed; non-proxyable ones appear as [`Value::Sentinel`].
    pub args: Vec<Value>,
}

/// An interceptor callback.
pub type InterceptorFn = Arc<dyn Fn(InterceptEvent) + Send + Sync>;

/// Registry of interceptors, keyed by `(method, position)`.
#[derive(Default)]
pub struct InterceptRegistry {
    next_id: u64,
    by_point: HashMap<(MethodSlot, HookPosition), Vec<(InterceptorId, InterceptorFn)>>,
    index: HashMap<InterceptorId, (MethodSlot, HookPosition)>,
}

impl InterceptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `callback` at `(method, position)`. A second registration
    /// at an occupied position combines with the existing ones.
    pub fn register(
        &mut self,
        method: MethodSlot,
        position: HookPosition,
        callback: InterceptorFn,
    ) -> InterceptorId {
        self.next_id += 1;
        let id = InterceptorId(self.next_id);
        self.by_point
            .entry((method, position))
            .or_default()
            .push((id, callback));
        self.index.insert(id, (method, position));
        id
    }

    /// Remove one registration. Returns false for unknown ids.
    pub fn remove(&mut self, id: InterceptorId) -> bool {
        let Some(key) = self.index.remove(&id) else {
            return false;
        };
        if let Some(list) = self.by_point.get_mut(&key) {
            list.retain(|(existing, _)| *existing != id);
            if list.is_empty() {
                self.by_point.remove(&key);
            }
        }
        true
    }

    /// True when any interceptor is attached to `method` at any position.
    pub fn is_hooked(&self, method: MethodSlot) -> bool {
        self.by_point.keys().any(|(slot, _)| *slot == method)
    }

    /// Snapshot the callbacks for `(method, position)`.
    ///
    /// Callers invoke the returned closures outside the registry borrow
    /// so an interceptor may themselves register or remove hooks.
    pub fn callbacks(&self, method: MethodSlot, position: HookPosition) -> Vec<InterceptorFn> {
        self.by_point
            .get(&(method, position))
            .map(|list| list.iter().map(|(_, f)| Arc::clone(f)).collect())
            .unwrap_or_default()
    }
}
