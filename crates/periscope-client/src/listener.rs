//! The callback listener.
//!
//! One listener per connection receives every inbound callback frame and
//! demultiplexes by callback token to the registered event or hook
//! handler. Handlers run on the connection's reader task: long work must
//! be offloaded by the handler or it will delay subsequent callbacks.
//! Argument timestamps are frozen to the callback's own stamp before the
//! handler sees them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use periscope_types::CallbackToken;
use periscope_wire::messages::CallbackInvocation;

/// A registered callback handler.
pub type CallbackHandler = Arc<dyn Fn(CallbackInvocation) + Send + Sync>;

/// Token-keyed handler registry.
#[derive(Default)]
pub struct CallbackListener {
    handlers: Mutex<HashMap<CallbackToken, CallbackHandler>>,
}

impl CallbackListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, token: CallbackToken, handler: CallbackHandler) {
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(token, handler);
    }

    pub fn unregister(&self, token: CallbackToken) -> bool {
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&token)
            .is_some()
    }

    /// Route one inbound invocation. Unknown tokens are logged and
    /// dropped; a failing handler must not break the reader.
    pub fn dispatch(&self, mut invocation: CallbackInvocation) {
        let handler = {
            let handlers = self
                .handlers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            handlers.get(&invocation.token).cloned()
        };
        let Some(handler) = handler else {
            tracing::debug!(token = invocation.token, "callback for unknown token discarded");
            return;
        };

        // Freeze argument timestamps to the event time.
        let stamp_ms = invocation.stamp_ms;
        for parameter in &mut invocation.parameters {
            parameter.stamp_ms = stamp_ms;
        }
        handler.as_ref()(invocation);
    }

    pub fn clear(&self) {
        self.handlers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use periscope_types::value::RemoteValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn invocation(token: CallbackToken) -> CallbackInvocation {
        CallbackInvocation {
            token,
            stamp_ms: 5_000,
            parameters: vec![RemoteValue::pinned(1, 9, "Demo.Sender")],
        }
    }

    #[test]
    fn test_dispatch_routes_by_token() {
        let listener = CallbackListener::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        listener.register(3, Arc::new(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));

        listener.dispatch(invocation(3));
        listener.dispatch(invocation(4));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_freezes_argument_stamps() {
        let listener = CallbackListener::new();
        let seen = Arc::new(Mutex::new(None));
        let seen2 = seen.clone();
        listener.register(1, Arc::new(move |inv| {
            *seen2.lock().expect("lock") = Some(inv.parameters[0].stamp_ms);
        }));

        listener.dispatch(invocation(1));
        assert_eq!(seen.lock().expect("lock").expect("fired"), 5_000);
    }

    #[test]
    fn test_unregister_stops_delivery() {
        let listener = CallbackListener::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        listener.register(7, Arc::new(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(listener.unregister(7));
        assert!(!listener.unregister(7));
        listener.dispatch(invocation(7));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
