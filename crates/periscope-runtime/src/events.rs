//! Event handler registry.
//!
//! Events follow the managed `(sender, args)` delegate shape. The
//! runtime stores handlers per `(object, event name)`; raising an event
//! invokes every handler with the sender and the event arguments.

use std::collections::HashMap;
use std::sync::Arc;

use crate::value::{ObjectId, Value};

/// Identity of one event-handler registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(pub u64);

/// A two-argument event handler: `(sender, args)`.
pub type EventHandler = Arc<dyn Fn(ObjectId, Value) + Send + Sync>;

/// Registry of event handlers.
#[derive(Default)]
pub struct EventRegistry {
    next_id: u64,
    handlers: HashMap<(ObjectId, String), Vec<(HandlerId, EventHandler)>>,
    index: HashMap<HandlerId, (ObjectId, String)>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke the event's `add` accessor: attach a handler.
    pub fn add(&mut self, object: ObjectId, event: impl Into<String>, handler: EventHandler) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        let key = (object, event.into());
        self.handlers.entry(key.clone()).or_default().push((id, handler));
        self.index.insert(id, key);
        id
    }

    /// Invoke the event's `remove` accessor for one registration.
    pub fn remove(&mut self, id: HandlerId) -> bool {
        let Some(key) = self.index.remove(&id) else {
            return false;
        };
        if let Some(list) = self.handlers.get_mut(&key) {
            list.retain(|(existing, _)| *existing != id);
            if list.is_empty() {
                self.handlers.remove(&key);
            }
        }
        true
    }

    /// Drop every handler attached to `object` (object death).
    pub fn remove_for_object(&mut self, object: ObjectId) {
        let keys: Vec<(ObjectId, String)> = self
            .handlers
            .keys()
            .filter(|(obj, _)| *obj == object)
            .cloned()
            .collect();
        for key in keys {
            if let Some(list) = self.handlers.remove(&key) {
                for (id, _) in list {
                    self.index.remove(&id);
                }
            }
        }
    }

    /// Snapshot the handlers for `(object, event)`.
    ///
    /// Handlers are returned rather than called so the caller can drop
    /// the registry borrow first: a handler may add or remove handlers.
    pub fn handlers_for(&self, object: ObjectId, event: &str) -> Vec<EventHandler> {
        self.handlers
            .get(&(object, event.to_string()))
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    /// Distinct objects that currently have handlers attached.
    pub fn subjects(&self) -> impl Iterator<Item = ObjectId> + '_ {
        let mut seen: Vec<ObjectId> = Vec::new();
        self.handlers.keys().filter_map(move |(object, _)| {
            if seen.contains(object) {
                None
            } else {
                seen.push(*object);
                Some(*object)
            }
        })
    }

    pub fn handler_count(&self, object: ObjectId, event: &str) -> usize {
        self.handlers
            .get(&(object, event.to_string()))
            .map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_add_and_fire() {
        let mut reg = EventRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let obj = ObjectId(5);

        reg.add(obj, "Ticked", Arc::new(move |sender, _args| {
            assert_eq!(sender, ObjectId(5));
            hits2.fetch_add(1, Ordering::SeqCst);
        }));

        for handler in reg.handlers_for(obj, "Ticked") {
            handler.as_ref()(obj, Value::Null);
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_remove_stops_delivery() {
        let mut reg = EventRegistry::new();
        let obj = ObjectId(1);
        let id = reg.add(obj, "Ticked", Arc::new(|_, _| {}));
        assert_eq!(reg.handler_count(obj, "Ticked"), 1);

        assert!(reg.remove(id));
        assert_eq!(reg.handler_count(obj, "Ticked"), 0);
        assert!(!reg.remove(id));
    }

    #[test]
    fn test_remove_for_object_clears_all_events() {
        let mut reg = EventRegistry::new();
        let obj = ObjectId(1);
        let other = ObjectId(2);
        reg.add(obj, "A", Arc::new(|_, _| {}));
        reg.add(obj, "B", Arc::new(|_, _| {}));
        let keep = reg.add(other, "A", Arc::new(|_, _| {}));

        reg.remove_for_object(obj);
        assert_eq!(reg.handler_count(obj, "A"), 0);
        assert_eq!(reg.handler_count(obj, "B"), 0);
        assert_eq!(reg.handler_count(other, "A"), 1);
        assert!(reg.remove(keep));
    }
}
