//! The pinning table.
//!
//! Pins are explicit roots: while an entry exists, the object survives
//! collection and its token keeps resolving. Tokens are opaque, start at
//! one, and are never reused within one agent session. Re-pinning a live
//! object returns its existing token.

use std::collections::HashMap;

use periscope_runtime::heap::Heap;
use periscope_runtime::value::ObjectId;
use periscope_types::{MethodTable, Token};

/// One pinned object.
#[derive(Clone, Debug)]
pub struct PinEntry {
    pub token: Token,
    pub object: ObjectId,
    /// Concrete type name at pin time, the entry's type fingerprint.
    pub type_name: String,
    pub method_table: MethodTable,
    /// Milliseconds since the Unix epoch at pin time.
    pub pinned_at_ms: u64,
}

/// Token to strong-reference map with a reverse identity index.
#[derive(Default)]
pub struct PinTable {
    next_token: Token,
    by_token: HashMap<Token, PinEntry>,
    by_object: HashMap<ObjectId, Token>,
}

impl PinTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `object`, rooting it on the heap.
    ///
    /// Pinning an already-pinned object refreshes its timestamp and
    /// returns the existing token; the heap root count is unchanged.
    pub fn pin(
        &mut self,
        heap: &mut Heap,
        object: ObjectId,
        type_name: impl Into<String>,
        method_table: MethodTable,
        now_ms: u64,
    ) -> periscope_runtime::Result<Token> {
        if let Some(&token) = self.by_object.get(&object) {
            if let Some(entry) = self.by_token.get_mut(&token) {
                entry.pinned_at_ms = now_ms;
            }
            return Ok(token);
        }

        heap.root(object)?;
        self.next_token += 1;
        let token = self.next_token;
        self.by_token.insert(
            token,
            PinEntry {
                token,
                object,
                type_name: type_name.into(),
                method_table,
                pinned_at_ms: now_ms,
            },
        );
        self.by_object.insert(object, token);
        Ok(token)
    }

    /// Look up a pin by token.
    pub fn try_get(&self, token: Token) -> Option<&PinEntry> {
        self.by_token.get(&token)
    }

    /// The token pinning `object`, if any.
    pub fn token_for(&self, object: ObjectId) -> Option<Token> {
        self.by_object.get(&object).copied()
    }

    /// Release a pin and its heap root. Idempotent: unknown tokens are a
    /// successful no-op.
    pub fn unpin(&mut self, heap: &mut Heap, token: Token) -> bool {
        match self.by_token.remove(&token) {
            Some(entry) => {
                self.by_object.remove(&entry.object);
                heap.unroot(entry.object);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_token.is_empty()
    }
}
