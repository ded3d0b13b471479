//! The proxy cache: weak, keyed by token.
//!
//! Proxies for the same token are shared so reference counting sees
//! every handle. Lookups run a bounded retry loop: stale weak entries
//! are evicted, and a candidate that loses an insertion race suppresses
//! its unpin and adopts the winner. Entries from a previous connection
//! session never match.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use periscope_types::Token;

use crate::proxy::{ProxyInner, ProxyShared, RemoteObject};

/// Bound on the lookup retry loop.
const MAX_LOOKUP_ATTEMPTS: usize = 4;

#[derive(Default)]
pub struct ProxyCache {
    map: Mutex<HashMap<Token, Weak<ProxyInner>>>,
}

impl ProxyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared proxy for `token`, creating one on miss.
    ///
    /// The returned handle's reference is already counted.
    pub fn materialise(
        &self,
        shared: &Arc<ProxyShared>,
        token: Token,
        type_name: &str,
    ) -> RemoteObject {
        let session = shared.conn.session();
        for _ in 0..MAX_LOOKUP_ATTEMPTS {
            // Fast path: a live entry from this session.
            {
                let mut map = self
                    .map
                    .lock()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                match map.get(&token).and_then(Weak::upgrade) {
                    Some(existing) if existing.session() == session => {
                        existing.add_reference();
                        return RemoteObject::adopt(existing);
                    }
                    Some(_) | None => {
                        // Stale session or dead weak: evict and rebuild.
                        map.remove(&token);
                    }
                }
            }

            // Build the candidate outside the lock, then insert unless
            // someone beat us to it.
            let candidate = Arc::new(ProxyInner::new(shared, token, type_name));
            let mut map = self
                .map
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            match map.get(&token).and_then(Weak::upgrade) {
                Some(winner) if winner.session() == session => {
                    // Lost the race: discard our candidate quietly and
                    // share the winner.
                    candidate.suppress_unpin();
                    winner.add_reference();
                    return RemoteObject::adopt(winner);
                }
                _ => {
                    map.insert(token, Arc::downgrade(&candidate));
                    return RemoteObject::adopt(candidate);
                }
            }
        }

        // The retry bound only trips under pathological churn; fall back
        // to an uncached proxy that shares no reference counting.
        tracing::warn!(token, "proxy cache lookup exhausted retries");
        RemoteObject::adopt(Arc::new(ProxyInner::new(shared, token, type_name)))
    }

    /// True when a live handle for `token` exists right now; a pending
    /// delayed unpin consults this to stand down.
    pub fn has_live(&self, token: Token) -> bool {
        let map = self
            .map
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        map.get(&token)
            .and_then(Weak::upgrade)
            .map(|inner| inner.live_handles() > 0)
            .unwrap_or(false)
    }

    /// Drop dead weak entries.
    pub fn purge(&self) {
        let mut map = self
            .map
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        map.retain(|_, weak| weak.strong_count() > 0);
    }

    pub fn len(&self) -> usize {
        self.map
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
