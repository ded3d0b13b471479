//! Lazy type-descriptor cache.
//!
//! Descriptors are immutable once published by the agent; re-resolution
//! of the same name returns the identical `Arc`. A proxy may live with
//! just its type name until a member access needs the full descriptor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use periscope_types::descriptor::TypeDescriptor;
use periscope_wire::endpoint;
use periscope_wire::messages::TypeRequest;

use crate::connection::Connection;
use crate::Result;

#[derive(Default)]
pub struct TypeCache {
    map: Mutex<HashMap<String, Arc<TypeDescriptor>>>,
}

impl TypeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached descriptor, fetching it over the wire on first use.
    pub async fn get_or_fetch(
        &self,
        conn: &Connection,
        full_name: &str,
        assembly: Option<&str>,
    ) -> Result<Arc<TypeDescriptor>> {
        let key = match assembly {
            Some(assembly) => format!("{assembly}!{full_name}"),
            None => full_name.to_string(),
        };
        if let Some(descriptor) = self.get(&key) {
            return Ok(descriptor);
        }

        let descriptor: TypeDescriptor = conn
            .call(
                endpoint::TYPE,
                &TypeRequest {
                    full_name: full_name.to_string(),
                    assembly: assembly.map(str::to_string),
                },
            )
            .await?;
        let descriptor = Arc::new(descriptor);

        let mut map = self
            .map
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // A concurrent fetch may have won; keep the first so repeated
        // resolution hands out one identical descriptor.
        Ok(map.entry(key).or_insert(descriptor).clone())
    }

    pub fn get(&self, key: &str) -> Option<Arc<TypeDescriptor>> {
        self.map
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(key)
            .cloned()
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
