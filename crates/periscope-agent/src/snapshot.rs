//! The snapshot service: consistent heap walks and address recovery.
//!
//! Walks run against a consistent snapshot and are retried a bounded
//! number of times if the heap generation changes underneath them.
//! Recovery turns a possibly-stale `(address, method table)` pair back
//! into a live object: one snapshot refresh and retry, then a hash-code
//! scan when the caller supplied one, then the moved-object fault.

use std::collections::VecDeque;

use periscope_runtime::heap::HeapSnapshot;
use periscope_runtime::runtime::RuntimeCore;
use periscope_runtime::value::{identity_hashcode, ObjectId};
use periscope_runtime::{wildcard_match, RuntimeError};
use periscope_types::envelope::Fault;
use periscope_types::{Address, MethodTable};
use periscope_wire::messages::HeapObject;

/// Configuration for walks and retention.
#[derive(Clone, Debug)]
pub struct SnapshotPolicy {
    /// Snapshots kept for post-hoc inspection; 1 retains only the
    /// current one.
    pub retention: usize,
    /// Bounded retries when a walk observes mid-walk movement.
    pub walk_retries: u32,
}

impl Default for SnapshotPolicy {
    fn default() -> Self {
        Self {
            retention: 1,
            walk_retries: 3,
        }
    }
}

/// Holder of the current snapshot plus a small debugging ring.
pub struct SnapshotService {
    policy: SnapshotPolicy,
    ring: VecDeque<HeapSnapshot>,
}

impl SnapshotService {
    pub fn new(policy: SnapshotPolicy) -> Self {
        Self {
            policy,
            ring: VecDeque::new(),
        }
    }

    /// Take a fresh snapshot, superseding the previous one.
    pub fn refresh(&mut self, rt: &RuntimeCore) -> &HeapSnapshot {
        let snapshot = rt.snapshot();
        tracing::debug!(
            generation = snapshot.generation,
            objects = snapshot.entries.len(),
            "snapshot refreshed"
        );
        if self.ring.len() >= self.policy.retention.max(1) {
            self.ring.pop_front();
        }
        self.ring.push_back(snapshot);
        self.ring.back().expect("just pushed")
    }

    /// The current snapshot, taking one if none exists or the heap has
    /// moved on.
    pub fn current(&mut self, rt: &RuntimeCore) -> &HeapSnapshot {
        let stale = self
            .ring
            .back()
            .map_or(true, |snap| snap.generation != rt.heap.generation());
        if stale {
            self.refresh(rt)
        } else {
            self.ring.back().expect("non-stale ring is non-empty")
        }
    }

    /// Walk the live heap, filtered by type name (exact, `*` wildcard).
    ///
    /// Returns the generation walked plus one entry per match. The walk
    /// is re-taken up to the configured retry bound when the generation
    /// changes mid-walk.
    pub fn walk(
        &mut self,
        rt: &RuntimeCore,
        type_filter: Option<&str>,
        dump_hashcodes: bool,
    ) -> Result<(u64, Vec<HeapObject>), Fault> {
        let mut attempts = 0;
        loop {
            let snapshot = self.refresh(rt).clone();
            let mut objects = Vec::new();
            for entry in &snapshot.entries {
                let matched = match type_filter {
                    Some(filter) => wildcard_match(filter, &entry.type_name),
                    None => true,
                };
                if !matched {
                    continue;
                }
                // Hash codes are computed against the candidate while it
                // is locked in place; a concurrent relocation invalidates
                // the whole walk below.
                let hashcode = dump_hashcodes.then(|| identity_hashcode(entry.object_id));
                objects.push(HeapObject {
                    address: entry.address,
                    method_table: entry.method_table,
                    type_name: entry.type_name.clone(),
                    hashcode,
                });
            }

            if rt.heap.generation() == snapshot.generation {
                return Ok((snapshot.generation, objects));
            }

            attempts += 1;
            tracing::debug!(attempts, "heap walk inconsistent, retrying");
            if attempts > self.policy.walk_retries {
                return Err(fault_from_runtime(RuntimeError::InconsistentWalk));
            }
        }
    }

    /// Recover a live object from `(address, method table)`.
    ///
    /// The first miss refreshes the snapshot and retries once; when the
    /// caller supplied a hash code, a final pass scans the fresh
    /// snapshot for the relocated object by identity.
    pub fn recover(
        &mut self,
        rt: &RuntimeCore,
        address: Address,
        method_table: MethodTable,
        hashcode: Option<i32>,
    ) -> Result<ObjectId, Fault> {
        match rt.heap.recover(address, method_table) {
            Ok(id) => return verified(id, hashcode),
            Err(RuntimeError::Moved(_)) => {}
            Err(other) => return Err(fault_from_runtime(other)),
        }

        // The address is stale; refresh once and retry.
        self.refresh(rt);
        match rt.heap.recover(address, method_table) {
            Ok(id) => return verified(id, hashcode),
            Err(RuntimeError::Moved(_)) => {}
            Err(other) => return Err(fault_from_runtime(other)),
        }

        if let Some(expected) = hashcode {
            let snapshot = self.current(rt);
            let found = snapshot.entries.iter().find(|entry| {
                entry.method_table == method_table
                    && identity_hashcode(entry.object_id) == expected
            });
            if let Some(entry) = found {
                tracing::debug!(
                    address = format_args!("0x{address:x}"),
                    relocated = format_args!("0x{:x}", entry.address),
                    "object recovered by hash code after relocation"
                );
                return Ok(entry.object_id);
            }
        }

        Err(Fault::State(format!(
            "object moved or invalid at address 0x{address:x}"
        )))
    }
}

fn verified(id: ObjectId, hashcode: Option<i32>) -> Result<ObjectId, Fault> {
    match hashcode {
        Some(expected) if identity_hashcode(id) != expected => Err(Fault::State(format!(
            "hash code mismatch: expected {expected}, the address holds a different object"
        ))),
        _ => Ok(id),
    }
}

/// Map runtime failures onto the wire fault taxonomy.
pub fn fault_from_runtime(err: RuntimeError) -> Fault {
    match err {
        RuntimeError::TypeNotFound(..) | RuntimeError::MemberNotFound { .. } => {
            Fault::Resolution(err.to_string())
        }
        RuntimeError::DeadObject(_) | RuntimeError::Moved(_) | RuntimeError::InconsistentWalk => {
            Fault::State(err.to_string())
        }
        RuntimeError::TargetException { message, stack } => Fault::Invocation { message, stack },
        RuntimeError::InvalidArguments(_) | RuntimeError::PoisonedArgument => {
            Fault::Protocol(err.to_string())
        }
        RuntimeError::Internal(_) => Fault::Protocol(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use periscope_runtime::class::{AssemblyDef, ClassDef};

    fn runtime_with_objects() -> (RuntimeCore, ObjectId, ObjectId) {
        let mut rt = RuntimeCore::new("test");
        rt.load_assembly(
            AssemblyDef::new("Demo")
                .class(ClassDef::new("Demo.A"))
                .class(ClassDef::new("Demo.B")),
        )
        .expect("load");
        let a = rt.new_instance("Demo.A", None).expect("alloc");
        let b = rt.new_instance("Demo.B", None).expect("alloc");
        (rt, a, b)
    }

    #[test]
    fn test_walk_filters_by_exact_name_and_wildcard() {
        let (rt, _, _) = runtime_with_objects();
        let mut service = SnapshotService::new(SnapshotPolicy::default());

        let (_, all) = service.walk(&rt, None, false).expect("walk");
        assert_eq!(all.len(), 2);

        let (_, only_a) = service.walk(&rt, Some("Demo.A"), false).expect("walk");
        assert_eq!(only_a.len(), 1);
        assert_eq!(only_a[0].type_name, "Demo.A");

        let (_, starred) = service.walk(&rt, Some("Demo.*"), false).expect("walk");
        assert_eq!(starred.len(), 2);

        let (_, none) = service.walk(&rt, Some("Demo.C"), false).expect("walk");
        assert!(none.is_empty());
    }

    #[test]
    fn test_walk_captures_hashcodes_on_request() {
        let (rt, a, _) = runtime_with_objects();
        let mut service = SnapshotService::new(SnapshotPolicy::default());

        let (_, objects) = service.walk(&rt, Some("Demo.A"), true).expect("walk");
        assert_eq!(objects[0].hashcode, Some(identity_hashcode(a)));

        let (_, bare) = service.walk(&rt, Some("Demo.A"), false).expect("walk");
        assert_eq!(bare[0].hashcode, None);
    }

    #[test]
    fn test_recover_current_address() {
        let (rt, a, _) = runtime_with_objects();
        let mut service = SnapshotService::new(SnapshotPolicy::default());
        let address = rt.heap.address_of(a).expect("live");
        let mt = rt.heap.get(a).expect("live").method_table;

        assert_eq!(service.recover(&rt, address, mt, None).expect("recover"), a);
    }

    #[test]
    fn test_recover_stale_address_without_hashcode_is_state_fault() {
        let (mut rt, a, _) = runtime_with_objects();
        let mut service = SnapshotService::new(SnapshotPolicy::default());
        let address = rt.heap.address_of(a).expect("live");
        let mt = rt.heap.get(a).expect("live").method_table;

        rt.heap.compact();

        let err = service.recover(&rt, address, mt, None).expect_err("moved");
        assert!(matches!(err, Fault::State(_)));
    }

    #[test]
    fn test_recover_stale_address_with_hashcode_relocates() {
        let (mut rt, a, _) = runtime_with_objects();
        let mut service = SnapshotService::new(SnapshotPolicy::default());
        let address = rt.heap.address_of(a).expect("live");
        let mt = rt.heap.get(a).expect("live").method_table;
        let hash = identity_hashcode(a);

        rt.heap.compact();

        let recovered = service
            .recover(&rt, address, mt, Some(hash))
            .expect("relocated");
        assert_eq!(recovered, a);
    }

    #[test]
    fn test_recover_method_table_mismatch_is_moved() {
        let (rt, a, b) = runtime_with_objects();
        let mut service = SnapshotService::new(SnapshotPolicy::default());
        let address = rt.heap.address_of(a).expect("live");
        let wrong_mt = rt.heap.get(b).expect("live").method_table;

        let err = service
            .recover(&rt, address, wrong_mt, None)
            .expect_err("mismatch");
        assert!(matches!(err, Fault::State(_)));
    }

    #[test]
    fn test_ring_retention_bounds_history() {
        let (rt, _, _) = runtime_with_objects();
        let mut service = SnapshotService::new(SnapshotPolicy {
            retention: 2,
            walk_retries: 1,
        });
        for _ in 0..5 {
            service.refresh(&rt);
        }
        assert_eq!(service.ring.len(), 2);
    }
}
