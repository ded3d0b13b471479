//! Heap handlers: heap walk, object dump, unpin.

use std::sync::Arc;

use periscope_types::envelope::Fault;
use periscope_wire::endpoint;
use periscope_wire::messages::{
    HeapRequest, HeapResponse, NamedValue, ObjectDump, ObjectRequest, StatusResponse, UnpinRequest,
};

use crate::encode::{lift, now_ms};
use crate::snapshot::fault_from_runtime;
use crate::{dispatch, lock, AgentState};

pub fn heap(state: &Arc<AgentState>, body: &[u8]) -> Result<HeapResponse, Fault> {
    let request: HeapRequest = super::parse_or_default(body, endpoint::HEAP)?;
    let rt = lock(&state.runtime);
    let mut snapshots = lock(&state.snapshots);
    let (generation, objects) = snapshots.walk(
        &rt,
        request.type_filter.as_deref(),
        request.dump_hashcodes,
    )?;
    Ok(HeapResponse {
        generation,
        objects,
    })
}

/// Dump an object located by heap address, optionally pinning it first.
pub fn object(state: &Arc<AgentState>, body: &[u8]) -> Result<ObjectDump, Fault> {
    let request: ObjectRequest = super::parse(body, endpoint::OBJECT)?;
    let mut rt = lock(&state.runtime);
    let mut pins = lock(&state.pins);
    let mut snapshots = lock(&state.snapshots);

    let method_table = rt
        .resolve(&request.type_name, None)
        .map_err(fault_from_runtime)?
        .method_table;
    let id = snapshots.recover(&rt, request.address, method_table, request.hashcode)?;

    let stamp_ms = now_ms();
    let token = if request.pin {
        let type_name = rt.type_of(id).map_err(fault_from_runtime)?.to_string();
        Some(
            pins.pin(&mut rt.heap, id, type_name, method_table, stamp_ms)
                .map_err(fault_from_runtime)?,
        )
    } else {
        None
    };

    let field_values: Vec<(String, periscope_runtime::value::Value)> = {
        let slot = rt.heap.get(id).map_err(fault_from_runtime)?;
        let mut pairs: Vec<_> = slot
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        pairs.sort_by(|(a, _), (b, _)| a.cmp(b));
        pairs
    };
    let mut fields = Vec::with_capacity(field_values.len());
    for (name, value) in field_values {
        fields.push(NamedValue {
            name,
            value: lift(&mut rt, &mut pins, value, stamp_ms)?,
        });
    }

    // Property values come from their getters; one failing getter is
    // logged and skipped rather than failing the dump.
    let type_name = rt.type_of(id).map_err(fault_from_runtime)?.to_string();
    let getters: Vec<(String, String)> = {
        let class = rt.resolve(&type_name, None).map_err(fault_from_runtime)?;
        class
            .def
            .properties
            .iter()
            .filter_map(|p| p.getter.clone().map(|g| (p.name.clone(), g)))
            .collect()
    };
    let mut properties = Vec::new();
    for (property, getter) in getters {
        let resolved = dispatch::resolve_method(&rt, &type_name, &getter, &[], &[]);
        let outcome = resolved.and_then(|slot| dispatch::call(&mut rt, slot, Some(id), vec![], vec![]));
        match outcome {
            Ok(value) => properties.push(NamedValue {
                name: property,
                value: lift(&mut rt, &mut pins, value, stamp_ms)?,
            }),
            Err(fault) => {
                tracing::debug!(property, %fault, "property getter skipped in dump");
            }
        }
    }

    Ok(ObjectDump {
        token,
        type_name,
        fields,
        properties,
        stamp_ms,
    })
}

/// Release a pin. Idempotent: unpinning an unknown token succeeds.
pub fn unpin(state: &Arc<AgentState>, body: &[u8]) -> Result<StatusResponse, Fault> {
    let request: UnpinRequest = super::parse(body, endpoint::UNPIN)?;
    let mut rt = lock(&state.runtime);
    let mut pins = lock(&state.pins);
    let released = pins.unpin(&mut rt.heap, request.token);
    tracing::debug!(token = request.token, released, "unpin");
    Ok(StatusResponse::ok())
}
