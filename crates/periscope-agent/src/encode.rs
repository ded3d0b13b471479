//! Marshalling between runtime values and wire values.
//!
//! Lifting turns a runtime [`Value`] into a [`RemoteValue`]: primitives
//! encode in place, objects are pinned and referenced by token, types
//! become type handles. Lowering is the inverse, resolving tokens
//! through the pin table and enum member names through the runtime.

use periscope_runtime::runtime::RuntimeCore;
use periscope_runtime::value::Value;
use periscope_types::envelope::Fault;
use periscope_types::value::{RemoteValue, ValuePayload};
use periscope_wire::value::{self as wire_value, Primitive};

use crate::pin::PinTable;
use crate::snapshot::fault_from_runtime;

pub use periscope_wire::value::SENTINEL_TYPE;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Convert a scalar runtime value to its wire primitive, when it has one.
fn value_to_primitive(value: &Value) -> Option<Primitive> {
    Some(match value {
        Value::Bool(v) => Primitive::Bool(*v),
        Value::I8(v) => Primitive::I8(*v),
        Value::I16(v) => Primitive::I16(*v),
        Value::I32(v) => Primitive::I32(*v),
        Value::I64(v) => Primitive::I64(*v),
        Value::U8(v) => Primitive::U8(*v),
        Value::U16(v) => Primitive::U16(*v),
        Value::U32(v) => Primitive::U32(*v),
        Value::U64(v) => Primitive::U64(*v),
        Value::F32(v) => Primitive::F32(*v),
        Value::F64(v) => Primitive::F64(*v),
        Value::Str(v) => Primitive::Str(v.clone()),
        Value::DateTime(v) => Primitive::DateTime(*v),
        Value::TimeSpan(secs, nanos) => Primitive::TimeSpan(*secs, *nanos),
        Value::Guid(v) => Primitive::Guid(*v),
        Value::Enum { enum_type, member } => Primitive::Enum {
            enum_type: enum_type.clone(),
            member: member.clone(),
        },
        Value::Array {
            element_type,
            elements,
        } => Primitive::Array {
            element_type: element_type.clone(),
            elements: elements
                .iter()
                .map(value_to_primitive)
                .collect::<Option<Vec<_>>>()?,
        },
        Value::Null | Value::Object(_) | Value::Type { .. } | Value::Sentinel => return None,
    })
}

/// Convert a wire primitive into a runtime value.
fn primitive_to_value(primitive: Primitive) -> Value {
    match primitive {
        Primitive::Bool(v) => Value::Bool(v),
        Primitive::I8(v) => Value::I8(v),
        Primitive::I16(v) => Value::I16(v),
        Primitive::I32(v) => Value::I32(v),
        Primitive::I64(v) => Value::I64(v),
        Primitive::U8(v) => Value::U8(v),
        Primitive::U16(v) => Value::U16(v),
        Primitive::U32(v) => Value::U32(v),
        Primitive::U64(v) => Value::U64(v),
        Primitive::F32(v) => Value::F32(v),
        Primitive::F64(v) => Value::F64(v),
        Primitive::Str(v) => Value::Str(v),
        Primitive::DateTime(v) => Value::DateTime(v),
        Primitive::TimeSpan(secs, nanos) => Value::TimeSpan(secs, nanos),
        Primitive::Guid(v) => Value::Guid(v),
        Primitive::Enum { enum_type, member } => Value::Enum { enum_type, member },
        Primitive::Array {
            element_type,
            elements,
        } => Value::Array {
            element_type,
            elements: elements.into_iter().map(primitive_to_value).collect(),
        },
    }
}

/// Lift a runtime value onto the wire, pinning objects as needed.
pub fn lift(
    rt: &mut RuntimeCore,
    pins: &mut PinTable,
    value: Value,
    stamp_ms: u64,
) -> Result<RemoteValue, Fault> {
    match value {
        Value::Null => Ok(RemoteValue::null(stamp_ms)),
        Value::Sentinel => Ok(RemoteValue::encoded(stamp_ms, SENTINEL_TYPE, "")),
        Value::Type {
            assembly,
            full_name,
        } => Ok(RemoteValue::type_handle(stamp_ms, Some(assembly), full_name)),
        Value::Object(id) => {
            let (type_name, method_table) = {
                let slot = rt.heap.get(id).map_err(fault_from_runtime)?;
                (slot.type_name.clone(), slot.method_table)
            };
            let token = pins
                .pin(&mut rt.heap, id, &type_name, method_table, stamp_ms)
                .map_err(fault_from_runtime)?;
            Ok(RemoteValue::pinned(stamp_ms, token, type_name))
        }
        other => match value_to_primitive(&other) {
            Some(primitive) => Ok(primitive.to_remote(stamp_ms)),
            None => Err(Fault::Protocol(
                "array contains non-primitive elements and cannot be encoded by value".to_string(),
            )),
        },
    }
}

/// Lower a wire value into a runtime value.
pub fn lower(rt: &RuntimeCore, pins: &PinTable, value: &RemoteValue) -> Result<Value, Fault> {
    match &value.payload {
        ValuePayload::Null => Ok(Value::Null),
        ValuePayload::Pinned { token, .. } => pins
            .try_get(*token)
            .map(|entry| Value::Object(entry.object))
            .ok_or_else(|| Fault::State(format!("token {token} is not pinned"))),
        ValuePayload::TypeHandle {
            assembly,
            full_name,
        } => {
            let class = rt
                .resolve(full_name, assembly.as_deref())
                .map_err(fault_from_runtime)?;
            Ok(Value::Type {
                assembly: class.assembly.clone(),
                full_name: class.full_name().to_string(),
            })
        }
        ValuePayload::Encoded { type_name, text } => {
            if type_name == SENTINEL_TYPE {
                return Ok(Value::Sentinel);
            }
            match wire_value::decode(type_name, text) {
                Ok(primitive) => Ok(primitive_to_value(primitive)),
                Err(periscope_wire::WireError::UnknownPrimitive(_)) if rt.is_enum(type_name) => {
                    // Resolve through the remote enum member so multi-bit
                    // values land on the exact declared member.
                    rt.enum_member_value(type_name, text)
                        .map_err(fault_from_runtime)?;
                    Ok(Value::Enum {
                        enum_type: type_name.clone(),
                        member: text.clone(),
                    })
                }
                Err(periscope_wire::WireError::UnknownPrimitive(name)) => Err(Fault::Protocol(
                    format!("'{name}' is neither a known primitive nor a loaded enum type"),
                )),
                Err(other) => Err(Fault::Protocol(other.to_string())),
            }
        }
    }
}
