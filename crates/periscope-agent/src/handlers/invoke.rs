//! Invocation handlers: create_object, invoke, get_field, set_field,
//! get_item.

use std::sync::Arc;

use periscope_runtime::value::{ObjectId, Value};
use periscope_types::envelope::Fault;
use periscope_types::value::InvocationResult;
use periscope_types::{Token, NULL_TOKEN};
use periscope_wire::endpoint;
use periscope_wire::messages::{
    CreateObjectRequest, GetFieldRequest, GetItemRequest, InvokeRequest, SetFieldRequest,
};

use crate::encode::{lift, lower, now_ms};
use crate::snapshot::fault_from_runtime;
use crate::{dispatch, lock, AgentState};

const VOID_TYPE: &str = "System.Void";

/// Construct an object: resolve the constructor against the supplied
/// arguments, allocate, run the body, pin and return the instance.
pub fn create_object(state: &Arc<AgentState>, body: &[u8]) -> Result<InvocationResult, Fault> {
    let request: CreateObjectRequest = super::parse(body, endpoint::CREATE_OBJECT)?;
    let mut rt = lock(&state.runtime);
    let mut pins = lock(&state.pins);

    let args: Vec<Value> = request
        .parameters
        .iter()
        .map(|p| lower(&rt, &pins, p))
        .collect::<Result<_, _>>()?;
    let slot = dispatch::resolve_ctor(&rt, &request.type_full_name, &args)?;
    let id = rt
        .new_instance(&request.type_full_name, None)
        .map_err(fault_from_runtime)?;
    dispatch::call(&mut rt, slot, Some(id), args, vec![])?;

    let stamp_ms = now_ms();
    let returned = lift(&mut rt, &mut pins, Value::Object(id), stamp_ms)?;
    tracing::debug!(type_name = %request.type_full_name, "object constructed");
    Ok(InvocationResult::Value { returned })
}

/// Invoke a method, marshalling onto the synchronisation thread when the
/// request asks for it.
pub async fn invoke(state: &Arc<AgentState>, body: &[u8]) -> Result<InvocationResult, Fault> {
    let request: InvokeRequest = super::parse(body, endpoint::INVOKE)?;
    if request.force_sync_thread {
        let state_for_job = state.clone();
        state
            .sync
            .run(move || invoke_inner(&state_for_job, &request))
            .await?
    } else {
        invoke_inner(state, &request)
    }
}

fn invoke_inner(state: &Arc<AgentState>, request: &InvokeRequest) -> Result<InvocationResult, Fault> {
    let mut rt = lock(&state.runtime);
    let mut pins = lock(&state.pins);

    let instance = resolve_instance(&pins, request.obj_token)?;
    let args: Vec<Value> = request
        .parameters
        .iter()
        .map(|p| lower(&rt, &pins, p))
        .collect::<Result<_, _>>()?;

    let slot = dispatch::resolve_method(
        &rt,
        &request.type_full_name,
        &request.method,
        &request.generic_args,
        &args,
    )?;
    let def = rt.method_def(slot).map_err(fault_from_runtime)?;
    let is_static = def.is_static;
    let is_void = def.return_type == VOID_TYPE;
    if !is_static && instance.is_none() {
        return Err(Fault::Protocol(format!(
            "'{}' is an instance method; a pinned instance token is required",
            request.method
        )));
    }

    let target = if is_static { None } else { instance };
    let result = dispatch::call(&mut rt, slot, target, args, request.generic_args.clone())?;

    if is_void {
        Ok(InvocationResult::Void)
    } else {
        let returned = lift(&mut rt, &mut pins, result, now_ms())?;
        Ok(InvocationResult::Value { returned })
    }
}

pub fn get_field(state: &Arc<AgentState>, body: &[u8]) -> Result<InvocationResult, Fault> {
    let request: GetFieldRequest = super::parse(body, endpoint::GET_FIELD)?;
    let mut rt = lock(&state.runtime);
    let mut pins = lock(&state.pins);

    let (declaring, is_static) = dispatch::resolve_field(&rt, &request.type_full_name, &request.field)?;
    let value = if is_static {
        let is_enum = rt
            .resolve(&declaring, None)
            .map_err(fault_from_runtime)?
            .def
            .is_enum;
        if is_enum {
            // Enum members read as the enum value itself.
            rt.enum_member_value(&declaring, &request.field)
                .map_err(fault_from_runtime)?;
            Value::Enum {
                enum_type: declaring,
                member: request.field.clone(),
            }
        } else {
            rt.get_static_field(&declaring, &request.field)
                .map_err(fault_from_runtime)?
        }
    } else {
        let instance = resolve_instance(&pins, request.obj_token)?.ok_or_else(|| {
            Fault::Protocol(format!(
                "field '{}' is an instance field; a pinned instance token is required",
                request.field
            ))
        })?;
        rt.get_instance_field(instance, &request.field)
            .map_err(fault_from_runtime)?
    };

    let returned = lift(&mut rt, &mut pins, value, now_ms())?;
    Ok(InvocationResult::Value { returned })
}

pub fn set_field(state: &Arc<AgentState>, body: &[u8]) -> Result<InvocationResult, Fault> {
    let request: SetFieldRequest = super::parse(body, endpoint::SET_FIELD)?;
    let mut rt = lock(&state.runtime);
    let pins = lock(&state.pins);

    let (declaring, is_static) = dispatch::resolve_field(&rt, &request.type_full_name, &request.field)?;
    let value = lower(&rt, &pins, &request.value)?;
    if is_static {
        rt.set_static_field(&declaring, &request.field, value)
            .map_err(fault_from_runtime)?;
    } else {
        let instance = resolve_instance(&pins, request.obj_token)?.ok_or_else(|| {
            Fault::Protocol(format!(
                "field '{}' is an instance field; a pinned instance token is required",
                request.field
            ))
        })?;
        rt.set_instance_field(instance, &request.field, value)
            .map_err(fault_from_runtime)?;
    }
    Ok(InvocationResult::Void)
}

/// Indexed access through the collection's own `get_Item`.
pub fn get_item(state: &Arc<AgentState>, body: &[u8]) -> Result<InvocationResult, Fault> {
    let request: GetItemRequest = super::parse(body, endpoint::GET_ITEM)?;
    let mut rt = lock(&state.runtime);
    let mut pins = lock(&state.pins);

    let collection = resolve_instance(&pins, request.collection_token)?.ok_or_else(|| {
        Fault::Protocol("get_item requires a pinned collection token".to_string())
    })?;
    let index = lower(&rt, &pins, &request.index)?;
    let type_name = rt
        .type_of(collection)
        .map_err(fault_from_runtime)?
        .to_string();

    let slot = dispatch::resolve_method(&rt, &type_name, "get_Item", &[], std::slice::from_ref(&index))?;
    let result = dispatch::call(&mut rt, slot, Some(collection), vec![index], vec![])?;

    let returned = lift(&mut rt, &mut pins, result, now_ms())?;
    Ok(InvocationResult::Value { returned })
}

/// Translate a request token into a live instance; zero means "static".
fn resolve_instance(pins: &crate::pin::PinTable, token: Token) -> Result<Option<ObjectId>, Fault> {
    if token == NULL_TOKEN {
        return Ok(None);
    }
    pins.try_get(token)
        .map(|entry| Some(entry.object))
        .ok_or_else(|| {
            Fault::State(format!(
                "object moved or invalid: token {token} is not pinned"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use periscope_runtime::class::{AssemblyDef, ClassDef, MethodDef};
    use periscope_runtime::runtime::RuntimeCore;
    use periscope_types::value::{RemoteValue, ValuePayload};
    use std::sync::Mutex;

    fn demo_assembly() -> AssemblyDef {
        AssemblyDef::new("Demo")
            .class(
                ClassDef::new("Demo.Counter")
                    .field_with("count", "System.Int32", Value::I32(0))
                    .static_field("Total", "System.Int32", Value::I32(100))
                    .constructor(MethodDef::ctor().param("initial", "System.Int32").body(
                        |rt, ctx| {
                            let id = ctx.instance.expect("instance");
                            rt.set_instance_field(id, "count", ctx.args[0].clone())?;
                            Ok(Value::Null)
                        },
                    ))
                    .method(
                        MethodDef::new("DoIt")
                            .param("delta", "System.Int32")
                            .returns("System.Int32")
                            .body(|rt, ctx| {
                                let id = ctx.instance.expect("instance");
                                let current =
                                    rt.get_instance_field(id, "count")?.as_i64().unwrap_or(0);
                                let delta = ctx.args[0].as_i64().unwrap_or(0);
                                Ok(Value::I32((current + delta) as i32))
                            }),
                    )
                    .method(MethodDef::new("Reset").body(|rt, ctx| {
                        let id = ctx.instance.expect("instance");
                        rt.set_instance_field(id, "count", Value::I32(0))?;
                        Ok(Value::Null)
                    })),
            )
            .class(
                ClassDef::new("Demo.Pair")
                    .field_with("first", "System.String", Value::Str("a".to_string()))
                    .field_with("second", "System.String", Value::Str("b".to_string()))
                    .method(
                        MethodDef::new("get_Item")
                            .param("index", "System.Int32")
                            .returns("System.String")
                            .body(|rt, ctx| {
                                let id = ctx.instance.expect("instance");
                                match ctx.args[0].as_i64() {
                                    Some(0) => rt.get_instance_field(id, "first"),
                                    Some(1) => rt.get_instance_field(id, "second"),
                                    _ => Err(periscope_runtime::RuntimeError::TargetException {
                                        message: "index out of range".to_string(),
                                        stack: "at Demo.Pair.get_Item".to_string(),
                                    }),
                                }
                            }),
                    ),
            )
    }

    fn state() -> Arc<AgentState> {
        let mut rt = RuntimeCore::new("test");
        rt.load_assembly(demo_assembly()).expect("load");
        AgentState::new(crate::config::AgentConfig::default(), Arc::new(Mutex::new(rt))).0
    }

    fn construct(state: &Arc<AgentState>, initial: i32) -> Token {
        let body = periscope_wire::cbor::to_vec(&CreateObjectRequest {
            type_full_name: "Demo.Counter".to_string(),
            parameters: vec![RemoteValue::encoded(0, "System.Int32", initial.to_string())],
        })
        .expect("serialize");
        let result = create_object(state, &body).expect("create");
        result.returned().expect("value").token().expect("token")
    }

    #[tokio::test]
    async fn test_create_then_invoke() {
        let state = state();
        let token = construct(&state, 42);

        let body = periscope_wire::cbor::to_vec(&InvokeRequest {
            obj_token: token,
            type_full_name: "Demo.Counter".to_string(),
            method: "DoIt".to_string(),
            generic_args: vec![],
            parameters: vec![RemoteValue::encoded(0, "System.Int32", "1")],
            force_sync_thread: false,
        })
        .expect("serialize");
        let result = invoke(&state, &body).await.expect("invoke");
        match &result.returned().expect("value").payload {
            ValuePayload::Encoded { type_name, text } => {
                assert_eq!(type_name, "System.Int32");
                assert_eq!(text, "43");
            }
            other => unreachable!("encoded expected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_void_invoke() {
        let state = state();
        let token = construct(&state, 1);
        let body = periscope_wire::cbor::to_vec(&InvokeRequest {
            obj_token: token,
            type_full_name: "Demo.Counter".to_string(),
            method: "Reset".to_string(),
            generic_args: vec![],
            parameters: vec![],
            force_sync_thread: false,
        })
        .expect("serialize");
        let result = invoke(&state, &body).await.expect("invoke");
        assert_eq!(result, InvocationResult::Void);
    }

    #[tokio::test]
    async fn test_invoke_on_sync_thread() {
        let state = state();
        let token = construct(&state, 10);
        let body = periscope_wire::cbor::to_vec(&InvokeRequest {
            obj_token: token,
            type_full_name: "Demo.Counter".to_string(),
            method: "DoIt".to_string(),
            generic_args: vec![],
            parameters: vec![RemoteValue::encoded(0, "System.Int32", "5")],
            force_sync_thread: true,
        })
        .expect("serialize");
        let result = invoke(&state, &body).await.expect("invoke");
        assert!(result.returned().is_some());
    }

    #[tokio::test]
    async fn test_invoke_unpinned_token_is_state_fault() {
        let state = state();
        let body = periscope_wire::cbor::to_vec(&InvokeRequest {
            obj_token: 777,
            type_full_name: "Demo.Counter".to_string(),
            method: "DoIt".to_string(),
            generic_args: vec![],
            parameters: vec![RemoteValue::encoded(0, "System.Int32", "1")],
            force_sync_thread: false,
        })
        .expect("serialize");
        assert!(matches!(invoke(&state, &body).await, Err(Fault::State(_))));
    }

    #[tokio::test]
    async fn test_get_and_set_field() {
        let state = state();
        let token = construct(&state, 7);

        let body = periscope_wire::cbor::to_vec(&GetFieldRequest {
            obj_token: token,
            type_full_name: "Demo.Counter".to_string(),
            field: "count".to_string(),
        })
        .expect("serialize");
        let result = get_field(&state, &body).expect("get");
        match &result.returned().expect("value").payload {
            ValuePayload::Encoded { text, .. } => assert_eq!(text, "7"),
            other => unreachable!("encoded expected, got {other:?}"),
        }

        let body = periscope_wire::cbor::to_vec(&SetFieldRequest {
            obj_token: token,
            type_full_name: "Demo.Counter".to_string(),
            field: "count".to_string(),
            value: RemoteValue::encoded(0, "System.Int32", "99"),
        })
        .expect("serialize");
        assert_eq!(set_field(&state, &body).expect("set"), InvocationResult::Void);

        let body = periscope_wire::cbor::to_vec(&GetFieldRequest {
            obj_token: token,
            type_full_name: "Demo.Counter".to_string(),
            field: "count".to_string(),
        })
        .expect("serialize");
        let result = get_field(&state, &body).expect("get");
        match &result.returned().expect("value").payload {
            ValuePayload::Encoded { text, .. } => assert_eq!(text, "99"),
            other => unreachable!("encoded expected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_static_field_without_token() {
        let state = state();
        let body = periscope_wire::cbor::to_vec(&GetFieldRequest {
            obj_token: NULL_TOKEN,
            type_full_name: "Demo.Counter".to_string(),
            field: "Total".to_string(),
        })
        .expect("serialize");
        let result = get_field(&state, &body).expect("get");
        match &result.returned().expect("value").payload {
            ValuePayload::Encoded { text, .. } => assert_eq!(text, "100"),
            other => unreachable!("encoded expected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_item_indexes_collection() {
        let state = state();
        let body = periscope_wire::cbor::to_vec(&CreateObjectRequest {
            type_full_name: "Demo.Pair".to_string(),
            parameters: vec![],
        })
        .expect("serialize");
        // Demo.Pair has no declared constructor: expect resolution fault.
        assert!(matches!(
            create_object(&state, &body),
            Err(Fault::Resolution(_))
        ));

        // Pin one through the heap path instead.
        let token = {
            let mut rt = lock(&state.runtime);
            let mut pins = lock(&state.pins);
            let id = rt.new_instance("Demo.Pair", None).expect("alloc");
            let (type_name, mt) = {
                let slot = rt.heap.get(id).expect("live");
                (slot.type_name.clone(), slot.method_table)
            };
            pins.pin(&mut rt.heap, id, type_name, mt, 0).expect("pin")
        };

        let body = periscope_wire::cbor::to_vec(&GetItemRequest {
            collection_token: token,
            index: RemoteValue::encoded(0, "System.Int32", "1"),
            pin: false,
        })
        .expect("serialize");
        let result = get_item(&state, &body).expect("get_item");
        match &result.returned().expect("value").payload {
            ValuePayload::Encoded { text, .. } => assert_eq!(text, "b"),
            other => unreachable!("encoded expected, got {other:?}"),
        }

        // Out-of-range index surfaces the target exception.
        let body = periscope_wire::cbor::to_vec(&GetItemRequest {
            collection_token: token,
            index: RemoteValue::encoded(0, "System.Int32", "9"),
            pin: false,
        })
        .expect("serialize");
        assert!(matches!(
            get_item(&state, &body),
            Err(Fault::Invocation { .. })
        ));
    }
}
