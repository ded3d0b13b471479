//! The hook engine: installing method interceptors for clients.
//!
//! A hook selects its target method by exact parameter-type signature,
//! attaches an interceptor at the requested position, and wires its
//! firings through the callback pump so the client receives the original
//! instance and arguments. The runtime combines same-position delegates;
//! unhooking removes exactly one registration.

use std::sync::Arc;

use periscope_runtime::intercept::InterceptorFn;
use periscope_types::envelope::Fault;
use periscope_types::CallbackToken;
use periscope_wire::messages::HookMethodRequest;

use crate::callbacks::{CallbackJob, Registration};
use crate::snapshot::fault_from_runtime;
use crate::{dispatch, lock, AgentState};

/// Install an interceptor; returns the callback token the client will
/// see on every firing.
pub fn hook_method(state: &AgentState, request: &HookMethodRequest) -> Result<CallbackToken, Fault> {
    let mut rt = lock(&state.runtime);
    let slot = dispatch::resolve_by_param_types(
        &rt,
        &request.type_full_name,
        &request.method,
        &request.parameter_types,
    )?;

    let mut directory = lock(&state.directory);
    let token = directory.issue();
    let jobs = state.callback_jobs.clone();
    // Runs inside the target's call path while the runtime lock is
    // held: enqueue only, never encode here.
    let callback: InterceptorFn = Arc::new(move |event| {
        let _ = jobs.send(CallbackJob::Hook { token, event });
    });

    let interceptor = rt
        .hook(slot, request.position, callback)
        .map_err(fault_from_runtime)?;
    directory.register(token, Registration::Hook { interceptor });

    tracing::info!(
        method = %request.method,
        type_name = %request.type_full_name,
        position = %request.position,
        token,
        "method hooked"
    );
    Ok(token)
}

/// Remove the interceptor behind `token`.
pub fn unhook_method(state: &AgentState, token: CallbackToken) -> Result<(), Fault> {
    let mut rt = lock(&state.runtime);
    let mut directory = lock(&state.directory);
    match directory.remove(token) {
        Some(Registration::Hook { interceptor }) => {
            rt.unhook(interceptor);
            tracing::info!(token, "method unhooked");
            Ok(())
        }
        Some(other) => {
            // Not a hook: put the registration back untouched.
            directory.register(token, other);
            Err(Fault::State(format!(
                "callback token {token} is an event subscription, not a hook"
            )))
        }
        None => Err(Fault::State(format!(
            "callback token {token} is not registered"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use periscope_runtime::class::{AssemblyDef, ClassDef, MethodDef};
    use periscope_runtime::runtime::RuntimeCore;
    use periscope_runtime::value::Value;
    use periscope_types::HookPosition;
    use std::sync::Mutex;

    fn state_with_runtime() -> (
        Arc<AgentState>,
        tokio::sync::mpsc::UnboundedReceiver<CallbackJob>,
    ) {
        let mut rt = RuntimeCore::new("test");
        rt.load_assembly(AssemblyDef::new("Demo").class(
            ClassDef::new("Demo.Worker").method(
                MethodDef::new("Work")
                    .param("amount", "System.Int32")
                    .body(|_, _| Ok(Value::Null)),
            ),
        ))
        .expect("load");
        AgentState::new(crate::config::AgentConfig::default(), Arc::new(Mutex::new(rt)))
    }

    #[tokio::test]
    async fn test_hook_fires_job_on_invocation() {
        let (state, mut jobs) = state_with_runtime();
        let token = hook_method(
            &state,
            &HookMethodRequest {
                type_full_name: "Demo.Worker".to_string(),
                method: "Work".to_string(),
                position: HookPosition::Prefix,
                parameter_types: vec!["System.Int32".to_string()],
            },
        )
        .expect("hook");

        {
            let mut rt = lock(&state.runtime);
            let id = rt.new_instance("Demo.Worker", None).expect("alloc");
            let slot = rt.resolve("Demo.Worker", None).expect("resolve").method_slots[0];
            rt.invoke_slot(slot, Some(id), vec![Value::I32(3)], vec![])
                .expect("invoke");
        }

        match jobs.try_recv().expect("job queued") {
            CallbackJob::Hook { token: seen, event } => {
                assert_eq!(seen, token);
                assert_eq!(event.args, vec![Value::I32(3)]);
            }
            CallbackJob::Event { .. } => unreachable!("hook job expected"),
        }
    }

    #[tokio::test]
    async fn test_unhook_stops_firings() {
        let (state, mut jobs) = state_with_runtime();
        let token = hook_method(
            &state,
            &HookMethodRequest {
                type_full_name: "Demo.Worker".to_string(),
                method: "Work".to_string(),
                position: HookPosition::Postfix,
                parameter_types: vec!["System.Int32".to_string()],
            },
        )
        .expect("hook");

        unhook_method(&state, token).expect("unhook");
        assert!(unhook_method(&state, token).is_err());

        let mut rt = lock(&state.runtime);
        let id = rt.new_instance("Demo.Worker", None).expect("alloc");
        let slot = rt.resolve("Demo.Worker", None).expect("resolve").method_slots[0];
        rt.invoke_slot(slot, Some(id), vec![Value::I32(1)], vec![])
            .expect("invoke");
        drop(rt);

        assert!(jobs.try_recv().is_err(), "no job after unhook");
    }

    #[tokio::test]
    async fn test_hook_unknown_signature_is_resolution_fault() {
        let (state, _jobs) = state_with_runtime();
        let err = hook_method(
            &state,
            &HookMethodRequest {
                type_full_name: "Demo.Worker".to_string(),
                method: "Work".to_string(),
                position: HookPosition::Prefix,
                parameter_types: vec!["System.String".to_string()],
            },
        )
        .expect_err("no such overload");
        assert!(matches!(err, Fault::Resolution(_)));
    }
}
