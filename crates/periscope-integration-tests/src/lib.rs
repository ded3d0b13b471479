//! Shared fixtures for the end-to-end tests.
//!
//! Builds a small "warehouse" application on the runtime, attaches an
//! agent to it on an ephemeral loopback port, and hands tests a
//! connected client. Everything runs in-process; there are no mocks.

use std::sync::{Arc, Mutex};

use periscope_agent::config::AgentConfig;
use periscope_agent::server::AgentServer;
use periscope_agent::AgentState;
use periscope_client::Client;
use periscope_runtime::class::{AssemblyDef, ClassDef, MethodDef};
use periscope_runtime::runtime::RuntimeCore;
use periscope_runtime::value::Value;
use periscope_runtime::RuntimeError;

/// A live in-process agent plus a connected client.
pub struct Harness {
    pub state: Arc<AgentState>,
    pub client: Client,
    pub port: u16,
    server: tokio::task::JoinHandle<()>,
}

impl Harness {
    /// Spin up an agent over `runtime` and connect a client to it.
    pub async fn start(runtime: RuntimeCore) -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let runtime = Arc::new(Mutex::new(runtime));
        let (state, jobs_rx) = AgentState::new(AgentConfig::default(), runtime);
        let bound = AgentServer::new(state.clone())
            .bind()
            .await
            .expect("bind agent");
        let port = bound.local_addr().port();
        let server = tokio::spawn(async move {
            let _ = bound.serve(jobs_rx).await;
        });

        let client = Client::connect(port).await.expect("connect client");
        Self {
            state,
            client,
            port,
            server,
        }
    }

    /// Number of live pins in the agent's pinning table.
    pub fn pin_count(&self) -> usize {
        periscope_agent::lock(&self.state.pins).len()
    }

    /// Force a heap compaction in the hosted runtime, relocating every
    /// object.
    pub fn compact_heap(&self) {
        periscope_agent::lock(&self.state.runtime).heap.compact();
    }

    pub async fn shutdown(self) {
        self.client.dispose().await;
        let _ = self.state.shutdown_tx.send(());
        let _ = self.server.await;
    }
}

/// The warehouse world used by the scenarios.
///
/// `Warehouse.Crate` carries a weight and a label, seals with an event;
/// `Warehouse.Manifest` is an indexable, enumerable collection of
/// labels; `Warehouse.Grade` is an enum; `Warehouse.Depot` exposes a
/// static surface.
pub fn warehouse_runtime() -> RuntimeCore {
    let mut rt = RuntimeCore::new("warehouse-domain");
    rt.load_assembly(
        AssemblyDef::new("Warehouse")
            .class(crate_class())
            .class(manifest_class())
            .class(manifest_enumerator_class())
            .class(
                ClassDef::new_enum("Warehouse.Grade")
                    .enum_member("Standard", 1)
                    .enum_member("Fragile", 2)
                    .enum_member("Hazard", 4),
            )
            .class(
                ClassDef::new("Warehouse.Depot")
                    .static_field("OpenCount", "System.Int32", Value::I32(0))
                    .method(
                        MethodDef::new("Open")
                            .returns("System.Int32")
                            .static_method()
                            .body(|rt, _| {
                                let count = rt
                                    .get_static_field("Warehouse.Depot", "OpenCount")?
                                    .as_i64()
                                    .unwrap_or(0)
                                    + 1;
                                rt.set_static_field(
                                    "Warehouse.Depot",
                                    "OpenCount",
                                    Value::I32(count as i32),
                                )?;
                                Ok(Value::I32(count as i32))
                            }),
                    ),
            ),
    )
    .expect("load warehouse assembly");
    rt
}

fn instance(ctx: &periscope_runtime::class::CallContext) -> Result<
    periscope_runtime::value::ObjectId,
    RuntimeError,
> {
    ctx.instance
        .ok_or_else(|| RuntimeError::InvalidArguments("instance required".to_string()))
}

fn crate_class() -> ClassDef {
    ClassDef::new("Warehouse.Crate")
        .field_with("weight", "System.Int32", Value::I32(0))
        .field_with("label", "System.String", Value::Str(String::new()))
        .property("Weight", "System.Int32", Some("get_Weight"), None)
        .constructor(
            MethodDef::ctor()
                .param("initial", "System.Int32")
                .body(|rt, ctx| {
                    let id = instance(&ctx)?;
                    rt.set_instance_field(id, "weight", ctx.args[0].clone())?;
                    Ok(Value::Null)
                }),
        )
        .method(
            MethodDef::new("get_Weight")
                .returns("System.Int32")
                .body(|rt, ctx| rt.get_instance_field(instance(&ctx)?, "weight")),
        )
        .method(
            MethodDef::new("AddWeight")
                .param("delta", "System.Int32")
                .returns("System.Int32")
                .body(|rt, ctx| {
                    let id = instance(&ctx)?;
                    let current = rt.get_instance_field(id, "weight")?.as_i64().unwrap_or(0);
                    let delta = ctx.args[0].as_i64().ok_or_else(|| {
                        RuntimeError::InvalidArguments("delta must be an integer".to_string())
                    })?;
                    let next = (current + delta) as i32;
                    rt.set_instance_field(id, "weight", Value::I32(next))?;
                    Ok(Value::I32(next))
                }),
        )
        .method(
            MethodDef::new("Seal")
                .param("inspector", "System.String")
                .body(|rt, ctx| {
                    let id = instance(&ctx)?;
                    let label = rt.get_instance_field(id, "label")?;
                    rt.raise_event(id, "Sealed", label);
                    Ok(Value::Null)
                }),
        )
        .method(
            MethodDef::new("Grade")
                .param("grade", "Warehouse.Grade")
                .returns("System.String")
                .body(|_, ctx| match &ctx.args[0] {
                    Value::Enum { member, .. } => Ok(Value::Str(member.clone())),
                    other => Err(RuntimeError::InvalidArguments(format!(
                        "expected an enum argument, got {other:?}"
                    ))),
                }),
        )
        .event("Sealed", "System.EventHandler")
}

fn manifest_class() -> ClassDef {
    ClassDef::new("Warehouse.Manifest")
        .field_with(
            "entries",
            "System.String[]",
            Value::Array {
                element_type: "System.String".to_string(),
                elements: vec![
                    Value::Str("bolts".to_string()),
                    Value::Str("plates".to_string()),
                    Value::Str("rivets".to_string()),
                ],
            },
        )
        .property("Count", "System.Int32", Some("get_Count"), None)
        .method(
            MethodDef::new("get_Count")
                .returns("System.Int32")
                .body(|rt, ctx| {
                    match rt.get_instance_field(instance(&ctx)?, "entries")? {
                        Value::Array { elements, .. } => Ok(Value::I32(elements.len() as i32)),
                        _ => Ok(Value::I32(0)),
                    }
                }),
        )
        .method(
            MethodDef::new("get_Item")
                .param("index", "System.Int32")
                .returns("System.String")
                .body(|rt, ctx| {
                    let id = instance(&ctx)?;
                    let index = ctx.args[0].as_i64().unwrap_or(-1);
                    match rt.get_instance_field(id, "entries")? {
                        Value::Array { elements, .. } => elements
                            .get(index as usize)
                            .cloned()
                            .ok_or_else(|| RuntimeError::TargetException {
                                message: format!("index {index} out of range"),
                                stack: "at Warehouse.Manifest.get_Item".to_string(),
                            }),
                        _ => Err(RuntimeError::Internal("entries missing".to_string())),
                    }
                }),
        )
        .method(
            MethodDef::new("GetEnumerator")
                .returns("Warehouse.ManifestEnumerator")
                .body(|rt, ctx| {
                    let id = instance(&ctx)?;
                    let enumerator = rt.new_instance("Warehouse.ManifestEnumerator", None)?;
                    rt.set_instance_field(enumerator, "manifest", Value::Object(id))?;
                    Ok(Value::Object(enumerator))
                }),
        )
}

fn manifest_enumerator_class() -> ClassDef {
    ClassDef::new("Warehouse.ManifestEnumerator")
        .field_with("manifest", "Warehouse.Manifest", Value::Null)
        .field_with("position", "System.Int32", Value::I32(-1))
        .property("Current", "System.String", Some("get_Current"), None)
        .method(
            MethodDef::new("MoveNext")
                .returns("System.Boolean")
                .body(|rt, ctx| {
                    let id = instance(&ctx)?;
                    let manifest = rt
                        .get_instance_field(id, "manifest")?
                        .object_id()
                        .ok_or_else(|| RuntimeError::Internal("manifest missing".to_string()))?;
                    let len = match rt.get_instance_field(manifest, "entries")? {
                        Value::Array { elements, .. } => elements.len() as i64,
                        _ => 0,
                    };
                    let next = rt.get_instance_field(id, "position")?.as_i64().unwrap_or(-1) + 1;
                    rt.set_instance_field(id, "position", Value::I32(next as i32))?;
                    Ok(Value::Bool(next < len))
                }),
        )
        .method(
            MethodDef::new("get_Current")
                .returns("System.String")
                .body(|rt, ctx| {
                    let id = instance(&ctx)?;
                    let manifest = rt
                        .get_instance_field(id, "manifest")?
                        .object_id()
                        .ok_or_else(|| RuntimeError::Internal("manifest missing".to_string()))?;
                    let position = rt.get_instance_field(id, "position")?.as_i64().unwrap_or(-1);
                    match rt.get_instance_field(manifest, "entries")? {
                        Value::Array { elements, .. } => elements
                            .get(position as usize)
                            .cloned()
                            .ok_or_else(|| RuntimeError::TargetException {
                                message: "enumeration not started or finished".to_string(),
                                stack: "at Warehouse.ManifestEnumerator.get_Current".to_string(),
                            }),
                        _ => Err(RuntimeError::Internal("entries missing".to_string())),
                    }
                }),
        )
        .method(MethodDef::new("Reset").body(|rt, ctx| {
            rt.set_instance_field(instance(&ctx)?, "position", Value::I32(-1))?;
            Ok(Value::Null)
        }))
        .method(MethodDef::new("Dispose").body(|_, _| Ok(Value::Null)))
}
