//! periscope-agent: standalone agent binary.
//!
//! Serves the Periscope protocol over a small self-hosted sandbox
//! runtime. Real deployments embed the agent library inside the target
//! process and attach it to the application's own runtime; this binary
//! exists for smoke tests and protocol exploration.

use std::sync::{Arc, Mutex};

use tracing::info;

use periscope_agent::config::AgentConfig;
use periscope_agent::server::AgentServer;
use periscope_agent::{logging, AgentState};
use periscope_runtime::class::{AssemblyDef, ClassDef, MethodDef};
use periscope_runtime::runtime::RuntimeCore;
use periscope_runtime::value::Value;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::load()?;
    let pid = std::process::id();
    let log_path = logging::init(&config.logging, pid)?;

    info!(version = env!("CARGO_PKG_VERSION"), ?log_path, "periscope agent starting");

    let runtime = Arc::new(Mutex::new(sandbox_runtime()));
    let (state, jobs_rx) = AgentState::new(config, runtime);
    let server = AgentServer::new(state.clone());

    tokio::select! {
        result = server.run(jobs_rx) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
            let _ = state.shutdown_tx.send(());
        }
    }
    Ok(())
}

/// The sandbox world this binary hosts.
fn sandbox_runtime() -> RuntimeCore {
    let mut rt = RuntimeCore::new("periscope-sandbox");
    let loaded = rt.load_assembly(
        AssemblyDef::new("Sandbox").class(
            ClassDef::new("Sandbox.Clock")
                .method(
                    MethodDef::new("UtcNow")
                        .returns("System.DateTime")
                        .static_method()
                        .body(|_, _| Ok(Value::DateTime(chrono::Utc::now()))),
                )
                .method(
                    MethodDef::new("Echo")
                        .param("text", "System.String")
                        .returns("System.String")
                        .static_method()
                        .body(|_, ctx| Ok(ctx.args[0].clone())),
                ),
        ),
    );
    if let Err(err) = loaded {
        tracing::error!(%err, "sandbox assembly failed to load");
    }
    rt
}
