//! Scripted bus-attached stub agents for collaboration-mode tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use rookery_bus::Bus;
use rookery_orchestration::OrchestratorConfig;
use rookery_registry::Registry;
use rookery_types::{AgentCategory, AgentTypeSpec, CapabilityDescriptor};

/// Orchestrator tunables that keep the test suite fast.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        default_task_timeout: Duration::from_millis(500),
        max_retries: 1,
        retry_backoff_base: Duration::from_millis(10),
        retry_backoff_cap: Duration::from_millis(40),
        queue_backoff: Duration::from_millis(10),
        monitor_interval: Duration::from_millis(100),
        session_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Register a single "generalist" type carrying the given capabilities
/// and one agent per id, each declaring all of them.
pub fn register_generalists(registry: &Registry, capabilities: &[&str], agents: &[&str]) {
    let mut spec =
        AgentTypeSpec::new("generalist", "Generalists", AgentCategory::Custom).unwrap();
    for cap in capabilities {
        spec = spec.with_capability(CapabilityDescriptor::new(*cap, *cap));
    }
    registry.register_type(spec).unwrap();
    for id in agents {
        registry
            .register_agent(
                id,
                "generalist",
                id,
                capabilities.iter().map(|c| c.to_string()).collect(),
                4,
            )
            .unwrap();
    }
}

/// Stub agent replying `{"ok": <reply>}` to every dispatch.
pub fn spawn_fixed(bus: &Arc<Bus>, id: &str, reply: Value) {
    spawn_script(bus, id, vec![json!({ "ok": reply })]);
}

/// Stub agent echoing the dispatched description back as its result.
pub fn spawn_echo(bus: &Arc<Bus>, id: &str) {
    let mut inbox = bus
        .subscribe(&format!("agent.{id}.task"))
        .expect("task subscription");
    let task_bus = Arc::clone(bus);
    let agent = id.to_string();
    tokio::spawn(async move {
        while let Some(request) = inbox.recv().await {
            let echo = request
                .payload
                .get("description")
                .cloned()
                .unwrap_or(Value::Null);
            let _ = task_bus.respond(&agent, &request, json!({ "ok": echo }));
        }
    });
}

/// Stub agent replying with the scripted raw payloads in order; the last
/// entry repeats once the script runs out. Entries may be `{"ok": ...}`,
/// `{"err": ...}`, or bare payloads.
pub fn spawn_script(bus: &Arc<Bus>, id: &str, replies: Vec<Value>) {
    assert!(!replies.is_empty(), "script needs at least one reply");
    let mut inbox = bus
        .subscribe(&format!("agent.{id}.task"))
        .expect("task subscription");
    let task_bus = Arc::clone(bus);
    let agent = id.to_string();
    tokio::spawn(async move {
        let mut next = 0usize;
        while let Some(request) = inbox.recv().await {
            let reply = replies[next.min(replies.len() - 1)].clone();
            next += 1;
            let _ = task_bus.respond(&agent, &request, reply);
        }
    });
}
