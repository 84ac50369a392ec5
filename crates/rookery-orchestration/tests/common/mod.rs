//! Scripted bus-attached stub agents for end-to-end scheduler tests.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use rookery_bus::Bus;

/// How a stub agent answers dispatches.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Reply `{"ok": {"echo": <description>}}` immediately.
    Echo,
    /// Reply `{"ok": ...}` after a fixed delay.
    SlowEcho(Duration),
    /// Reply with a structured agent error.
    Fail(&'static str),
    /// Never reply to task dispatches (control messages still ack).
    Silent,
}

/// Attach a stub agent to the bus: a task handler plus a control handler
/// that acknowledges cancellations.
pub fn spawn_agent(bus: &Arc<Bus>, id: &str, behavior: Behavior) {
    let mut inbox = bus
        .subscribe(&format!("agent.{id}.task"))
        .expect("task subscription");
    let task_bus = Arc::clone(bus);
    let agent = id.to_string();
    tokio::spawn(async move {
        while let Some(request) = inbox.recv().await {
            match &behavior {
                Behavior::Echo => {
                    let echo = request.payload.get("description").cloned();
                    let _ = task_bus.respond(&agent, &request, json!({ "ok": { "echo": echo } }));
                }
                Behavior::SlowEcho(delay) => {
                    tokio::time::sleep(*delay).await;
                    let echo = request.payload.get("description").cloned();
                    let _ = task_bus.respond(&agent, &request, json!({ "ok": { "echo": echo } }));
                }
                Behavior::Fail(message) => {
                    let _ = task_bus.respond(
                        &agent,
                        &request,
                        json!({ "err": { "message": message, "retryable": false } }),
                    );
                }
                Behavior::Silent => {}
            }
        }
    });

    let mut control = bus
        .subscribe(&format!("agent.{id}.control"))
        .expect("control subscription");
    let control_bus = Arc::clone(bus);
    let agent = id.to_string();
    tokio::spawn(async move {
        while let Some(request) = control.recv().await {
            let _ = control_bus.respond(&agent, &request, json!({ "ok": "acknowledged" }));
        }
    });
}
