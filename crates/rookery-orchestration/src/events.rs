//! Reserved lifecycle topics and event payloads.
//!
//! External observers (audit sinks, replay collaborators) subscribe to
//! these topics on the shared bus; nothing in the core depends on anyone
//! listening.

use serde::{Deserialize, Serialize};

use rookery_types::{ErrorPayload, TaskStatus};

/// Sender id the orchestrator uses on the bus.
pub const ORCHESTRATOR_SENDER: &str = "orchestrator";

/// Topic an agent receives task dispatches on.
pub fn agent_task_topic(agent_id: &str) -> String {
    format!("agent.{agent_id}.task")
}

/// Topic an agent receives control messages (cancellation) on.
pub fn agent_control_topic(agent_id: &str) -> String {
    format!("agent.{agent_id}.control")
}

/// Lifecycle topic for a task status.
pub fn task_topic(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Queued | TaskStatus::Waiting => "orchestrator.task.queued",
        TaskStatus::Running => "orchestrator.task.started",
        TaskStatus::Completed => "orchestrator.task.completed",
        TaskStatus::Failed => "orchestrator.task.failed",
        TaskStatus::Cancelled => "orchestrator.task.cancelled",
    }
}

/// Lifecycle topic for agent registration.
pub const AGENT_REGISTERED_TOPIC: &str = "orchestrator.agent.registered";
/// Lifecycle topic for agent status changes.
pub const AGENT_STATUS_TOPIC: &str = "orchestrator.agent.status_changed";
/// Lifecycle topic for agent unregistration.
pub const AGENT_UNREGISTERED_TOPIC: &str = "orchestrator.agent.unregistered";

/// Payload published on `orchestrator.task.*` topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEvent {
    /// Task id.
    pub task_id: String,
    /// Status the task moved to.
    pub status: TaskStatus,
    /// Executing agent, once assigned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    /// Failure descriptor for `failed` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    /// Cancellation reason for `cancelled` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// In-process mirror of task transitions, for waiters that should not
/// race the bus.
#[derive(Debug, Clone)]
pub struct TaskTransition {
    /// Task id.
    pub task_id: String,
    /// New status.
    pub status: TaskStatus,
}
