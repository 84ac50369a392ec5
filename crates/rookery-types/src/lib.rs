#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **rookery-types** – Shared primitive data structures for the Rookery
//! orchestration core.
//!
//! The crate is dependency-light and sits at the very bottom of the crate
//! graph so that *every* other crate can depend on it without causing cycles.
//! It intentionally makes no assumptions about transport, scheduling, or
//! storage: tasks carry opaque payloads, agents are described rather than
//! implemented, and the only value the core ever introspects is the
//! [`Decision`] variant used by the consensus engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

//─────────────────────────────
//  Validation limits
//─────────────────────────────

/// Maximum allowed size for task descriptions to bound admission payloads.
pub const MAX_TASK_DESCRIPTION_LEN: usize = 4096;

/// Maximum allowed size for agent and agent-type names.
pub const MAX_AGENT_NAME_LEN: usize = 256;

/// Maximum allowed size for caller-supplied identifiers.
pub const MAX_ID_LEN: usize = 128;

/// Maximum allowed size for bus topic strings.
pub const MAX_TOPIC_LEN: usize = 256;

//─────────────────────────────
//  Submodules
//─────────────────────────────

/// Error taxonomy shared by every subsystem.
pub mod error;
/// Hashable decision values used by the consensus engine.
pub mod decision;

pub use decision::Decision;
pub use error::{CoreError, CoreResult, ErrorKind, ErrorPayload};

//─────────────────────────────
//  Agent taxonomy
//─────────────────────────────

/// Closed set of agent-type categories used for catalog filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentCategory {
    /// Information gathering and synthesis.
    Research,
    /// Source code production and modification.
    Code,
    /// Data extraction and transformation.
    Data,
    /// Prose and documentation production.
    Writing,
    /// Goal decomposition and planning.
    Planning,
    /// Review and scoring of other agents' output.
    Critique,
    /// Side-effecting execution (shell, API calls).
    Execution,
    /// Long-lived context and recall.
    Memory,
    /// Anything outside the built-in categories.
    Custom,
}

/// A single named skill an agent type can declare.
///
/// The schemas are opaque JSON blobs; the core never interprets them, it
/// only forwards them to external collaborators (admission API, UI).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Stable capability identifier, e.g. `web_research`.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Tool identifiers this capability requires at execution time.
    #[serde(default)]
    pub toolset: Vec<String>,
    /// Input schema (opaque).
    #[serde(default)]
    pub input_schema: serde_json::Value,
    /// Output schema (opaque).
    #[serde(default)]
    pub output_schema: serde_json::Value,
}

impl CapabilityDescriptor {
    /// Create a descriptor with empty toolset and schemas.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            toolset: Vec::new(),
            input_schema: serde_json::Value::Null,
            output_schema: serde_json::Value::Null,
        }
    }
}

/// Description of a class of agents: a capability manifest, not an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTypeSpec {
    /// Stable type identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Catalog category.
    pub category: AgentCategory,
    /// Type version string.
    pub version: String,
    /// Capabilities instances of this type may declare.
    pub capabilities: Vec<CapabilityDescriptor>,
    /// Configuration schema (opaque).
    #[serde(default)]
    pub config_schema: serde_json::Value,
}

impl AgentTypeSpec {
    /// Create a new agent-type specification with validation.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        category: AgentCategory,
    ) -> CoreResult<Self> {
        let spec = Self {
            id: id.into(),
            name: name.into(),
            category,
            version: "0.1.0".to_string(),
            capabilities: Vec::new(),
            config_schema: serde_json::Value::Null,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Add a capability descriptor (builder style).
    pub fn with_capability(mut self, cap: CapabilityDescriptor) -> Self {
        self.capabilities.push(cap);
        self
    }

    /// Set the version string (builder style).
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Validate identifier bounds and capability uniqueness.
    pub fn validate(&self) -> CoreResult<()> {
        validate_id("agent type id", &self.id)?;
        validate_name("agent type name", &self.name)?;
        let mut seen = std::collections::HashSet::new();
        for cap in &self.capabilities {
            validate_id("capability id", &cap.id)?;
            if !seen.insert(cap.id.as_str()) {
                return Err(CoreError::Validation(format!(
                    "duplicate capability id '{}' in agent type '{}'",
                    cap.id, self.id
                )));
            }
        }
        Ok(())
    }

    /// Whether this type declares the given capability.
    pub fn declares(&self, cap_id: &str) -> bool {
        self.capabilities.iter().any(|c| c.id == cap_id)
    }
}

//─────────────────────────────
//  Agent status state machine
//─────────────────────────────

/// Lifecycle status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    /// Registered but not yet confirmed.
    Created,
    /// Available for dispatch.
    Idle,
    /// Executing at least one task.
    Busy,
    /// Admin-paused; in-flight work drains, no new dispatch.
    Paused,
    /// Dispatch or health failure; requires admin reset.
    Error,
    /// Unregistered. Terminal.
    Stopped,
}

impl AgentStatus {
    /// Whether `self → next` is a legal transition.
    ///
    /// Any state may fall to `Error` on a dispatch or health failure, and
    /// any non-terminal state may move to `Stopped` on unregister. `Error`
    /// recovers to `Idle` only through an admin reset.
    pub fn can_transition_to(self, next: AgentStatus) -> bool {
        use AgentStatus::*;
        if self == next {
            return false;
        }
        match (self, next) {
            (Stopped, _) => false,
            (_, Error) => true,
            (_, Stopped) => true,
            (Created, Idle) => true,
            (Idle, Busy) | (Busy, Idle) => true,
            (Idle, Paused) | (Busy, Paused) => true,
            (Paused, Idle) => true,
            (Error, Idle) => true,
            _ => false,
        }
    }

    /// Whether agents in this status accept new dispatch.
    pub fn is_dispatchable(self) -> bool {
        matches!(self, AgentStatus::Idle | AgentStatus::Busy)
    }
}

//─────────────────────────────
//  Task specification
//─────────────────────────────

/// Specification of a unit of work submitted to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Caller-supplied stable identifier, unique for the orchestrator's lifetime.
    pub id: String,
    /// Opaque work description forwarded verbatim to the executing agent.
    pub description: String,
    /// Scheduling priority; higher runs earlier.
    #[serde(default)]
    pub priority: i64,
    /// Capability required of the executing agent, if any.
    #[serde(default)]
    pub required_capability: Option<String>,
    /// Pin execution to a specific agent, bypassing capability routing.
    #[serde(default)]
    pub agent: Option<String>,
    /// Task ids that must complete before this task may run.
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Per-task dispatch timeout override.
    #[serde(default)]
    pub timeout: Option<Duration>,
}

impl TaskSpec {
    /// Create a new task specification with validation.
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> CoreResult<Self> {
        let spec = Self {
            id: id.into(),
            description: description.into(),
            priority: 0,
            required_capability: None,
            agent: None,
            dependencies: Vec::new(),
            timeout: None,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Set the scheduling priority (builder style).
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    /// Require a capability of the executing agent (builder style).
    pub fn with_capability(mut self, cap_id: impl Into<String>) -> Self {
        self.required_capability = Some(cap_id.into());
        self
    }

    /// Pin execution to a specific agent (builder style).
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent = Some(agent_id.into());
        self
    }

    /// Declare dependencies on other tasks (builder style).
    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Override the dispatch timeout (builder style).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validate identifier and description bounds.
    pub fn validate(&self) -> CoreResult<()> {
        validate_id("task id", &self.id)?;
        if self.description.trim().is_empty() {
            return Err(CoreError::Validation("task description cannot be empty".into()));
        }
        if self.description.len() > MAX_TASK_DESCRIPTION_LEN {
            return Err(CoreError::Validation(format!(
                "task description too long: {} > {}",
                self.description.len(),
                MAX_TASK_DESCRIPTION_LEN
            )));
        }
        if self.dependencies.iter().any(|d| d == &self.id) {
            return Err(CoreError::Validation(format!(
                "task '{}' cannot depend on itself",
                self.id
            )));
        }
        Ok(())
    }
}

//─────────────────────────────
//  Task lifecycle
//─────────────────────────────

/// Lifecycle status of a task inside the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Ready to run; sitting in the priority queue.
    Queued,
    /// Blocked on unfinished dependencies.
    Waiting,
    /// Dispatched to an agent.
    Running,
    /// Finished with a result. Terminal.
    Completed,
    /// Finished with an error. Terminal.
    Failed,
    /// Cancelled before or during execution. Terminal.
    Cancelled,
}

impl TaskStatus {
    /// Whether this status is terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Waiting, Queued) => true,
            (Queued, Running) => true,
            (Running, Completed) | (Running, Failed) => true,
            // A queued task can fail without running when its pinned
            // agent disappears before dispatch.
            (Queued, Failed) => true,
            (Waiting, Cancelled) | (Queued, Cancelled) | (Running, Cancelled) => true,
            _ => false,
        }
    }
}

/// Full record of a task owned by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// The admitted specification.
    pub spec: TaskSpec,
    /// Current lifecycle status.
    pub status: TaskStatus,
    /// Admission sequence number; breaks creation-timestamp ties.
    pub seq: u64,
    /// Admission timestamp.
    pub created_at: DateTime<Utc>,
    /// Set when the task enters `Running`.
    pub started_at: Option<DateTime<Utc>>,
    /// Set when the task reaches a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
    /// Agent the task ran on; set exactly once, at `Running`.
    pub assigned_agent: Option<String>,
    /// Result payload on completion.
    pub result: Option<serde_json::Value>,
    /// Error descriptor on failure.
    pub error: Option<ErrorPayload>,
    /// Cancellation reason, e.g. `upstream-failed`.
    pub cancel_reason: Option<String>,
}

impl TaskRecord {
    /// Admit a spec: tasks with unmet dependencies start `Waiting`.
    pub fn admit(spec: TaskSpec, seq: u64, now: DateTime<Utc>) -> Self {
        let status = if spec.dependencies.is_empty() {
            TaskStatus::Queued
        } else {
            TaskStatus::Waiting
        };
        Self {
            spec,
            status,
            seq,
            created_at: now,
            started_at: None,
            completed_at: None,
            assigned_agent: None,
            result: None,
            error: None,
            cancel_reason: None,
        }
    }
}

//─────────────────────────────
//  Consensus opinion
//─────────────────────────────

/// A single agent's vote in a consensus round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentOpinion {
    /// Voting agent.
    pub agent_id: String,
    /// The decision being voted for.
    pub decision: Decision,
    /// Confidence in `[0, 1]`; clamped on construction.
    pub confidence: f64,
    /// Opaque free-text rationale.
    pub reasoning: String,
}

impl AgentOpinion {
    /// Create an opinion, clamping confidence into `[0, 1]`.
    pub fn new(agent_id: impl Into<String>, decision: Decision, confidence: f64) -> Self {
        Self {
            agent_id: agent_id.into(),
            decision,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: String::new(),
        }
    }

    /// Attach reasoning text (builder style).
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }
}

//─────────────────────────────
//  Shared validation helpers
//─────────────────────────────

/// Validate a caller-supplied identifier: non-empty, bounded length.
pub fn validate_id(what: &str, id: &str) -> CoreResult<()> {
    if id.trim().is_empty() {
        return Err(CoreError::Validation(format!("{what} cannot be empty")));
    }
    if id.len() > MAX_ID_LEN {
        return Err(CoreError::Validation(format!(
            "{what} too long: {} > {MAX_ID_LEN}",
            id.len()
        )));
    }
    Ok(())
}

/// Validate a human-readable name: non-empty, bounded length.
pub fn validate_name(what: &str, name: &str) -> CoreResult<()> {
    if name.trim().is_empty() {
        return Err(CoreError::Validation(format!("{what} cannot be empty")));
    }
    if name.len() > MAX_AGENT_NAME_LEN {
        return Err(CoreError::Validation(format!(
            "{what} too long: {} > {MAX_AGENT_NAME_LEN}",
            name.len()
        )));
    }
    Ok(())
}
