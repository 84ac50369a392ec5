//! Shared collaboration-session state and subtask plumbing.
//!
//! A session exists only while its coordinator runs: it carries the
//! transcript, the round counter, and a subtask counter used to mint
//! orchestrator task ids. Subtasks go through the normal orchestrator
//! path (`submit` + `wait`), so every session step shows up on the task
//! lifecycle topics like any other work.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};
use uuid::Uuid;

use rookery_orchestration::{Orchestrator, ORCHESTRATOR_SENDER};
use rookery_types::{CoreError, CoreResult, TaskSpec, TaskStatus};

/// Collaboration mode discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollabMode {
    /// Multi-round argument and rebuttal with a judge.
    Debate,
    /// Parallel attempts merged into one output.
    Ensemble,
    /// Sequential capability stages with handoff.
    Pipeline,
    /// Producer/critic revision loop.
    Critique,
    /// Decomposed subtask swarm with an aggregator.
    Swarm,
}

impl CollabMode {
    /// Lowercase mode name used in session topics.
    pub fn as_str(self) -> &'static str {
        match self {
            CollabMode::Debate => "debate",
            CollabMode::Ensemble => "ensemble",
            CollabMode::Pipeline => "pipeline",
            CollabMode::Critique => "critique",
            CollabMode::Swarm => "swarm",
        }
    }
}

/// One recorded step of a collaboration session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Round the entry belongs to (1-based; 0 for round-less steps).
    pub round: u32,
    /// Agent that produced the content.
    pub agent_id: String,
    /// Step kind: `argument`, `rebuttal`, `vote`, `output`, `stage`,
    /// `draft`, `critique`, `synthesis`, `subtask`.
    pub role: String,
    /// The produced payload.
    pub content: serde_json::Value,
}

/// Unified result every collaboration mode returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborationResult {
    /// The mode that produced this result.
    pub mode: CollabMode,
    /// Final output payload.
    pub output: serde_json::Value,
    /// Mode-specific confidence in `[0, 1]`.
    pub confidence: f64,
    /// Agents that took part.
    pub participants: Vec<String>,
    /// Full step-by-step transcript.
    pub transcript: Vec<TranscriptEntry>,
}

/// Transient coordinator-side session state.
pub(crate) struct SessionContext {
    orchestrator: Arc<Orchestrator>,
    /// Session id, unique per run.
    pub id: String,
    /// The mode being coordinated.
    pub mode: CollabMode,
    /// Accumulated transcript.
    pub transcript: Vec<TranscriptEntry>,
    counter: u32,
    subtask_wait: Duration,
}

impl SessionContext {
    pub(crate) fn new(orchestrator: Arc<Orchestrator>, mode: CollabMode) -> Self {
        let subtask_wait = orchestrator.config().session_timeout;
        Self {
            orchestrator,
            id: format!("session-{}", Uuid::new_v4()),
            mode,
            transcript: Vec::new(),
            counter: 0,
            subtask_wait,
        }
    }

    pub(crate) fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Mint the next session-scoped task id.
    pub(crate) fn next_task_id(&mut self) -> String {
        self.counter += 1;
        format!("{}.{}", self.id, self.counter)
    }

    /// Record one transcript step.
    pub(crate) fn record(
        &mut self,
        round: u32,
        agent_id: &str,
        role: &str,
        content: serde_json::Value,
    ) {
        self.transcript.push(TranscriptEntry {
            round,
            agent_id: agent_id.to_string(),
            role: role.to_string(),
            content,
        });
    }

    /// Publish a `session.<mode>.<event>` lifecycle message.
    pub(crate) fn emit(&self, event: &str, extra: serde_json::Value) {
        let topic = format!("session.{}.{event}", self.mode.as_str());
        let mut payload = json!({ "session_id": self.id });
        if let (Some(target), Some(source)) = (payload.as_object_mut(), extra.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
        if let Err(err) = self
            .orchestrator
            .bus()
            .publish(ORCHESTRATOR_SENDER, &topic, payload)
        {
            warn!(session = %self.id, %err, "session event publish failed");
        }
    }

    /// Build the spec for a subtask pinned to one agent.
    pub(crate) fn agent_subtask(
        &mut self,
        agent_id: &str,
        description: String,
    ) -> CoreResult<TaskSpec> {
        Ok(TaskSpec::new(self.next_task_id(), description)?.with_agent(agent_id))
    }

    /// Build the spec for a capability-routed subtask.
    pub(crate) fn capability_subtask(
        &mut self,
        capability: &str,
        description: String,
    ) -> CoreResult<TaskSpec> {
        Ok(TaskSpec::new(self.next_task_id(), description)?.with_capability(capability))
    }

    /// Submit a spec and await its terminal record, mapping failure and
    /// cancellation into errors.
    pub(crate) async fn execute(&self, spec: TaskSpec) -> CoreResult<serde_json::Value> {
        let task_id = self.orchestrator.submit(spec)?;
        let record = self.orchestrator.wait(&task_id, self.subtask_wait).await?;
        match record.status {
            TaskStatus::Completed => Ok(record.result.unwrap_or(serde_json::Value::Null)),
            TaskStatus::Failed => {
                let payload = record
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "subtask failed".to_string());
                Err(CoreError::Agent { message: payload, retryable: false })
            }
            TaskStatus::Cancelled => Err(CoreError::Cancelled(format!(
                "subtask '{task_id}' cancelled"
            ))),
            other => Err(CoreError::State(format!(
                "subtask '{task_id}' terminal wait returned {other:?}"
            ))),
        }
    }

    /// Submit a spec and await it, also reporting which agent ran it.
    pub(crate) async fn execute_tracked(
        &self,
        spec: TaskSpec,
    ) -> CoreResult<(String, serde_json::Value)> {
        let task_id = self.orchestrator.submit(spec)?;
        let record = self.orchestrator.wait(&task_id, self.subtask_wait).await?;
        let agent = record.assigned_agent.clone().unwrap_or_default();
        match record.status {
            TaskStatus::Completed => Ok((agent, record.result.unwrap_or(serde_json::Value::Null))),
            TaskStatus::Failed => {
                let message = record
                    .error
                    .map(|e| e.message)
                    .unwrap_or_else(|| "subtask failed".to_string());
                Err(CoreError::Agent { message, retryable: false })
            }
            TaskStatus::Cancelled => Err(CoreError::Cancelled(format!(
                "subtask '{task_id}' cancelled"
            ))),
            other => Err(CoreError::State(format!(
                "subtask '{task_id}' terminal wait returned {other:?}"
            ))),
        }
    }

    /// Close out the session with its unified result.
    pub(crate) fn finish(
        self,
        output: serde_json::Value,
        confidence: f64,
        participants: Vec<String>,
    ) -> CollaborationResult {
        debug!(session = %self.id, mode = ?self.mode, steps = self.transcript.len(), "session complete");
        self.emit("completed", json!({ "confidence": confidence }));
        CollaborationResult {
            mode: self.mode,
            output,
            confidence: confidence.clamp(0.0, 1.0),
            participants,
            transcript: self.transcript,
        }
    }
}

/// Render a payload as plain prompt text.
pub(crate) fn payload_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
