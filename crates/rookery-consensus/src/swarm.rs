//! Swarm mode: a decomposed subtask DAG coordinated over the bus.
//!
//! The decomposer turns the request into a plan, the plan runs through
//! the normal orchestrator path, and the coordinator shares intermediate
//! results either on a session blackboard topic or by direct messages to
//! the agents that already took part. The plan's final subtask acts as
//! the aggregator; its output is the session output. The orchestrator's
//! plan-size cap is the swarm's convergence threshold.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use rookery_decomposer::{Decomposer, DecompositionHints};
use rookery_orchestration::{Orchestrator, ORCHESTRATOR_SENDER};
use rookery_types::{CoreError, CoreResult, TaskStatus};

use crate::session::{CollabMode, CollaborationResult, SessionContext};

/// How swarm members share intermediate results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwarmCoordination {
    /// A reserved topic the coordinator writes and everyone may read.
    Blackboard,
    /// Direct messages to the agents already active in the swarm.
    DirectMessaging,
}

/// Swarm configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SwarmParams {
    /// Result-sharing mechanism.
    pub coordination: SwarmCoordination,
    /// Hints forwarded to the decomposer.
    pub hints: Option<DecompositionHints>,
}

impl Default for SwarmParams {
    fn default() -> Self {
        Self { coordination: SwarmCoordination::Blackboard, hints: None }
    }
}

/// Coordinator for swarm sessions.
pub struct SwarmCoordinator {
    orchestrator: Arc<Orchestrator>,
    decomposer: Arc<Decomposer>,
}

impl SwarmCoordinator {
    /// Create a coordinator over the shared orchestrator and decomposer.
    pub fn new(orchestrator: Arc<Orchestrator>, decomposer: Arc<Decomposer>) -> Self {
        Self { orchestrator, decomposer }
    }

    /// Decompose `task` and drive the resulting DAG to completion.
    pub async fn run(&self, task: &str, params: SwarmParams) -> CoreResult<CollaborationResult> {
        let mut ctx = SessionContext::new(Arc::clone(&self.orchestrator), CollabMode::Swarm);
        let blackboard_topic = format!("session.swarm.{}.blackboard", ctx.id);

        let plan = self
            .decomposer
            .decompose(&ctx.id, task, params.hints.as_ref())
            .map_err(|err| match err {
                CoreError::Pattern(msg) => CoreError::Decomposition(msg),
                other => other,
            })?;
        let order = plan.topological_order()?;
        // The plan-size cap doubles as the swarm convergence threshold.
        let task_ids = self.orchestrator.submit_plan(&plan)?;
        let coordination = match params.coordination {
            SwarmCoordination::Blackboard => "blackboard",
            SwarmCoordination::DirectMessaging => "direct",
        };
        ctx.emit(
            "started",
            json!({ "subtasks": task_ids.len(), "coordination": coordination }),
        );

        let wait = self.orchestrator.config().session_timeout;
        let mut participants: Vec<String> = Vec::new();
        let mut final_output = serde_json::Value::Null;

        // Await subtasks in topological order so shared results flow in
        // dependency order.
        for (round, local) in order.iter().enumerate() {
            let task_id = format!("{}.{}", plan.parent_id, local);
            let record = self.orchestrator.wait(&task_id, wait).await?;
            match record.status {
                TaskStatus::Completed => {}
                TaskStatus::Failed => {
                    return Err(CoreError::Agent {
                        message: record
                            .error
                            .map(|e| e.message)
                            .unwrap_or_else(|| format!("swarm subtask '{task_id}' failed")),
                        retryable: false,
                    })
                }
                _ => {
                    return Err(CoreError::Cancelled(format!(
                        "swarm subtask '{task_id}' did not complete"
                    )))
                }
            }

            let agent = record.assigned_agent.clone().unwrap_or_default();
            let output = record.result.clone().unwrap_or(serde_json::Value::Null);
            ctx.record((round + 1) as u32, &agent, "subtask", output.clone());
            if !agent.is_empty() && !participants.contains(&agent) {
                participants.push(agent.clone());
            }

            let update = json!({
                "session_id": ctx.id,
                "subtask": local,
                "agent": agent,
                "output": output,
            });
            match params.coordination {
                SwarmCoordination::Blackboard => {
                    let _ = self.orchestrator.bus().publish(
                        ORCHESTRATOR_SENDER,
                        &blackboard_topic,
                        update,
                    );
                }
                SwarmCoordination::DirectMessaging => {
                    for peer in &participants {
                        if peer != &agent {
                            let _ = self.orchestrator.bus().publish(
                                ORCHESTRATOR_SENDER,
                                &format!("agent.{peer}.peer"),
                                update.clone(),
                            );
                        }
                    }
                }
            }
            ctx.emit("round", json!({ "round": round + 1, "subtask": local }));
            final_output = output;
        }

        debug!(subtasks = order.len(), "swarm complete");
        let confidence = 1.0;
        Ok(ctx.finish(final_output, confidence, participants))
    }
}
