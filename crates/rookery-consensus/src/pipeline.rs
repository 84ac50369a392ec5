//! Pipeline mode: ordered capability stages with handoff.
//!
//! Stage `i` receives stage `i−1`'s output together with the original
//! task. The handoff is either structured (a JSON envelope serialized
//! into the description) or natural (free text). On stage failure the
//! policy is `abort`, or `backtrack-one`: re-run the previous stage once
//! with its original input, then retry the failed stage once.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use rookery_orchestration::Orchestrator;
use rookery_types::{CoreError, CoreResult};

use crate::session::{payload_text, CollabMode, CollaborationResult, SessionContext};

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineStage {
    /// Capability required of the stage's agent.
    pub capability: String,
    /// What the stage should do with its input.
    pub instruction: String,
}

impl PipelineStage {
    /// Shorthand constructor.
    pub fn new(capability: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self { capability: capability.into(), instruction: instruction.into() }
    }
}

/// Payload shape handed between stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffFormat {
    /// JSON envelope: `{task, instruction, input}`.
    Structured,
    /// Free-text prompt.
    Natural,
}

/// What to do when a stage fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Surface the failure immediately.
    Abort,
    /// Re-run the previous stage once, then retry the failed stage once.
    BacktrackOne,
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineParams {
    /// Handoff payload shape.
    pub handoff: HandoffFormat,
    /// Stage failure policy.
    pub on_failure: FailurePolicy,
}

impl Default for PipelineParams {
    fn default() -> Self {
        Self { handoff: HandoffFormat::Natural, on_failure: FailurePolicy::Abort }
    }
}

/// Coordinator for pipeline sessions.
pub struct PipelineCoordinator {
    orchestrator: Arc<Orchestrator>,
}

impl PipelineCoordinator {
    /// Create a coordinator over the shared orchestrator.
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Run `task` through the ordered stages.
    pub async fn run(
        &self,
        task: &str,
        stages: &[PipelineStage],
        params: PipelineParams,
    ) -> CoreResult<CollaborationResult> {
        if stages.is_empty() {
            return Err(CoreError::Validation("a pipeline needs at least one stage".into()));
        }

        let mut ctx = SessionContext::new(Arc::clone(&self.orchestrator), CollabMode::Pipeline);
        ctx.emit("started", json!({ "stages": stages.len() }));

        let mut participants: Vec<String> = Vec::new();
        // Input fed into each stage, kept for backtracking.
        let mut stage_inputs: Vec<serde_json::Value> = Vec::with_capacity(stages.len());
        let mut current_input = serde_json::Value::Null;

        let mut index = 0usize;
        while index < stages.len() {
            let stage = &stages[index];
            let round = (index + 1) as u32;
            if stage_inputs.len() <= index {
                stage_inputs.push(current_input.clone());
            }

            let attempt = self
                .run_stage(&mut ctx, task, stage, &stage_inputs[index], params.handoff)
                .await;
            let (agent, output) = match attempt {
                Ok(stage_result) => stage_result,
                Err(err) if params.on_failure == FailurePolicy::BacktrackOne && index > 0 => {
                    warn!(stage = index, %err, "stage failed, backtracking one");
                    // Re-run the previous stage with the same input it had,
                    // then retry this stage once with the fresh output.
                    let previous = &stages[index - 1];
                    let (redo_agent, redo) = self
                        .run_stage(&mut ctx, task, previous, &stage_inputs[index - 1], params.handoff)
                        .await?;
                    ctx.record(round, &redo_agent, "stage", redo.clone());
                    if !participants.contains(&redo_agent) {
                        participants.push(redo_agent);
                    }
                    stage_inputs[index] = redo;
                    self.run_stage(&mut ctx, task, stage, &stage_inputs[index], params.handoff)
                        .await?
                }
                Err(err) => return Err(err),
            };

            ctx.record(round, &agent, "stage", output.clone());
            if !participants.contains(&agent) {
                participants.push(agent);
            }
            ctx.emit("round", json!({ "round": round, "stage": stage.capability }));
            current_input = output;
            index += 1;
        }

        debug!(stages = stages.len(), "pipeline complete");
        let confidence = 1.0;
        Ok(ctx.finish(current_input, confidence, participants))
    }

    async fn run_stage(
        &self,
        ctx: &mut SessionContext,
        task: &str,
        stage: &PipelineStage,
        input: &serde_json::Value,
        handoff: HandoffFormat,
    ) -> CoreResult<(String, serde_json::Value)> {
        let description = match handoff {
            HandoffFormat::Structured => json!({
                "task": task,
                "instruction": stage.instruction,
                "input": input,
            })
            .to_string(),
            HandoffFormat::Natural => {
                if input.is_null() {
                    format!("{}\n\nOriginal task: {task}", stage.instruction)
                } else {
                    format!(
                        "{}\n\nOriginal task: {task}\n\nPrevious stage output:\n{}",
                        stage.instruction,
                        payload_text(input)
                    )
                }
            }
        };
        let spec = ctx.capability_subtask(&stage.capability, description)?;
        ctx.execute_tracked(spec).await
    }
}
