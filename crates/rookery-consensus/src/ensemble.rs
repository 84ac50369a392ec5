//! Ensemble mode: K parallel attempts merged into one output.
//!
//! Merge strategies: majority vote over outputs treated as discrete
//! decisions, numeric averaging, or a nominated synthesizer agent that
//! receives every output and produces the final one. The agreement score
//! (fraction of participants whose output equals the chosen output) is
//! the result's confidence.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;

use rookery_orchestration::Orchestrator;
use rookery_types::{AgentOpinion, CoreError, CoreResult, Decision};

use crate::session::{payload_text, CollabMode, CollaborationResult, SessionContext};
use crate::vote::{vote, ConsensusStrategy};

/// How parallel outputs become one.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeStrategy {
    /// Majority over outputs as discrete decisions.
    Vote,
    /// Arithmetic mean; every output must be numeric.
    Average,
    /// A nominated agent synthesizes the outputs into one.
    Synthesis {
        /// The synthesizer agent id.
        synthesizer: String,
    },
}

/// Ensemble configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleParams {
    /// Output merge strategy.
    pub merge: MergeStrategy,
}

/// Coordinator for ensemble sessions.
pub struct EnsembleCoordinator {
    orchestrator: Arc<Orchestrator>,
}

impl EnsembleCoordinator {
    /// Create a coordinator over the shared orchestrator.
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Run `task` on every participant in parallel and merge.
    pub async fn run(
        &self,
        task: &str,
        participants: &[String],
        params: EnsembleParams,
    ) -> CoreResult<CollaborationResult> {
        if participants.is_empty() {
            return Err(CoreError::Validation(
                "an ensemble needs at least one participant".into(),
            ));
        }

        let mut ctx = SessionContext::new(Arc::clone(&self.orchestrator), CollabMode::Ensemble);
        ctx.emit("started", json!({ "participants": participants }));

        let attempts: Vec<(String, rookery_types::TaskSpec)> = participants
            .iter()
            .map(|agent| {
                ctx.agent_subtask(agent, task.to_string())
                    .map(|spec| (agent.clone(), spec))
            })
            .collect::<CoreResult<Vec<_>>>()?;

        let results = {
            let ctx_ref = &ctx;
            join_all(attempts.into_iter().map(|(agent, spec)| async move {
                (agent, ctx_ref.execute(spec).await)
            }))
            .await
        };

        let mut outputs: Vec<(String, serde_json::Value)> = Vec::with_capacity(results.len());
        for (agent, result) in results {
            let output = result?;
            ctx.record(1, &agent, "output", output.clone());
            outputs.push((agent, output));
        }
        ctx.emit("round", json!({ "round": 1 }));

        let (chosen, agreement) = match &params.merge {
            MergeStrategy::Vote => merge_by_vote(&outputs)?,
            MergeStrategy::Average => merge_by_average(&outputs)?,
            MergeStrategy::Synthesis { synthesizer } => {
                let prompt = format!(
                    "Synthesize one final answer for: {task}\n\nCandidate outputs:\n{}",
                    outputs
                        .iter()
                        .map(|(agent, output)| format!("[{agent}] {}", payload_text(output)))
                        .collect::<Vec<_>>()
                        .join("\n")
                );
                let spec = ctx.agent_subtask(synthesizer, prompt)?;
                let synthesized = ctx.execute(spec).await?;
                ctx.record(2, synthesizer, "synthesis", synthesized.clone());
                let agreement = agreement_with(&outputs, &synthesized);
                (synthesized, agreement)
            }
        };

        Ok(ctx.finish(chosen, agreement, participants.to_vec()))
    }
}

/// Majority vote over the outputs as discrete decisions.
fn merge_by_vote(
    outputs: &[(String, serde_json::Value)],
) -> CoreResult<(serde_json::Value, f64)> {
    let opinions: Vec<AgentOpinion> = outputs
        .iter()
        .map(|(agent, output)| AgentOpinion::new(agent, Decision::from_value(output), 1.0))
        .collect();
    let outcome = vote(&opinions, ConsensusStrategy::Majority, &HashMap::new())?;
    let chosen = outcome.decision.to_value();
    let agreement = agreement_with(outputs, &chosen);
    Ok((chosen, agreement))
}

/// Arithmetic mean of numeric outputs.
fn merge_by_average(
    outputs: &[(String, serde_json::Value)],
) -> CoreResult<(serde_json::Value, f64)> {
    let mut sum = 0.0;
    for (agent, output) in outputs {
        let value = output.as_f64().ok_or_else(|| {
            CoreError::NoConsensus(format!(
                "average merge needs numeric outputs, '{agent}' produced {output}"
            ))
        })?;
        sum += value;
    }
    let mean = sum / outputs.len() as f64;
    let chosen = json!(mean);
    let agreement = agreement_with(outputs, &chosen);
    Ok((chosen, agreement))
}

/// Fraction of participants whose output equals the chosen output.
fn agreement_with(outputs: &[(String, serde_json::Value)], chosen: &serde_json::Value) -> f64 {
    if outputs.is_empty() {
        return 0.0;
    }
    let matching = outputs.iter().filter(|(_, output)| output == chosen).count();
    matching as f64 / outputs.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs(values: &[(&str, serde_json::Value)]) -> Vec<(String, serde_json::Value)> {
        values
            .iter()
            .map(|(agent, value)| (agent.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn vote_merge_picks_plurality_output() {
        let outputs = outputs(&[
            ("a1", json!("blue")),
            ("a2", json!("blue")),
            ("a3", json!("green")),
        ]);
        let (chosen, agreement) = merge_by_vote(&outputs).unwrap();
        assert_eq!(chosen, json!("blue"));
        assert!((agreement - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn average_merge_requires_numbers() {
        let numeric = outputs(&[("a1", json!(2)), ("a2", json!(4))]);
        let (chosen, agreement) = merge_by_average(&numeric).unwrap();
        assert_eq!(chosen, json!(3.0));
        assert_eq!(agreement, 0.0);

        let mixed = outputs(&[("a1", json!(2)), ("a2", json!("four"))]);
        let err = merge_by_average(&mixed).unwrap_err();
        assert_eq!(err.kind(), rookery_types::ErrorKind::NoConsensus);
    }

    #[test]
    fn full_agreement_scores_one() {
        let outputs = outputs(&[("a1", json!(7)), ("a2", json!(7))]);
        let (chosen, agreement) = merge_by_vote(&outputs).unwrap();
        assert_eq!(chosen, json!(7));
        assert_eq!(agreement, 1.0);
    }
}
