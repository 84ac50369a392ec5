//! Debate mode: K participants, R rounds, then a judge.
//!
//! Round 1 collects an initial argument from every participant; later
//! rounds show each participant the full prior transcript and collect a
//! rebuttal. The judge is either a designated agent or a jury voting with
//! a consensus strategy. Jury votes are transcript entries, so a debate's
//! transcript holds `R × K` arguments plus one entry per jury member.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;
use tracing::debug;

use rookery_orchestration::Orchestrator;
use rookery_types::{AgentOpinion, CoreError, CoreResult, Decision};

use crate::session::{payload_text, CollabMode, CollaborationResult, SessionContext};
use crate::vote::{vote, ConsensusStrategy};

/// Who settles the debate.
#[derive(Debug, Clone, PartialEq)]
pub enum DebateJudge {
    /// One designated judge agent.
    Agent(String),
    /// A jury of agents voting under a consensus strategy.
    Jury {
        /// Jury member agent ids.
        members: Vec<String>,
        /// How jury opinions combine.
        strategy: ConsensusStrategy,
    },
}

/// Debate configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DebateParams {
    /// Total rounds, including the opening round.
    pub rounds: u32,
    /// The judge.
    pub judge: DebateJudge,
    /// Voting weight per agent for jury strategies.
    pub weights: HashMap<String, f64>,
}

impl DebateParams {
    /// A debate with the given rounds and judge, unit weights.
    pub fn new(rounds: u32, judge: DebateJudge) -> Self {
        Self { rounds, judge, weights: HashMap::new() }
    }
}

/// Coordinator for debate sessions.
pub struct DebateCoordinator {
    orchestrator: Arc<Orchestrator>,
}

impl DebateCoordinator {
    /// Create a coordinator over the shared orchestrator.
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Run a debate over `task` between `participants`.
    pub async fn run(
        &self,
        task: &str,
        participants: &[String],
        params: DebateParams,
    ) -> CoreResult<CollaborationResult> {
        if participants.len() < 2 {
            return Err(CoreError::Validation(
                "a debate needs at least two participants".into(),
            ));
        }
        if params.rounds == 0 {
            return Err(CoreError::Validation("a debate needs at least one round".into()));
        }

        let mut ctx = SessionContext::new(Arc::clone(&self.orchestrator), CollabMode::Debate);
        ctx.emit(
            "started",
            json!({ "participants": participants, "rounds": params.rounds }),
        );

        for round in 1..=params.rounds {
            let prompts: Vec<(String, rookery_types::TaskSpec)> = participants
                .iter()
                .map(|agent| {
                    let prompt = if round == 1 {
                        format!("Present your opening argument for: {task}")
                    } else {
                        format!(
                            "Round {round} of the debate on: {task}\n\nPrior arguments:\n{}\n\nPresent your rebuttal.",
                            render_transcript(&ctx)
                        )
                    };
                    ctx.agent_subtask(agent, prompt).map(|spec| (agent.clone(), spec))
                })
                .collect::<CoreResult<Vec<_>>>()?;

            let results = {
                let ctx_ref = &ctx;
                join_all(prompts.into_iter().map(|(agent, spec)| async move {
                    (agent, ctx_ref.execute(spec).await)
                }))
                .await
            };

            let role = if round == 1 { "argument" } else { "rebuttal" };
            for (agent, result) in results {
                ctx.record(round, &agent, role, result?);
            }
            ctx.emit("round", json!({ "round": round }));
            debug!(round, "debate round complete");
        }

        let (decision, confidence) = self.judge(&mut ctx, task, participants, &params).await?;
        Ok(ctx.finish(decision.to_value(), confidence, participants.to_vec()))
    }

    /// Settle the debate: returns the winning decision and the judge's
    /// confidence.
    async fn judge(
        &self,
        ctx: &mut SessionContext,
        task: &str,
        participants: &[String],
        params: &DebateParams,
    ) -> CoreResult<(Decision, f64)> {
        match &params.judge {
            DebateJudge::Agent(judge_id) => {
                let prompt = format!(
                    "Judge this debate on: {task}\n\nTranscript:\n{}\n\nName the winning participant and your confidence.",
                    render_transcript(ctx)
                );
                let spec = ctx.agent_subtask(judge_id, prompt)?;
                let verdict = ctx.execute(spec).await?;
                let (decision, confidence) = parse_verdict(&verdict);
                Ok((decision, confidence))
            }
            DebateJudge::Jury { members, strategy } => {
                let ballots: Vec<(String, rookery_types::TaskSpec)> = members
                    .iter()
                    .map(|member| {
                        let prompt = format!(
                            "You are on the jury for a debate on: {task}\n\nTranscript:\n{}\n\nVote for the winning participant.",
                            render_transcript(ctx)
                        );
                        ctx.agent_subtask(member, prompt).map(|spec| (member.clone(), spec))
                    })
                    .collect::<CoreResult<Vec<_>>>()?;

                let results = {
                    let ctx_ref = &*ctx;
                    join_all(ballots.into_iter().map(|(member, spec)| async move {
                        (member, ctx_ref.execute(spec).await)
                    }))
                    .await
                };

                let jury_round = params.rounds + 1;
                let mut opinions = Vec::with_capacity(members.len());
                for (member, result) in results {
                    let ballot = result?;
                    let (decision, confidence) = parse_verdict(&ballot);
                    ctx.record(jury_round, &member, "vote", ballot);
                    opinions.push(AgentOpinion::new(member, decision, confidence));
                }

                let outcome = vote(&opinions, *strategy, &params.weights)?;
                let confidence = outcome.share();
                Ok((outcome.decision, confidence))
            }
        }
    }
}

/// Render accumulated arguments as prompt text.
fn render_transcript(ctx: &SessionContext) -> String {
    ctx.transcript
        .iter()
        .map(|entry| {
            format!(
                "[round {} | {}] {}",
                entry.round,
                entry.agent_id,
                payload_text(&entry.content)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pull `{winner, confidence}` out of a judge or jury reply; a bare
/// payload is taken as the decision itself with middling confidence.
fn parse_verdict(payload: &serde_json::Value) -> (Decision, f64) {
    if let Some(object) = payload.as_object() {
        if let Some(winner) = object.get("winner") {
            let confidence = object
                .get("confidence")
                .and_then(|c| c.as_f64())
                .unwrap_or(0.5)
                .clamp(0.0, 1.0);
            return (Decision::from_value(winner), confidence);
        }
    }
    (Decision::from_value(payload), 0.5)
}
