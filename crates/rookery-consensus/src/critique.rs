//! Critique mode: a producer revising drafts under critic review.
//!
//! Each iteration the producer emits a draft, the critics score it in
//! `[0, 1]` and comment, and the loop ends when the lowest score reaches
//! the approval threshold or the iteration cap is hit. Critics review in
//! parallel or sequentially depending on configuration.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::json;
use tracing::debug;

use rookery_orchestration::Orchestrator;
use rookery_types::{CoreError, CoreResult};

use crate::session::{payload_text, CollabMode, CollaborationResult, SessionContext};

/// Critique configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct CritiqueParams {
    /// Lowest acceptable minimum critic score.
    pub approval_threshold: f64,
    /// Iteration cap.
    pub max_iterations: u32,
    /// Whether critics review concurrently.
    pub parallel_critics: bool,
}

impl Default for CritiqueParams {
    fn default() -> Self {
        Self { approval_threshold: 0.75, max_iterations: 3, parallel_critics: true }
    }
}

/// One critic's review of a draft.
#[derive(Debug, Clone)]
struct Review {
    critic: String,
    score: f64,
    comment: String,
}

/// Coordinator for critique sessions.
pub struct CritiqueCoordinator {
    orchestrator: Arc<Orchestrator>,
}

impl CritiqueCoordinator {
    /// Create a coordinator over the shared orchestrator.
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Iterate `producer` drafts under review by `critics`.
    pub async fn run(
        &self,
        task: &str,
        producer: &str,
        critics: &[String],
        params: CritiqueParams,
    ) -> CoreResult<CollaborationResult> {
        if critics.is_empty() {
            return Err(CoreError::Validation("critique needs at least one critic".into()));
        }
        if params.max_iterations == 0 {
            return Err(CoreError::Validation("critique needs at least one iteration".into()));
        }
        if !(0.0..=1.0).contains(&params.approval_threshold) {
            return Err(CoreError::Validation(format!(
                "approval threshold must be within [0, 1], got {}",
                params.approval_threshold
            )));
        }

        let mut ctx = SessionContext::new(Arc::clone(&self.orchestrator), CollabMode::Critique);
        ctx.emit(
            "started",
            json!({ "producer": producer, "critics": critics, "max_iterations": params.max_iterations }),
        );

        let mut participants = vec![producer.to_string()];
        participants.extend(critics.iter().cloned());

        let mut draft = serde_json::Value::Null;
        let mut reviews: Vec<Review> = Vec::new();
        let mut confidence = 0.0;

        for iteration in 1..=params.max_iterations {
            let prompt = if iteration == 1 {
                format!("Produce a draft for: {task}")
            } else {
                format!(
                    "Revise your draft for: {task}\n\nCurrent draft:\n{}\n\nCritiques:\n{}",
                    payload_text(&draft),
                    reviews
                        .iter()
                        .map(|r| format!("[{} | score {:.2}] {}", r.critic, r.score, r.comment))
                        .collect::<Vec<_>>()
                        .join("\n")
                )
            };
            let spec = ctx.agent_subtask(producer, prompt)?;
            draft = ctx.execute(spec).await?;
            ctx.record(iteration, producer, "draft", draft.clone());

            reviews = self.collect_reviews(&mut ctx, task, critics, &draft, iteration, &params).await?;
            let min_score = reviews.iter().map(|r| r.score).fold(1.0f64, f64::min);
            confidence = min_score;
            ctx.emit("round", json!({ "round": iteration, "min_score": min_score }));
            debug!(iteration, min_score, "critique iteration complete");

            if min_score >= params.approval_threshold {
                break;
            }
        }

        Ok(ctx.finish(draft, confidence, participants))
    }

    async fn collect_reviews(
        &self,
        ctx: &mut SessionContext,
        task: &str,
        critics: &[String],
        draft: &serde_json::Value,
        iteration: u32,
        params: &CritiqueParams,
    ) -> CoreResult<Vec<Review>> {
        let prompt = format!(
            "Review this draft for: {task}\n\nDraft:\n{}\n\nReply with a score in [0, 1] and a comment.",
            payload_text(draft)
        );

        let mut reviews = Vec::with_capacity(critics.len());
        if params.parallel_critics {
            let specs: Vec<(String, rookery_types::TaskSpec)> = critics
                .iter()
                .map(|critic| {
                    ctx.agent_subtask(critic, prompt.clone())
                        .map(|spec| (critic.clone(), spec))
                })
                .collect::<CoreResult<Vec<_>>>()?;
            let results = {
                let ctx_ref = &*ctx;
                join_all(specs.into_iter().map(|(critic, spec)| async move {
                    (critic, ctx_ref.execute(spec).await)
                }))
                .await
            };
            for (critic, result) in results {
                let payload = result?;
                let review = parse_review(&critic, &payload);
                ctx.record(iteration, &critic, "critique", payload);
                reviews.push(review);
            }
        } else {
            for critic in critics {
                let spec = ctx.agent_subtask(critic, prompt.clone())?;
                let payload = ctx.execute(spec).await?;
                let review = parse_review(critic, &payload);
                ctx.record(iteration, critic, "critique", payload);
                reviews.push(review);
            }
        }
        Ok(reviews)
    }
}

/// Pull `{score, comment}` out of a critic's reply. A bare number is a
/// score; anything else scores 0.5 with the payload as comment.
fn parse_review(critic: &str, payload: &serde_json::Value) -> Review {
    if let Some(object) = payload.as_object() {
        let score = object
            .get("score")
            .and_then(|s| s.as_f64())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        let comment = object
            .get("comment")
            .and_then(|c| c.as_str())
            .unwrap_or_default()
            .to_string();
        return Review { critic: critic.to_string(), score, comment };
    }
    if let Some(score) = payload.as_f64() {
        return Review {
            critic: critic.to_string(),
            score: score.clamp(0.0, 1.0),
            comment: String::new(),
        };
    }
    Review {
        critic: critic.to_string(),
        score: 0.5,
        comment: payload_text(payload),
    }
}
