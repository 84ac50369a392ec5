#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **rookery-consensus** – Voting primitives and collaboration modes.
//!
//! The voting half ([`vote`]) is pure: opinions in, one decision out,
//! under majority / weighted / unanimous / threshold rules with a fixed
//! tie-break policy. The collaboration half runs multi-agent protocols —
//! debate, ensemble, pipeline, critique, swarm — as coordinators that
//! spawn subtasks through the shared orchestrator, collect results over
//! the bus, and return a unified [`CollaborationResult`].
//!
//! Coordinators run on a separately bounded pool
//! (`coordinator_workers`) and every session is capped by the
//! whole-session timeout, regardless of round count.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::debug;

use rookery_decomposer::Decomposer;
use rookery_orchestration::Orchestrator;
use rookery_types::{CoreError, CoreResult};

mod critique;
mod debate;
mod ensemble;
mod pipeline;
mod session;
mod swarm;
/// Voting primitives.
pub mod vote;

pub use critique::{CritiqueCoordinator, CritiqueParams};
pub use debate::{DebateCoordinator, DebateJudge, DebateParams};
pub use ensemble::{EnsembleCoordinator, EnsembleParams, MergeStrategy};
pub use pipeline::{
    FailurePolicy, HandoffFormat, PipelineCoordinator, PipelineParams, PipelineStage,
};
pub use session::{CollabMode, CollaborationResult, TranscriptEntry};
pub use swarm::{SwarmCoordination, SwarmCoordinator, SwarmParams};
pub use vote::{vote, ConsensusResult, ConsensusStrategy};

/// Entry point for running collaboration modes against one orchestrator.
pub struct CollaborationEngine {
    orchestrator: Arc<Orchestrator>,
    decomposer: Arc<Decomposer>,
    coordinators: Arc<Semaphore>,
    session_timeout: Duration,
}

impl CollaborationEngine {
    /// Create an engine bounded by the orchestrator's configuration.
    pub fn new(orchestrator: Arc<Orchestrator>, decomposer: Arc<Decomposer>) -> Self {
        let config = orchestrator.config();
        let coordinators = Arc::new(Semaphore::new(config.coordinator_workers));
        let session_timeout = config.session_timeout;
        Self { orchestrator, decomposer, coordinators, session_timeout }
    }

    async fn bounded<F>(&self, run: F) -> CoreResult<CollaborationResult>
    where
        F: std::future::Future<Output = CoreResult<CollaborationResult>>,
    {
        let _permit = self
            .coordinators
            .acquire()
            .await
            .map_err(|_| CoreError::State("collaboration engine shut down".into()))?;
        debug!("coordinator slot acquired");
        match tokio::time::timeout(self.session_timeout, run).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Timeout(self.session_timeout)),
        }
    }

    /// Run a debate session.
    pub async fn run_debate(
        &self,
        task: &str,
        participants: &[String],
        params: DebateParams,
    ) -> CoreResult<CollaborationResult> {
        let coordinator = DebateCoordinator::new(Arc::clone(&self.orchestrator));
        self.bounded(coordinator.run(task, participants, params)).await
    }

    /// Run an ensemble session.
    pub async fn run_ensemble(
        &self,
        task: &str,
        participants: &[String],
        params: EnsembleParams,
    ) -> CoreResult<CollaborationResult> {
        let coordinator = EnsembleCoordinator::new(Arc::clone(&self.orchestrator));
        self.bounded(coordinator.run(task, participants, params)).await
    }

    /// Run a pipeline session.
    pub async fn run_pipeline(
        &self,
        task: &str,
        stages: &[PipelineStage],
        params: PipelineParams,
    ) -> CoreResult<CollaborationResult> {
        let coordinator = PipelineCoordinator::new(Arc::clone(&self.orchestrator));
        self.bounded(coordinator.run(task, stages, params)).await
    }

    /// Run a critique session.
    pub async fn run_critique(
        &self,
        task: &str,
        producer: &str,
        critics: &[String],
        params: CritiqueParams,
    ) -> CoreResult<CollaborationResult> {
        let coordinator = CritiqueCoordinator::new(Arc::clone(&self.orchestrator));
        self.bounded(coordinator.run(task, producer, critics, params)).await
    }

    /// Run a swarm session.
    pub async fn run_swarm(
        &self,
        task: &str,
        params: SwarmParams,
    ) -> CoreResult<CollaborationResult> {
        let coordinator =
            SwarmCoordinator::new(Arc::clone(&self.orchestrator), Arc::clone(&self.decomposer));
        self.bounded(coordinator.run(task, params)).await
    }
}
