#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **rookery-orchestration** – Task queue, worker pool, and lifecycle
//! management for the Rookery core.
//!
//! The orchestrator admits tasks (or whole decomposition plans), keeps the
//! dependency bookkeeping, and runs a fixed pool of dispatch workers. Each
//! worker pops the highest-priority ready task, asks the load balancer for
//! an agent out of the registry's candidate set, performs the bus
//! request/reply dispatch with retry and backoff, and finalizes the task.
//! Completion unblocks dependents; failure or cancellation cascades
//! `cancelled` with reason `upstream-failed` through the dependency DAG.
//!
//! ## Architecture
//!
//! - [`Orchestrator`]: owns the task table, the work queue, and the
//!   supervised background loops (workers, monitor, event forwarder).
//! - [`TaskQueue`](queue): priority heap + waiting set under one lock.
//! - [`OrchestratorConfig`]: every scheduler tunable under a stable name.
//! - [`events`]: the reserved lifecycle topics external observers consume.
//!
//! No lock is held across an await anywhere in the crate: queue and table
//! critical sections are synchronous and short, and all waiting (queue
//! pops, bus requests, backoff sleeps) happens outside them.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use rookery_balancer::{LoadBalancer, Strategy};
use rookery_bus::Bus;
use rookery_decomposer::{DecompositionPlan, ExecutionStrategy};
use rookery_registry::Registry;
use rookery_types::{CoreError, CoreResult, ErrorPayload, TaskRecord, TaskSpec, TaskStatus};

pub mod config;
pub mod events;
mod queue;
mod worker;

pub use config::OrchestratorConfig;
pub use events::{TaskEvent, TaskTransition, ORCHESTRATOR_SENDER};

use events::task_topic;
use queue::{QueuedEntry, TaskQueue};

/// Capacity of the in-process task-transition broadcast channel.
const TRANSITION_CHANNEL_CAPACITY: usize = 1024;

//─────────────────────────────
//  Statistics
//─────────────────────────────

/// Aggregate counters exposed by [`Orchestrator::stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    /// Tasks currently queued (ready).
    pub queued: usize,
    /// Tasks blocked on dependencies.
    pub waiting: usize,
    /// Tasks currently running.
    pub running: usize,
    /// Tasks completed.
    pub completed: usize,
    /// Tasks failed.
    pub failed: usize,
    /// Tasks cancelled.
    pub cancelled: usize,
    /// Depth of the ready heap (includes lazily-removed entries).
    pub ready_queue_depth: usize,
    /// Total dispatches attempted.
    pub dispatched: u64,
    /// Dispatch retries performed.
    pub retries: u64,
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    retries: AtomicU64,
}

//─────────────────────────────
//  Orchestrator
//─────────────────────────────

/// The scheduling core: admit, queue, dispatch, retry, finalize.
pub struct Orchestrator {
    config: OrchestratorConfig,
    bus: Arc<Bus>,
    registry: Arc<Registry>,
    balancer: Arc<LoadBalancer>,
    tasks: DashMap<String, TaskRecord>,
    strategy_overrides: DashMap<String, Strategy>,
    queue: TaskQueue,
    seq: AtomicU64,
    transitions: broadcast::Sender<TaskTransition>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    counters: Counters,
}

impl Orchestrator {
    /// Create an orchestrator over externally constructed components.
    pub fn new(
        config: OrchestratorConfig,
        bus: Arc<Bus>,
        registry: Arc<Registry>,
        balancer: Arc<LoadBalancer>,
    ) -> Arc<Self> {
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Arc::new(Self {
            config,
            bus,
            registry,
            balancer,
            tasks: DashMap::new(),
            strategy_overrides: DashMap::new(),
            queue: TaskQueue::new(),
            seq: AtomicU64::new(0),
            transitions,
            shutdown: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
            counters: Counters::default(),
        })
    }

    /// Composition root: build one bus, one registry, and one balancer
    /// from the configuration and wire them together.
    pub fn from_config(config: OrchestratorConfig) -> Arc<Self> {
        let bus = Arc::new(Bus::new(config.bus_queue_depth, config.bus_history));
        let registry = Arc::new(Registry::new(config.success_window, config.success_threshold));
        let balancer = Arc::new(LoadBalancer::new(config.strategy, config.balancer_seed));
        Self::new(config, bus, registry, balancer)
    }

    /// The shared bus handle.
    pub fn bus(&self) -> Arc<Bus> {
        Arc::clone(&self.bus)
    }

    /// The shared registry handle.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// The active configuration.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    //───────────────────── admission ─────────────────────

    /// Admit a task. Returns its id.
    ///
    /// Tasks with unmet dependencies start `waiting`; a dependency that is
    /// already failed or cancelled admits the task directly as
    /// `cancelled(upstream-failed)`. Unknown dependencies are a
    /// validation error.
    pub fn submit(&self, spec: TaskSpec) -> CoreResult<String> {
        spec.validate()?;
        if self.tasks.contains_key(&spec.id) {
            return Err(CoreError::Validation(format!(
                "task '{}' already submitted",
                spec.id
            )));
        }
        if let Some(agent) = &spec.agent {
            if self.registry.get(agent).is_none() {
                return Err(CoreError::NotFound(format!(
                    "task '{}' pins unknown agent '{agent}'",
                    spec.id
                )));
            }
        }

        let mut unmet = HashSet::new();
        let mut upstream_failed = false;
        for dep in &spec.dependencies {
            match self.tasks.get(dep) {
                None => {
                    return Err(CoreError::Validation(format!(
                        "task '{}' depends on unknown task '{dep}'",
                        spec.id
                    )))
                }
                Some(record) => match record.status {
                    TaskStatus::Completed => {}
                    TaskStatus::Failed | TaskStatus::Cancelled => upstream_failed = true,
                    _ => {
                        unmet.insert(dep.clone());
                    }
                },
            }
        }

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let now = Utc::now();
        let mut record = TaskRecord::admit(spec, seq, now);
        let task_id = record.spec.id.clone();

        if upstream_failed {
            record.status = TaskStatus::Cancelled;
            record.cancel_reason = Some("upstream-failed".to_string());
            record.completed_at = Some(now);
            let event = Self::event_for(&record);
            self.tasks.insert(task_id.clone(), record);
            self.emit_task_event(event);
            return Ok(task_id);
        }

        if unmet.is_empty() {
            record.status = TaskStatus::Queued;
            let entry = QueuedEntry {
                priority: record.spec.priority,
                created_at: record.created_at,
                seq: record.seq,
                task_id: task_id.clone(),
            };
            let event = Self::event_for(&record);
            self.tasks.insert(task_id.clone(), record);
            self.queue.push(entry);
            self.emit_task_event(event);
        } else {
            record.status = TaskStatus::Waiting;
            let event = Self::event_for(&record);
            self.tasks.insert(task_id.clone(), record);
            self.queue.park_waiting(&task_id, unmet.clone());
            self.emit_task_event(event);

            // Close the admission race: a dependency can reach a terminal
            // state between the scan above and the park. Re-check and
            // settle anything that slipped through.
            for dep in &unmet {
                let dep_status = self.tasks.get(dep).map(|r| r.status);
                match dep_status {
                    Some(TaskStatus::Completed) => {
                        let ready = self.queue.resolve_dependency(dep);
                        self.promote(ready);
                    }
                    Some(TaskStatus::Failed) | Some(TaskStatus::Cancelled) => {
                        self.queue.remove_waiting(&task_id);
                        if self.finalize_cancel(&task_id, "upstream-failed") {
                            self.cascade_cancel(&task_id);
                        }
                        break;
                    }
                    _ => {}
                }
            }
        }
        debug!(task = %task_id, "task admitted");
        Ok(task_id)
    }

    /// Admit a task with a per-task balancing strategy override.
    pub fn submit_with_strategy(&self, spec: TaskSpec, strategy: Strategy) -> CoreResult<String> {
        let task_id = self.submit(spec)?;
        self.strategy_overrides.insert(task_id.clone(), strategy);
        Ok(task_id)
    }

    /// Admit a whole decomposition plan as a batch of tasks.
    ///
    /// Local ids become `<parent>.<local>`; local dependencies are
    /// remapped; a `sequential` plan is chained in subtask order. The plan
    /// size is capped by `max_plan_tasks`. Returns the global ids in
    /// submission (topological) order.
    pub fn submit_plan(&self, plan: &DecompositionPlan) -> CoreResult<Vec<String>> {
        plan.validate()?;
        if plan.subtasks.len() > self.config.max_plan_tasks {
            return Err(CoreError::Decomposition(format!(
                "plan for '{}' has {} subtasks, cap is {}",
                plan.parent_id,
                plan.subtasks.len(),
                self.config.max_plan_tasks
            )));
        }

        // Materialize sequential chaining for manually built plans.
        let mut effective = plan.clone();
        if plan.strategy == ExecutionStrategy::Sequential {
            let mut previous: Option<String> = None;
            for subtask in &mut effective.subtasks {
                if let Some(prev) = &previous {
                    if !subtask.depends_on.contains(prev) {
                        subtask.depends_on.push(prev.clone());
                    }
                }
                previous = Some(subtask.local_id.clone());
            }
            effective.validate()?;
        }

        let global = |local: &str| format!("{}.{}", effective.parent_id, local);
        for subtask in &effective.subtasks {
            let id = global(&subtask.local_id);
            if self.tasks.contains_key(&id) {
                return Err(CoreError::Validation(format!("task '{id}' already submitted")));
            }
        }

        let by_id: HashMap<&str, &rookery_decomposer::SubTaskSpec> = effective
            .subtasks
            .iter()
            .map(|s| (s.local_id.as_str(), s))
            .collect();

        let mut submitted = Vec::with_capacity(effective.subtasks.len());
        for local in effective.topological_order()? {
            let subtask = by_id[local.as_str()];
            let mut spec = TaskSpec::new(global(&subtask.local_id), &subtask.description)?
                .with_priority(subtask.priority)
                .with_dependencies(subtask.depends_on.iter().map(|d| global(d)).collect());
            if let Some(cap) = &subtask.required_capability {
                spec = spec.with_capability(cap.clone());
            }
            submitted.push(self.submit(spec)?);
        }
        info!(parent = %effective.parent_id, subtasks = submitted.len(), "plan admitted");
        Ok(submitted)
    }

    //───────────────────── queries ─────────────────────

    /// Current record of one task.
    pub fn get(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.get(task_id).map(|r| r.clone())
    }

    /// All task records, optionally filtered by status, ordered by
    /// admission sequence.
    pub fn list(&self, status: Option<TaskStatus>) -> Vec<TaskRecord> {
        let mut out: Vec<TaskRecord> = self
            .tasks
            .iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .map(|r| r.clone())
            .collect();
        out.sort_by_key(|r| r.seq);
        out
    }

    /// Aggregate counters.
    pub fn stats(&self) -> OrchestratorStats {
        let mut stats = OrchestratorStats {
            ready_queue_depth: self.queue.ready_len(),
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            ..Default::default()
        };
        for record in self.tasks.iter() {
            match record.status {
                TaskStatus::Queued => stats.queued += 1,
                TaskStatus::Waiting => stats.waiting += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Await a task's terminal record.
    pub async fn wait(&self, task_id: &str, timeout: Duration) -> CoreResult<TaskRecord> {
        // Subscribe before the table check so a transition cannot slip
        // between the two.
        let mut rx = self.transitions.subscribe();
        match self.tasks.get(task_id) {
            None => return Err(CoreError::NotFound(format!("task '{task_id}'"))),
            Some(record) if record.status.is_terminal() => return Ok(record.clone()),
            Some(_) => {}
        }

        let settled = tokio::time::timeout(timeout, async {
            loop {
                match rx.recv().await {
                    Ok(transition)
                        if transition.task_id == task_id && transition.status.is_terminal() =>
                    {
                        return true;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        let terminal = self
                            .tasks
                            .get(task_id)
                            .map(|r| r.status.is_terminal())
                            .unwrap_or(false);
                        if terminal {
                            return true;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return false,
                }
            }
        })
        .await;

        match settled {
            Ok(true) => self
                .tasks
                .get(task_id)
                .map(|r| r.clone())
                .ok_or_else(|| CoreError::NotFound(format!("task '{task_id}'"))),
            Ok(false) => Err(CoreError::Bus("transition stream closed".into())),
            Err(_) => Err(CoreError::Timeout(timeout)),
        }
    }

    //───────────────────── cancellation ─────────────────────

    /// Cancel a task. Terminal tasks are a no-op.
    ///
    /// Queued and waiting tasks cancel immediately. A running task gets a
    /// cancellation message on its agent's control topic and is marked
    /// cancelled once the agent acknowledges or the grace timeout elapses
    /// (the agent is then marked `error`). Dependents cascade either way.
    pub async fn cancel(&self, task_id: &str) -> CoreResult<()> {
        let (status, agent) = {
            let record = self
                .tasks
                .get(task_id)
                .ok_or_else(|| CoreError::NotFound(format!("task '{task_id}'")))?;
            (record.status, record.assigned_agent.clone())
        };

        match status {
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled => Ok(()),
            TaskStatus::Queued | TaskStatus::Waiting => {
                self.queue.remove_waiting(task_id);
                if self.finalize_cancel(task_id, "requested") {
                    self.cascade_cancel(task_id);
                }
                Ok(())
            }
            TaskStatus::Running => {
                let agent_id = agent.ok_or_else(|| {
                    CoreError::State(format!("running task '{task_id}' has no agent"))
                })?;
                let ack = self
                    .bus
                    .request(
                        ORCHESTRATOR_SENDER,
                        &events::agent_control_topic(&agent_id),
                        json!({ "action": "cancel", "task_id": task_id }),
                        self.config.cancel_grace,
                    )
                    .await;
                if ack.is_err() {
                    warn!(task = task_id, agent = %agent_id, "cancel unacknowledged, marking agent errored");
                    let _ = self.registry.mark_error(&agent_id);
                }
                if self.finalize_cancel(task_id, "requested") {
                    self.cascade_cancel(task_id);
                }
                Ok(())
            }
        }
    }

    //───────────────────── lifecycle ─────────────────────

    /// Start the worker pool and supervised background loops.
    pub fn start(self: &Arc<Self>, workers: Option<usize>) -> CoreResult<()> {
        let mut guard = self.shutdown.lock().expect("shutdown guard poisoned");
        if guard.is_some() {
            return Err(CoreError::State("orchestrator already running".into()));
        }
        let (tx, rx) = watch::channel(false);
        *guard = Some(tx);
        drop(guard);

        let worker_count = workers.unwrap_or(self.config.workers).max(1);
        let mut handles = self.handles.lock().expect("handle table poisoned");
        for worker_id in 0..worker_count {
            handles.push(tokio::spawn(Arc::clone(self).worker_loop(worker_id, rx.clone())));
        }
        handles.push(tokio::spawn(Arc::clone(self).monitor_loop(rx.clone())));
        handles.push(tokio::spawn(
            Arc::clone(self).forward_registry_events(self.registry.subscribe_events(), rx),
        ));
        info!(workers = worker_count, "orchestrator started");
        Ok(())
    }

    /// Signal shutdown and join every supervised loop. In-flight
    /// dispatches drain before their workers exit.
    pub async fn stop(&self) {
        let shutdown = self.shutdown.lock().expect("shutdown guard poisoned").take();
        let Some(shutdown) = shutdown else {
            return;
        };
        let _ = shutdown.send(true);
        self.queue.wake_all();

        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.handles.lock().expect("handle table poisoned"));
        for handle in handles {
            let _ = handle.await;
        }
        info!("orchestrator stopped");
    }

    //───────────────────── internal transitions ─────────────────────

    fn event_for(record: &TaskRecord) -> TaskEvent {
        TaskEvent {
            task_id: record.spec.id.clone(),
            status: record.status,
            agent: record.assigned_agent.clone(),
            error: record.error.clone(),
            reason: record.cancel_reason.clone(),
        }
    }

    /// Apply a checked status transition, then publish it.
    pub(crate) fn apply_transition(
        &self,
        task_id: &str,
        to: TaskStatus,
        mutate: impl FnOnce(&mut TaskRecord),
    ) -> CoreResult<()> {
        let event = {
            let mut record = self
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| CoreError::NotFound(format!("task '{task_id}'")))?;
            if !record.status.can_transition_to(to) {
                return Err(CoreError::State(format!(
                    "task '{task_id}' cannot move {:?} -> {to:?}",
                    record.status
                )));
            }
            record.status = to;
            mutate(&mut *record);
            Self::event_for(&record)
        };
        self.emit_task_event(event);
        Ok(())
    }

    pub(crate) fn emit_task_event(&self, event: TaskEvent) {
        let _ = self.transitions.send(TaskTransition {
            task_id: event.task_id.clone(),
            status: event.status,
        });
        let payload = serde_json::to_value(&event).unwrap_or_else(|_| json!({}));
        if let Err(err) = self
            .bus
            .publish(ORCHESTRATOR_SENDER, task_topic(event.status), payload)
        {
            warn!(task = %event.task_id, %err, "lifecycle publish failed");
        }
    }

    /// Cancel one task with the given reason; true when the transition
    /// applied (the task was not already terminal).
    pub(crate) fn finalize_cancel(&self, task_id: &str, reason: &str) -> bool {
        let reason = reason.to_string();
        self.apply_transition(task_id, TaskStatus::Cancelled, |record| {
            record.cancel_reason = Some(reason);
            record.completed_at = Some(Utc::now());
        })
        .is_ok()
    }

    /// Cascade `cancelled(upstream-failed)` through waiting dependents.
    pub(crate) fn cascade_cancel(&self, task_id: &str) {
        for victim in self.queue.drain_dependents(task_id) {
            debug!(task = %victim, upstream = task_id, "cascading cancellation");
            self.finalize_cancel(&victim, "upstream-failed");
        }
    }

    /// Record a failure, then cascade to dependents.
    pub(crate) fn finalize_failure(&self, task_id: &str, payload: ErrorPayload) {
        let applied = self.apply_transition(task_id, TaskStatus::Failed, |record| {
            record.error = Some(payload);
            record.completed_at = Some(Utc::now());
        });
        if applied.is_ok() {
            self.cascade_cancel(task_id);
        }
    }

    /// Record a completion, then move now-ready dependents to the heap.
    pub(crate) fn finalize_completion(&self, task_id: &str, result: serde_json::Value) {
        let applied = self.apply_transition(task_id, TaskStatus::Completed, |record| {
            record.result = Some(result);
            record.completed_at = Some(Utc::now());
        });
        if applied.is_err() {
            return;
        }
        let ready = self.queue.resolve_dependency(task_id);
        self.promote(ready);
    }

    /// Move formerly waiting tasks onto the ready heap.
    fn promote(&self, ready: Vec<String>) {
        for task_id in ready {
            let entry = {
                let Some(record) = self.tasks.get(&task_id) else {
                    continue;
                };
                QueuedEntry {
                    priority: record.spec.priority,
                    created_at: record.created_at,
                    seq: record.seq,
                    task_id: task_id.clone(),
                }
            };
            if self
                .apply_transition(&task_id, TaskStatus::Queued, |_| {})
                .is_ok()
            {
                self.queue.push(entry);
            }
        }
    }

    pub(crate) fn queue_handle(&self) -> &TaskQueue {
        &self.queue
    }

    pub(crate) fn record_dispatch(&self) {
        self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.counters.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn strategy_override(&self, task_id: &str) -> Option<Strategy> {
        self.strategy_overrides.get(task_id).map(|s| *s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn orchestrator() -> Arc<Orchestrator> {
        Orchestrator::from_config(OrchestratorConfig::default())
    }

    #[tokio::test]
    async fn duplicate_submission_rejected() {
        let orch = orchestrator();
        orch.submit(TaskSpec::new("t1", "one").unwrap()).unwrap();
        let err = orch.submit(TaskSpec::new("t1", "again").unwrap()).unwrap_err();
        assert_eq!(err.kind(), rookery_types::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn unknown_dependency_rejected() {
        let orch = orchestrator();
        let spec = TaskSpec::new("t2", "dependent")
            .unwrap()
            .with_dependencies(vec!["ghost".to_string()]);
        let err = orch.submit(spec).unwrap_err();
        assert_eq!(err.kind(), rookery_types::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn dependent_of_cancelled_task_admits_cancelled() {
        let orch = orchestrator();
        orch.submit(TaskSpec::new("t1", "doomed").unwrap()).unwrap();
        orch.cancel("t1").await.unwrap();

        let spec = TaskSpec::new("t2", "dependent")
            .unwrap()
            .with_dependencies(vec!["t1".to_string()]);
        orch.submit(spec).unwrap();

        let record = orch.get("t2").unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);
        assert_eq!(record.cancel_reason.as_deref(), Some("upstream-failed"));
    }

    #[tokio::test]
    async fn cancel_of_terminal_task_is_noop() {
        let orch = orchestrator();
        orch.submit(TaskSpec::new("t1", "one").unwrap()).unwrap();
        orch.cancel("t1").await.unwrap();
        // Second cancel must not error.
        orch.cancel("t1").await.unwrap();
        assert_eq!(orch.get("t1").unwrap().status, TaskStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_cascades_through_waiting_chain() {
        let orch = orchestrator();
        orch.submit(TaskSpec::new("t1", "root").unwrap()).unwrap();
        orch.submit(
            TaskSpec::new("t2", "mid")
                .unwrap()
                .with_dependencies(vec!["t1".to_string()]),
        )
        .unwrap();
        orch.submit(
            TaskSpec::new("t3", "leaf")
                .unwrap()
                .with_dependencies(vec!["t2".to_string()]),
        )
        .unwrap();

        orch.cancel("t1").await.unwrap();
        for id in ["t1", "t2", "t3"] {
            assert_eq!(orch.get(id).unwrap().status, TaskStatus::Cancelled, "{id}");
        }
        assert_eq!(
            orch.get("t2").unwrap().cancel_reason.as_deref(),
            Some("upstream-failed")
        );
    }

    #[tokio::test]
    async fn stats_reflect_table() {
        let orch = orchestrator();
        orch.submit(TaskSpec::new("t1", "one").unwrap()).unwrap();
        orch.submit(
            TaskSpec::new("t2", "two")
                .unwrap()
                .with_dependencies(vec!["t1".to_string()]),
        )
        .unwrap();

        let stats = orch.stats();
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.waiting, 1);
        assert_eq!(stats.running, 0);
    }

    #[tokio::test]
    async fn plan_submission_maps_ids_and_dependencies() {
        let orch = orchestrator();
        let decomposer = rookery_decomposer::Decomposer::with_builtin_patterns();
        let plan = decomposer
            .decompose("job", "research rust channel libraries", None)
            .unwrap();

        let ids = orch.submit_plan(&plan).unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.iter().all(|id| id.starts_with("job.")));

        let write = orch.get("job.write").unwrap();
        assert_eq!(write.status, TaskStatus::Waiting);
        assert_eq!(write.spec.dependencies, vec!["job.analyze".to_string()]);
    }

    #[tokio::test]
    async fn oversized_plan_rejected() {
        let config = OrchestratorConfig {
            max_plan_tasks: 2,
            ..Default::default()
        };
        let orch = Orchestrator::from_config(config);
        let decomposer = rookery_decomposer::Decomposer::with_builtin_patterns();
        let plan = decomposer
            .decompose("job", "research rust channel libraries", None)
            .unwrap();

        let err = orch.submit_plan(&plan).unwrap_err();
        assert_eq!(err.kind(), rookery_types::ErrorKind::Decomposition);
    }

    #[tokio::test]
    async fn start_twice_is_a_state_error() {
        let orch = orchestrator();
        orch.start(Some(1)).unwrap();
        let err = orch.start(Some(1)).unwrap_err();
        assert_eq!(err.kind(), rookery_types::ErrorKind::State);
        orch.stop().await;
    }

    #[tokio::test]
    async fn wait_returns_not_found_for_unknown_task() {
        let orch = orchestrator();
        let err = orch.wait("ghost", Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err.kind(), rookery_types::ErrorKind::NotFound);
    }
}
