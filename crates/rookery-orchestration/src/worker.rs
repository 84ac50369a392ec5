//! Dispatch workers and supervised background loops.
//!
//! Each worker runs the loop: pop the highest-priority ready task, resolve
//! the candidate agent set (explicit agent, capability index, or all idle
//! agents), ask the balancer, claim capacity, dispatch over the bus with
//! retry and exponential backoff, and finalize. A task nobody can take
//! right now goes back onto the heap after a short backoff rather than
//! blocking the worker.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use rookery_registry::RegistryEvent;
use rookery_types::{CoreError, CoreResult, TaskSpec, TaskStatus};

use crate::events::{
    agent_task_topic, AGENT_REGISTERED_TOPIC, AGENT_STATUS_TOPIC, AGENT_UNREGISTERED_TOPIC,
    ORCHESTRATOR_SENDER,
};
use crate::queue::QueuedEntry;
use crate::Orchestrator;

impl Orchestrator {
    /// One dispatch worker. Exits on the shutdown signal.
    pub(crate) async fn worker_loop(
        self: Arc<Self>,
        worker_id: usize,
        mut shutdown: watch::Receiver<bool>,
    ) {
        debug!(worker = worker_id, "dispatch worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            // Arm the wakeup before checking the heap so a push between the
            // two cannot be missed.
            let notified = self.queue_handle().notified();
            if let Some(entry) = self.queue_handle().try_pop() {
                self.process_entry(entry).await;
                continue;
            }
            tokio::select! {
                _ = notified => {}
                _ = shutdown.changed() => break,
            }
        }
        debug!(worker = worker_id, "dispatch worker stopped");
    }

    /// Handle one popped heap entry end to end.
    async fn process_entry(self: &Arc<Self>, entry: QueuedEntry) {
        let task_id = entry.task_id.clone();

        // Lazily-removed entries: the task may have been cancelled while
        // still sitting in the heap.
        let spec = match self.get(&task_id) {
            Some(record) if record.status == TaskStatus::Queued => record.spec,
            _ => {
                trace!(task = %task_id, "stale heap entry skipped");
                return;
            }
        };

        let candidates = match self.resolve_candidates(&spec) {
            Ok(Some(candidates)) => candidates,
            Ok(None) => {
                // Nobody can take this right now; requeue after a backoff.
                self.requeue_later(entry);
                return;
            }
            Err(err) => {
                self.finalize_failure(&task_id, err.to_payload());
                return;
            }
        };

        let snapshot = self.registry().snapshot(&candidates);
        let strategy = self.strategy_override(&task_id);
        let Some(agent_id) = self.balancer_select(&snapshot, strategy) else {
            self.requeue_later(entry);
            return;
        };

        // Claim capacity before the task leaves `queued`; a race with
        // another worker surfaces as Busy and the task just requeues.
        if let Err(err) = self.registry().begin_dispatch(&agent_id) {
            trace!(task = %task_id, agent = %agent_id, %err, "dispatch claim failed, requeueing");
            self.requeue_later(entry);
            return;
        }

        let running = self.apply_transition(&task_id, TaskStatus::Running, |record| {
            record.started_at = Some(Utc::now());
            record.assigned_agent = Some(agent_id.clone());
        });
        if running.is_err() {
            // Cancelled between pop and claim; release the capacity.
            let _ = self.registry().abort_dispatch(&agent_id);
            return;
        }
        self.record_dispatch();
        debug!(task = %task_id, agent = %agent_id, "task dispatched");

        let outcome = self.dispatch_with_retry(&spec, &agent_id).await;

        // A cancellation that landed while the request was in flight wins;
        // the late result is dropped on arrival.
        let still_running = self
            .get(&task_id)
            .map(|record| record.status == TaskStatus::Running)
            .unwrap_or(false);
        if !still_running {
            debug!(task = %task_id, "late result dropped, task no longer running");
            let _ = self.registry().abort_dispatch(&agent_id);
            return;
        }

        match outcome {
            Ok(result) => {
                if let Err(err) = self.registry().finish_dispatch(&agent_id, true) {
                    warn!(agent = %agent_id, %err, "dispatch accounting failed");
                }
                self.finalize_completion(&task_id, result);
            }
            Err(err) => {
                if let Err(acct) = self.registry().finish_dispatch(&agent_id, false) {
                    warn!(agent = %agent_id, %acct, "dispatch accounting failed");
                }
                info!(task = %task_id, agent = %agent_id, %err, "task failed");
                self.finalize_failure(&task_id, err.to_payload());
            }
        }
    }

    /// Candidate agent ids for a task: the pinned agent, the capability
    /// index, or every idle agent. `Ok(None)` means "retry later".
    fn resolve_candidates(&self, spec: &TaskSpec) -> CoreResult<Option<Vec<String>>> {
        if let Some(agent_id) = &spec.agent {
            return match self.registry().get(agent_id) {
                None => Err(CoreError::NotFound(format!("agent '{agent_id}'"))),
                Some(info) if info.status.is_dispatchable() => Ok(Some(vec![agent_id.clone()])),
                // Paused or errored: hold the task until the agent returns.
                Some(_) => Ok(None),
            };
        }
        if let Some(cap) = &spec.required_capability {
            let found = self.registry().find_by_capability(cap);
            return Ok(if found.is_empty() { None } else { Some(found) });
        }
        let idle = self.registry().idle_agents();
        Ok(if idle.is_empty() { None } else { Some(idle) })
    }

    fn balancer_select(
        &self,
        snapshot: &[rookery_registry::AgentLoad],
        strategy: Option<rookery_balancer::Strategy>,
    ) -> Option<String> {
        self.balancer.select(snapshot, strategy)
    }

    /// Bus request/reply with retry on dispatch-layer failures.
    ///
    /// Timeouts and bus errors retry up to the configured count with
    /// exponential backoff; a structured agent error is never retried
    /// here.
    async fn dispatch_with_retry(
        &self,
        spec: &TaskSpec,
        agent_id: &str,
    ) -> CoreResult<serde_json::Value> {
        let timeout = spec.timeout.unwrap_or(self.config().default_task_timeout);
        let topic = agent_task_topic(agent_id);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let payload = json!({
                "task_id": spec.id,
                "description": spec.description,
                "attempt": attempt,
            });
            match self
                .bus()
                .request(ORCHESTRATOR_SENDER, &topic, payload, timeout)
                .await
            {
                Ok(reply) => return parse_agent_reply(reply),
                Err(err) if err.retryable() && attempt <= self.config().max_retries => {
                    self.record_retry();
                    let delay = self.config().retry_delay(attempt);
                    warn!(
                        task = %spec.id,
                        agent = agent_id,
                        attempt,
                        ?delay,
                        %err,
                        "dispatch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Put an entry back on the heap after the queue backoff.
    fn requeue_later(self: &Arc<Self>, entry: QueuedEntry) {
        let orchestrator = Arc::clone(self);
        let delay = self.config().queue_backoff;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            orchestrator.queue_handle().push(entry);
        });
    }

    /// Supervised heartbeat: periodic stats logging plus a worker nudge.
    pub(crate) async fn monitor_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.config().monitor_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let stats = self.stats();
                    debug!(
                        queued = stats.queued,
                        waiting = stats.waiting,
                        running = stats.running,
                        dispatched = stats.dispatched,
                        "orchestrator heartbeat"
                    );
                    self.queue_handle().wake_all();
                }
                _ = shutdown.changed() => break,
            }
        }
    }

    /// Forward registry change events onto the reserved lifecycle topics.
    pub(crate) async fn forward_registry_events(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<RegistryEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let (topic, payload) = match event {
                        RegistryEvent::Registered { id } => {
                            (AGENT_REGISTERED_TOPIC, json!({ "agent": id }))
                        }
                        RegistryEvent::StatusChanged { id, from, to } => (
                            AGENT_STATUS_TOPIC,
                            json!({ "agent": id, "from": from, "to": to }),
                        ),
                        RegistryEvent::Unregistered { id } => {
                            (AGENT_UNREGISTERED_TOPIC, json!({ "agent": id }))
                        }
                    };
                    if let Err(err) = self.bus().publish(ORCHESTRATOR_SENDER, topic, payload) {
                        warn!(%err, "agent lifecycle publish failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    }
}

/// Interpret an agent's reply payload.
///
/// `{"ok": value}` completes with `value`; `{"err": {...}}` is a
/// structured agent failure; any other shape is taken as a raw result.
fn parse_agent_reply(reply: serde_json::Value) -> CoreResult<serde_json::Value> {
    if let Some(object) = reply.as_object() {
        if let Some(ok) = object.get("ok") {
            return Ok(ok.clone());
        }
        if let Some(err) = object.get("err") {
            let message = err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("agent reported failure")
                .to_string();
            let retryable = err
                .get("retryable")
                .and_then(|r| r.as_bool())
                .unwrap_or(false);
            return Err(CoreError::Agent { message, retryable });
        }
    }
    Ok(reply)
}
