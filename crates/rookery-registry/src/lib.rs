#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **rookery-registry** – Agent-type catalog and live agent table.
//!
//! The registry owns [`AgentTypeSpec`] definitions and the records of every
//! registered agent: declared capabilities, lifecycle status, load counters,
//! and a rolling success window. Status and counters have a single writer
//! (the orchestrator's dispatch path); other readers may observe values at
//! most one dispatch cycle stale.
//!
//! The registry is a leaf: it publishes nothing itself. Interested parties
//! (the orchestrator forwarding to lifecycle topics) attach listener
//! channels via [`Registry::subscribe_events`].

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use rookery_types::{
    validate_id, validate_name, AgentCategory, AgentStatus, AgentTypeSpec, CoreError, CoreResult,
};

/// Default rolling success-window length (dispatch outcomes remembered).
pub const DEFAULT_SUCCESS_WINDOW: usize = 20;

/// Default success-rate threshold below which an agent is marked `error`.
pub const DEFAULT_SUCCESS_THRESHOLD: f64 = 0.5;

//─────────────────────────────
//  Public snapshots
//─────────────────────────────

/// Read-only view of a registered agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Agent id.
    pub id: String,
    /// Agent-type id.
    pub type_id: String,
    /// Human-readable name.
    pub name: String,
    /// Declared capability ids.
    pub capabilities: Vec<String>,
    /// Current lifecycle status.
    pub status: AgentStatus,
    /// Tasks currently dispatched to the agent.
    pub active: usize,
    /// Concurrent-task capacity.
    pub capacity: usize,
    /// Tasks completed successfully.
    pub completed: u64,
    /// Tasks failed.
    pub failed: u64,
    /// Success rate over the rolling window (1.0 when empty).
    pub success_rate: f64,
    /// Registration timestamp.
    pub registered_at: DateTime<Utc>,
}

/// Load figures the balancer selects on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLoad {
    /// Agent id.
    pub id: String,
    /// Tasks currently dispatched.
    pub active: usize,
    /// Concurrent-task capacity.
    pub capacity: usize,
    /// Rolling success rate.
    pub success_rate: f64,
}

impl AgentLoad {
    /// Load fraction `active / capacity` (1.0 for zero capacity).
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            1.0
        } else {
            self.active as f64 / self.capacity as f64
        }
    }

    /// Whether the agent can take one more task.
    pub fn has_headroom(&self) -> bool {
        self.active < self.capacity
    }
}

/// Registry change notifications consumed by the orchestrator's event
/// forwarder.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// An agent finished registration.
    Registered {
        /// Agent id.
        id: String,
    },
    /// An agent's status changed.
    StatusChanged {
        /// Agent id.
        id: String,
        /// Previous status.
        from: AgentStatus,
        /// New status.
        to: AgentStatus,
    },
    /// An agent was unregistered.
    Unregistered {
        /// Agent id.
        id: String,
    },
}

//─────────────────────────────
//  Internal record
//─────────────────────────────

#[derive(Debug)]
struct AgentEntry {
    type_id: String,
    name: String,
    capabilities: Vec<String>,
    status: AgentStatus,
    active: usize,
    capacity: usize,
    completed: u64,
    failed: u64,
    window: VecDeque<bool>,
    registered_at: DateTime<Utc>,
}

impl AgentEntry {
    fn success_rate(&self) -> f64 {
        if self.window.is_empty() {
            return 1.0;
        }
        let ok = self.window.iter().filter(|b| **b).count();
        ok as f64 / self.window.len() as f64
    }

    fn info(&self, id: &str) -> AgentInfo {
        AgentInfo {
            id: id.to_string(),
            type_id: self.type_id.clone(),
            name: self.name.clone(),
            capabilities: self.capabilities.clone(),
            status: self.status,
            active: self.active,
            capacity: self.capacity,
            completed: self.completed,
            failed: self.failed,
            success_rate: self.success_rate(),
            registered_at: self.registered_at,
        }
    }

    fn load(&self, id: &str) -> AgentLoad {
        AgentLoad {
            id: id.to_string(),
            active: self.active,
            capacity: self.capacity,
            success_rate: self.success_rate(),
        }
    }
}

//─────────────────────────────
//  Registry
//─────────────────────────────

/// Catalog of agent types and live agents, indexed by capability.
pub struct Registry {
    types: DashMap<String, AgentTypeSpec>,
    agents: DashMap<String, AgentEntry>,
    window: usize,
    threshold: f64,
    listeners: Mutex<Vec<mpsc::UnboundedSender<RegistryEvent>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(DEFAULT_SUCCESS_WINDOW, DEFAULT_SUCCESS_THRESHOLD)
    }
}

impl Registry {
    /// Create a registry with the given rolling-window length and
    /// success-rate threshold.
    pub fn new(window: usize, threshold: f64) -> Self {
        Self {
            types: DashMap::new(),
            agents: DashMap::new(),
            window: window.max(1),
            threshold: threshold.clamp(0.0, 1.0),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Attach a listener for registry change events.
    pub fn subscribe_events(&self) -> mpsc::UnboundedReceiver<RegistryEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().expect("listener table poisoned").push(tx);
        rx
    }

    fn emit(&self, event: RegistryEvent) {
        let mut listeners = self.listeners.lock().expect("listener table poisoned");
        listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    //───────────────────── agent types ─────────────────────

    /// Register an agent type. Fails on duplicate id.
    pub fn register_type(&self, spec: AgentTypeSpec) -> CoreResult<()> {
        spec.validate()?;
        if self.types.contains_key(&spec.id) {
            return Err(CoreError::Validation(format!(
                "agent type '{}' already registered",
                spec.id
            )));
        }
        info!(type_id = %spec.id, category = ?spec.category, "agent type registered");
        self.types.insert(spec.id.clone(), spec);
        Ok(())
    }

    /// Look up an agent type.
    pub fn get_type(&self, type_id: &str) -> Option<AgentTypeSpec> {
        self.types.get(type_id).map(|t| t.clone())
    }

    /// List agent types, optionally filtered by category.
    pub fn list_agent_types(&self, category: Option<AgentCategory>) -> Vec<AgentTypeSpec> {
        let mut out: Vec<AgentTypeSpec> = self
            .types
            .iter()
            .filter(|t| category.map_or(true, |c| t.category == c))
            .map(|t| t.clone())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    //───────────────────── agents ─────────────────────

    /// Register a live agent against a known type.
    ///
    /// The new record passes `created → idle` as its registration
    /// confirmation; both the registration and the status change are
    /// emitted to listeners.
    pub fn register_agent(
        &self,
        id: &str,
        type_id: &str,
        name: &str,
        capabilities: Vec<String>,
        capacity: usize,
    ) -> CoreResult<AgentInfo> {
        validate_id("agent id", id)?;
        validate_name("agent name", name)?;
        if capacity == 0 {
            return Err(CoreError::Validation(format!(
                "agent '{id}' must have capacity > 0"
            )));
        }

        let type_spec = self
            .types
            .get(type_id)
            .ok_or_else(|| CoreError::NotFound(format!("agent type '{type_id}'")))?;
        for cap in &capabilities {
            if !type_spec.declares(cap) {
                return Err(CoreError::Validation(format!(
                    "capability '{cap}' is not declared by agent type '{type_id}'"
                )));
            }
        }
        drop(type_spec);

        if self.agents.contains_key(id) {
            return Err(CoreError::Validation(format!("agent '{id}' already registered")));
        }

        let entry = AgentEntry {
            type_id: type_id.to_string(),
            name: name.to_string(),
            capabilities,
            status: AgentStatus::Idle,
            active: 0,
            capacity,
            completed: 0,
            failed: 0,
            window: VecDeque::with_capacity(self.window),
            registered_at: Utc::now(),
        };
        let info = entry.info(id);
        self.agents.insert(id.to_string(), entry);

        info!(agent = id, type_id, capacity, "agent registered");
        self.emit(RegistryEvent::Registered { id: id.to_string() });
        self.emit(RegistryEvent::StatusChanged {
            id: id.to_string(),
            from: AgentStatus::Created,
            to: AgentStatus::Idle,
        });
        Ok(info)
    }

    /// Unregister an agent. Fails with `Busy` while tasks are in flight.
    pub fn unregister_agent(&self, id: &str) -> CoreResult<()> {
        {
            let entry = self
                .agents
                .get(id)
                .ok_or_else(|| CoreError::NotFound(format!("agent '{id}'")))?;
            if entry.active > 0 {
                return Err(CoreError::Busy(format!(
                    "agent '{id}' has {} task(s) in flight",
                    entry.active
                )));
            }
        }
        let (_, entry) = self
            .agents
            .remove(id)
            .ok_or_else(|| CoreError::NotFound(format!("agent '{id}'")))?;
        info!(agent = id, "agent unregistered");
        self.emit(RegistryEvent::StatusChanged {
            id: id.to_string(),
            from: entry.status,
            to: AgentStatus::Stopped,
        });
        self.emit(RegistryEvent::Unregistered { id: id.to_string() });
        Ok(())
    }

    /// Read-only view of one agent.
    pub fn get(&self, id: &str) -> Option<AgentInfo> {
        self.agents.get(id).map(|entry| entry.info(id))
    }

    /// List agents, optionally filtered by status.
    pub fn list_agents(&self, status: Option<AgentStatus>) -> Vec<AgentInfo> {
        let mut out: Vec<AgentInfo> = self
            .agents
            .iter()
            .filter(|entry| status.map_or(true, |s| entry.status == s))
            .map(|entry| entry.info(entry.key()))
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    /// Agents declaring `cap_id` whose status accepts dispatch
    /// (idle or busy), sorted by id.
    pub fn find_by_capability(&self, cap_id: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .agents
            .iter()
            .filter(|entry| {
                entry.status.is_dispatchable()
                    && entry.capabilities.iter().any(|c| c == cap_id)
            })
            .map(|entry| entry.key().clone())
            .collect();
        out.sort();
        out
    }

    /// All currently idle agents, sorted by id.
    pub fn idle_agents(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .agents
            .iter()
            .filter(|entry| entry.status == AgentStatus::Idle)
            .map(|entry| entry.key().clone())
            .collect();
        out.sort();
        out
    }

    /// Load snapshot for the given candidate ids (unknown ids skipped).
    pub fn snapshot(&self, ids: &[String]) -> Vec<AgentLoad> {
        ids.iter()
            .filter_map(|id| self.agents.get(id).map(|entry| entry.load(id)))
            .collect()
    }

    //───────────────────── status transitions ─────────────────────

    /// Transition an agent's status, enforcing the state machine.
    pub fn set_status(&self, id: &str, next: AgentStatus) -> CoreResult<AgentStatus> {
        let (from, event) = {
            let mut entry = self
                .agents
                .get_mut(id)
                .ok_or_else(|| CoreError::NotFound(format!("agent '{id}'")))?;
            let from = entry.status;
            if !from.can_transition_to(next) {
                return Err(CoreError::State(format!(
                    "agent '{id}' cannot move {from:?} -> {next:?}"
                )));
            }
            entry.status = next;
            (
                from,
                RegistryEvent::StatusChanged { id: id.to_string(), from, to: next },
            )
        };
        debug!(agent = id, ?from, to = ?next, "agent status changed");
        self.emit(event);
        Ok(from)
    }

    /// Admin pause: refuse new dispatch, let in-flight work drain.
    pub fn pause(&self, id: &str) -> CoreResult<()> {
        self.set_status(id, AgentStatus::Paused).map(|_| ())
    }

    /// Admin resume from pause.
    pub fn resume(&self, id: &str) -> CoreResult<()> {
        self.set_status(id, AgentStatus::Idle).map(|_| ())
    }

    /// Admin reset from `error` back to `idle`.
    pub fn reset(&self, id: &str) -> CoreResult<()> {
        {
            let entry = self
                .agents
                .get(id)
                .ok_or_else(|| CoreError::NotFound(format!("agent '{id}'")))?;
            if entry.status != AgentStatus::Error {
                return Err(CoreError::State(format!(
                    "agent '{id}' is {:?}, not error",
                    entry.status
                )));
            }
        }
        self.set_status(id, AgentStatus::Idle).map(|_| ())
    }

    //───────────────────── dispatch accounting ─────────────────────

    /// Atomically claim one unit of capacity and mark the agent busy.
    pub fn begin_dispatch(&self, id: &str) -> CoreResult<()> {
        let event = {
            let mut entry = self
                .agents
                .get_mut(id)
                .ok_or_else(|| CoreError::NotFound(format!("agent '{id}'")))?;
            if !entry.status.is_dispatchable() {
                return Err(CoreError::State(format!(
                    "agent '{id}' is {:?}, not dispatchable",
                    entry.status
                )));
            }
            if entry.active >= entry.capacity {
                return Err(CoreError::Busy(format!(
                    "agent '{id}' at capacity ({}/{})",
                    entry.active, entry.capacity
                )));
            }
            entry.active += 1;
            if entry.status == AgentStatus::Idle {
                entry.status = AgentStatus::Busy;
                Some(RegistryEvent::StatusChanged {
                    id: id.to_string(),
                    from: AgentStatus::Idle,
                    to: AgentStatus::Busy,
                })
            } else {
                None
            }
        };
        if let Some(event) = event {
            self.emit(event);
        }
        Ok(())
    }

    /// Release one unit of capacity and record the dispatch outcome.
    ///
    /// Updates the rolling success window; a full window whose rate falls
    /// below the configured threshold moves the agent to `error`. Paused
    /// and errored agents keep their status while draining.
    pub fn finish_dispatch(&self, id: &str, success: bool) -> CoreResult<()> {
        let mut events = Vec::new();
        {
            let mut entry = self
                .agents
                .get_mut(id)
                .ok_or_else(|| CoreError::NotFound(format!("agent '{id}'")))?;
            if entry.active == 0 {
                return Err(CoreError::State(format!(
                    "agent '{id}' has no task in flight"
                )));
            }
            entry.active -= 1;
            if success {
                entry.completed += 1;
            } else {
                entry.failed += 1;
            }
            if entry.window.len() >= self.window {
                entry.window.pop_front();
            }
            entry.window.push_back(success);

            let rate = entry.success_rate();
            let unhealthy = entry.window.len() >= self.window && rate < self.threshold;
            let from = entry.status;
            if unhealthy && from != AgentStatus::Error {
                warn!(agent = id, rate, threshold = self.threshold, "agent below success threshold");
                entry.status = AgentStatus::Error;
                events.push(RegistryEvent::StatusChanged {
                    id: id.to_string(),
                    from,
                    to: AgentStatus::Error,
                });
            } else if entry.active == 0 && from == AgentStatus::Busy {
                entry.status = AgentStatus::Idle;
                events.push(RegistryEvent::StatusChanged {
                    id: id.to_string(),
                    from,
                    to: AgentStatus::Idle,
                });
            }
        }
        for event in events {
            self.emit(event);
        }
        Ok(())
    }

    /// Release one unit of capacity without recording an outcome.
    ///
    /// Used when an in-flight result is dropped (task cancelled while
    /// running): the dispatch neither helps nor hurts the agent's window.
    pub fn abort_dispatch(&self, id: &str) -> CoreResult<()> {
        let event = {
            let mut entry = self
                .agents
                .get_mut(id)
                .ok_or_else(|| CoreError::NotFound(format!("agent '{id}'")))?;
            if entry.active == 0 {
                return Err(CoreError::State(format!(
                    "agent '{id}' has no task in flight"
                )));
            }
            entry.active -= 1;
            if entry.active == 0 && entry.status == AgentStatus::Busy {
                entry.status = AgentStatus::Idle;
                Some(RegistryEvent::StatusChanged {
                    id: id.to_string(),
                    from: AgentStatus::Busy,
                    to: AgentStatus::Idle,
                })
            } else {
                None
            }
        };
        if let Some(event) = event {
            self.emit(event);
        }
        Ok(())
    }

    /// Mark an agent errored outside the dispatch accounting path
    /// (unacknowledged cancellation, health failure).
    pub fn mark_error(&self, id: &str) -> CoreResult<()> {
        self.set_status(id, AgentStatus::Error).map(|_| ())
    }
}
