//! Priority queue and waiting-set bookkeeping.
//!
//! One mutex guards both structures; every critical section is a heap
//! operation or an O(dependents) scan, and no await ever happens inside.
//! Heap entries are lazy: a task cancelled while queued simply fails the
//! status check when popped.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

/// Heap entry ordered by `(priority desc, created_at asc, seq asc)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedEntry {
    /// Scheduling priority; higher pops first.
    pub priority: i64,
    /// Admission timestamp; earlier pops first on priority ties.
    pub created_at: DateTime<Utc>,
    /// Admission sequence; breaks timestamp ties deterministically.
    pub seq: u64,
    /// Task id.
    pub task_id: String,
}

impl Ord for QueuedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.created_at.cmp(&self.created_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct QueueInner {
    heap: BinaryHeap<QueuedEntry>,
    /// Waiting task -> unmet dependency ids.
    waiting: HashMap<String, HashSet<String>>,
    /// Dependency id -> direct dependents (waiting tasks only).
    dependents: HashMap<String, Vec<String>>,
}

/// The orchestrator's work queue: ready heap plus waiting set.
#[derive(Debug, Default)]
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl TaskQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a ready task onto the heap and wake one worker.
    pub fn push(&self, entry: QueuedEntry) {
        self.inner.lock().expect("queue lock poisoned").heap.push(entry);
        self.notify.notify_one();
    }

    /// Park a task until its unmet dependencies complete.
    pub fn park_waiting(&self, task_id: &str, unmet: HashSet<String>) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        for dep in &unmet {
            inner
                .dependents
                .entry(dep.clone())
                .or_default()
                .push(task_id.to_string());
        }
        inner.waiting.insert(task_id.to_string(), unmet);
    }

    /// Pop the highest-priority ready task, if any.
    pub fn try_pop(&self) -> Option<QueuedEntry> {
        self.inner.lock().expect("queue lock poisoned").heap.pop()
    }

    /// A future that resolves on the next push. Create it *before*
    /// checking [`try_pop`] so wakeups cannot be lost.
    pub fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.notify.notified()
    }

    /// Wake every parked worker (shutdown, monitor nudge).
    pub fn wake_all(&self) {
        self.notify.notify_waiters();
    }

    /// Record a completed dependency: returns the dependents whose last
    /// unmet dependency this was, in dependent-id order.
    pub fn resolve_dependency(&self, dep_id: &str) -> Vec<String> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let Some(direct) = inner.dependents.remove(dep_id) else {
            return Vec::new();
        };
        let mut ready = Vec::new();
        for dependent in direct {
            if let Some(unmet) = inner.waiting.get_mut(&dependent) {
                unmet.remove(dep_id);
                if unmet.is_empty() {
                    inner.waiting.remove(&dependent);
                    ready.push(dependent);
                }
            }
        }
        ready.sort();
        ready
    }

    /// Remove and return every transitive waiting dependent of `dep_id`
    /// (cascade cancellation sweep), in discovery order.
    pub fn drain_dependents(&self, dep_id: &str) -> Vec<String> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let mut swept = Vec::new();
        let mut frontier = vec![dep_id.to_string()];
        while let Some(current) = frontier.pop() {
            let Some(direct) = inner.dependents.remove(&current) else {
                continue;
            };
            for dependent in direct {
                if inner.waiting.remove(&dependent).is_some() {
                    swept.push(dependent.clone());
                    frontier.push(dependent);
                }
            }
        }
        swept
    }

    /// Drop a single task from the waiting set (direct cancellation).
    pub fn remove_waiting(&self, task_id: &str) -> bool {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let removed = inner.waiting.remove(task_id).is_some();
        if removed {
            for dependents in inner.dependents.values_mut() {
                dependents.retain(|d| d != task_id);
            }
        }
        removed
    }

    /// Current heap depth.
    pub fn ready_len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").heap.len()
    }

    /// Current waiting-set size.
    pub fn waiting_len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").waiting.len()
    }
}
