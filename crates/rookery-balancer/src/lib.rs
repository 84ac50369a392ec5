#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **rookery-balancer** – Agent selection under observed load.
//!
//! A stateless function from (candidate set, load snapshot, strategy) to a
//! chosen agent, plus the small amount of strategy state that has to live
//! somewhere (the round-robin cursor and the seeded RNG for weighted
//! sampling). The balancer never blocks: when every candidate is at
//! capacity it returns `None` and the caller requeues with backoff.
//!
//! Every tie-break is a total order on `(load, success rate, id)` so that a
//! fixed seed and fixed inputs reproduce the same dispatch sequence.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::trace;

use rookery_registry::AgentLoad;

/// Selectable balancing strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    /// Cycle through candidates in id order.
    RoundRobin,
    /// Lowest `active/capacity`; ties by lower active, higher success
    /// rate, then lexicographically lower id.
    #[default]
    LeastLoaded,
    /// Sample with probability proportional to
    /// `success_rate × (1 − active/capacity)`; an all-zero weight set
    /// falls back to round-robin over that set.
    WeightedPerformance,
    /// Exact-capability candidates (pre-filtered by the registry), then
    /// least-loaded.
    CapabilityScore,
}

/// Strategy state shared by the orchestrator's workers.
pub struct LoadBalancer {
    strategy: Strategy,
    cursor: AtomicUsize,
    rng: Mutex<StdRng>,
}

impl LoadBalancer {
    /// Create a balancer with a default strategy and RNG seed.
    pub fn new(strategy: Strategy, seed: u64) -> Self {
        Self {
            strategy,
            cursor: AtomicUsize::new(0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// The configured default strategy.
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Choose one agent from the candidate snapshot, or `None` when every
    /// candidate is at capacity. `override_strategy` replaces the
    /// configured default for a single selection.
    pub fn select(
        &self,
        candidates: &[AgentLoad],
        override_strategy: Option<Strategy>,
    ) -> Option<String> {
        let mut available: Vec<&AgentLoad> =
            candidates.iter().filter(|c| c.has_headroom()).collect();
        if available.is_empty() {
            return None;
        }
        // Deterministic base order regardless of snapshot order.
        available.sort_by(|a, b| a.id.cmp(&b.id));

        let strategy = override_strategy.unwrap_or(self.strategy);
        let chosen = match strategy {
            Strategy::RoundRobin => self.round_robin(&available),
            Strategy::LeastLoaded | Strategy::CapabilityScore => Self::least_loaded(&available),
            Strategy::WeightedPerformance => self.weighted(&available),
        };
        trace!(?strategy, agent = %chosen, "agent selected");
        Some(chosen)
    }

    fn round_robin(&self, available: &[&AgentLoad]) -> String {
        let slot = self.cursor.fetch_add(1, Ordering::Relaxed) % available.len();
        available[slot].id.clone()
    }

    fn least_loaded(available: &[&AgentLoad]) -> String {
        available
            .iter()
            .min_by(|a, b| Self::least_loaded_order(a, b))
            .expect("candidate set checked non-empty")
            .id
            .clone()
    }

    fn least_loaded_order(a: &AgentLoad, b: &AgentLoad) -> CmpOrdering {
        a.utilization()
            .total_cmp(&b.utilization())
            .then(a.active.cmp(&b.active))
            .then(b.success_rate.total_cmp(&a.success_rate))
            .then(a.id.cmp(&b.id))
    }

    fn weighted(&self, available: &[&AgentLoad]) -> String {
        let weights: Vec<f64> = available
            .iter()
            .map(|c| (c.success_rate * (1.0 - c.utilization())).max(0.0))
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= f64::EPSILON {
            // Zero weights carry no signal; rotate over the set instead.
            return self.round_robin(available);
        }

        let mut rng = self.rng.lock().expect("balancer rng poisoned");
        let mut draw = rng.gen_range(0.0..total);
        for (candidate, weight) in available.iter().zip(&weights) {
            if draw < *weight {
                return candidate.id.clone();
            }
            draw -= weight;
        }
        // Floating-point residue lands on the last positive weight.
        available
            .iter()
            .zip(&weights)
            .rev()
            .find(|(_, w)| **w > 0.0)
            .expect("total weight checked positive")
            .0
            .id
            .clone()
    }
}
