//! Voting primitives: turning a set of opinions into one decision.
//!
//! Tie-break policy is fixed across strategies: a weighted tie falls back
//! to majority rule, and any remaining tie picks the lowest decision in
//! [`Decision`]'s total order.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::trace;

use rookery_types::{AgentOpinion, CoreError, CoreResult, Decision};

/// Weighted sums closer than this are treated as tied.
const WEIGHT_EPSILON: f64 = 1e-9;

/// Rule by which opinions become one decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsensusStrategy {
    /// Decision with the most opinions; ties pick the lowest decision.
    Majority,
    /// Each opinion contributes `agent_weight × confidence`; highest sum
    /// wins; ties fall back to majority rule.
    Weighted,
    /// A single decision shared by every opinion, or no consensus.
    Unanimous,
    /// Decision whose weight reaches the given fraction of the total, or
    /// no consensus.
    Threshold(f64),
}

/// Outcome of a successful vote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// The winning decision.
    pub decision: Decision,
    /// Weight (or opinion count, for majority) behind the winner.
    pub support: f64,
    /// Total weight (or opinion count) across all decisions.
    pub total: f64,
    /// Per-decision weight, for observability.
    pub tally: BTreeMap<Decision, f64>,
}

impl ConsensusResult {
    /// Winner's share of the total, in `[0, 1]`.
    pub fn share(&self) -> f64 {
        if self.total <= 0.0 {
            0.0
        } else {
            self.support / self.total
        }
    }
}

/// Apply a consensus strategy to a set of opinions.
///
/// `weights` maps agent ids to voting weight; missing agents weigh 1.0.
pub fn vote(
    opinions: &[AgentOpinion],
    strategy: ConsensusStrategy,
    weights: &HashMap<String, f64>,
) -> CoreResult<ConsensusResult> {
    if opinions.is_empty() {
        return Err(CoreError::NoConsensus("no opinions cast".into()));
    }
    trace!(count = opinions.len(), ?strategy, "tallying opinions");
    match strategy {
        ConsensusStrategy::Majority => Ok(majority(opinions)),
        ConsensusStrategy::Weighted => Ok(weighted(opinions, weights)),
        ConsensusStrategy::Unanimous => unanimous(opinions),
        ConsensusStrategy::Threshold(fraction) => threshold(opinions, weights, fraction),
    }
}

fn counts(opinions: &[AgentOpinion]) -> BTreeMap<Decision, f64> {
    let mut tally: BTreeMap<Decision, f64> = BTreeMap::new();
    for opinion in opinions {
        *tally.entry(opinion.decision.clone()).or_insert(0.0) += 1.0;
    }
    tally
}

fn weighted_sums(
    opinions: &[AgentOpinion],
    weights: &HashMap<String, f64>,
) -> BTreeMap<Decision, f64> {
    let mut tally: BTreeMap<Decision, f64> = BTreeMap::new();
    for opinion in opinions {
        let weight = weights.get(&opinion.agent_id).copied().unwrap_or(1.0);
        *tally.entry(opinion.decision.clone()).or_insert(0.0) += weight * opinion.confidence;
    }
    tally
}

/// Strict plurality; the ascending tally iteration makes "first maximum"
/// the lowest tied decision.
fn majority(opinions: &[AgentOpinion]) -> ConsensusResult {
    let tally = counts(opinions);
    let (decision, support) = tally
        .iter()
        .fold(None::<(&Decision, f64)>, |best, (decision, count)| match best {
            Some((_, top)) if *count <= top => best,
            _ => Some((decision, *count)),
        })
        .expect("opinions checked non-empty");
    ConsensusResult {
        decision: decision.clone(),
        support,
        total: opinions.len() as f64,
        tally,
    }
}

fn weighted(opinions: &[AgentOpinion], weights: &HashMap<String, f64>) -> ConsensusResult {
    let tally = weighted_sums(opinions, weights);
    let top = tally
        .values()
        .fold(f64::MIN, |top, sum| if *sum > top { *sum } else { top });
    let tied: Vec<&Decision> = tally
        .iter()
        .filter(|(_, sum)| (top - **sum).abs() < WEIGHT_EPSILON)
        .map(|(decision, _)| decision)
        .collect();

    let decision = if tied.len() == 1 {
        tied[0].clone()
    } else {
        // Weighted tie: majority rule over the tied decisions, then the
        // lowest decision.
        let tied_opinions: Vec<AgentOpinion> = opinions
            .iter()
            .filter(|o| tied.contains(&&o.decision))
            .cloned()
            .collect();
        majority(&tied_opinions).decision
    };

    let support = tally.get(&decision).copied().unwrap_or(0.0);
    let total = tally.values().sum();
    ConsensusResult { decision, support, total, tally }
}

fn unanimous(opinions: &[AgentOpinion]) -> CoreResult<ConsensusResult> {
    let first = &opinions[0].decision;
    if opinions.iter().any(|o| &o.decision != first) {
        return Err(CoreError::NoConsensus(format!(
            "{} distinct decisions, unanimity required",
            counts(opinions).len()
        )));
    }
    let tally = counts(opinions);
    Ok(ConsensusResult {
        decision: first.clone(),
        support: opinions.len() as f64,
        total: opinions.len() as f64,
        tally,
    })
}

fn threshold(
    opinions: &[AgentOpinion],
    weights: &HashMap<String, f64>,
    fraction: f64,
) -> CoreResult<ConsensusResult> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(CoreError::Validation(format!(
            "threshold fraction must be within [0, 1], got {fraction}"
        )));
    }
    let tally = weighted_sums(opinions, weights);
    let total: f64 = tally.values().sum();
    let bar = fraction * total;

    // Ascending iteration plus strict > keeps the lowest tied decision.
    let mut winner: Option<(&Decision, f64)> = None;
    for (decision, sum) in &tally {
        if *sum + WEIGHT_EPSILON >= bar {
            match winner {
                Some((_, top)) if *sum <= top => {}
                _ => winner = Some((decision, *sum)),
            }
        }
    }

    match winner {
        Some((decision, support)) => Ok(ConsensusResult {
            decision: decision.clone(),
            support,
            total,
            tally,
        }),
        None => Err(CoreError::NoConsensus(format!(
            "no decision reached {fraction} of total weight {total:.3}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opinion(agent: &str, decision: &str, confidence: f64) -> AgentOpinion {
        AgentOpinion::new(agent, Decision::from(decision), confidence)
    }

    #[test]
    fn empty_opinion_set_is_no_consensus() {
        let err = vote(&[], ConsensusStrategy::Majority, &HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), rookery_types::ErrorKind::NoConsensus);
    }

    #[test]
    fn majority_takes_strict_plurality() {
        let opinions = vec![
            opinion("a1", "X", 0.9),
            opinion("a2", "X", 0.1),
            opinion("a3", "Y", 1.0),
        ];
        let result = vote(&opinions, ConsensusStrategy::Majority, &HashMap::new()).unwrap();
        assert_eq!(result.decision, Decision::from("X"));
        assert_eq!(result.support, 2.0);
        assert_eq!(result.total, 3.0);
    }

    #[test]
    fn majority_tie_picks_lowest_decision() {
        let opinions = vec![opinion("a1", "Y", 1.0), opinion("a2", "X", 1.0)];
        let result = vote(&opinions, ConsensusStrategy::Majority, &HashMap::new()).unwrap();
        assert_eq!(result.decision, Decision::from("X"));
    }

    #[test]
    fn weighted_multiplies_weight_and_confidence() {
        // X = 1.0*0.9 + 0.2*0.3 = 0.96; Y = 0.4*0.8 = 0.32.
        let opinions = vec![
            opinion("a1", "X", 0.9),
            opinion("a2", "Y", 0.8),
            opinion("a3", "X", 0.3),
        ];
        let weights = HashMap::from([
            ("a1".to_string(), 1.0),
            ("a2".to_string(), 0.4),
            ("a3".to_string(), 0.2),
        ]);
        let result = vote(&opinions, ConsensusStrategy::Weighted, &weights).unwrap();
        assert_eq!(result.decision, Decision::from("X"));
        assert!((result.support - 0.96).abs() < 1e-9);
        assert!((result.total - 1.28).abs() < 1e-9);
    }

    #[test]
    fn weighted_tie_falls_back_to_majority_then_lexicographic() {
        // Weighted sums tie at 1.0 each; Y has more opinions.
        let opinions = vec![
            opinion("a1", "X", 1.0),
            opinion("a2", "Y", 0.5),
            opinion("a3", "Y", 0.5),
        ];
        let result = vote(&opinions, ConsensusStrategy::Weighted, &HashMap::new()).unwrap();
        assert_eq!(result.decision, Decision::from("Y"));

        // Full tie (same sums, same counts): the lower decision wins.
        let opinions = vec![opinion("a1", "Y", 0.8), opinion("a2", "X", 0.8)];
        let result = vote(&opinions, ConsensusStrategy::Weighted, &HashMap::new()).unwrap();
        assert_eq!(result.decision, Decision::from("X"));
    }

    #[test]
    fn missing_weights_default_to_one() {
        let opinions = vec![opinion("a1", "X", 0.6), opinion("a2", "Y", 0.5)];
        let result = vote(&opinions, ConsensusStrategy::Weighted, &HashMap::new()).unwrap();
        assert_eq!(result.decision, Decision::from("X"));
    }

    #[test]
    fn unanimous_requires_all_equal() {
        let agreed = vec![opinion("a1", "X", 0.9), opinion("a2", "X", 0.2)];
        let result = vote(&agreed, ConsensusStrategy::Unanimous, &HashMap::new()).unwrap();
        assert_eq!(result.decision, Decision::from("X"));

        let split = vec![opinion("a1", "X", 0.9), opinion("a2", "Y", 0.9)];
        let err = vote(&split, ConsensusStrategy::Unanimous, &HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), rookery_types::ErrorKind::NoConsensus);
    }

    #[test]
    fn threshold_gates_on_weight_share() {
        let opinions = vec![
            opinion("a1", "X", 1.0),
            opinion("a2", "X", 1.0),
            opinion("a3", "Y", 1.0),
        ];
        // X holds 2/3 of the weight.
        let result =
            vote(&opinions, ConsensusStrategy::Threshold(0.6), &HashMap::new()).unwrap();
        assert_eq!(result.decision, Decision::from("X"));

        let err =
            vote(&opinions, ConsensusStrategy::Threshold(0.9), &HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), rookery_types::ErrorKind::NoConsensus);
    }

    #[test]
    fn threshold_rejects_invalid_fraction() {
        let opinions = vec![opinion("a1", "X", 1.0)];
        let err =
            vote(&opinions, ConsensusStrategy::Threshold(1.5), &HashMap::new()).unwrap_err();
        assert_eq!(err.kind(), rookery_types::ErrorKind::Validation);
    }

    #[test]
    fn integer_and_text_decisions_tally_separately() {
        let opinions = vec![
            AgentOpinion::new("a1", Decision::Int(1), 1.0),
            AgentOpinion::new("a2", Decision::from("1"), 1.0),
            AgentOpinion::new("a3", Decision::Int(1), 1.0),
        ];
        let result = vote(&opinions, ConsensusStrategy::Majority, &HashMap::new()).unwrap();
        assert_eq!(result.decision, Decision::Int(1));
        assert_eq!(result.support, 2.0);
    }
}
