#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **rookery-decomposer** – Pattern-driven breakdown of a request into a
//! dependency DAG of subtasks.
//!
//! Patterns are data, not callables: each one is a tagged record of
//! `{id, matcher, templates, strategy}` held in registration order. The
//! first pattern whose matcher accepts the description wins; when none
//! match, the request becomes a single-subtask plan. Every produced plan
//! is checked for dangling references and cycles by topological sort
//! before it leaves the decomposer.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use rookery_types::{validate_id, CoreError, CoreResult};

pub mod pattern;
pub use pattern::{Matcher, Pattern, SubTaskTemplate};

//─────────────────────────────
//  Plan model
//─────────────────────────────

/// How a plan's subtasks are meant to execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// Each subtask depends on the previous one.
    Sequential,
    /// No implied ordering between subtasks.
    Parallel,
    /// Ordering comes entirely from the explicit dependency edges.
    Mixed,
}

/// One planned subtask; ids and dependencies are plan-local.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTaskSpec {
    /// Plan-local identifier.
    pub local_id: String,
    /// Work description for the executing agent.
    pub description: String,
    /// Capability required of the executing agent.
    #[serde(default)]
    pub required_capability: Option<String>,
    /// Scheduling priority.
    #[serde(default)]
    pub priority: i64,
    /// Plan-local ids this subtask waits on.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Advisory estimate; never used to gate scheduling.
    #[serde(default)]
    pub estimated_duration: Option<Duration>,
}

/// The DAG produced for one parent request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecompositionPlan {
    /// Id of the parent task this plan was derived from.
    pub parent_id: String,
    /// Execution strategy the pattern declared.
    pub strategy: ExecutionStrategy,
    /// Subtasks in pattern order, dependencies fully materialized.
    pub subtasks: Vec<SubTaskSpec>,
}

impl DecompositionPlan {
    /// Check that every dependency resolves within the plan and that the
    /// dependency relation is acyclic.
    pub fn validate(&self) -> CoreResult<()> {
        self.topological_order().map(|_| ())
    }

    /// A valid topological order of the plan's local ids, or a
    /// `PatternError` describing the dangling reference or cycle.
    pub fn topological_order(&self) -> CoreResult<Vec<String>> {
        let ids: HashSet<&str> = self.subtasks.iter().map(|s| s.local_id.as_str()).collect();
        if ids.len() != self.subtasks.len() {
            return Err(CoreError::Pattern(format!(
                "plan for '{}' contains duplicate local ids",
                self.parent_id
            )));
        }

        let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for subtask in &self.subtasks {
            indegree.entry(subtask.local_id.as_str()).or_insert(0);
            for dep in &subtask.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(CoreError::Pattern(format!(
                        "subtask '{}' depends on unknown local id '{dep}'",
                        subtask.local_id
                    )));
                }
                *indegree.entry(subtask.local_id.as_str()).or_insert(0) += 1;
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(subtask.local_id.as_str());
            }
        }

        // Kahn's algorithm over the BTreeMap keeps the order deterministic.
        let mut ready: Vec<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.subtasks.len());
        while let Some(id) = ready.pop() {
            order.push(id.to_string());
            for dependent in dependents.get(id).into_iter().flatten() {
                let d = indegree.get_mut(dependent).expect("indegree initialized");
                *d -= 1;
                if *d == 0 {
                    ready.push(dependent);
                }
            }
        }

        if order.len() != self.subtasks.len() {
            return Err(CoreError::Pattern(format!(
                "plan for '{}' contains a dependency cycle",
                self.parent_id
            )));
        }
        Ok(order)
    }
}

//─────────────────────────────
//  Hints
//─────────────────────────────

/// Optional guidance the caller can pass alongside a description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecompositionHints {
    /// Capability for the fallback single-subtask plan.
    pub required_capability: Option<String>,
    /// Base priority applied to produced subtasks.
    pub priority: i64,
}

//─────────────────────────────
//  Decomposer
//─────────────────────────────

/// Pattern registry plus the decomposition entry point.
pub struct Decomposer {
    patterns: RwLock<Vec<Pattern>>,
}

impl Default for Decomposer {
    fn default() -> Self {
        Self::new()
    }
}

impl Decomposer {
    /// Create an empty decomposer.
    pub fn new() -> Self {
        Self { patterns: RwLock::new(Vec::new()) }
    }

    /// Create a decomposer pre-loaded with the built-in pattern set.
    pub fn with_builtin_patterns() -> Self {
        let decomposer = Self::new();
        for pattern in pattern::builtin_patterns() {
            decomposer
                .register_pattern(pattern)
                .expect("built-in patterns are valid");
        }
        decomposer
    }

    /// Append a pattern; registration order is match order.
    pub fn register_pattern(&self, pattern: Pattern) -> CoreResult<()> {
        validate_id("pattern id", &pattern.id)?;
        if pattern.templates.is_empty() {
            return Err(CoreError::Pattern(format!(
                "pattern '{}' has no subtask templates",
                pattern.id
            )));
        }
        let mut patterns = self.patterns.write().expect("pattern registry poisoned");
        if patterns.iter().any(|p| p.id == pattern.id) {
            return Err(CoreError::Validation(format!(
                "pattern '{}' already registered",
                pattern.id
            )));
        }
        debug!(pattern = %pattern.id, templates = pattern.templates.len(), "pattern registered");
        patterns.push(pattern);
        Ok(())
    }

    /// Registered pattern ids in match order.
    pub fn pattern_ids(&self) -> Vec<String> {
        self.patterns
            .read()
            .expect("pattern registry poisoned")
            .iter()
            .map(|p| p.id.clone())
            .collect()
    }

    /// Turn a parent description into a validated plan.
    ///
    /// Matchers run in registration order; first match wins. With no
    /// match the result is a single-subtask plan carrying the hinted
    /// capability and `Sequential` strategy.
    pub fn decompose(
        &self,
        task_id: &str,
        description: &str,
        hints: Option<&DecompositionHints>,
    ) -> CoreResult<DecompositionPlan> {
        validate_id("task id", task_id)?;
        if description.trim().is_empty() {
            return Err(CoreError::Validation("description cannot be empty".into()));
        }
        let default_hints = DecompositionHints::default();
        let hints = hints.unwrap_or(&default_hints);

        let matched = {
            let patterns = self.patterns.read().expect("pattern registry poisoned");
            patterns
                .iter()
                .find(|p| p.matcher.matches(description))
                .cloned()
        };

        let plan = match matched {
            Some(pattern) => {
                trace!(task = task_id, pattern = %pattern.id, "pattern matched");
                Self::expand(task_id, description, hints, &pattern)
            }
            None => {
                trace!(task = task_id, "no pattern matched, single-subtask fallback");
                DecompositionPlan {
                    parent_id: task_id.to_string(),
                    strategy: ExecutionStrategy::Sequential,
                    subtasks: vec![SubTaskSpec {
                        local_id: "main".to_string(),
                        description: description.to_string(),
                        required_capability: hints.required_capability.clone(),
                        priority: hints.priority,
                        depends_on: Vec::new(),
                        estimated_duration: None,
                    }],
                }
            }
        };

        plan.validate()?;
        Ok(plan)
    }

    /// Instantiate a pattern's templates against the parent description.
    fn expand(
        task_id: &str,
        description: &str,
        hints: &DecompositionHints,
        pattern: &Pattern,
    ) -> DecompositionPlan {
        let mut subtasks = Vec::with_capacity(pattern.templates.len());
        let mut previous: Option<String> = None;
        for template in &pattern.templates {
            let mut depends_on = template.depends_on.clone();
            // Sequential strategy chains each subtask onto its predecessor.
            if pattern.strategy == ExecutionStrategy::Sequential {
                if let Some(prev) = &previous {
                    if !depends_on.contains(prev) {
                        depends_on.push(prev.clone());
                    }
                }
            }
            subtasks.push(SubTaskSpec {
                local_id: template.local_id.clone(),
                description: template.description.replace("{task}", description),
                required_capability: template.required_capability.clone(),
                priority: hints.priority + template.priority_offset,
                depends_on,
                estimated_duration: template.estimated_duration,
            });
            previous = Some(template.local_id.clone());
        }
        DecompositionPlan {
            parent_id: task_id.to_string(),
            strategy: pattern.strategy,
            subtasks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(local_id: &str, deps: &[&str]) -> SubTaskTemplate {
        SubTaskTemplate {
            local_id: local_id.to_string(),
            description: format!("{local_id}: {{task}}"),
            required_capability: None,
            priority_offset: 0,
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            estimated_duration: None,
        }
    }

    #[test]
    fn empty_description_rejected() {
        let decomposer = Decomposer::new();
        let err = decomposer.decompose("t1", "  ", None).unwrap_err();
        assert_eq!(err.kind(), rookery_types::ErrorKind::Validation);
    }

    #[test]
    fn fallback_single_subtask_plan() {
        let decomposer = Decomposer::new();
        let hints = DecompositionHints {
            required_capability: Some("web_research".into()),
            priority: 3,
        };
        let plan = decomposer
            .decompose("t1", "look into rust async runtimes", Some(&hints))
            .unwrap();
        assert_eq!(plan.strategy, ExecutionStrategy::Sequential);
        assert_eq!(plan.subtasks.len(), 1);
        assert_eq!(plan.subtasks[0].local_id, "main");
        assert_eq!(
            plan.subtasks[0].required_capability.as_deref(),
            Some("web_research")
        );
        assert_eq!(plan.subtasks[0].priority, 3);
    }

    #[test]
    fn first_matching_pattern_wins() {
        let decomposer = Decomposer::new();
        decomposer
            .register_pattern(Pattern {
                id: "first".into(),
                matcher: Matcher::KeywordsAny(vec!["report".into()]),
                strategy: ExecutionStrategy::Parallel,
                templates: vec![stage("a", &[])],
            })
            .unwrap();
        decomposer
            .register_pattern(Pattern {
                id: "second".into(),
                matcher: Matcher::Always,
                strategy: ExecutionStrategy::Parallel,
                templates: vec![stage("b", &[])],
            })
            .unwrap();

        let plan = decomposer.decompose("t1", "write a REPORT today", None).unwrap();
        assert_eq!(plan.subtasks[0].local_id, "a");

        let plan = decomposer.decompose("t2", "anything else", None).unwrap();
        assert_eq!(plan.subtasks[0].local_id, "b");
    }

    #[test]
    fn sequential_strategy_chains_templates() {
        let decomposer = Decomposer::new();
        decomposer
            .register_pattern(Pattern {
                id: "chain".into(),
                matcher: Matcher::Always,
                strategy: ExecutionStrategy::Sequential,
                templates: vec![stage("one", &[]), stage("two", &[]), stage("three", &[])],
            })
            .unwrap();

        let plan = decomposer.decompose("t1", "do the thing", None).unwrap();
        assert_eq!(plan.subtasks[1].depends_on, vec!["one"]);
        assert_eq!(plan.subtasks[2].depends_on, vec!["two"]);
        assert_eq!(plan.subtasks[0].description, "one: do the thing");
    }

    #[test]
    fn cyclic_pattern_yields_pattern_error() {
        let decomposer = Decomposer::new();
        decomposer
            .register_pattern(Pattern {
                id: "cycle".into(),
                matcher: Matcher::Always,
                strategy: ExecutionStrategy::Mixed,
                templates: vec![stage("a", &["b"]), stage("b", &["a"])],
            })
            .unwrap();

        let err = decomposer.decompose("t1", "spin", None).unwrap_err();
        assert_eq!(err.kind(), rookery_types::ErrorKind::Pattern);
    }

    #[test]
    fn dangling_reference_yields_pattern_error() {
        let decomposer = Decomposer::new();
        decomposer
            .register_pattern(Pattern {
                id: "dangling".into(),
                matcher: Matcher::Always,
                strategy: ExecutionStrategy::Mixed,
                templates: vec![stage("a", &["ghost"])],
            })
            .unwrap();

        let err = decomposer.decompose("t1", "haunt", None).unwrap_err();
        assert_eq!(err.kind(), rookery_types::ErrorKind::Pattern);
    }

    #[test]
    fn topological_order_respects_edges() {
        let plan = DecompositionPlan {
            parent_id: "t1".into(),
            strategy: ExecutionStrategy::Mixed,
            subtasks: vec![
                SubTaskSpec {
                    local_id: "write".into(),
                    description: "write".into(),
                    required_capability: None,
                    priority: 0,
                    depends_on: vec!["gather".into(), "analyze".into()],
                    estimated_duration: None,
                },
                SubTaskSpec {
                    local_id: "gather".into(),
                    description: "gather".into(),
                    required_capability: None,
                    priority: 0,
                    depends_on: vec![],
                    estimated_duration: None,
                },
                SubTaskSpec {
                    local_id: "analyze".into(),
                    description: "analyze".into(),
                    required_capability: None,
                    priority: 0,
                    depends_on: vec!["gather".into()],
                    estimated_duration: None,
                },
            ],
        };
        let order = plan.topological_order().unwrap();
        let pos = |id: &str| order.iter().position(|o| o == id).unwrap();
        assert!(pos("gather") < pos("analyze"));
        assert!(pos("analyze") < pos("write"));
    }

    #[test]
    fn builtin_patterns_produce_valid_plans() {
        let decomposer = Decomposer::with_builtin_patterns();
        for description in [
            "research the state of wasm runtimes and write a report",
            "implement a rate limiter for the ingest service",
            "compare the three storage backends and recommend one",
        ] {
            let plan = decomposer.decompose("t1", description, None).unwrap();
            assert!(plan.subtasks.len() > 1, "expected multi-stage plan for: {description}");
            plan.validate().unwrap();
        }
    }

    #[test]
    fn duplicate_pattern_id_rejected() {
        let decomposer = Decomposer::new();
        let make = || Pattern {
            id: "p".into(),
            matcher: Matcher::Always,
            strategy: ExecutionStrategy::Parallel,
            templates: vec![stage("a", &[])],
        };
        decomposer.register_pattern(make()).unwrap();
        assert!(decomposer.register_pattern(make()).is_err());
    }
}
