//! Decomposition patterns: matchers, subtask templates, and the built-in set.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ExecutionStrategy;

/// Predicate over a task description. Matchers are plain data so the
/// registry stays serializable and the match order stays total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Matcher {
    /// Matches every description.
    Always,
    /// Matches when every keyword appears (case-insensitive).
    KeywordsAll(Vec<String>),
    /// Matches when at least one keyword appears (case-insensitive).
    KeywordsAny(Vec<String>),
}

impl Matcher {
    /// Whether the description satisfies this matcher.
    pub fn matches(&self, description: &str) -> bool {
        let haystack = description.to_lowercase();
        match self {
            Matcher::Always => true,
            Matcher::KeywordsAll(keywords) => keywords
                .iter()
                .all(|k| haystack.contains(&k.to_lowercase())),
            Matcher::KeywordsAny(keywords) => keywords
                .iter()
                .any(|k| haystack.contains(&k.to_lowercase())),
        }
    }
}

/// Template for one subtask within a pattern. `{task}` in the description
/// is replaced with the parent description at decomposition time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubTaskTemplate {
    /// Plan-local identifier.
    pub local_id: String,
    /// Description template.
    pub description: String,
    /// Capability required of the executing agent.
    #[serde(default)]
    pub required_capability: Option<String>,
    /// Offset added to the hinted base priority.
    #[serde(default)]
    pub priority_offset: i64,
    /// Plan-local dependencies.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Advisory duration estimate.
    #[serde(default)]
    pub estimated_duration: Option<Duration>,
}

impl SubTaskTemplate {
    /// Shorthand for a capability-routed stage.
    pub fn new(local_id: &str, description: &str, capability: &str) -> Self {
        Self {
            local_id: local_id.to_string(),
            description: description.to_string(),
            required_capability: Some(capability.to_string()),
            priority_offset: 0,
            depends_on: Vec::new(),
            estimated_duration: None,
        }
    }

    /// Add plan-local dependencies (builder style).
    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on = deps.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Attach an advisory duration estimate (builder style).
    pub fn with_estimate(mut self, estimate: Duration) -> Self {
        self.estimated_duration = Some(estimate);
        self
    }
}

/// A registered decomposition pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    /// Stable pattern id.
    pub id: String,
    /// Match predicate over descriptions.
    pub matcher: Matcher,
    /// Execution strategy for produced plans.
    pub strategy: ExecutionStrategy,
    /// Subtask templates in plan order.
    pub templates: Vec<SubTaskTemplate>,
}

/// The built-in pattern set: research reports, implementation work, and
/// comparative evaluations. Registration order is match order.
pub fn builtin_patterns() -> Vec<Pattern> {
    vec![
        Pattern {
            id: "research-report".to_string(),
            matcher: Matcher::KeywordsAny(vec![
                "research".to_string(),
                "investigate".to_string(),
                "survey".to_string(),
            ]),
            strategy: ExecutionStrategy::Sequential,
            templates: vec![
                SubTaskTemplate::new(
                    "gather",
                    "Gather sources and raw material for: {task}",
                    "web_research",
                )
                .with_estimate(Duration::from_secs(120)),
                SubTaskTemplate::new(
                    "analyze",
                    "Extract findings and contradictions from the gathered material for: {task}",
                    "data_analysis",
                )
                .with_estimate(Duration::from_secs(90)),
                SubTaskTemplate::new(
                    "write",
                    "Write the final report for: {task}",
                    "report_writing",
                )
                .with_estimate(Duration::from_secs(90)),
            ],
        },
        Pattern {
            id: "implement-feature".to_string(),
            matcher: Matcher::KeywordsAny(vec![
                "implement".to_string(),
                "build".to_string(),
                "fix".to_string(),
            ]),
            strategy: ExecutionStrategy::Sequential,
            templates: vec![
                SubTaskTemplate::new("plan", "Plan the change: {task}", "planning"),
                SubTaskTemplate::new("code", "Carry out the change: {task}", "code_generation"),
                SubTaskTemplate::new("verify", "Test and verify the change: {task}", "testing"),
            ],
        },
        Pattern {
            id: "compare-options".to_string(),
            matcher: Matcher::KeywordsAny(vec![
                "compare".to_string(),
                "evaluate".to_string(),
                "versus".to_string(),
            ]),
            strategy: ExecutionStrategy::Mixed,
            templates: vec![
                SubTaskTemplate::new(
                    "criteria",
                    "Define evaluation criteria for: {task}",
                    "planning",
                ),
                SubTaskTemplate::new(
                    "assess_a",
                    "Assess the first option against the criteria for: {task}",
                    "data_analysis",
                )
                .depends_on(&["criteria"]),
                SubTaskTemplate::new(
                    "assess_b",
                    "Assess the remaining options against the criteria for: {task}",
                    "data_analysis",
                )
                .depends_on(&["criteria"]),
                SubTaskTemplate::new(
                    "recommend",
                    "Merge the assessments into a recommendation for: {task}",
                    "report_writing",
                )
                .depends_on(&["assess_a", "assess_b"]),
            ],
        },
    ]
}
