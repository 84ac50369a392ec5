//! Collaboration-mode round trips against scripted stub agents.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{fast_config, register_generalists, spawn_echo, spawn_fixed, spawn_script};
use rookery_consensus::{
    CollabMode, CollaborationEngine, ConsensusStrategy, CritiqueParams, DebateJudge,
    DebateParams, EnsembleParams, FailurePolicy, HandoffFormat, MergeStrategy, PipelineParams,
    PipelineStage, SwarmParams,
};
use rookery_decomposer::Decomposer;
use rookery_orchestration::Orchestrator;

fn engine_over(orch: &Arc<Orchestrator>) -> CollaborationEngine {
    CollaborationEngine::new(
        Arc::clone(orch),
        Arc::new(Decomposer::with_builtin_patterns()),
    )
}

#[tokio::test]
async fn debate_with_jury_matches_transcript_arithmetic() {
    let orch = Orchestrator::from_config(fast_config());
    register_generalists(
        &orch.registry(),
        &["debate"],
        &["p1", "p2", "j1", "j2", "j3"],
    );
    spawn_fixed(&orch.bus(), "p1", json!("argument from p1"));
    spawn_fixed(&orch.bus(), "p2", json!("argument from p2"));
    spawn_fixed(&orch.bus(), "j1", json!({ "winner": "p1", "confidence": 0.9 }));
    spawn_fixed(&orch.bus(), "j2", json!({ "winner": "p1", "confidence": 0.7 }));
    spawn_fixed(&orch.bus(), "j3", json!({ "winner": "p2", "confidence": 0.8 }));
    orch.start(None).unwrap();

    let engine = engine_over(&orch);
    let rounds = 3;
    let result = engine
        .run_debate(
            "should the cache be write-through",
            &["p1".to_string(), "p2".to_string()],
            DebateParams::new(
                rounds,
                DebateJudge::Jury {
                    members: vec!["j1".to_string(), "j2".to_string(), "j3".to_string()],
                    strategy: ConsensusStrategy::Majority,
                },
            ),
        )
        .await
        .unwrap();

    assert_eq!(result.mode, CollabMode::Debate);
    assert_eq!(result.output, json!("p1"));

    // 2 participants x 3 rounds of arguments, plus one vote per juror.
    let arguments = result
        .transcript
        .iter()
        .filter(|e| e.role == "argument" || e.role == "rebuttal")
        .count();
    assert_eq!(arguments, 6);
    let votes = result.transcript.iter().filter(|e| e.role == "vote").count();
    assert_eq!(votes, 3);
    assert_eq!(result.transcript.len(), (2 * rounds as usize) + 3);

    // Each participant argued exactly once per round.
    for participant in ["p1", "p2"] {
        let count = result
            .transcript
            .iter()
            .filter(|e| e.agent_id == participant && e.role != "vote")
            .count();
        assert_eq!(count, rounds as usize);
    }

    // Majority 2/3 for p1.
    assert!((result.confidence - 2.0 / 3.0).abs() < 1e-9);

    orch.stop().await;
}

#[tokio::test]
async fn debate_with_designated_judge() {
    let orch = Orchestrator::from_config(fast_config());
    register_generalists(&orch.registry(), &["debate"], &["p1", "p2", "judge"]);
    spawn_fixed(&orch.bus(), "p1", json!("for"));
    spawn_fixed(&orch.bus(), "p2", json!("against"));
    spawn_fixed(&orch.bus(), "judge", json!({ "winner": "p2", "confidence": 0.85 }));
    orch.start(None).unwrap();

    let engine = engine_over(&orch);
    let result = engine
        .run_debate(
            "tabs or spaces",
            &["p1".to_string(), "p2".to_string()],
            DebateParams::new(2, DebateJudge::Agent("judge".to_string())),
        )
        .await
        .unwrap();

    assert_eq!(result.output, json!("p2"));
    assert_eq!(result.confidence, 0.85);
    assert_eq!(result.transcript.len(), 4); // 2 rounds x 2 participants

    orch.stop().await;
}

#[tokio::test]
async fn ensemble_vote_merge_and_agreement() {
    let orch = Orchestrator::from_config(fast_config());
    register_generalists(&orch.registry(), &["work"], &["e1", "e2", "e3"]);
    spawn_fixed(&orch.bus(), "e1", json!("blue"));
    spawn_fixed(&orch.bus(), "e2", json!("blue"));
    spawn_fixed(&orch.bus(), "e3", json!("green"));
    orch.start(None).unwrap();

    let engine = engine_over(&orch);
    let result = engine
        .run_ensemble(
            "pick a color",
            &["e1".to_string(), "e2".to_string(), "e3".to_string()],
            EnsembleParams { merge: MergeStrategy::Vote },
        )
        .await
        .unwrap();

    assert_eq!(result.mode, CollabMode::Ensemble);
    assert_eq!(result.output, json!("blue"));
    assert!((result.confidence - 2.0 / 3.0).abs() < 1e-9);

    orch.stop().await;
}

#[tokio::test]
async fn ensemble_average_merge() {
    let orch = Orchestrator::from_config(fast_config());
    register_generalists(&orch.registry(), &["work"], &["e1", "e2"]);
    spawn_fixed(&orch.bus(), "e1", json!(2));
    spawn_fixed(&orch.bus(), "e2", json!(4));
    orch.start(None).unwrap();

    let engine = engine_over(&orch);
    let result = engine
        .run_ensemble(
            "estimate the latency",
            &["e1".to_string(), "e2".to_string()],
            EnsembleParams { merge: MergeStrategy::Average },
        )
        .await
        .unwrap();

    assert_eq!(result.output, json!(3.0));

    orch.stop().await;
}

#[tokio::test]
async fn ensemble_synthesis_merge() {
    let orch = Orchestrator::from_config(fast_config());
    register_generalists(&orch.registry(), &["work"], &["e1", "e2", "syn"]);
    spawn_fixed(&orch.bus(), "e1", json!("draft a"));
    spawn_fixed(&orch.bus(), "e2", json!("draft b"));
    spawn_fixed(&orch.bus(), "syn", json!("merged draft"));
    orch.start(None).unwrap();

    let engine = engine_over(&orch);
    let result = engine
        .run_ensemble(
            "write the summary",
            &["e1".to_string(), "e2".to_string()],
            EnsembleParams {
                merge: MergeStrategy::Synthesis { synthesizer: "syn".to_string() },
            },
        )
        .await
        .unwrap();

    assert_eq!(result.output, json!("merged draft"));
    assert!(result
        .transcript
        .iter()
        .any(|e| e.role == "synthesis" && e.agent_id == "syn"));

    orch.stop().await;
}

#[tokio::test]
async fn pipeline_hands_output_forward() {
    let orch = Orchestrator::from_config(fast_config());
    register_generalists(&orch.registry(), &["gathering"], &["ga"]);
    orch.registry()
        .register_type(
            rookery_types::AgentTypeSpec::new(
                "writer",
                "Writers",
                rookery_types::AgentCategory::Writing,
            )
            .unwrap()
            .with_capability(rookery_types::CapabilityDescriptor::new("writing", "writing")),
        )
        .unwrap();
    orch.registry()
        .register_agent("wr", "writer", "wr", vec!["writing".to_string()], 2)
        .unwrap();
    spawn_fixed(&orch.bus(), "ga", json!("gathered facts"));
    spawn_echo(&orch.bus(), "wr");
    orch.start(None).unwrap();

    let engine = engine_over(&orch);
    let result = engine
        .run_pipeline(
            "produce the brief",
            &[
                PipelineStage::new("gathering", "Gather the facts."),
                PipelineStage::new("writing", "Write the brief from the facts."),
            ],
            PipelineParams { handoff: HandoffFormat::Natural, on_failure: FailurePolicy::Abort },
        )
        .await
        .unwrap();

    assert_eq!(result.mode, CollabMode::Pipeline);
    // The echo stage received the previous stage's output in its prompt.
    let prompt = result.output.as_str().unwrap();
    assert!(prompt.contains("gathered facts"));
    assert!(prompt.contains("produce the brief"));
    assert_eq!(result.participants, vec!["ga".to_string(), "wr".to_string()]);

    orch.stop().await;
}

#[tokio::test]
async fn pipeline_backtracks_one_stage_on_failure() {
    let orch = Orchestrator::from_config(fast_config());
    let registry = orch.registry();
    registry
        .register_type(
            rookery_types::AgentTypeSpec::new(
                "stagehand",
                "Stagehands",
                rookery_types::AgentCategory::Custom,
            )
            .unwrap()
            .with_capability(rookery_types::CapabilityDescriptor::new("stage_a", "stage_a"))
            .with_capability(rookery_types::CapabilityDescriptor::new("stage_b", "stage_b")),
        )
        .unwrap();
    registry
        .register_agent("aa", "stagehand", "aa", vec!["stage_a".to_string()], 4)
        .unwrap();
    registry
        .register_agent("bb", "stagehand", "bb", vec!["stage_b".to_string()], 4)
        .unwrap();
    spawn_script(&orch.bus(), "aa", vec![json!({"ok": "first"}), json!({"ok": "redo"})]);
    spawn_script(
        &orch.bus(),
        "bb",
        vec![
            json!({"err": {"message": "flaky", "retryable": false}}),
            json!({"ok": "final"}),
        ],
    );
    orch.start(None).unwrap();

    let engine = engine_over(&orch);
    let result = engine
        .run_pipeline(
            "flaky handoff",
            &[
                PipelineStage::new("stage_a", "Do the first step."),
                PipelineStage::new("stage_b", "Do the second step."),
            ],
            PipelineParams {
                handoff: HandoffFormat::Structured,
                on_failure: FailurePolicy::BacktrackOne,
            },
        )
        .await
        .unwrap();

    assert_eq!(result.output, json!("final"));
    // first + redo + final
    assert_eq!(result.transcript.iter().filter(|e| e.role == "stage").count(), 3);

    orch.stop().await;
}

#[tokio::test]
async fn critique_iterates_until_approved() {
    let orch = Orchestrator::from_config(fast_config());
    register_generalists(&orch.registry(), &["work"], &["prod", "c1"]);
    spawn_script(
        &orch.bus(),
        "prod",
        vec![json!({"ok": "draft v1"}), json!({"ok": "draft v2"})],
    );
    spawn_script(
        &orch.bus(),
        "c1",
        vec![
            json!({"ok": {"score": 0.2, "comment": "thin"}}),
            json!({"ok": {"score": 0.9, "comment": "solid"}}),
        ],
    );
    orch.start(None).unwrap();

    let engine = engine_over(&orch);
    let result = engine
        .run_critique(
            "write the launch note",
            "prod",
            &["c1".to_string()],
            CritiqueParams {
                approval_threshold: 0.8,
                max_iterations: 4,
                parallel_critics: true,
            },
        )
        .await
        .unwrap();

    assert_eq!(result.mode, CollabMode::Critique);
    assert_eq!(result.output, json!("draft v2"));
    assert_eq!(result.confidence, 0.9);
    assert_eq!(result.transcript.iter().filter(|e| e.role == "draft").count(), 2);
    assert_eq!(
        result.transcript.iter().filter(|e| e.role == "critique").count(),
        2
    );

    orch.stop().await;
}

#[tokio::test]
async fn critique_stops_at_iteration_cap() {
    let orch = Orchestrator::from_config(fast_config());
    register_generalists(&orch.registry(), &["work"], &["prod", "c1"]);
    spawn_fixed(&orch.bus(), "prod", json!("stubborn draft"));
    spawn_fixed(&orch.bus(), "c1", json!({ "score": 0.1, "comment": "no" }));
    orch.start(None).unwrap();

    let engine = engine_over(&orch);
    let result = engine
        .run_critique(
            "impossible standards",
            "prod",
            &["c1".to_string()],
            CritiqueParams {
                approval_threshold: 0.95,
                max_iterations: 2,
                parallel_critics: false,
            },
        )
        .await
        .unwrap();

    assert_eq!(result.output, json!("stubborn draft"));
    assert_eq!(result.transcript.iter().filter(|e| e.role == "draft").count(), 2);
    assert!(result.confidence < 0.95);

    orch.stop().await;
}

#[tokio::test]
async fn swarm_runs_plan_and_posts_to_blackboard() {
    let orch = Orchestrator::from_config(fast_config());
    register_generalists(
        &orch.registry(),
        &["web_research", "data_analysis", "report_writing"],
        &["s1", "s2"],
    );
    spawn_echo(&orch.bus(), "s1");
    spawn_echo(&orch.bus(), "s2");
    let mut swarm_topics = orch.bus().subscribe("session.swarm.#").unwrap();
    orch.start(None).unwrap();

    let engine = engine_over(&orch);
    let result = engine
        .run_swarm(
            "research the migration options and write a report",
            SwarmParams::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.mode, CollabMode::Swarm);
    // The built-in research pattern has three stages; the aggregator
    // (write stage) output is the session output.
    assert_eq!(
        result.transcript.iter().filter(|e| e.role == "subtask").count(),
        3
    );
    assert!(result.output.as_str().unwrap().contains("report"));

    // Three blackboard updates were posted.
    let mut blackboard_updates = 0;
    while let Some(message) = swarm_topics.try_recv() {
        if message.topic.ends_with(".blackboard") {
            blackboard_updates += 1;
        }
    }
    assert_eq!(blackboard_updates, 3);

    orch.stop().await;
}
