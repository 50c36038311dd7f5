//! Experiments end to end: routing through a running test, recording tagged
//! outcomes, and computing the verdict.

use meridian_core::{
    ABTestConfig, ABTestManager, DecisionType, ExecutionOutcome, ExperimentSettings, InconclusiveReason,
    MetricTracker, ModelDescriptor, ModelRegistry, ModelRouter, RouteRequest, SqliteRecordStore, TaskType,
    TestOutcome, TestStatus, VariantConfig,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;

fn registry() -> Arc<ModelRegistry> {
    Arc::new(
        ModelRegistry::from_descriptors(vec![
            ModelDescriptor::new("incumbent", "acme", [TaskType::ConversationReply], 0.003, 0.015, 85.0),
            ModelDescriptor::new("challenger", "acme", [TaskType::ConversationReply], 0.0002, 0.0008, 70.0),
            ModelDescriptor::new("wildcard", "other", [TaskType::ConversationReply], 0.001, 0.002, 75.0),
        ])
        .unwrap(),
    )
}

fn reply_test(id: &str) -> ABTestConfig {
    ABTestConfig::new(
        id,
        "cheaper reply model",
        TaskType::ConversationReply,
        vec![VariantConfig::new("incumbent", 50).control(), VariantConfig::new("challenger", 50)],
    )
}

/// Routes `n` keys through the test and records a noisy quality around each
/// model's true mean.
fn simulate(router: &ModelRouter, test_id: &str, true_quality: &HashMap<&str, f64>, n: usize, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    for i in 0..n {
        let request = RouteRequest::new(TaskType::ConversationReply).in_experiment(test_id, format!("conversation-{i}"));
        let decision = router.route(&request).unwrap();
        assert_eq!(decision.decision_type, DecisionType::Experiment);

        let quality = (true_quality[decision.model_id.as_str()] + rng.gen_range(-6.0..6.0)).clamp(0.0, 100.0);
        router
            .tracker()
            .record_execution(
                ExecutionOutcome::new(&decision.model_id, TaskType::ConversationReply)
                    .with_tokens(400, 120)
                    .with_latency_ms(rng.gen_range(300.0..900.0))
                    .with_quality(quality)
                    .with_ab_test(test_id, &decision.model_id),
            )
            .unwrap();
    }
}

fn setup() -> (ModelRouter, Arc<ABTestManager>) {
    let registry = registry();
    let tracker = Arc::new(MetricTracker::in_memory(Arc::clone(&registry)));
    let manager = Arc::new(ABTestManager::new(Arc::clone(&tracker)));
    let router = ModelRouter::new(registry, tracker).with_experiments(Arc::clone(&manager));
    (router, manager)
}

#[test]
fn test_better_challenger_wins() {
    let (router, manager) = setup();
    manager.create(reply_test("reply-1")).unwrap();
    manager.start("reply-1").unwrap();

    let truth = HashMap::from([("incumbent", 78.0), ("challenger", 86.0)]);
    simulate(&router, "reply-1", &truth, 200, 7);

    let result = manager.compute_results("reply-1").unwrap();
    assert_eq!(result.outcome, TestOutcome::Winner { model_id: "challenger".to_string() });
    assert!(result.p_value.unwrap() < 0.05);
    assert!(result.effect_size.unwrap() > 0.0);

    let challenger = result.variants.iter().find(|v| v.model_id == "challenger").unwrap();
    assert!(challenger.samples >= 30);
    assert!(result.comparisons[0].cost_delta.unwrap() < 0.0);
}

#[test]
fn test_equal_variants_are_inconclusive() {
    let (router, manager) = setup();
    manager.create(reply_test("reply-2").with_significance_level(0.001)).unwrap();
    manager.start("reply-2").unwrap();

    let truth = HashMap::from([("incumbent", 80.0), ("challenger", 80.0)]);
    simulate(&router, "reply-2", &truth, 30, 11);
    let early = manager.compute_results("reply-2").unwrap();
    assert_eq!(early.outcome, TestOutcome::Inconclusive { reason: InconclusiveReason::InsufficientSamples });

    simulate(&router, "reply-2", &truth, 170, 12);
    let result = manager.compute_results("reply-2").unwrap();
    assert!(result.outcome.winner().is_none(), "equal models produced {}", result.outcome);
}

#[test]
fn test_completed_test_stops_routing_traffic() {
    let (router, manager) = setup();
    manager.create(reply_test("reply-3")).unwrap();
    manager.start("reply-3").unwrap();
    manager.complete("reply-3").unwrap();
    assert!(manager.start("reply-3").is_err());
    assert_eq!(manager.get("reply-3").unwrap().status, TestStatus::Completed);

    let request = RouteRequest::new(TaskType::ConversationReply).in_experiment("reply-3", "conversation-1");
    assert_eq!(router.route(&request).unwrap().decision_type, DecisionType::Ranked);
}

#[test]
fn test_assignment_shares_over_ten_thousand_keys() {
    let (_router, manager) = setup();
    let config = manager
        .create(ABTestConfig::new(
            "split",
            "three way",
            TaskType::ConversationReply,
            vec![
                VariantConfig::new("incumbent", 50),
                VariantConfig::new("challenger", 25),
                VariantConfig::new("wildcard", 25),
            ],
        ))
        .unwrap();

    let n = 10_000;
    let mut counts: HashMap<String, usize> = HashMap::new();
    for i in 0..n {
        let assignment = manager.assign_variant("split", &format!("user-{i}")).unwrap();
        *counts.entry(assignment.model_id).or_default() += 1;
    }
    for variant in &config.variants {
        let share = counts[&variant.model_id] as f64 / n as f64 * 100.0;
        assert!((share - f64::from(variant.weight)).abs() <= 2.0, "{}: {share}", variant.model_id);
    }
}

#[test]
fn test_assignment_is_stable_across_managers() {
    let (_router, first) = setup();
    let (_router, second) = setup();
    first.create(reply_test("shared")).unwrap();
    second.create(reply_test("shared")).unwrap();
    for i in 0..500 {
        let key = format!("lead-{i}");
        assert_eq!(
            first.assign_variant("shared", &key).unwrap().model_id,
            second.assign_variant("shared", &key).unwrap().model_id
        );
    }
}

#[test]
fn test_results_survive_process_restart_with_sqlite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("records.db");
    let registry = registry();
    let truth = HashMap::from([("incumbent", 75.0), ("challenger", 88.0)]);
    let settings = ExperimentSettings { significance_level: 0.01, min_sample_size: 20 };

    {
        let store = Arc::new(SqliteRecordStore::open(&path).unwrap());
        let tracker = Arc::new(MetricTracker::new(store, Arc::clone(&registry)));
        let manager = Arc::new(ABTestManager::with_settings(Arc::clone(&tracker), settings).unwrap());
        let router = ModelRouter::new(Arc::clone(&registry), tracker).with_experiments(Arc::clone(&manager));
        manager.create(reply_test("persisted")).unwrap();
        manager.start("persisted").unwrap();
        simulate(&router, "persisted", &truth, 120, 3);
    }

    let store = Arc::new(SqliteRecordStore::open(&path).unwrap());
    let tracker = Arc::new(MetricTracker::new(store, Arc::clone(&registry)));
    let manager = ABTestManager::with_settings(tracker, settings).unwrap();
    manager.create(reply_test("persisted")).unwrap();

    let result = manager.compute_results("persisted").unwrap();
    let executions: usize = result.variants.iter().map(|v| v.executions).sum();
    assert_eq!(executions, 120);
    assert_eq!(result.outcome.winner(), Some("challenger"));
}
