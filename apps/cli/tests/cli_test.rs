//! Integration tests for the `meridian` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;

fn meridian() -> Command {
    let mut cmd = Command::cargo_bin("meridian").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

fn json_output(cmd: &mut Command) -> Value {
    let output = cmd.arg("--json").assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).unwrap()
}

fn record(db: &Path, model: &str, task: &str, quality: &str) -> Value {
    json_output(meridian().args([
        "record",
        "--db",
        db.to_str().unwrap(),
        "--model",
        model,
        "--task",
        task,
        "--input-tokens",
        "800",
        "--output-tokens",
        "200",
        "--latency-ms",
        "640",
        "--quality",
        quality,
    ]))
}

#[test]
fn test_models_lists_default_catalog() {
    meridian()
        .arg("models")
        .assert()
        .success()
        .stdout(predicate::str::contains("claude-sonnet-4.5"))
        .stdout(predicate::str::contains("llama-3.1-8b"));

    let models = json_output(meridian().arg("models"));
    assert_eq!(models.as_array().unwrap().len(), 7);
}

#[test]
fn test_models_filters_by_task() {
    let models = json_output(meridian().args(["models", "--task", "content_generation"]));
    let ids: Vec<&str> = models.as_array().unwrap().iter().map(|m| m["id"].as_str().unwrap()).collect();
    assert!(ids.contains(&"gemini-2.5-flash"));
    assert!(!ids.contains(&"llama-3.1-8b"));
    assert!(!ids.contains(&"gpt-4o-mini"));
}

#[test]
fn test_route_best_cost_prefers_free_model() {
    let decision = json_output(meridian().args(["route", "--task", "summarization", "--strategy", "best_cost"]));
    assert_eq!(decision["model_id"], "llama-3.1-8b");
    assert_eq!(decision["strategy"], "best_cost");
    assert_eq!(decision["decision_type"], "ranked");
    assert!(decision["rationale"].as_str().unwrap().len() > 10);
}

#[test]
fn test_route_respects_exclusions() {
    let decision = json_output(meridian().args([
        "route",
        "--task",
        "summarization",
        "--strategy",
        "best_cost",
        "--exclude",
        "llama-3.1-8b",
    ]));
    assert_ne!(decision["model_id"], "llama-3.1-8b");
}

#[test]
fn test_route_unsatisfiable_constraints_fail() {
    meridian()
        .args(["route", "--task", "summarization", "--min-quality", "99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No eligible model"));
}

#[test]
fn test_route_unknown_task_fails() {
    meridian()
        .args(["route", "--task", "poetry"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown task type"));
}

#[test]
fn test_route_fallback_chain_has_configured_depth() {
    let plan = json_output(meridian().args(["route", "--task", "email_generation", "--fallback"]));
    let candidates = plan["candidates"].as_array().unwrap();
    assert_eq!(candidates.len(), 3);
    let mut ids: Vec<&str> = candidates.iter().map(|c| c["model_id"].as_str().unwrap()).collect();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

#[test]
fn test_council_returns_k_distinct_models() {
    let council = json_output(meridian().args(["council", "--task", "lead_scoring", "-k", "2"]));
    let decisions = council.as_array().unwrap();
    assert_eq!(decisions.len(), 2);
    assert_ne!(decisions[0]["model_id"], decisions[1]["model_id"]);
}

#[test]
fn test_config_file_sets_default_strategy() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("meridian.toml");
    std::fs::write(&path, "[router]\ndefault_strategy = \"best_cost\"\n").unwrap();

    let decision =
        json_output(meridian().args(["route", "--task", "summarization", "--config", path.to_str().unwrap()]));
    assert_eq!(decision["strategy"], "best_cost");
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("meridian.toml");
    std::fs::write(&path, "[router.weights]\nquality = 0.9\ncost = 0.9\nlatency = 0.0\n").unwrap();

    meridian()
        .args(["models", "--config", path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"));
}

#[test]
fn test_score_email_from_text() {
    let email = "Subject: Faster onboarding for Northwind\n\nHi Dana,\n\nI saw Northwind is growing its support \
                 team quickly. We help support leaders cut onboarding from weeks to days with guided playbooks that \
                 work inside the tools your agents already use.\n\nWould you be open to a short call next week?\n\n\
                 Best regards,\nSam";
    let score = json_output(meridian().args([
        "score",
        "--task",
        "email_generation",
        "--text",
        email,
        "--recipient",
        "Dana",
    ]));
    let value = score["score"].as_f64().unwrap();
    assert!((0.0..=100.0).contains(&value));
    assert!(!score["dimensions"].as_array().unwrap().is_empty());
}

#[test]
fn test_score_classification_is_unsupported() {
    meridian()
        .args(["score", "--task", "response_classification", "--text", "positive"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("response_classification"));
}

#[test]
fn test_record_feedback_and_stats_persist_in_db() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("records.db");

    let first = record(&db, "gpt-4o-mini", "email_generation", "70");
    record(&db, "gpt-4o-mini", "email_generation", "80");
    let id = first["id"].as_str().unwrap();
    assert!(first["cost"].as_f64().unwrap() > 0.0);

    meridian()
        .args(["feedback", id, "--rating", "4", "--db", db.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("4/5"));

    let stats = json_output(meridian().args(["stats", "--task", "email_generation", "--db", db.to_str().unwrap()]));
    let stats = stats.as_array().unwrap();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0]["total"], 2);
    assert!((stats[0]["mean_quality"].as_f64().unwrap() - 75.0).abs() < 1e-9);
    assert!((stats[0]["mean_rating"].as_f64().unwrap() - 4.0).abs() < 1e-9);
}

#[test]
fn test_feedback_rejects_out_of_range_rating() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("records.db");
    let first = record(&db, "gpt-4o", "summarization", "88");

    meridian()
        .args(["feedback", first["id"].as_str().unwrap(), "--rating", "9", "--db", db.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("rating"));
}

#[test]
fn test_compare_and_cost_analysis() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("records.db");
    for quality in ["85", "87", "86"] {
        record(&db, "gpt-4o", "email_generation", quality);
    }
    for quality in ["80", "82"] {
        record(&db, "gpt-4o-mini", "email_generation", quality);
    }

    let comparison = json_output(meridian().args([
        "compare",
        "--task",
        "email_generation",
        "--models",
        "gpt-4o-mini,gpt-4o,claude-haiku-4.5",
        "--db",
        db.to_str().unwrap(),
    ]));
    let entries = comparison["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2]["model_id"], "claude-haiku-4.5");
    assert!(entries[2]["rank"].is_null());

    let analysis = json_output(meridian().args([
        "cost-analysis",
        "--task",
        "email_generation",
        "--min-quality",
        "75",
        "--db",
        db.to_str().unwrap(),
    ]));
    assert_eq!(analysis["executions"], 5);
    assert!(analysis["savings_per_request"].as_f64().unwrap() >= 0.0);
}

fn record_tagged(db: &Path, model: &str, quality: &str) -> Value {
    json_output(meridian().args([
        "record",
        "--db",
        db.to_str().unwrap(),
        "--model",
        model,
        "--task",
        "email_generation",
        "--quality",
        quality,
        "--ab-test",
        "subject-lines",
    ]))
}

#[test]
fn test_results_reads_back_tagged_executions() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("records.db");
    for quality in ["70", "71", "72", "70", "71"] {
        record_tagged(&db, "claude-haiku-4.5", quality);
    }
    for quality in ["85", "86", "87", "85", "86"] {
        let record = record_tagged(&db, "gpt-4o-mini", quality);
        assert_eq!(record["variant"], "gpt-4o-mini");
    }
    record(&db, "gpt-4o-mini", "email_generation", "10");

    let result = json_output(meridian().args([
        "results",
        "subject-lines",
        "--task",
        "email_generation",
        "--variants",
        "claude-haiku-4.5,gpt-4o-mini",
        "--min-samples",
        "5",
        "--db",
        db.to_str().unwrap(),
    ]));
    let variants = result["variants"].as_array().unwrap();
    assert_eq!(variants[0]["model_id"], "claude-haiku-4.5");
    assert_eq!(variants[0]["is_control"], true);
    assert_eq!(variants[1]["executions"], 5);
    assert_eq!(result["outcome"]["model_id"], "gpt-4o-mini");
}

#[test]
fn test_record_rejects_variant_for_another_model() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("records.db");
    meridian()
        .args([
            "record",
            "--db",
            db.to_str().unwrap(),
            "--model",
            "gpt-4o",
            "--task",
            "email_generation",
            "--quality",
            "99",
            "--ab-test",
            "subject-lines",
            "--variant",
            "gpt-4o-mini",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must equal model_id"));
}

#[test]
fn test_simulate_detects_clear_winner() {
    let result = json_output(meridian().args([
        "simulate",
        "--task",
        "email_generation",
        "--control",
        "claude-haiku-4.5",
        "--treatment",
        "gpt-4o-mini",
        "--lift",
        "15",
        "--noise",
        "5",
        "-n",
        "300",
    ]));
    assert_eq!(result["outcome"]["kind"], "winner");
    assert_eq!(result["outcome"]["model_id"], "gpt-4o-mini");
    let executions: u64 = result["variants"].as_array().unwrap().iter().map(|v| v["executions"].as_u64().unwrap()).sum();
    assert_eq!(executions, 300);
}

#[test]
fn test_simulate_same_model_is_rejected() {
    meridian()
        .args(["simulate", "--control", "gpt-4o", "--treatment", "gpt-4o"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("different models"));
}
