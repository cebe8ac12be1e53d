//! Integration tests for bug ingestion via the CLI.
//!
//! Covers init, ingest (stdin and --file), idempotent re-ingestion,
//! topic labeling, duplicate linking against the similarity index, and
//! the read commands (show, list, search, similar).

mod common;

use common::{bug_json, resolved_bug_json, TestEnv};
use predicates::prelude::*;

#[test]
fn test_init_creates_tenant() {
    let env = TestEnv::new();
    env.tg()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"created\": true"));

    // Second init is a no-op
    env.tg()
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"created\": false"));
}

#[test]
fn test_commands_fail_before_init() {
    let env = TestEnv::new();
    env.tg()
        .args(["bug", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not initialized"));
}

#[test]
fn test_ingest_and_show_roundtrip() {
    let env = TestEnv::init();
    env.ingest(bug_json("b1", "Crash when resizing window", "unassigned"))
        .success()
        .stdout(predicate::str::contains("\"created\": true"));

    env.tg()
        .args(["bug", "show", "b1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Crash when resizing window"))
        .stdout(predicate::str::contains("created_by"));
}

#[test]
fn test_ingest_from_file() {
    let env = TestEnv::init();
    let path = env.data_path().join("report.json");
    std::fs::write(&path, bug_json("b7", "Panic in parser", "unassigned").to_string()).unwrap();

    env.tg()
        .args(["bug", "ingest", "--file"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"bug_id\": \"b7\""));
}

#[test]
fn test_reingestion_is_idempotent() {
    let env = TestEnv::init();
    let record = bug_json("b1", "Crash when resizing window", "dev_a@example.com");
    env.ingest(record.clone()).success();
    env.ingest(record)
        .success()
        .stdout(predicate::str::contains("\"created\": false"));

    env.tg()
        .args(["bug", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"count\": 1"));
}

#[test]
fn test_ingest_rejects_invalid_payload() {
    let env = TestEnv::init();
    let mut record = bug_json("b1", "Self duplicate", "unassigned");
    record["duplicate_of"] = "b1".into();
    env.ingest(record)
        .failure()
        .stderr(predicate::str::contains("Invalid input"));
}

#[test]
fn test_ingest_labels_topic_from_model() {
    let env = TestEnv::init();
    env.write_topic_model();

    env.ingest(bug_json("b1", "Browser crash with panic message", "unassigned"))
        .success()
        .stdout(predicate::str::contains("\"primary_topic\": 3"));

    env.tg()
        .args(["topic", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("stability"));
}

#[test]
fn test_near_duplicate_gets_duplicate_edge() {
    let env = TestEnv::init();
    env.write_topic_model();
    // Historical bug b1 sits almost entirely on topic 3
    env.write_similarity_index(&[("b1", &[0.0, 0.1, 0.0, 0.9])]);
    env.ingest(bug_json("b1", "Browser crash with panic message", "dev_a@example.com"))
        .success();

    env.ingest(bug_json("b2", "crash panic on startup", "unassigned"))
        .success()
        .stdout(predicate::str::contains("\"duplicate_edges\": 1"));

    env.tg()
        .args(["bug", "similar", "b2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("duplicate_of"))
        .stdout(predicate::str::contains("\"target\": \"b1\""));
}

#[test]
fn test_search_ranks_by_matched_terms() {
    let env = TestEnv::init();
    env.ingest(bug_json("b1", "crash when resizing window", "unassigned")).success();
    env.ingest(bug_json("b2", "crash while painting and resizing", "unassigned")).success();
    env.ingest(bug_json("b3", "slow scrolling", "unassigned")).success();

    env.tg()
        .args(["bug", "search", "--query", "crash painting"])
        .assert()
        .success()
        .stdout(predicate::str::contains("b2"))
        .stdout(predicate::str::is_match(r#""bug_id": "b2"[\s\S]*"bug_id": "b1""#).unwrap());
}

#[test]
fn test_dev_list_tracks_assignees_and_creators() {
    let env = TestEnv::init();
    env.ingest(resolved_bug_json("b1", "fixed crash", "dev_a@example.com")).success();

    env.tg()
        .args(["dev", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("dev_a@example.com"))
        .stdout(predicate::str::contains("reporter@example.com"));
}

#[test]
fn test_human_output_mode() {
    let env = TestEnv::init();
    env.ingest(bug_json("b1", "Crash on resize", "unassigned")).success();

    env.tg()
        .args(["-H", "bug", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("b1  [NEW]  Crash on resize"));
}

#[test]
fn test_tenants_are_isolated() {
    let env = TestEnv::init();
    env.ingest(bug_json("b1", "Crash on resize", "unassigned")).success();

    // A different tenant does not see the bug (and is not initialized)
    env.tg()
        .args(["--org", "other", "--project", "side", "bug", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Not initialized"));

    env.tg()
        .args(["--org", "other", "--project", "side", "init"])
        .assert()
        .success();
    env.tg()
        .args(["--org", "other", "--project", "side", "bug", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"count\": 0"));
}
