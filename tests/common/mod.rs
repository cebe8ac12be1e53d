//! Common test utilities for triagraph integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't pollute
//! the user's real data directory.

#![allow(dead_code)]

use assert_cmd::Command;
use std::path::PathBuf;
pub use tempfile::TempDir;

/// A test environment with an isolated data directory.
///
/// The `tg()` method returns a `Command` that sets `TG_DATA_DIR`
/// per-invocation, making tests parallel-safe. All commands run against
/// the default tenant (org "default", project "default").
pub struct TestEnv {
    pub data_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        Self {
            data_dir: TempDir::new().unwrap(),
        }
    }

    /// Create a new test environment and initialize the default tenant.
    pub fn init() -> Self {
        let env = Self::new();
        env.tg().arg("init").assert().success();
        env
    }

    /// Get a Command for the tg binary with an isolated data directory.
    pub fn tg(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_tg"));
        cmd.env("TG_DATA_DIR", self.data_dir.path());
        cmd
    }

    pub fn data_path(&self) -> &std::path::Path {
        self.data_dir.path()
    }

    /// Models directory of the default tenant.
    pub fn models_dir(&self) -> PathBuf {
        self.data_path()
            .join("tenants")
            .join("default_default")
            .join("models")
    }

    /// Install a small trained topic artifact for the default tenant.
    ///
    /// Two topics: 1 = layout ("layout", "css"), 3 = stability ("crash",
    /// "panic"); "render" splits between them.
    pub fn write_topic_model(&self) {
        let artifact = serde_json::json!({
            "num_topics": 2,
            "vocabulary": {
                "crash": 0, "panic": 1, "layout": 2, "css": 3, "render": 4
            },
            "term_topics": [
                [[3, 0.9], [1, 0.1]],
                [[3, 0.8], [1, 0.2]],
                [[1, 0.9], [3, 0.1]],
                [[1, 1.0]],
                [[1, 0.5], [3, 0.5]]
            ],
            "topics": [
                { "topic_id": 1, "label": "layout", "terms": ["layout", "css"] },
                { "topic_id": 3, "label": "stability", "terms": ["crash", "panic"] }
            ]
        });
        std::fs::create_dir_all(self.models_dir()).unwrap();
        std::fs::write(
            self.models_dir().join("topic_model.json"),
            serde_json::to_string_pretty(&artifact).unwrap(),
        )
        .unwrap();
    }

    /// Install a similarity index for the default tenant. Each row is
    /// (bug_id, dense topic vector indexed by topic id).
    pub fn write_similarity_index(&self, rows: &[(&str, &[f64])]) {
        std::fs::create_dir_all(self.models_dir()).unwrap();
        let body: String = rows
            .iter()
            .map(|(id, v)| {
                serde_json::json!({ "bug_id": id, "vector": v }).to_string() + "\n"
            })
            .collect();
        std::fs::write(self.models_dir().join("topic_index.jsonl"), body).unwrap();
    }

    /// Pipe one bug report into `tg bug ingest`.
    pub fn ingest(&self, record: serde_json::Value) -> assert_cmd::assert::Assert {
        self.tg()
            .args(["bug", "ingest"])
            .write_stdin(record.to_string())
            .assert()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// A minimal open bug report payload.
pub fn bug_json(bug_id: &str, summary: &str, assignee: &str) -> serde_json::Value {
    serde_json::json!({
        "bug_id": bug_id,
        "summary": summary,
        "status": "NEW",
        "product": "Core",
        "component": "Graphics",
        "creator": "reporter@example.com",
        "assignee": assignee,
        "creation_time": "2026-02-01T09:00:00Z",
        "last_change_time": "2026-02-02T09:00:00Z"
    })
}

/// A resolved-fixed bug report payload crediting `assignee`.
pub fn resolved_bug_json(bug_id: &str, summary: &str, assignee: &str) -> serde_json::Value {
    let mut v = bug_json(bug_id, summary, assignee);
    v["status"] = "RESOLVED".into();
    v["resolution"] = "FIXED".into();
    v
}
