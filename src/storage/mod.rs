//! Graph persistence layer for a single tenant.
//!
//! One SQLite database per tenant holds the bug/topic/developer/commit
//! nodes and their relation edges. Every write is an idempotent upsert
//! keyed by natural id, and `upsert_bug` performs the whole ingestion
//! cascade in one transaction so callers can retry the entire call on a
//! transient failure.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::models::{
    Bug, BugRecord, Developer, Edge, EdgeProvenance, EdgeType, FeedbackAction, FeedbackEffect,
    RunStatus, SimilarityCandidate, Topic, TopicDistribution, TrainingRun, UNASSIGNED,
};
use crate::tenant::Tenant;
use crate::{Error, Result};

/// Baseline HAS_TOPIC weight for an edge created by topic inference.
const INFERRED_TOPIC_WEIGHT: f64 = 1.0;

/// Baseline HAS_TOPIC weight for an edge materialized by feedback,
/// before its first increment.
const FEEDBACK_TOPIC_WEIGHT: f64 = 0.0;

/// A HAS_TOPIC edge whose weight falls to this value or below is pruned.
const TOPIC_PRUNE_WEIGHT: f64 = -2.0;

/// Summary of one `upsert_bug` call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UpsertSummary {
    pub bug_id: String,
    /// False when an existing (non-placeholder) node was updated
    pub created: bool,
    pub primary_topic: Option<i64>,
    pub similar_edges: usize,
    pub duplicate_edges: usize,
    pub depends_on_edges: usize,
    pub commit_edges: usize,
}

/// One (resolved bug, credited developer) pair from history.
#[derive(Debug, Clone)]
pub struct ResolvedPair {
    pub bug_id: String,
    pub dev_id: String,
    pub topic_id: i64,
    pub component: String,
}

/// Per-topic resolved-bug count for a developer profile.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeveloperTopicShare {
    pub topic_id: i64,
    pub bugs_fixed_topic: u64,
    pub topic_share: f64,
}

/// Storage manager for a single tenant's graph.
pub struct Storage {
    root: PathBuf,
    conn: Connection,
}

impl Storage {
    /// Initialize storage for a tenant, creating directories and schema.
    pub fn init_with_data_dir(tenant: &Tenant, data_dir: &Path) -> Result<Self> {
        let root = tenant.dir(data_dir);
        fs::create_dir_all(&root)?;
        fs::create_dir_all(tenant.models_dir(data_dir))?;

        let conn = Connection::open(tenant.db_path(data_dir))?;
        Self::init_schema(&conn)?;
        Ok(Self { root, conn })
    }

    /// Open previously initialized storage for a tenant.
    pub fn open_with_data_dir(tenant: &Tenant, data_dir: &Path) -> Result<Self> {
        let db_path = tenant.db_path(data_dir);
        if !db_path.exists() {
            return Err(Error::NotInitialized);
        }
        let conn = Connection::open(&db_path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            root: tenant.dir(data_dir),
            conn,
        })
    }

    /// Check whether a tenant has been initialized.
    pub fn exists_with_data_dir(tenant: &Tenant, data_dir: &Path) -> bool {
        tenant.db_path(data_dir).exists()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;

            CREATE TABLE IF NOT EXISTS bugs (
                bug_id TEXT PRIMARY KEY,
                summary TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL DEFAULT '',
                resolution TEXT NOT NULL DEFAULT '',
                product TEXT NOT NULL DEFAULT '',
                component TEXT NOT NULL DEFAULT '',
                creator TEXT NOT NULL DEFAULT '',
                assignee TEXT NOT NULL DEFAULT 'unassigned',
                creation_time TEXT,
                last_change_time TEXT,
                keywords TEXT NOT NULL DEFAULT '[]',
                primary_topic INTEGER,
                topic_distribution TEXT NOT NULL DEFAULT '[]',
                placeholder INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS topics (
                topic_id INTEGER PRIMARY KEY,
                label TEXT,
                terms TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS developers (
                dev_id TEXT PRIMARY KEY,
                last_active_at TEXT
            );

            CREATE TABLE IF NOT EXISTS commits (
                commit_id TEXT PRIMARY KEY,
                commit_ref TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS edges (
                source TEXT NOT NULL,
                target TEXT NOT NULL,
                edge_type TEXT NOT NULL,
                weight REAL NOT NULL DEFAULT 1.0,
                provenance TEXT NOT NULL DEFAULT 'inferred',
                created_at TEXT NOT NULL,
                PRIMARY KEY (source, target, edge_type)
            );

            CREATE INDEX IF NOT EXISTS idx_edges_type_source ON edges(edge_type, source);
            CREATE INDEX IF NOT EXISTS idx_edges_type_target ON edges(edge_type, target);
            CREATE INDEX IF NOT EXISTS idx_bugs_primary_topic ON bugs(primary_topic);
            CREATE INDEX IF NOT EXISTS idx_bugs_status ON bugs(status);

            CREATE TABLE IF NOT EXISTS training_runs (
                run_id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                stage TEXT NOT NULL DEFAULT 'starting',
                progress INTEGER NOT NULL DEFAULT 0,
                message TEXT NOT NULL DEFAULT '',
                started_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                finished_at TEXT,
                model_version INTEGER,
                failure_reason TEXT
            );

            CREATE TABLE IF NOT EXISTS training_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL,
                logged_at TEXT NOT NULL,
                message TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    // === Bug ingestion ===

    /// Create-or-update a bug and all its relations in one transaction.
    ///
    /// Mutability rules: on re-ingestion only summary, status, resolution,
    /// last_change_time and the topic fields are overwritten; creator and
    /// creation_time are set once. A placeholder node (created earlier as
    /// a dangling edge target) is promoted to a full node instead.
    ///
    /// SQLITE_BUSY/LOCKED surfaces as `Error::TransientStore`; every write
    /// here is an idempotent upsert so retrying the whole call is safe.
    pub fn upsert_bug(
        &mut self,
        record: &BugRecord,
        distribution: &TopicDistribution,
        candidates: &[SimilarityCandidate],
        topic: Option<&Topic>,
    ) -> Result<UpsertSummary> {
        record.validate()?;
        self.upsert_bug_inner(record, distribution, candidates, topic)
            .map_err(map_transient)
    }

    fn upsert_bug_inner(
        &mut self,
        record: &BugRecord,
        distribution: &TopicDistribution,
        candidates: &[SimilarityCandidate],
        topic: Option<&Topic>,
    ) -> Result<UpsertSummary> {
        let now = Utc::now();
        let primary_topic = distribution.main_topic().map(|(tid, _)| tid);
        let dist_json = serde_json::to_string(&distribution.0)?;
        let keywords_json = serde_json::to_string(&record.keywords)?;

        let tx = self.conn.transaction()?;

        // (a) bug node per the mutability rules
        let existing: Option<bool> = tx
            .query_row(
                "SELECT placeholder FROM bugs WHERE bug_id = ?1",
                params![record.bug_id],
                |row| row.get::<_, i64>(0).map(|v| v != 0),
            )
            .optional()?;

        let created = match existing {
            None => {
                tx.execute(
                    "INSERT INTO bugs (bug_id, summary, status, resolution, product,
                        component, creator, assignee, creation_time, last_change_time,
                        keywords, primary_topic, topic_distribution, placeholder)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,0)",
                    params![
                        record.bug_id,
                        record.summary,
                        record.status,
                        record.resolution,
                        record.product,
                        record.component,
                        record.creator,
                        record.effective_assignee(),
                        record.creation_time.to_rfc3339(),
                        record.last_change_time.to_rfc3339(),
                        keywords_json,
                        primary_topic,
                        dist_json,
                    ],
                )?;
                true
            }
            Some(true) => {
                // Placeholder promotion: this is the first real ingestion
                tx.execute(
                    "UPDATE bugs SET summary=?2, status=?3, resolution=?4, product=?5,
                        component=?6, creator=?7, assignee=?8, creation_time=?9,
                        last_change_time=?10, keywords=?11, primary_topic=?12,
                        topic_distribution=?13, placeholder=0
                     WHERE bug_id=?1",
                    params![
                        record.bug_id,
                        record.summary,
                        record.status,
                        record.resolution,
                        record.product,
                        record.component,
                        record.creator,
                        record.effective_assignee(),
                        record.creation_time.to_rfc3339(),
                        record.last_change_time.to_rfc3339(),
                        keywords_json,
                        primary_topic,
                        dist_json,
                    ],
                )?;
                true
            }
            Some(false) => {
                tx.execute(
                    "UPDATE bugs SET summary=?2, status=?3, resolution=?4,
                        last_change_time=?5, primary_topic=?6, topic_distribution=?7
                     WHERE bug_id=?1",
                    params![
                        record.bug_id,
                        record.summary,
                        record.status,
                        record.resolution,
                        record.last_change_time.to_rfc3339(),
                        primary_topic,
                        dist_json,
                    ],
                )?;
                false
            }
        };

        // (b) topic node + HAS_TOPIC edge for the inferred primary topic
        if let Some(tid) = primary_topic {
            let (label, terms_json) = match topic.filter(|t| t.topic_id == tid) {
                Some(t) => (t.label.clone(), serde_json::to_string(&t.terms)?),
                None => (None, "[]".to_string()),
            };
            tx.execute(
                "INSERT INTO topics (topic_id, label, terms) VALUES (?1, ?2, ?3)
                 ON CONFLICT(topic_id) DO UPDATE SET
                    label = COALESCE(excluded.label, topics.label),
                    terms = CASE WHEN excluded.terms = '[]' THEN topics.terms
                                 ELSE excluded.terms END",
                params![tid, label, terms_json],
            )?;
            tx.execute(
                "INSERT INTO edges (source, target, edge_type, weight, provenance, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(source, target, edge_type) DO NOTHING",
                params![
                    record.bug_id,
                    tid.to_string(),
                    EdgeType::HasTopic.to_string(),
                    INFERRED_TOPIC_WEIGHT,
                    EdgeProvenance::Inferred.to_string(),
                    now.to_rfc3339(),
                ],
            )?;
        }

        // (c) developer nodes + CREATED_BY / ASSIGNED_TO edges
        if !record.creator.trim().is_empty() {
            Self::ensure_developer(&tx, &record.creator, None)?;
            Self::ensure_edge(&tx, &record.bug_id, &record.creator, EdgeType::CreatedBy, 1.0, EdgeProvenance::Explicit, now)?;
        }
        let assignee = record.effective_assignee();
        if assignee != UNASSIGNED {
            Self::ensure_developer(&tx, assignee, Some(record.last_change_time))?;
            Self::ensure_edge(&tx, &record.bug_id, assignee, EdgeType::AssignedTo, 1.0, EdgeProvenance::Explicit, now)?;
        }

        // (d) commit nodes + HAS_COMMIT (and FIXED_BY once resolved).
        // Anchors are commit refs/messages and changed file paths; both
        // derive the same deterministic node id.
        let mut commit_edges = 0;
        for commit_ref in record.commit_refs.iter().chain(&record.files_changed) {
            if commit_ref.trim().is_empty() {
                continue;
            }
            let commit_id = commit_id_for(commit_ref);
            tx.execute(
                "INSERT INTO commits (commit_id, commit_ref) VALUES (?1, ?2)
                 ON CONFLICT(commit_id) DO NOTHING",
                params![commit_id, commit_ref],
            )?;
            Self::ensure_edge(&tx, &record.bug_id, &commit_id, EdgeType::HasCommit, 1.0, EdgeProvenance::Explicit, now)?;
            if record.is_resolved_fixed() {
                Self::ensure_edge(&tx, &record.bug_id, &commit_id, EdgeType::FixedBy, 1.0, EdgeProvenance::Explicit, now)?;
            }
            commit_edges += 1;
        }

        // (e) placeholder bugs + DEPENDS_ON edges
        let mut depends_on_edges = 0;
        for dep in &record.depends_on {
            if dep.trim().is_empty() || dep == &record.bug_id {
                continue;
            }
            Self::ensure_placeholder_bug(&tx, dep)?;
            Self::ensure_edge(&tx, &record.bug_id, dep, EdgeType::DependsOn, 1.0, EdgeProvenance::Explicit, now)?;
            depends_on_edges += 1;
        }

        // (f) one scored relation edge per similarity candidate
        let mut similar_edges = 0;
        let mut duplicate_edges = 0;
        for cand in candidates {
            if cand.bug_id == record.bug_id {
                // The historical index can contain this bug on re-ingestion
                continue;
            }
            Self::ensure_placeholder_bug(&tx, &cand.bug_id)?;
            let edge_type = cand.relation.edge_type();
            tx.execute(
                "INSERT INTO edges (source, target, edge_type, weight, provenance, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(source, target, edge_type) DO UPDATE SET
                    weight = excluded.weight, provenance = excluded.provenance",
                params![
                    record.bug_id,
                    cand.bug_id,
                    edge_type.to_string(),
                    cand.score,
                    EdgeProvenance::Inferred.to_string(),
                    now.to_rfc3339(),
                ],
            )?;
            match edge_type {
                EdgeType::DuplicateOf => duplicate_edges += 1,
                _ => similar_edges += 1,
            }
        }

        // (g) explicit duplicate-of wins over anything similarity derived
        if let Some(dup) = &record.duplicate_of {
            Self::ensure_placeholder_bug(&tx, dup)?;
            tx.execute(
                "INSERT INTO edges (source, target, edge_type, weight, provenance, created_at)
                 VALUES (?1, ?2, ?3, 1.0, ?4, ?5)
                 ON CONFLICT(source, target, edge_type) DO UPDATE SET
                    weight = 1.0, provenance = excluded.provenance",
                params![
                    record.bug_id,
                    dup,
                    EdgeType::DuplicateOf.to_string(),
                    EdgeProvenance::Explicit.to_string(),
                    now.to_rfc3339(),
                ],
            )?;
            duplicate_edges += 1;
        }

        tx.commit()?;

        Ok(UpsertSummary {
            bug_id: record.bug_id.clone(),
            created,
            primary_topic,
            similar_edges,
            duplicate_edges,
            depends_on_edges,
            commit_edges,
        })
    }

    fn ensure_developer(
        tx: &rusqlite::Transaction<'_>,
        dev_id: &str,
        active_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        // RFC 3339 strings in a fixed offset compare lexicographically,
        // so MAX keeps the latest activity timestamp.
        tx.execute(
            "INSERT INTO developers (dev_id, last_active_at) VALUES (?1, ?2)
             ON CONFLICT(dev_id) DO UPDATE SET
                last_active_at = MAX(COALESCE(developers.last_active_at, ''),
                                     COALESCE(excluded.last_active_at,
                                              COALESCE(developers.last_active_at, '')))",
            params![dev_id, active_at.map(|t| t.to_rfc3339())],
        )?;
        Ok(())
    }

    fn ensure_placeholder_bug(tx: &rusqlite::Transaction<'_>, bug_id: &str) -> Result<()> {
        tx.execute(
            "INSERT INTO bugs (bug_id, placeholder) VALUES (?1, 1)
             ON CONFLICT(bug_id) DO NOTHING",
            params![bug_id],
        )?;
        Ok(())
    }

    fn ensure_edge(
        tx: &rusqlite::Transaction<'_>,
        source: &str,
        target: &str,
        edge_type: EdgeType,
        weight: f64,
        provenance: EdgeProvenance,
        now: DateTime<Utc>,
    ) -> Result<()> {
        tx.execute(
            "INSERT INTO edges (source, target, edge_type, weight, provenance, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(source, target, edge_type) DO NOTHING",
            params![
                source,
                target,
                edge_type.to_string(),
                weight,
                provenance.to_string(),
                now.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // === Feedback loop ===

    /// Apply one relevance judgment to a (bug, topic) association.
    ///
    /// Relevant: ensure the topic node and HAS_TOPIC edge exist, then
    /// atomically increment the weight. Not relevant: the edge must exist
    /// (else `NotFound`); atomically decrement, pruning the edge when the
    /// weight falls to -2 or below. Either way the bug's primary topic is
    /// recomputed from the remaining edges.
    pub fn submit_feedback(
        &mut self,
        bug_id: &str,
        topic_id: i64,
        is_relevant: bool,
    ) -> Result<FeedbackEffect> {
        self.submit_feedback_inner(bug_id, topic_id, is_relevant)
            .map_err(map_transient)
    }

    fn submit_feedback_inner(
        &mut self,
        bug_id: &str,
        topic_id: i64,
        is_relevant: bool,
    ) -> Result<FeedbackEffect> {
        let now = Utc::now();
        let tx = self.conn.transaction()?;

        let old_primary: Option<i64> = tx
            .query_row(
                "SELECT primary_topic FROM bugs WHERE bug_id = ?1",
                params![bug_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("bug not found: {}", bug_id)))?;

        let topic_key = topic_id.to_string();
        let edge_filter = params![bug_id, topic_key, EdgeType::HasTopic.to_string()];

        let (action, old_weight, new_weight, edge_deleted) = if is_relevant {
            tx.execute(
                "INSERT INTO topics (topic_id) VALUES (?1)
                 ON CONFLICT(topic_id) DO NOTHING",
                params![topic_id],
            )?;
            tx.execute(
                "INSERT INTO edges (source, target, edge_type, weight, provenance, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(source, target, edge_type) DO NOTHING",
                params![
                    bug_id,
                    topic_key,
                    EdgeType::HasTopic.to_string(),
                    FEEDBACK_TOPIC_WEIGHT,
                    EdgeProvenance::Feedback.to_string(),
                    now.to_rfc3339(),
                ],
            )?;
            // Atomic in-store increment; never a read-then-write from here
            let new_weight: f64 = tx.query_row(
                "UPDATE edges SET weight = weight + 1
                 WHERE source = ?1 AND target = ?2 AND edge_type = ?3
                 RETURNING weight",
                edge_filter,
                |row| row.get(0),
            )?;
            (
                FeedbackAction::IncreaseWeight,
                new_weight - 1.0,
                new_weight,
                false,
            )
        } else {
            let new_weight: f64 = tx
                .query_row(
                    "UPDATE edges SET weight = weight - 1
                     WHERE source = ?1 AND target = ?2 AND edge_type = ?3
                     RETURNING weight",
                    edge_filter,
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| {
                    Error::NotFound(format!(
                        "has_topic edge not found: bug {} topic {}",
                        bug_id, topic_id
                    ))
                })?;
            let mut deleted = false;
            if new_weight <= TOPIC_PRUNE_WEIGHT {
                tx.execute(
                    "DELETE FROM edges
                     WHERE source = ?1 AND target = ?2 AND edge_type = ?3",
                    edge_filter,
                )?;
                deleted = true;
            }
            (
                FeedbackAction::DecreaseWeight,
                new_weight + 1.0,
                new_weight,
                deleted,
            )
        };

        // Recompute primary topic from the remaining HAS_TOPIC edges;
        // no edges left means the primary stays as it was.
        let best: Option<i64> = tx
            .query_row(
                "SELECT CAST(target AS INTEGER) FROM edges
                 WHERE source = ?1 AND edge_type = ?2
                 ORDER BY weight DESC, CAST(target AS INTEGER) ASC
                 LIMIT 1",
                params![bug_id, EdgeType::HasTopic.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(tid) = best {
            tx.execute(
                "UPDATE bugs SET primary_topic = ?2 WHERE bug_id = ?1",
                params![bug_id, tid],
            )?;
        }
        let new_primary = best.or(old_primary);

        tx.commit()?;

        Ok(FeedbackEffect {
            bug_id: bug_id.to_string(),
            topic_id,
            action,
            old_weight: old_weight as i64,
            new_weight: new_weight as i64,
            edge_deleted,
            old_primary_topic: old_primary,
            new_primary_topic: new_primary,
        })
    }

    // === Reads ===

    pub fn get_bug(&self, bug_id: &str) -> Result<Bug> {
        self.get_bug_opt(bug_id)?
            .ok_or_else(|| Error::NotFound(format!("bug not found: {}", bug_id)))
    }

    pub fn get_bug_opt(&self, bug_id: &str) -> Result<Option<Bug>> {
        let bug = self
            .conn
            .query_row(
                &format!("{} WHERE bug_id = ?1", SELECT_BUG),
                params![bug_id],
                row_to_bug,
            )
            .optional()?;
        Ok(bug)
    }

    pub fn list_bugs(&self, limit: usize, offset: usize) -> Result<Vec<Bug>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE placeholder = 0 ORDER BY bug_id LIMIT ?1 OFFSET ?2",
            SELECT_BUG
        ))?;
        let bugs = stmt
            .query_map(params![limit as i64, offset as i64], row_to_bug)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bugs)
    }

    /// Free-text search over summaries: score = number of distinct query
    /// terms the summary contains; ties broken by newest creation time.
    pub fn search_bugs(&self, terms: &[String], limit: usize) -> Result<Vec<(Bug, f64)>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE placeholder = 0", SELECT_BUG))?;
        let bugs = stmt
            .query_map([], row_to_bug)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut scored: Vec<(Bug, f64)> = bugs
            .into_iter()
            .filter_map(|bug| {
                let summary = bug.summary.to_lowercase();
                let hits = terms.iter().filter(|t| summary.contains(t.as_str())).count();
                if hits > 0 {
                    Some((bug, hits as f64))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.0.creation_time.cmp(&a.0.creation_time))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    pub fn list_topics(&self) -> Result<Vec<Topic>> {
        let mut stmt = self
            .conn
            .prepare("SELECT topic_id, label, terms FROM topics ORDER BY topic_id")?;
        let topics = stmt
            .query_map([], |row| {
                let terms_json: String = row.get(2)?;
                Ok(Topic {
                    topic_id: row.get(0)?,
                    label: row.get(1)?,
                    terms: serde_json::from_str(&terms_json).unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(topics)
    }

    pub fn list_developers(&self) -> Result<Vec<Developer>> {
        let mut stmt = self
            .conn
            .prepare("SELECT dev_id, last_active_at FROM developers ORDER BY dev_id")?;
        let devs = stmt
            .query_map([], |row| {
                let active: Option<String> = row.get(1)?;
                Ok(Developer {
                    dev_id: row.get(0)?,
                    last_active_at: active.and_then(|s| parse_rfc3339(&s)),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(devs)
    }

    pub fn get_developer(&self, dev_id: &str) -> Result<Option<Developer>> {
        let dev = self
            .conn
            .query_row(
                "SELECT dev_id, last_active_at FROM developers WHERE dev_id = ?1",
                params![dev_id],
                |row| {
                    let active: Option<String> = row.get(1)?;
                    Ok(Developer {
                        dev_id: row.get(0)?,
                        last_active_at: active.and_then(|s| parse_rfc3339(&s)),
                    })
                },
            )
            .optional()?;
        Ok(dev)
    }

    /// Outgoing edges of the given types from one node.
    pub fn outgoing_edges(&self, source: &str, types: &[EdgeType]) -> Result<Vec<Edge>> {
        let mut edges = Vec::new();
        for t in types {
            let mut stmt = self.conn.prepare(
                "SELECT source, target, edge_type, weight, provenance, created_at
                 FROM edges WHERE source = ?1 AND edge_type = ?2
                 ORDER BY weight DESC, target",
            )?;
            let found = stmt
                .query_map(params![source, t.to_string()], row_to_edge)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            edges.extend(found);
        }
        Ok(edges)
    }

    /// Count edges per (source, target, type) - used by idempotency tests
    /// and `tg doctor`-style introspection.
    pub fn edge_count(&self, source: &str, target: &str, edge_type: EdgeType) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM edges
             WHERE source = ?1 AND target = ?2 AND edge_type = ?3",
            params![source, target, edge_type.to_string()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn count_bugs(&self) -> Result<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM bugs WHERE placeholder = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Non-placeholder bugs carrying a HAS_TOPIC edge to the given topic.
    pub fn bugs_with_topic(&self, topic_id: i64) -> Result<Vec<Bug>> {
        let mut stmt = self.conn.prepare(&format!(
            "{} WHERE placeholder = 0 AND bug_id IN (
                SELECT source FROM edges WHERE edge_type = ?1 AND target = ?2)
             ORDER BY bug_id",
            SELECT_BUG
        ))?;
        let bugs = stmt
            .query_map(
                params![EdgeType::HasTopic.to_string(), topic_id.to_string()],
                row_to_bug,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(bugs)
    }

    /// Every (resolved-fixed bug with a topic, credited assignee) pair.
    pub fn resolved_pairs(&self) -> Result<Vec<ResolvedPair>> {
        let mut stmt = self.conn.prepare(
            "SELECT b.bug_id, e.target, b.primary_topic, b.component
             FROM bugs b
             JOIN edges e ON e.source = b.bug_id AND e.edge_type = ?1
             WHERE b.status = ?2 AND b.resolution = ?3
               AND b.primary_topic IS NOT NULL AND e.target <> ?4
             ORDER BY b.bug_id, e.target",
        )?;
        let pairs = stmt
            .query_map(
                params![
                    EdgeType::AssignedTo.to_string(),
                    crate::models::STATUS_RESOLVED,
                    crate::models::RESOLUTION_FIXED,
                    UNASSIGNED,
                ],
                |row| {
                    Ok(ResolvedPair {
                        bug_id: row.get(0)?,
                        dev_id: row.get(1)?,
                        topic_id: row.get(2)?,
                        component: row.get(3)?,
                    })
                },
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(pairs)
    }

    /// Per-topic resolved counts for one developer, with shares.
    pub fn developer_topics(&self, dev_id: &str) -> Result<Vec<DeveloperTopicShare>> {
        let pairs = self.resolved_pairs()?;
        let mut per_topic: std::collections::BTreeMap<i64, u64> = Default::default();
        let mut total = 0u64;
        for p in pairs.iter().filter(|p| p.dev_id == dev_id) {
            *per_topic.entry(p.topic_id).or_insert(0) += 1;
            total += 1;
        }
        Ok(per_topic
            .into_iter()
            .map(|(topic_id, n)| DeveloperTopicShare {
                topic_id,
                bugs_fixed_topic: n,
                topic_share: if total > 0 { n as f64 / total as f64 } else { 0.0 },
            })
            .collect())
    }

    // === Training run bookkeeping ===

    /// Claim exclusive training for this tenant.
    ///
    /// Refuses with `TrainingInProgress` when another run is still in the
    /// `running` state; the check and the insert share one immediate
    /// transaction so two concurrent starts cannot both win.
    pub fn claim_training_run(&mut self, run_id: &str) -> Result<()> {
        let tx = self
            .conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        let running: Option<String> = tx
            .query_row(
                "SELECT run_id FROM training_runs WHERE status = 'running' LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing) = running {
            return Err(Error::TrainingInProgress(existing));
        }
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO training_runs (run_id, status, stage, progress, message,
                started_at, updated_at)
             VALUES (?1, 'running', 'starting', 0, 'Training starting', ?2, ?2)",
            params![run_id, now],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Incremental progress update for a running training run.
    pub fn update_training_run(
        &mut self,
        run_id: &str,
        stage: &str,
        progress: u8,
        message: &str,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE training_runs SET stage = ?2, progress = ?3, message = ?4,
                updated_at = ?5
             WHERE run_id = ?1",
            params![
                run_id,
                stage,
                progress.min(100) as i64,
                message,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    /// Mark a run terminal.
    pub fn finish_training_run(
        &mut self,
        run_id: &str,
        status: RunStatus,
        model_version: Option<u32>,
        failure_reason: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let progress = if status == RunStatus::Completed { 100 } else { -1 };
        self.conn.execute(
            "UPDATE training_runs SET status = ?2, finished_at = ?3, updated_at = ?3,
                model_version = ?4, failure_reason = ?5,
                progress = CASE WHEN ?6 >= 0 THEN ?6 ELSE progress END
             WHERE run_id = ?1",
            params![
                run_id,
                status.to_string(),
                now,
                model_version,
                failure_reason,
                progress,
            ],
        )?;
        Ok(())
    }

    /// Best-effort progress-log append; failures are reported to the
    /// caller who logs and continues.
    pub fn append_training_log(&mut self, run_id: &str, message: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO training_log (run_id, logged_at, message) VALUES (?1, ?2, ?3)",
            params![run_id, Utc::now().to_rfc3339(), message],
        )?;
        Ok(())
    }

    /// Fetch a run by id, or the most recently started one.
    pub fn get_training_run(&self, run_id: Option<&str>) -> Result<TrainingRun> {
        let (sql, bind): (&str, Vec<String>) = match run_id {
            Some(id) => (
                "SELECT run_id, status, stage, progress, message, started_at,
                    updated_at, finished_at, model_version, failure_reason
                 FROM training_runs WHERE run_id = ?1",
                vec![id.to_string()],
            ),
            None => (
                "SELECT run_id, status, stage, progress, message, started_at,
                    updated_at, finished_at, model_version, failure_reason
                 FROM training_runs ORDER BY started_at DESC LIMIT 1",
                vec![],
            ),
        };
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            bind.iter().map(|p| p as &dyn rusqlite::ToSql).collect();
        self.conn
            .query_row(sql, params_refs.as_slice(), row_to_training_run)
            .optional()?
            .ok_or_else(|| Error::NotFound("no training run recorded".into()))
    }
}

const SELECT_BUG: &str = "SELECT bug_id, summary, status, resolution, product, component,
    creator, assignee, creation_time, last_change_time, keywords,
    primary_topic, topic_distribution, placeholder FROM bugs";

fn row_to_bug(row: &rusqlite::Row<'_>) -> rusqlite::Result<Bug> {
    let creation: Option<String> = row.get(8)?;
    let changed: Option<String> = row.get(9)?;
    let keywords_json: String = row.get(10)?;
    let dist_json: String = row.get(12)?;
    let placeholder: i64 = row.get(13)?;
    Ok(Bug {
        bug_id: row.get(0)?,
        summary: row.get(1)?,
        status: row.get(2)?,
        resolution: row.get(3)?,
        product: row.get(4)?,
        component: row.get(5)?,
        creator: row.get(6)?,
        assignee: row.get(7)?,
        creation_time: creation
            .and_then(|s| parse_rfc3339(&s))
            .unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH),
        last_change_time: changed
            .and_then(|s| parse_rfc3339(&s))
            .unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH),
        keywords: serde_json::from_str(&keywords_json).unwrap_or_default(),
        primary_topic: row.get(11)?,
        topic_distribution: TopicDistribution(serde_json::from_str(&dist_json).unwrap_or_default()),
        placeholder: placeholder != 0,
    })
}

fn row_to_edge(row: &rusqlite::Row<'_>) -> rusqlite::Result<Edge> {
    let edge_type: String = row.get(2)?;
    let provenance: String = row.get(4)?;
    let created: String = row.get(5)?;
    Ok(Edge {
        source: row.get(0)?,
        target: row.get(1)?,
        edge_type: EdgeType::from_str(&edge_type).unwrap_or(EdgeType::SimilarTo),
        weight: row.get(3)?,
        provenance: EdgeProvenance::from_str(&provenance).unwrap_or(EdgeProvenance::Inferred),
        created_at: parse_rfc3339(&created).unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH),
    })
}

fn row_to_training_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<TrainingRun> {
    let status: String = row.get(1)?;
    let started: String = row.get(5)?;
    let updated: String = row.get(6)?;
    let finished: Option<String> = row.get(7)?;
    let progress: i64 = row.get(3)?;
    Ok(TrainingRun {
        run_id: row.get(0)?,
        status: RunStatus::from_str(&status).unwrap_or(RunStatus::Failed),
        stage: row.get(2)?,
        progress: progress.clamp(0, 100) as u8,
        message: row.get(4)?,
        started_at: parse_rfc3339(&started).unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH),
        updated_at: parse_rfc3339(&updated).unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH),
        finished_at: finished.and_then(|s| parse_rfc3339(&s)),
        model_version: row.get::<_, Option<i64>>(8)?.map(|v| v as u32),
        failure_reason: row.get(9)?,
    })
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Deterministic commit id: first 12 hex chars of SHA-256 over the ref.
///
/// No timestamp salt - re-ingesting the same reference must yield the
/// same node.
pub fn commit_id_for(commit_ref: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(commit_ref.trim().as_bytes());
    let hash = hasher.finalize();
    let hex = format!("{:x}", hash);
    hex[..12].to_string()
}

/// Map SQLITE_BUSY/LOCKED database errors onto the retryable taxonomy arm.
fn map_transient(err: Error) -> Error {
    match err {
        Error::Database(rusqlite::Error::SqliteFailure(f, msg)) => {
            use rusqlite::ErrorCode;
            if matches!(f.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) {
                Error::TransientStore(msg.unwrap_or_else(|| "database busy".into()))
            } else {
                Error::Database(rusqlite::Error::SqliteFailure(f, msg))
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RelationKind;
    use crate::test_utils::TestEnv;
    use chrono::TimeZone;

    fn record(bug_id: &str, summary: &str) -> BugRecord {
        BugRecord {
            bug_id: bug_id.into(),
            summary: summary.into(),
            status: "NEW".into(),
            resolution: String::new(),
            product: "Core".into(),
            component: "Graphics".into(),
            creator: "reporter@example.com".into(),
            assignee: "dev_a@example.com".into(),
            creation_time: Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap(),
            last_change_time: Utc.with_ymd_and_hms(2026, 2, 2, 9, 0, 0).unwrap(),
            keywords: vec!["crash".into()],
            depends_on: vec![],
            commit_refs: vec![],
            files_changed: vec![],
            duplicate_of: None,
        }
    }

    fn resolved(bug_id: &str, assignee: &str, topic: i64) -> (BugRecord, TopicDistribution) {
        let mut r = record(bug_id, &format!("resolved bug {}", bug_id));
        r.status = "RESOLVED".into();
        r.resolution = "FIXED".into();
        r.assignee = assignee.into();
        (r, TopicDistribution(vec![(topic, 1.0)]))
    }

    fn dist(topic: i64) -> TopicDistribution {
        TopicDistribution(vec![(topic, 0.7), (topic + 1, 0.3)])
    }

    #[test]
    fn test_upsert_creates_bug_and_neighbors() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();

        let summary = storage
            .upsert_bug(&record("b1", "Crash on resize"), &dist(3), &[], None)
            .unwrap();
        assert!(summary.created);
        assert_eq!(summary.primary_topic, Some(3));

        let bug = storage.get_bug("b1").unwrap();
        assert_eq!(bug.summary, "Crash on resize");
        assert_eq!(bug.primary_topic, Some(3));
        assert!(!bug.placeholder);

        assert_eq!(storage.edge_count("b1", "3", EdgeType::HasTopic).unwrap(), 1);
        assert_eq!(
            storage
                .edge_count("b1", "dev_a@example.com", EdgeType::AssignedTo)
                .unwrap(),
            1
        );
        assert_eq!(
            storage
                .edge_count("b1", "reporter@example.com", EdgeType::CreatedBy)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_reingestion_is_idempotent() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let r = record("b1", "Crash on resize");

        storage.upsert_bug(&r, &dist(3), &[], None).unwrap();
        let second = storage.upsert_bug(&r, &dist(3), &[], None).unwrap();
        assert!(!second.created);

        assert_eq!(storage.count_bugs().unwrap(), 1);
        assert_eq!(storage.edge_count("b1", "3", EdgeType::HasTopic).unwrap(), 1);
        assert_eq!(
            storage
                .edge_count("b1", "dev_a@example.com", EdgeType::AssignedTo)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_reingestion_updates_mutable_fields_only() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let mut r = record("b1", "Original summary");
        storage.upsert_bug(&r, &dist(3), &[], None).unwrap();

        r.summary = "Updated summary".into();
        r.status = "RESOLVED".into();
        r.resolution = "FIXED".into();
        r.creator = "imposter@example.com".into();
        r.creation_time = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        storage.upsert_bug(&r, &dist(3), &[], None).unwrap();

        let bug = storage.get_bug("b1").unwrap();
        assert_eq!(bug.summary, "Updated summary");
        assert_eq!(bug.status, "RESOLVED");
        // Creator and creation time are set once
        assert_eq!(bug.creator, "reporter@example.com");
        assert_eq!(
            bug.creation_time,
            Utc.with_ymd_and_hms(2026, 2, 1, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_depends_on_creates_placeholder() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let mut r = record("b1", "Needs other work first");
        r.depends_on = vec!["b99".into()];
        storage.upsert_bug(&r, &dist(1), &[], None).unwrap();

        assert_eq!(storage.edge_count("b1", "b99", EdgeType::DependsOn).unwrap(), 1);
        let placeholder = storage.get_bug_opt("b99").unwrap().unwrap();
        assert!(placeholder.placeholder);
        // Placeholders are not listed as real bugs
        assert_eq!(storage.count_bugs().unwrap(), 1);
    }

    #[test]
    fn test_placeholder_promotion_keeps_real_creator() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let mut r = record("b1", "Has a dependency");
        r.depends_on = vec!["b2".into()];
        storage.upsert_bug(&r, &dist(1), &[], None).unwrap();

        let real = record("b2", "The dependency itself");
        storage.upsert_bug(&real, &dist(2), &[], None).unwrap();

        let bug = storage.get_bug("b2").unwrap();
        assert!(!bug.placeholder);
        assert_eq!(bug.creator, "reporter@example.com");
        assert_eq!(bug.summary, "The dependency itself");
        assert_eq!(storage.count_bugs().unwrap(), 2);
    }

    #[test]
    fn test_similarity_candidates_create_scored_edges() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let candidates = vec![
            SimilarityCandidate {
                bug_id: "old1".into(),
                score: 0.91,
                relation: RelationKind::Duplicate,
            },
            SimilarityCandidate {
                bug_id: "old2".into(),
                score: 0.65,
                relation: RelationKind::Similar,
            },
        ];
        let summary = storage
            .upsert_bug(&record("b1", "Near duplicate"), &dist(3), &candidates, None)
            .unwrap();
        assert_eq!(summary.duplicate_edges, 1);
        assert_eq!(summary.similar_edges, 1);

        let edges = storage
            .outgoing_edges("b1", &[EdgeType::DuplicateOf])
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].target, "old1");
        assert!((edges[0].weight - 0.91).abs() < 1e-9);
    }

    #[test]
    fn test_self_candidate_is_skipped() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let candidates = vec![SimilarityCandidate {
            bug_id: "b1".into(),
            score: 1.0,
            relation: RelationKind::Duplicate,
        }];
        storage
            .upsert_bug(&record("b1", "Self match"), &dist(3), &candidates, None)
            .unwrap();
        assert_eq!(storage.edge_count("b1", "b1", EdgeType::DuplicateOf).unwrap(), 0);
    }

    #[test]
    fn test_explicit_duplicate_overrides_similarity_edge() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let candidates = vec![SimilarityCandidate {
            bug_id: "old1".into(),
            score: 0.85,
            relation: RelationKind::Duplicate,
        }];
        let mut r = record("b1", "Explicitly duped");
        r.duplicate_of = Some("old1".into());
        storage.upsert_bug(&r, &dist(3), &candidates, None).unwrap();

        let edges = storage
            .outgoing_edges("b1", &[EdgeType::DuplicateOf])
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert!((edges[0].weight - 1.0).abs() < 1e-9);
        assert_eq!(edges[0].provenance, EdgeProvenance::Explicit);
    }

    #[test]
    fn test_commit_refs_create_deterministic_nodes() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (mut r, d) = resolved("b1", "dev_a@example.com", 3);
        r.commit_refs = vec!["Bug b1 - fix resize crash r=me".into()];
        storage.upsert_bug(&r, &d, &[], None).unwrap();
        storage.upsert_bug(&r, &d, &[], None).unwrap();

        let commit_id = commit_id_for("Bug b1 - fix resize crash r=me");
        assert_eq!(storage.edge_count("b1", &commit_id, EdgeType::HasCommit).unwrap(), 1);
        assert_eq!(storage.edge_count("b1", &commit_id, EdgeType::FixedBy).unwrap(), 1);
    }

    #[test]
    fn test_changed_files_anchor_commit_nodes() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (mut r, d) = resolved("b1", "dev_a@example.com", 3);
        r.commit_refs = vec!["Bug b1 - fix resize crash".into()];
        r.files_changed = vec!["gfx/layers/compositor.cpp".into()];
        let summary = storage.upsert_bug(&r, &d, &[], None).unwrap();
        assert_eq!(summary.commit_edges, 2);

        let file_commit = commit_id_for("gfx/layers/compositor.cpp");
        assert_eq!(storage.edge_count("b1", &file_commit, EdgeType::HasCommit).unwrap(), 1);
        assert_eq!(storage.edge_count("b1", &file_commit, EdgeType::FixedBy).unwrap(), 1);
    }

    #[test]
    fn test_feedback_increment_and_decrement_cycle() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        storage
            .upsert_bug(&record("b1", "Topic feedback"), &TopicDistribution::default(), &[], None)
            .unwrap();

        // Three relevant votes: edge materializes at 0 and climbs to 3
        for expected in 1..=3 {
            let fx = storage.submit_feedback("b1", 7, true).unwrap();
            assert_eq!(fx.new_weight, expected);
        }

        // Five not-relevant votes: 3 -> -2, pruned on the last one
        for expected in [2, 1, 0, -1, -2] {
            let fx = storage.submit_feedback("b1", 7, false).unwrap();
            assert_eq!(fx.new_weight, expected);
            assert_eq!(fx.edge_deleted, expected == -2);
        }

        // The pair is gone now
        match storage.submit_feedback("b1", 7, false) {
            Err(Error::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_feedback_recomputes_primary_topic() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        storage
            .upsert_bug(&record("b1", "crash"), &dist(3), &[], None)
            .unwrap();
        assert_eq!(storage.get_bug("b1").unwrap().primary_topic, Some(3));

        // Vote topic 9 up past the inferred baseline of topic 3
        storage.submit_feedback("b1", 9, true).unwrap();
        let fx = storage.submit_feedback("b1", 9, true).unwrap();
        assert_eq!(fx.new_primary_topic, Some(9));
        assert_eq!(storage.get_bug("b1").unwrap().primary_topic, Some(9));
    }

    #[test]
    fn test_feedback_tie_breaks_to_lowest_topic_id() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        storage
            .upsert_bug(&record("b1", "crash"), &TopicDistribution::default(), &[], None)
            .unwrap();
        // Both edges end up at weight 1
        storage.submit_feedback("b1", 9, true).unwrap();
        let fx = storage.submit_feedback("b1", 4, true).unwrap();
        assert_eq!(fx.new_primary_topic, Some(4));
    }

    #[test]
    fn test_feedback_primary_unchanged_when_no_edges_remain() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        storage
            .upsert_bug(&record("b1", "crash"), &dist(3), &[], None)
            .unwrap();

        // Drive the only edge to deletion
        for _ in 0..4 {
            let _ = storage.submit_feedback("b1", 3, false);
        }
        let bug = storage.get_bug("b1").unwrap();
        // No HAS_TOPIC edges remain; the stored primary stays put
        assert_eq!(bug.primary_topic, Some(3));
        assert!(storage.outgoing_edges("b1", &[EdgeType::HasTopic]).unwrap().is_empty());
    }

    #[test]
    fn test_feedback_on_missing_bug_is_not_found() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        match storage.submit_feedback("ghost", 1, true) {
            Err(Error::NotFound(_)) => {}
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_search_bugs_scores_by_term_hits() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        storage
            .upsert_bug(&record("b1", "crash when resizing window"), &dist(1), &[], None)
            .unwrap();
        storage
            .upsert_bug(&record("b2", "crash resizing and painting"), &dist(1), &[], None)
            .unwrap();
        storage
            .upsert_bug(&record("b3", "slow scrolling"), &dist(2), &[], None)
            .unwrap();

        let hits = storage
            .search_bugs(&["crash".into(), "painting".into()], 10)
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.bug_id, "b2");
        assert_eq!(hits[0].1, 2.0);
    }

    #[test]
    fn test_resolved_pairs_and_developer_topics() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        let (r1, d1) = resolved("b1", "dev_a@example.com", 3);
        let (r2, d2) = resolved("b2", "dev_a@example.com", 3);
        let (r3, d3) = resolved("b3", "dev_a@example.com", 5);
        let (r4, d4) = resolved("b4", "dev_b@example.com", 3);
        for (r, d) in [(r1, d1), (r2, d2), (r3, d3), (r4, d4)] {
            storage.upsert_bug(&r, &d, &[], None).unwrap();
        }
        // An open bug must not count
        storage
            .upsert_bug(&record("b5", "open crash"), &dist(3), &[], None)
            .unwrap();

        let pairs = storage.resolved_pairs().unwrap();
        assert_eq!(pairs.len(), 4);

        let topics = storage.developer_topics("dev_a@example.com").unwrap();
        assert_eq!(topics.len(), 2);
        let t3 = topics.iter().find(|t| t.topic_id == 3).unwrap();
        assert_eq!(t3.bugs_fixed_topic, 2);
        assert!((t3.topic_share - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_developer_last_active_tracks_latest_assignment() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        // Both change times sit after the fixture's 2026-02-01 creation
        let mut r = record("b1", "first");
        r.last_change_time = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        storage.upsert_bug(&r, &dist(1), &[], None).unwrap();

        // An older assignment ingested afterwards must not move it back
        let mut r2 = record("b2", "second");
        r2.last_change_time = Utc.with_ymd_and_hms(2026, 2, 5, 0, 0, 0).unwrap();
        storage.upsert_bug(&r2, &dist(1), &[], None).unwrap();

        let dev = storage.get_developer("dev_a@example.com").unwrap().unwrap();
        assert_eq!(
            dev.last_active_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_training_run_claim_is_exclusive() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        storage.claim_training_run("run-1").unwrap();
        match storage.claim_training_run("run-2") {
            Err(Error::TrainingInProgress(id)) => assert_eq!(id, "run-1"),
            other => panic!("expected TrainingInProgress, got {:?}", other),
        }

        storage
            .finish_training_run("run-1", RunStatus::Completed, Some(1), None)
            .unwrap();
        storage.claim_training_run("run-2").unwrap();
    }

    #[test]
    fn test_training_run_status_roundtrip() {
        let env = TestEnv::new();
        let mut storage = env.init_storage();
        storage.claim_training_run("run-1").unwrap();
        storage
            .update_training_run("run-1", "training", 60, "epoch 30/50")
            .unwrap();

        let run = storage.get_training_run(None).unwrap();
        assert_eq!(run.run_id, "run-1");
        assert_eq!(run.status, RunStatus::Running);
        assert_eq!(run.stage, "training");
        assert_eq!(run.progress, 60);

        storage
            .finish_training_run("run-1", RunStatus::Failed, None, Some("no_developers"))
            .unwrap();
        let run = storage.get_training_run(Some("run-1")).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.failure_reason.as_deref(), Some("no_developers"));
    }

    #[test]
    fn test_commit_id_is_deterministic() {
        let a = commit_id_for("Bug 42 - fix it");
        let b = commit_id_for("Bug 42 - fix it");
        let c = commit_id_for("Bug 43 - fix that");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 12);
    }
}
