//! Command implementations for the Triagraph CLI.
//!
//! Each function here is the business logic behind one `tg` subcommand:
//! it opens the tenant's storage, does the work through the library
//! modules, and returns a serializable result struct. Formatting for the
//! terminal lives in the `Output` impls; `main` only dispatches and
//! prints.

use serde::Serialize;
use std::io::Read;
use std::path::Path;

use crate::models::{
    Bug, BugRecord, Developer, Edge, FeedbackEffect, RecommendationTier, Topic, TopicDistribution,
    TrainingRun,
};
use crate::ranker::{self, RankedCandidate};
use crate::recommend::{self, FrequencyRecommendation};
use crate::similarity::{SimilarityIndex, Thresholds, DEFAULT_TOP_K, TOPIC_INDEX_FILE};
use crate::storage::{DeveloperTopicShare, Storage, UpsertSummary};
use crate::tenant::{Engine, Tenant};
use crate::training::TrainingCoordinator;
use crate::{Error, Result};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!(r#"{{"error": "{}"}}"#, e))
}

fn open(engine: &Engine, tenant: &Tenant) -> Result<Storage> {
    Storage::open_with_data_dir(tenant, engine.data_dir())
}

// === init ===

#[derive(Debug, Serialize)]
pub struct InitResult {
    pub tenant: String,
    pub data_dir: String,
    /// False when the tenant was already initialized
    pub created: bool,
}

impl Output for InitResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.created {
            format!("Initialized tenant '{}' under {}", self.tenant, self.data_dir)
        } else {
            format!("Tenant '{}' already initialized under {}", self.tenant, self.data_dir)
        }
    }
}

pub fn init(engine: &Engine, tenant: &Tenant) -> Result<InitResult> {
    let created = !Storage::exists_with_data_dir(tenant, engine.data_dir());
    Storage::init_with_data_dir(tenant, engine.data_dir())?;
    Ok(InitResult {
        tenant: tenant.slug().to_string(),
        data_dir: engine.data_dir().display().to_string(),
        created,
    })
}

// === bug ingest ===

#[derive(Debug, Serialize)]
pub struct IngestResult {
    #[serde(flatten)]
    pub summary: UpsertSummary,
    /// Topic distribution inferred for this report (possibly empty)
    pub topic_distribution: TopicDistribution,
}

impl Output for IngestResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let verb = if self.summary.created { "Created" } else { "Updated" };
        let topic = match self.summary.primary_topic {
            Some(t) => format!("topic {}", t),
            None => "no topic".to_string(),
        };
        format!(
            "{} bug {} ({}; {} similar, {} duplicate edges)",
            verb,
            self.summary.bug_id,
            topic,
            self.summary.similar_edges,
            self.summary.duplicate_edges
        )
    }
}

/// Read a bug report from a file (or stdin when none is given).
pub fn read_bug_record(file: Option<&Path>) -> Result<BugRecord> {
    let raw = match file {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let record: BugRecord = serde_json::from_str(&raw)?;
    Ok(record)
}

pub fn bug_ingest(engine: &Engine, tenant: &Tenant, record: &BugRecord) -> Result<IngestResult> {
    record.validate()?;
    let mut storage = open(engine, tenant)?;

    // Topic inference and similarity linking are best-effort: a tenant
    // without trained artifacts still gets the bug and its explicit
    // relations stored.
    let distribution = match engine.topic_models().infer(tenant, &record.summary) {
        Ok(dist) => dist,
        Err(Error::ModelUnavailable(msg)) => {
            tracing::warn!(bug_id = %record.bug_id, %msg, "ingesting without topic inference");
            TopicDistribution::default()
        }
        Err(e) => return Err(e),
    };

    let index_path = tenant.models_dir(engine.data_dir()).join(TOPIC_INDEX_FILE);
    let index = SimilarityIndex::load(&index_path, Thresholds::default())?;
    let candidates = index.nearest(&distribution, DEFAULT_TOP_K);

    let topic = distribution.main_topic().and_then(|(tid, _)| {
        let model = engine.topic_models().get(tenant).ok()?;
        let meta = model.topic_meta(tid)?;
        Some(Topic {
            topic_id: meta.topic_id,
            label: meta.label.clone(),
            terms: meta.terms.clone(),
        })
    });

    let summary = storage.upsert_bug(record, &distribution, &candidates, topic.as_ref())?;
    Ok(IngestResult {
        summary,
        topic_distribution: distribution,
    })
}

// === bug show / list / search / similar ===

#[derive(Debug, Serialize)]
pub struct BugDetail {
    #[serde(flatten)]
    pub bug: Bug,
    pub edges: Vec<Edge>,
}

impl Output for BugDetail {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = format!(
            "{}: {}\n  status: {} {}\n  component: {}/{}\n  assignee: {}",
            self.bug.bug_id,
            self.bug.summary,
            self.bug.status,
            self.bug.resolution,
            self.bug.product,
            self.bug.component,
            self.bug.assignee,
        );
        if let Some(t) = self.bug.primary_topic {
            out.push_str(&format!("\n  topic: {}", t));
        }
        for edge in &self.edges {
            out.push_str(&format!(
                "\n  {} -> {} ({:.2})",
                edge.edge_type, edge.target, edge.weight
            ));
        }
        out
    }
}

pub fn bug_show(engine: &Engine, tenant: &Tenant, bug_id: &str) -> Result<BugDetail> {
    let storage = open(engine, tenant)?;
    let bug = storage.get_bug(bug_id)?;
    let edges = storage.outgoing_edges(bug_id, crate::models::EdgeType::all())?;
    Ok(BugDetail { bug, edges })
}

#[derive(Debug, Serialize)]
pub struct BugList {
    pub count: usize,
    pub bugs: Vec<Bug>,
}

impl Output for BugList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.bugs.is_empty() {
            return "No bugs ingested".to_string();
        }
        self.bugs
            .iter()
            .map(|b| format!("{}  [{}]  {}", b.bug_id, b.status, b.summary))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn bug_list(engine: &Engine, tenant: &Tenant, limit: usize, offset: usize) -> Result<BugList> {
    let storage = open(engine, tenant)?;
    let bugs = storage.list_bugs(limit, offset)?;
    Ok(BugList {
        count: bugs.len(),
        bugs,
    })
}

#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub bug_id: String,
    pub summary: String,
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct SearchResult {
    pub query: String,
    pub hits: Vec<SearchHit>,
}

impl Output for SearchResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.hits.is_empty() {
            return format!("No bugs match '{}'", self.query);
        }
        self.hits
            .iter()
            .map(|h| format!("{:.1}  {}  {}", h.score, h.bug_id, h.summary))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn bug_search(
    engine: &Engine,
    tenant: &Tenant,
    query: &str,
    limit: usize,
) -> Result<SearchResult> {
    let storage = open(engine, tenant)?;
    let terms = crate::nlp::preprocess_query(query);
    let hits = storage
        .search_bugs(&terms, limit)?
        .into_iter()
        .map(|(bug, score)| SearchHit {
            bug_id: bug.bug_id,
            summary: bug.summary,
            score,
        })
        .collect();
    Ok(SearchResult {
        query: query.to_string(),
        hits,
    })
}

#[derive(Debug, Serialize)]
pub struct SimilarResult {
    pub bug_id: String,
    pub neighbors: Vec<Edge>,
}

impl Output for SimilarResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.neighbors.is_empty() {
            return format!("No similarity neighbors for {}", self.bug_id);
        }
        self.neighbors
            .iter()
            .map(|e| format!("{}  {}  {:.3}", e.edge_type, e.target, e.weight))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn bug_similar(engine: &Engine, tenant: &Tenant, bug_id: &str) -> Result<SimilarResult> {
    let storage = open(engine, tenant)?;
    storage.get_bug(bug_id)?;
    let neighbors = storage.outgoing_edges(
        bug_id,
        &[
            crate::models::EdgeType::SimilarTo,
            crate::models::EdgeType::DuplicateOf,
        ],
    )?;
    Ok(SimilarResult {
        bug_id: bug_id.to_string(),
        neighbors,
    })
}

// === topics ===

#[derive(Debug, Serialize)]
pub struct InferResult {
    pub distribution: TopicDistribution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_topic: Option<i64>,
}

impl Output for InferResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        match self.main_topic {
            Some(t) => {
                let parts: Vec<String> = self
                    .distribution
                    .0
                    .iter()
                    .map(|(tid, p)| format!("{}:{:.3}", tid, p))
                    .collect();
                format!("topic {} ({})", t, parts.join(", "))
            }
            None => "no topic inferred".to_string(),
        }
    }
}

pub fn topic_infer(engine: &Engine, tenant: &Tenant, text: &str) -> Result<InferResult> {
    let distribution = engine.topic_models().infer(tenant, text)?;
    let main_topic = distribution.main_topic().map(|(tid, _)| tid);
    Ok(InferResult {
        distribution,
        main_topic,
    })
}

#[derive(Debug, Serialize)]
pub struct TopicList {
    pub topics: Vec<Topic>,
}

impl Output for TopicList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.topics.is_empty() {
            return "No topics referenced yet".to_string();
        }
        self.topics
            .iter()
            .map(|t| {
                let label = t.label.as_deref().unwrap_or("-");
                format!("{}  {}  [{}]", t.topic_id, label, t.terms.join(", "))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn topic_list(engine: &Engine, tenant: &Tenant) -> Result<TopicList> {
    let storage = open(engine, tenant)?;
    Ok(TopicList {
        topics: storage.list_topics()?,
    })
}

// === developers ===

#[derive(Debug, Serialize)]
pub struct DevList {
    pub developers: Vec<Developer>,
}

impl Output for DevList {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.developers.is_empty() {
            return "No developers known yet".to_string();
        }
        self.developers
            .iter()
            .map(|d| match d.last_active_at {
                Some(t) => format!("{}  (active {})", d.dev_id, t.format("%Y-%m-%d")),
                None => d.dev_id.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn dev_list(engine: &Engine, tenant: &Tenant) -> Result<DevList> {
    let storage = open(engine, tenant)?;
    Ok(DevList {
        developers: storage.list_developers()?,
    })
}

#[derive(Debug, Serialize)]
pub struct DevTopics {
    pub dev_id: String,
    pub topics: Vec<DeveloperTopicShare>,
}

impl Output for DevTopics {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.topics.is_empty() {
            return format!("{} has no resolved fixes on record", self.dev_id);
        }
        self.topics
            .iter()
            .map(|t| {
                format!(
                    "topic {}: {} fixed ({:.0}%)",
                    t.topic_id,
                    t.bugs_fixed_topic,
                    t.topic_share * 100.0
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub fn dev_topics(engine: &Engine, tenant: &Tenant, dev_id: &str) -> Result<DevTopics> {
    let storage = open(engine, tenant)?;
    if storage.get_developer(dev_id)?.is_none() {
        return Err(Error::NotFound(format!("developer not found: {}", dev_id)));
    }
    Ok(DevTopics {
        dev_id: dev_id.to_string(),
        topics: storage.developer_topics(dev_id)?,
    })
}

// === recommendation ===

impl Output for FrequencyRecommendation {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.recommendations.is_empty() {
            return format!("No developers to recommend for '{}'", self.query);
        }
        let tier = match self.tier {
            RecommendationTier::SimilarityNeighbors => "similarity neighbors",
            RecommendationTier::DirectAssignees => "direct assignees",
            RecommendationTier::TopicFrequency => "topic frequency",
        };
        let mut out = format!("via {}:", tier);
        for r in &self.recommendations {
            out.push_str(&format!(
                "\n  {}  score {:.2} ({} bugs)",
                r.dev_id, r.score, r.evidence_count
            ));
        }
        out
    }
}

/// Target of a frequency recommendation: free text or an ingested bug.
#[derive(Debug)]
pub enum FrequencyTarget<'a> {
    Query(&'a str),
    Bug(&'a str),
}

pub fn recommend_frequency(
    engine: &Engine,
    tenant: &Tenant,
    target: FrequencyTarget<'_>,
    limit: usize,
) -> Result<FrequencyRecommendation> {
    let storage = open(engine, tenant)?;
    match target {
        FrequencyTarget::Query(query) => recommend::recommend_for_query(&storage, query, limit),
        FrequencyTarget::Bug(bug_id) => recommend::recommend_for_bug(&storage, bug_id, limit),
    }
}

#[derive(Debug, Serialize)]
pub struct RankResult {
    pub bug_id: String,
    pub model_version: u32,
    pub candidates: Vec<RankedCandidate>,
}

impl Output for RankResult {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        if self.candidates.is_empty() {
            return format!("No ranked candidates for bug {}", self.bug_id);
        }
        let mut out = format!("ranker v{}:", self.model_version);
        for c in &self.candidates {
            out.push_str(&format!("\n  {}  score {:.3}", c.dev_id, c.score));
        }
        out
    }
}

/// Result of `recommend rank`: ranked candidates, or the frequency
/// fallback when no trained model exists and `--fallback` was given.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum RankOutput {
    Ranked(RankResult),
    Fallback(FrequencyRecommendation),
}

impl Output for RankOutput {
    fn to_json(&self) -> String {
        match self {
            RankOutput::Ranked(r) => r.to_json(),
            RankOutput::Fallback(f) => f.to_json(),
        }
    }

    fn to_human(&self) -> String {
        match self {
            RankOutput::Ranked(r) => r.to_human(),
            RankOutput::Fallback(f) => f.to_human(),
        }
    }
}

pub fn recommend_rank(
    engine: &Engine,
    tenant: &Tenant,
    bug_id: &str,
    limit: usize,
    fallback: bool,
) -> Result<RankOutput> {
    let storage = open(engine, tenant)?;
    match engine.rankers().get(tenant) {
        Ok(model) => {
            let candidates = ranker::rank_for_bug(&storage, &model, bug_id, limit)?;
            Ok(RankOutput::Ranked(RankResult {
                bug_id: bug_id.to_string(),
                model_version: model.version,
                candidates,
            }))
        }
        Err(Error::ModelUnavailable(msg)) if fallback => {
            tracing::info!(%bug_id, %msg, "no trained ranker, using frequency fallback");
            let result = recommend::recommend_for_bug(&storage, bug_id, limit)?;
            Ok(RankOutput::Fallback(result))
        }
        Err(e) => Err(e),
    }
}

// === feedback ===

impl Output for FeedbackEffect {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = format!(
            "bug {} topic {}: weight {} -> {}",
            self.bug_id, self.topic_id, self.old_weight, self.new_weight
        );
        if self.edge_deleted {
            out.push_str(" (edge pruned)");
        }
        if self.old_primary_topic != self.new_primary_topic {
            out.push_str(&format!(
                " (primary topic {:?} -> {:?})",
                self.old_primary_topic, self.new_primary_topic
            ));
        }
        out
    }
}

pub fn feedback(
    engine: &Engine,
    tenant: &Tenant,
    bug_id: &str,
    topic_id: i64,
    is_relevant: bool,
) -> Result<FeedbackEffect> {
    let mut storage = open(engine, tenant)?;
    storage.submit_feedback(bug_id, topic_id, is_relevant)
}

// === training ===

impl Output for TrainingRun {
    fn to_json(&self) -> String {
        json(self)
    }

    fn to_human(&self) -> String {
        let mut out = format!(
            "run {}: {} [{}] {}% - {}",
            self.run_id, self.status, self.stage, self.progress, self.message
        );
        if let Some(v) = self.model_version {
            out.push_str(&format!(" (model v{})", v));
        }
        if let Some(reason) = &self.failure_reason {
            out.push_str(&format!(" (reason: {})", reason));
        }
        out
    }
}

/// Start a training run and wait for it to finish.
///
/// The run still goes through the claimed/polled lifecycle, so
/// `tg train status` from another terminal observes its progress; the
/// returned record is the terminal state.
pub fn train_start(engine: &Engine, tenant: &Tenant) -> Result<TrainingRun> {
    let coordinator =
        TrainingCoordinator::new(engine.data_dir().to_path_buf(), engine.rankers().clone());
    let handle = coordinator.spawn(tenant)?;
    let run_id = handle.run_id.clone();
    handle.join();

    let storage = open(engine, tenant)?;
    storage.get_training_run(Some(&run_id))
}

pub fn train_status(
    engine: &Engine,
    tenant: &Tenant,
    run_id: Option<&str>,
) -> Result<TrainingRun> {
    let storage = open(engine, tenant)?;
    storage.get_training_run(run_id)
}
