//! Data models for Triagraph entities.
//!
//! This module defines the typed records persisted to the per-tenant graph:
//! - `BugRecord` - validated ingestion payload for a bug report
//! - `Bug` - bug node as stored, including inferred topic fields
//! - `Topic`, `Developer`, `Commit` - lazily created neighbor nodes
//! - `Edge` - first-class relation with weight and provenance
//!
//! Every write goes through these structs; arbitrary property bags are
//! deliberately not representable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Sentinel assignee meaning "nobody owns this bug yet".
///
/// Recommenders must never surface it as a candidate.
pub const UNASSIGNED: &str = "unassigned";

/// Bug status value marking a resolved report.
pub const STATUS_RESOLVED: &str = "RESOLVED";

/// Resolution value crediting the assignee with the fix.
pub const RESOLUTION_FIXED: &str = "FIXED";

/// Validated ingestion payload for one bug report.
///
/// Identity fields are required; list fields and `duplicate_of` are
/// optional. Re-ingesting the same `bug_id` updates the mutable subset of
/// the stored node (see `Storage::upsert_bug`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BugRecord {
    /// Natural key, unique per tenant (e.g. a Bugzilla id as string)
    pub bug_id: String,

    /// One-line report summary; the text topic inference runs on
    pub summary: String,

    pub status: String,

    /// Empty string while the bug is still open
    #[serde(default)]
    pub resolution: String,

    pub product: String,

    pub component: String,

    /// Reporter email; set once on first creation, never overwritten
    pub creator: String,

    /// Assignee email, or `UNASSIGNED`
    pub assignee: String,

    pub creation_time: DateTime<Utc>,

    pub last_change_time: DateTime<Utc>,

    #[serde(default)]
    pub keywords: Vec<String>,

    /// Explicit dependency ids from the upstream tracker
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Commit references/messages tied to this bug
    #[serde(default)]
    pub commit_refs: Vec<String>,

    /// File paths touched by the fix; commit anchors like `commit_refs`
    #[serde(default)]
    pub files_changed: Vec<String>,

    /// Explicit duplicate-of id from the upstream tracker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_of: Option<String>,
}

impl BugRecord {
    /// Reject malformed payloads before any write happens.
    pub fn validate(&self) -> Result<()> {
        if self.bug_id.trim().is_empty() {
            return Err(Error::Validation("bug_id must not be empty".into()));
        }
        if self.summary.trim().is_empty() {
            return Err(Error::Validation("summary must not be empty".into()));
        }
        if self.status.trim().is_empty() {
            return Err(Error::Validation("status must not be empty".into()));
        }
        if self.creator.trim().is_empty() {
            return Err(Error::Validation("creator must not be empty".into()));
        }
        if self.last_change_time < self.creation_time {
            return Err(Error::Validation(
                "last_change_time precedes creation_time".into(),
            ));
        }
        if let Some(dup) = &self.duplicate_of {
            if dup == &self.bug_id {
                return Err(Error::Validation("bug cannot duplicate itself".into()));
            }
        }
        Ok(())
    }

    /// Assignee normalized for ranking: empty string becomes the sentinel.
    pub fn effective_assignee(&self) -> &str {
        if self.assignee.trim().is_empty() {
            UNASSIGNED
        } else {
            &self.assignee
        }
    }

    /// True when this report is resolved and the assignee is credited.
    pub fn is_resolved_fixed(&self) -> bool {
        self.status == STATUS_RESOLVED && self.resolution == RESOLUTION_FIXED
    }
}

/// A bug node as stored in the tenant graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bug {
    pub bug_id: String,
    pub summary: String,
    pub status: String,
    pub resolution: String,
    pub product: String,
    pub component: String,
    pub creator: String,
    pub assignee: String,
    pub creation_time: DateTime<Utc>,
    pub last_change_time: DateTime<Utc>,
    #[serde(default)]
    pub keywords: Vec<String>,

    /// Inferred primary topic (max-weight HAS_TOPIC neighbor)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_topic: Option<i64>,

    /// Serialized sparse topic-probability distribution
    #[serde(default)]
    pub topic_distribution: TopicDistribution,

    /// Created as a dangling depends_on/similarity target; no real
    /// ingestion has filled it yet
    #[serde(default)]
    pub placeholder: bool,
}

impl Bug {
    pub fn is_resolved_fixed(&self) -> bool {
        self.status == STATUS_RESOLVED && self.resolution == RESOLUTION_FIXED
    }
}

/// A topic node, keyed by the offline model's topic id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub topic_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub terms: Vec<String>,
}

/// A developer node, keyed by email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Developer {
    pub dev_id: String,
    /// Greatest last_change_time over bugs assigned to this developer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<DateTime<Utc>>,
}

/// A commit node with a deterministic id derived from its reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub commit_id: String,
    pub commit_ref: String,
}

/// Sparse probability vector over trained topic ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicDistribution(pub Vec<(i64, f64)>);

impl TopicDistribution {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Argmax topic with probabilities tied to the lowest topic id.
    pub fn main_topic(&self) -> Option<(i64, f64)> {
        let mut best: Option<(i64, f64)> = None;
        for &(tid, prob) in &self.0 {
            best = match best {
                None => Some((tid, prob)),
                Some((bt, bp)) => {
                    if prob > bp || (prob == bp && tid < bt) {
                        Some((tid, prob))
                    } else {
                        Some((bt, bp))
                    }
                }
            };
        }
        best
    }

    pub fn total(&self) -> f64 {
        self.0.iter().map(|(_, p)| p).sum()
    }
}

/// Type of relationship between graph entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    /// Bug carries this topic, with a feedback-adjustable weight
    HasTopic,
    /// Topical near-duplicate below the duplicate threshold (Bug -> Bug)
    SimilarTo,
    /// Duplicate at or above the threshold, or an explicit tracker field
    DuplicateOf,
    /// Explicit dependency from the upstream tracker (Bug -> Bug)
    DependsOn,
    /// Bug -> Developer
    AssignedTo,
    /// Bug -> Developer
    CreatedBy,
    /// Bug -> Commit
    HasCommit,
    /// Bug -> Commit, only once the bug is resolved as fixed
    FixedBy,
}

impl EdgeType {
    /// Edge types the similarity hop of the frequency recommender follows.
    pub fn is_similarity(&self) -> bool {
        matches!(self, EdgeType::SimilarTo | EdgeType::DuplicateOf)
    }

    pub fn all() -> &'static [EdgeType] {
        &[
            EdgeType::HasTopic,
            EdgeType::SimilarTo,
            EdgeType::DuplicateOf,
            EdgeType::DependsOn,
            EdgeType::AssignedTo,
            EdgeType::CreatedBy,
            EdgeType::HasCommit,
            EdgeType::FixedBy,
        ]
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EdgeType::HasTopic => "has_topic",
            EdgeType::SimilarTo => "similar_to",
            EdgeType::DuplicateOf => "duplicate_of",
            EdgeType::DependsOn => "depends_on",
            EdgeType::AssignedTo => "assigned_to",
            EdgeType::CreatedBy => "created_by",
            EdgeType::HasCommit => "has_commit",
            EdgeType::FixedBy => "fixed_by",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "has_topic" => Ok(EdgeType::HasTopic),
            "similar_to" => Ok(EdgeType::SimilarTo),
            "duplicate_of" => Ok(EdgeType::DuplicateOf),
            "depends_on" => Ok(EdgeType::DependsOn),
            "assigned_to" => Ok(EdgeType::AssignedTo),
            "created_by" => Ok(EdgeType::CreatedBy),
            "has_commit" => Ok(EdgeType::HasCommit),
            "fixed_by" => Ok(EdgeType::FixedBy),
            _ => Err(format!("Unknown edge type: {}", s)),
        }
    }
}

/// Where an edge came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeProvenance {
    /// Online topic/similarity inference at ingestion time
    Inferred,
    /// An explicit field on the upstream tracker record
    Explicit,
    /// Materialized by a user relevance judgment
    Feedback,
}

impl fmt::Display for EdgeProvenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EdgeProvenance::Inferred => "inferred",
            EdgeProvenance::Explicit => "explicit",
            EdgeProvenance::Feedback => "feedback",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for EdgeProvenance {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "inferred" => Ok(EdgeProvenance::Inferred),
            "explicit" => Ok(EdgeProvenance::Explicit),
            "feedback" => Ok(EdgeProvenance::Feedback),
            _ => Err(format!("Unknown edge provenance: {}", s)),
        }
    }
}

/// A relationship between two entities.
///
/// At most one edge exists per (source, target, edge_type) tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub edge_type: EdgeType,
    /// Similarity score for relation edges, vote weight for HAS_TOPIC
    pub weight: f64,
    pub provenance: EdgeProvenance,
    pub created_at: DateTime<Utc>,
}

/// Classification of a nearest-neighbor match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Similar,
    Duplicate,
}

impl RelationKind {
    pub fn edge_type(&self) -> EdgeType {
        match self {
            RelationKind::Similar => EdgeType::SimilarTo,
            RelationKind::Duplicate => EdgeType::DuplicateOf,
        }
    }
}

/// One nearest-neighbor result from the similarity index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityCandidate {
    pub bug_id: String,
    pub score: f64,
    pub relation: RelationKind,
}

/// Effect of one feedback submission on the topic graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEffect {
    pub bug_id: String,
    pub topic_id: i64,
    pub action: FeedbackAction,
    pub old_weight: i64,
    pub new_weight: i64,
    /// True when the decrement pruned the edge (weight fell to <= -2)
    pub edge_deleted: bool,
    pub old_primary_topic: Option<i64>,
    pub new_primary_topic: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    IncreaseWeight,
    DecreaseWeight,
}

/// Which tier of the frequency recommender produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationTier {
    SimilarityNeighbors,
    DirectAssignees,
    TopicFrequency,
}

/// One recommended developer with its ranking evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub dev_id: String,
    pub score: f64,
    pub evidence_count: u64,
}

/// Lifecycle status of a training run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(format!("Unknown run status: {}", s)),
        }
    }
}

/// Polled status record of an asynchronous training run.
///
/// Non-terminal values are advisory; only `completed`/`failed` are
/// definitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRun {
    pub run_id: String,
    pub status: RunStatus,
    pub stage: String,
    /// Percent complete, 0-100
    pub progress: u8,
    pub message: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Version of the artifact a completed run wrote
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_version: Option<u32>,
    /// Structured refusal/failure reason for failed runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}
