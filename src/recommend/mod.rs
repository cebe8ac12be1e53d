//! Frequency-based developer recommendation.
//!
//! The target set is either one bug (by id) or the bugs matched by a
//! free-text search. Developers are suggested through a three-tier
//! fallback chain, each tier consulted only when the previous one
//! produced nothing:
//!
//! 1. assignees of bugs one similarity hop away from the targets,
//!    weighted by edge score
//! 2. assignees of the target bugs themselves, weighted by match score
//! 3. assignees of any bug sharing the targets' most frequent topics
//!
//! The `unassigned` sentinel is never surfaced from any tier.

use std::collections::BTreeMap;

use crate::models::{Bug, EdgeType, Recommendation, RecommendationTier, UNASSIGNED};
use crate::nlp;
use crate::storage::Storage;
use crate::Result;

/// How many text matches seed the tier chain.
const MATCH_LIMIT: usize = 20;

/// How many of the targets' topics tier 3 expands.
const TOPIC_LIMIT: usize = 5;

/// Default number of developers returned.
pub const DEFAULT_LIMIT: usize = 5;

/// Result of one frequency recommendation query.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FrequencyRecommendation {
    pub query: String,
    /// Which tier produced the developers (first non-empty one)
    pub tier: RecommendationTier,
    /// Bug ids in the target set, best match first
    pub matched_bugs: Vec<String>,
    pub recommendations: Vec<Recommendation>,
}

/// Running aggregate for one candidate developer.
#[derive(Default)]
struct Tally {
    score: f64,
    evidence: u64,
}

/// Recommend developers for a free-text problem description.
pub fn recommend_for_query(
    storage: &Storage,
    query: &str,
    limit: usize,
) -> Result<FrequencyRecommendation> {
    let terms = nlp::preprocess_query(query);
    let targets = storage.search_bugs(&terms, MATCH_LIMIT)?;
    recommend_for_targets(storage, query, targets, limit)
}

/// Recommend developers for one already-ingested bug.
pub fn recommend_for_bug(
    storage: &Storage,
    bug_id: &str,
    limit: usize,
) -> Result<FrequencyRecommendation> {
    let bug = storage.get_bug(bug_id)?;
    recommend_for_targets(storage, bug_id, vec![(bug, 1.0)], limit)
}

fn recommend_for_targets(
    storage: &Storage,
    query: &str,
    targets: Vec<(Bug, f64)>,
    limit: usize,
) -> Result<FrequencyRecommendation> {
    let matched_bugs: Vec<String> = targets.iter().map(|(b, _)| b.bug_id.clone()).collect();

    let mut tier = RecommendationTier::SimilarityNeighbors;
    let mut recommendations = similarity_tier(storage, &targets, limit)?;

    if recommendations.is_empty() {
        tier = RecommendationTier::DirectAssignees;
        recommendations = direct_tier(&targets, limit);
    }
    if recommendations.is_empty() {
        tier = RecommendationTier::TopicFrequency;
        recommendations = topic_tier(storage, &targets, limit)?;
    }

    Ok(FrequencyRecommendation {
        query: query.to_string(),
        tier,
        matched_bugs,
        recommendations,
    })
}

/// Tier 1: one similarity hop out from the targets; a neighbor's
/// assignee is scored by the sum of the edge scores that reached it.
fn similarity_tier(
    storage: &Storage,
    targets: &[(Bug, f64)],
    limit: usize,
) -> Result<Vec<Recommendation>> {
    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();
    for (bug, _) in targets {
        let edges = storage.outgoing_edges(
            &bug.bug_id,
            &[EdgeType::SimilarTo, EdgeType::DuplicateOf],
        )?;
        for edge in edges {
            let Some(neighbor) = storage.get_bug_opt(&edge.target)? else {
                continue;
            };
            if !is_candidate(&neighbor.assignee) {
                continue;
            }
            let t = tallies.entry(neighbor.assignee.clone()).or_default();
            t.score += edge.weight;
            t.evidence += 1;
        }
    }
    Ok(rank(tallies, limit))
}

/// Tier 2: the target bugs' own assignees, weighted by match score.
fn direct_tier(targets: &[(Bug, f64)], limit: usize) -> Vec<Recommendation> {
    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();
    for (bug, match_score) in targets {
        if !is_candidate(&bug.assignee) {
            continue;
        }
        let t = tallies.entry(bug.assignee.clone()).or_default();
        t.score += match_score;
        t.evidence += 1;
    }
    rank(tallies, limit)
}

/// Tier 3: the targets' most frequent topics (top 5), then assignees of
/// any bug carrying one of those topics, weighted by topic frequency.
fn topic_tier(
    storage: &Storage,
    targets: &[(Bug, f64)],
    limit: usize,
) -> Result<Vec<Recommendation>> {
    let mut topic_freq: BTreeMap<i64, u64> = BTreeMap::new();
    for (bug, _) in targets {
        let edges = storage.outgoing_edges(&bug.bug_id, &[EdgeType::HasTopic])?;
        for edge in edges {
            if let Ok(tid) = edge.target.parse::<i64>() {
                *topic_freq.entry(tid).or_insert(0) += 1;
            }
        }
    }
    let mut topics: Vec<(i64, u64)> = topic_freq.into_iter().collect();
    topics.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    topics.truncate(TOPIC_LIMIT);

    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();
    for &(topic_id, freq) in &topics {
        for bug in storage.bugs_with_topic(topic_id)? {
            if !is_candidate(&bug.assignee) {
                continue;
            }
            let t = tallies.entry(bug.assignee.clone()).or_default();
            t.score += freq as f64;
            t.evidence += 1;
        }
    }
    Ok(rank(tallies, limit))
}

fn is_candidate(assignee: &str) -> bool {
    !assignee.trim().is_empty() && assignee != UNASSIGNED
}

/// Order: score desc, evidence desc, then dev id for determinism.
fn rank(tallies: BTreeMap<String, Tally>, limit: usize) -> Vec<Recommendation> {
    let mut out: Vec<Recommendation> = tallies
        .into_iter()
        .map(|(dev_id, t)| Recommendation {
            dev_id,
            score: t.score,
            evidence_count: t.evidence,
        })
        .collect();
    out.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.evidence_count.cmp(&a.evidence_count))
            .then_with(|| a.dev_id.cmp(&b.dev_id))
    });
    out.truncate(limit);
    out
}
