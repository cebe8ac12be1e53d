//! Nearest-neighbor lookup over historical topic vectors.
//!
//! The index is built offline as `models/topic_index.jsonl` (one row per
//! historical bug: id plus dense topic vector) and consumed read-only
//! here. Queries compute cosine similarity against every row; with the
//! sparse topic counts involved a brute-force scan is exactly what the
//! upstream system did and stays well within budget.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use crate::models::{RelationKind, SimilarityCandidate, TopicDistribution};
use crate::Result;

/// File name of the similarity index inside a tenant's models dir.
pub const TOPIC_INDEX_FILE: &str = "topic_index.jsonl";

/// Default number of neighbors retrieved per query.
pub const DEFAULT_TOP_K: usize = 20;

/// Minimum similarity for a candidate to be reported at all.
pub const DEFAULT_SIM_THRESHOLD: f64 = 0.60;

/// Similarity at or above which a candidate is classified "duplicate".
pub const DEFAULT_DUP_THRESHOLD: f64 = 0.80;

/// One serialized index row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRow {
    pub bug_id: String,
    pub vector: Vec<f64>,
}

/// Similarity classification thresholds.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub sim: f64,
    pub dup: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            sim: DEFAULT_SIM_THRESHOLD,
            dup: DEFAULT_DUP_THRESHOLD,
        }
    }
}

/// In-memory nearest-neighbor index over historical topic vectors.
///
/// Row order is the file order and is the deterministic tie-break for
/// equal scores.
pub struct SimilarityIndex {
    bug_ids: Vec<String>,
    /// Row-major matrix, one row per bug; width = topic count
    matrix: Array2<f64>,
    /// Precomputed L2 norm per row
    norms: Vec<f64>,
    thresholds: Thresholds,
}

impl SimilarityIndex {
    /// Build an index from rows. Rows with a width mismatch are rejected
    /// upstream by the offline builder; here the widest row wins and
    /// shorter vectors are zero-padded.
    pub fn from_rows(rows: Vec<IndexRow>, thresholds: Thresholds) -> Self {
        let width = rows.iter().map(|r| r.vector.len()).max().unwrap_or(0);
        let mut matrix = Array2::zeros((rows.len(), width));
        let mut bug_ids = Vec::with_capacity(rows.len());
        for (i, row) in rows.into_iter().enumerate() {
            for (j, v) in row.vector.into_iter().enumerate() {
                matrix[(i, j)] = v;
            }
            bug_ids.push(row.bug_id);
        }
        let norms = matrix
            .rows()
            .into_iter()
            .map(|r| r.dot(&r).sqrt())
            .collect();
        Self {
            bug_ids,
            matrix,
            norms,
            thresholds,
        }
    }

    /// Load a tenant's index from disk. A missing file yields an empty
    /// index - similarity is best-effort at ingestion time.
    pub fn load(path: &Path, thresholds: Thresholds) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::from_rows(Vec::new(), thresholds));
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut rows = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let row: IndexRow = serde_json::from_str(&line)?;
            rows.push(row);
        }
        Ok(Self::from_rows(rows, thresholds))
    }

    /// Write rows as JSONL, replacing any existing file
    /// (fixture/offline-pipeline glue).
    pub fn write_rows(path: &Path, rows: &[IndexRow]) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        for row in rows {
            writeln!(file, "{}", serde_json::to_string(row)?)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bug_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bug_ids.is_empty()
    }

    /// Retrieve up to `top_k` nearest historical bugs for a topic
    /// distribution, classified similar/duplicate.
    ///
    /// An empty index, an empty distribution, or a zero-norm query all
    /// yield an empty list - never an error.
    pub fn nearest(&self, dist: &TopicDistribution, top_k: usize) -> Vec<SimilarityCandidate> {
        if self.is_empty() || dist.is_empty() {
            return Vec::new();
        }

        let width = self.matrix.ncols();
        let mut query = Array1::zeros(width);
        for &(tid, prob) in &dist.0 {
            if tid >= 0 && (tid as usize) < width {
                query[tid as usize] = prob;
            }
        }
        let query_norm = query.dot(&query).sqrt();
        if query_norm == 0.0 {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f64)> = Vec::new();
        for (i, row) in self.matrix.rows().into_iter().enumerate() {
            if self.norms[i] == 0.0 {
                continue;
            }
            // similarity = 1 - cosine distance = cosine similarity
            let score = row.dot(&query) / (self.norms[i] * query_norm);
            if score >= self.thresholds.sim {
                scored.push((i, score));
            }
        }

        // Stable sort keeps index row order for tied scores
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(i, score)| SimilarityCandidate {
                bug_id: self.bug_ids[i].clone(),
                score,
                relation: if score >= self.thresholds.dup {
                    RelationKind::Duplicate
                } else {
                    RelationKind::Similar
                },
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn dist(pairs: &[(i64, f64)]) -> TopicDistribution {
        TopicDistribution(pairs.to_vec())
    }

    fn index(rows: &[(&str, &[f64])]) -> SimilarityIndex {
        SimilarityIndex::from_rows(
            rows.iter()
                .map(|(id, v)| IndexRow {
                    bug_id: id.to_string(),
                    vector: v.to_vec(),
                })
                .collect(),
            Thresholds::default(),
        )
    }

    #[test]
    fn test_empty_index_returns_empty() {
        let idx = index(&[]);
        assert!(idx.nearest(&dist(&[(0, 1.0)]), 20).is_empty());
    }

    #[test]
    fn test_empty_distribution_returns_empty() {
        let idx = index(&[("b1", &[1.0, 0.0])]);
        assert!(idx.nearest(&TopicDistribution::default(), 20).is_empty());
    }

    #[test]
    fn test_identical_vector_scores_one() {
        let idx = index(&[("b1", &[0.42, 0.58])]);
        let out = idx.nearest(&dist(&[(0, 0.42), (1, 0.58)]), 20);
        assert_eq!(out.len(), 1);
        assert_abs_diff_eq!(out[0].score, 1.0, epsilon = 1e-9);
        assert_eq!(out[0].relation, RelationKind::Duplicate);
    }

    #[test]
    fn test_below_sim_threshold_is_dropped() {
        // Orthogonal vectors: similarity 0
        let idx = index(&[("b1", &[1.0, 0.0])]);
        let out = idx.nearest(&dist(&[(1, 1.0)]), 20);
        assert!(out.is_empty());
    }

    #[test]
    fn test_dup_threshold_boundary_is_duplicate() {
        // 4-3-5 triangle: cosine of (4, 3) against (1, 0) is exactly 4/5
        let idx = index(&[("b1", &[1.0, 0.0])]);
        let out = idx.nearest(&dist(&[(0, 4.0), (1, 3.0)]), 20);
        assert_eq!(out.len(), 1);
        assert_abs_diff_eq!(out[0].score, 0.8, epsilon = 1e-9);
        assert_eq!(out[0].relation, RelationKind::Duplicate);
    }

    #[test]
    fn test_between_thresholds_is_similar() {
        // cosine of (0.7, sqrt(0.51)) against (1, 0) is 0.7
        let idx = index(&[("b1", &[1.0, 0.0])]);
        let out = idx.nearest(&dist(&[(0, 0.7), (1, 0.51f64.sqrt())]), 20);
        assert_eq!(out.len(), 1);
        assert!(out[0].score >= DEFAULT_SIM_THRESHOLD);
        assert!(out[0].score < DEFAULT_DUP_THRESHOLD);
        assert_eq!(out[0].relation, RelationKind::Similar);
    }

    #[test]
    fn test_tied_scores_keep_row_order() {
        let idx = index(&[("first", &[1.0, 0.0]), ("second", &[1.0, 0.0])]);
        let out = idx.nearest(&dist(&[(0, 1.0)]), 20);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].bug_id, "first");
        assert_eq!(out[1].bug_id, "second");
    }

    #[test]
    fn test_top_k_truncation() {
        let rows: Vec<(String, Vec<f64>)> = (0..30)
            .map(|i| (format!("b{}", i), vec![1.0, 0.0]))
            .collect();
        let idx = SimilarityIndex::from_rows(
            rows.iter()
                .map(|(id, v)| IndexRow {
                    bug_id: id.clone(),
                    vector: v.clone(),
                })
                .collect(),
            Thresholds::default(),
        );
        let out = idx.nearest(&dist(&[(0, 1.0)]), DEFAULT_TOP_K);
        assert_eq!(out.len(), DEFAULT_TOP_K);
    }

    #[test]
    fn test_jsonl_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join(TOPIC_INDEX_FILE);
        let rows = vec![
            IndexRow {
                bug_id: "b1".into(),
                vector: vec![0.9, 0.1],
            },
            IndexRow {
                bug_id: "b2".into(),
                vector: vec![0.1, 0.9],
            },
        ];
        SimilarityIndex::write_rows(&path, &rows).unwrap();
        let idx = SimilarityIndex::load(&path, Thresholds::default()).unwrap();
        assert_eq!(idx.len(), 2);
        let out = idx.nearest(&dist(&[(0, 0.9), (1, 0.1)]), 20);
        assert_eq!(out[0].bug_id, "b1");
    }

    #[test]
    fn test_missing_file_loads_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let idx =
            SimilarityIndex::load(&dir.path().join("nope.jsonl"), Thresholds::default()).unwrap();
        assert!(idx.is_empty());
    }

    #[test]
    fn test_never_returns_below_threshold() {
        let idx = index(&[
            ("close", &[0.9, 0.1]),
            ("far", &[0.0, 1.0]),
            ("mid", &[0.5, 0.5]),
        ]);
        let out = idx.nearest(&dist(&[(0, 1.0)]), 20);
        for c in &out {
            assert!(c.score >= DEFAULT_SIM_THRESHOLD);
        }
        assert!(!out.iter().any(|c| c.bug_id == "far"));
    }
}
