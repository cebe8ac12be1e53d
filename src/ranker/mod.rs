//! Learned pairwise ranker: artifact handling and inference.
//!
//! The trained model is a linear scorer over the fixed feature vector,
//! fitted with a pairwise objective (see `crate::training`). Features are
//! standardized with the means/stds captured at training time; scores are
//! only comparable within one candidate list.

pub mod features;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::models::UNASSIGNED;
use crate::storage::Storage;
use crate::tenant::Tenant;
use crate::{Error, Result};

use features::{build_profiles, feature_row, FeatureRow, FEATURE_COLUMNS};

/// File name of the ranker artifact inside a tenant's models dir.
pub const RANKER_FILE: &str = "ranker.json";

/// A trained ranking model artifact.
///
/// `weights` apply to standardized features: (x - mean) / std, with a
/// std floor of 1 to keep constant columns harmless.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankerModel {
    /// Monotonically increasing per tenant; bumped by each training run
    pub version: u32,
    pub trained_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    pub weights: Vec<f64>,
    pub bias: f64,
    pub feature_means: Vec<f64>,
    pub feature_stds: Vec<f64>,
    /// Pairwise accuracy on the held-out split, when one existed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holdout_accuracy: Option<f64>,
    /// Labeled examples in the training split
    #[serde(default)]
    pub train_examples: usize,
    /// Distinct bugs in the training split
    #[serde(default)]
    pub train_bugs: usize,
}

impl RankerModel {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ModelUnavailable(format!(
                "ranker artifact missing: {}",
                path.display()
            )));
        }
        let file = File::open(path)?;
        let model: RankerModel = serde_json::from_reader(BufReader::new(file))?;
        model.validate()?;
        Ok(model)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let n = FEATURE_COLUMNS.len();
        if self.feature_names.len() != n
            || self.weights.len() != n
            || self.feature_means.len() != n
            || self.feature_stds.len() != n
        {
            return Err(Error::Validation(format!(
                "ranker artifact has {} features, expected {}",
                self.weights.len(),
                n
            )));
        }
        for (i, name) in FEATURE_COLUMNS.iter().enumerate() {
            if self.feature_names[i] != *name {
                return Err(Error::Validation(format!(
                    "ranker artifact feature order mismatch at {}: {} != {}",
                    i, self.feature_names[i], name
                )));
            }
        }
        Ok(())
    }

    /// Score one raw feature vector. Higher is better.
    pub fn score(&self, values: &[f64; 5]) -> f64 {
        let mut acc = self.bias;
        for i in 0..values.len() {
            let std = self.feature_stds[i].max(1.0);
            let z = (values[i] - self.feature_means[i]) / std;
            acc += self.weights[i] * z;
        }
        acc
    }
}

/// One developer scored by the learned ranker.
#[derive(Debug, Clone, Serialize)]
pub struct RankedCandidate {
    pub dev_id: String,
    pub score: f64,
    /// Raw (unstandardized) feature values in `FEATURE_COLUMNS` order
    pub features: [f64; 5],
}

/// Per-tenant ranker cache, keyed by slug and artifact version.
///
/// Cloning is cheap (shared inner map); training invalidates the entry
/// for its tenant so the next inference reloads the new artifact.
#[derive(Clone)]
pub struct RankerRegistry {
    data_dir: PathBuf,
    models: Arc<Mutex<HashMap<String, Arc<RankerModel>>>>,
}

impl RankerRegistry {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            models: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Path of a tenant's ranker artifact.
    pub fn artifact_path(&self, tenant: &Tenant) -> PathBuf {
        tenant.models_dir(&self.data_dir).join(RANKER_FILE)
    }

    /// Fetch (loading on first use) the tenant's ranker.
    pub fn get(&self, tenant: &Tenant) -> Result<Arc<RankerModel>> {
        let mut models = self.models.lock().expect("ranker registry lock poisoned");
        if let Some(model) = models.get(tenant.slug()) {
            return Ok(model.clone());
        }
        let model = Arc::new(RankerModel::load(&self.artifact_path(tenant))?);
        models.insert(tenant.slug().to_string(), model.clone());
        Ok(model)
    }

    /// Drop the cached model for a tenant (called after retraining).
    pub fn invalidate(&self, tenant: &Tenant) {
        let mut models = self.models.lock().expect("ranker registry lock poisoned");
        models.remove(tenant.slug());
    }
}

/// Rank candidate developers for an already-ingested bug.
///
/// The candidate universe is every developer with at least one resolved
/// fix in the bug's primary topic; each gets the live feature vector and
/// the model's score. Deterministic order: score desc, then dev id. A
/// bug without a primary topic has no candidate universe and ranks
/// nobody.
pub fn rank_for_bug(
    storage: &Storage,
    model: &RankerModel,
    bug_id: &str,
    top_k: usize,
) -> Result<Vec<RankedCandidate>> {
    let bug = storage.get_bug(bug_id)?;
    let Some(topic_id) = bug.primary_topic else {
        return Ok(Vec::new());
    };

    let pairs = storage.resolved_pairs()?;
    let profiles = build_profiles(&pairs);
    let now = Utc::now();

    let mut ranked: Vec<RankedCandidate> = Vec::new();
    for profile in profiles.values() {
        if profile.dev_id == UNASSIGNED || profile.bugs_fixed_topic(topic_id) == 0 {
            continue;
        }
        let last_active = storage
            .get_developer(&profile.dev_id)?
            .and_then(|d| d.last_active_at);
        let FeatureRow { dev_id, values } =
            feature_row(profile, topic_id, &bug.component, last_active, now);
        ranked.push(RankedCandidate {
            dev_id,
            score: model.score(&values),
            features: values,
        });
    }

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.dev_id.cmp(&b.dev_id))
    });
    ranked.truncate(top_k);
    Ok(ranked)
}
