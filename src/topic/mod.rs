//! Topic model adapter: loads per-tenant trained topic artifacts and
//! infers a sparse topic-probability distribution for new text.
//!
//! Training happens offline; this module only consumes the finished
//! artifact (`models/topic_model.json` inside a tenant's data directory).
//! Loaded models are immutable and shared read-only across callers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::models::TopicDistribution;
use crate::nlp;
use crate::tenant::Tenant;
use crate::{Error, Result};

/// File name of the trained topic artifact inside a tenant's models dir.
pub const TOPIC_MODEL_FILE: &str = "topic_model.json";

/// Metadata for one trained topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicMeta {
    pub topic_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub terms: Vec<String>,
}

/// A trained topic model as produced by the offline pipeline.
///
/// The contract: a vocabulary mapping tokens to term indices, and for each
/// term a sparse list of (topic_id, weight) contributions. Inference sums
/// contributions over the surviving tokens and normalizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicModel {
    pub num_topics: usize,
    pub vocabulary: HashMap<String, usize>,
    /// Indexed by term id from `vocabulary`
    pub term_topics: Vec<Vec<(i64, f64)>>,
    #[serde(default)]
    pub topics: Vec<TopicMeta>,
}

impl TopicModel {
    /// Load an artifact from disk.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ModelUnavailable(format!(
                "topic model artifact missing: {}",
                path.display()
            )));
        }
        let file = File::open(path)?;
        let model: TopicModel = serde_json::from_reader(BufReader::new(file))?;
        model.validate()?;
        Ok(model)
    }

    /// Write an artifact (used by fixtures and the offline pipeline glue).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        for (token, &term_id) in &self.vocabulary {
            if term_id >= self.term_topics.len() {
                return Err(Error::Validation(format!(
                    "vocabulary entry '{}' points past term_topics ({} >= {})",
                    token,
                    term_id,
                    self.term_topics.len()
                )));
            }
        }
        Ok(())
    }

    /// Infer a sparse topic distribution for free text.
    ///
    /// Returns an empty distribution (not an error) when no tokens survive
    /// preprocessing or none match the vocabulary.
    pub fn infer(&self, text: &str) -> TopicDistribution {
        let tokens = nlp::tokenize(text);
        if tokens.is_empty() {
            return TopicDistribution::default();
        }

        let mut weights: BTreeMap<i64, f64> = BTreeMap::new();
        for token in &tokens {
            // Out-of-vocabulary tokens are dropped
            let Some(&term_id) = self.vocabulary.get(token.as_str()) else {
                continue;
            };
            for &(topic_id, w) in &self.term_topics[term_id] {
                if w > 0.0 {
                    *weights.entry(topic_id).or_insert(0.0) += w;
                }
            }
        }

        let total: f64 = weights.values().sum();
        if total <= 0.0 {
            return TopicDistribution::default();
        }

        TopicDistribution(
            weights
                .into_iter()
                .map(|(tid, w)| (tid, w / total))
                .collect(),
        )
    }

    /// Topic metadata lookup.
    pub fn topic_meta(&self, topic_id: i64) -> Option<&TopicMeta> {
        self.topics.iter().find(|t| t.topic_id == topic_id)
    }
}

/// Per-tenant topic model cache with lazy single-flight loading.
///
/// Injected into callers rather than living as a module-level singleton;
/// the inner mutex is held across the load so concurrent first requests
/// for the same tenant read the artifact exactly once.
pub struct TopicModelRegistry {
    data_dir: PathBuf,
    models: Mutex<HashMap<String, Arc<TopicModel>>>,
}

impl TopicModelRegistry {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            models: Mutex::new(HashMap::new()),
        }
    }

    /// Path of a tenant's topic artifact.
    pub fn artifact_path(&self, tenant: &Tenant) -> PathBuf {
        tenant.models_dir(&self.data_dir).join(TOPIC_MODEL_FILE)
    }

    /// Fetch (loading on first use) the tenant's topic model.
    pub fn get(&self, tenant: &Tenant) -> Result<Arc<TopicModel>> {
        let mut models = self.models.lock().expect("topic registry lock poisoned");
        if let Some(model) = models.get(tenant.slug()) {
            return Ok(model.clone());
        }
        let model = Arc::new(TopicModel::load(&self.artifact_path(tenant))?);
        models.insert(tenant.slug().to_string(), model.clone());
        Ok(model)
    }

    /// Infer a topic distribution for text under a tenant's model.
    pub fn infer(&self, tenant: &Tenant, text: &str) -> Result<TopicDistribution> {
        Ok(self.get(tenant)?.infer(text))
    }
}
