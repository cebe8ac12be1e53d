//! Tenant namespaces and engine wiring.
//!
//! A tenant is one isolated organization+project namespace. Each tenant
//! owns a SQLite graph database and a models directory under the data
//! root; nothing is shared across tenants.

use std::path::{Path, PathBuf};

use crate::ranker::RankerRegistry;
use crate::topic::TopicModelRegistry;
use crate::{Error, Result};

/// Longest allowed tenant slug (mirrors the upstream database-name cap).
const MAX_SLUG_LEN: usize = 63;

/// An isolated organization+project namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    organization: String,
    project: String,
    slug: String,
}

impl Tenant {
    pub fn new(organization: &str, project: &str) -> Self {
        let slug = make_slug(organization, project);
        Self {
            organization: organization.to_string(),
            project: project.to_string(),
            slug,
        }
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    /// Filesystem- and identifier-safe namespace name.
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Root directory for this tenant's data.
    pub fn dir(&self, data_dir: &Path) -> PathBuf {
        data_dir.join("tenants").join(&self.slug)
    }

    /// Path of this tenant's graph database.
    pub fn db_path(&self, data_dir: &Path) -> PathBuf {
        self.dir(data_dir).join("graph.db")
    }

    /// Directory holding this tenant's trained model artifacts.
    pub fn models_dir(&self, data_dir: &Path) -> PathBuf {
        self.dir(data_dir).join("models")
    }
}

fn slug_part(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut last_sep = true;
    for c in value.trim().to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_sep = false;
        } else if !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    out.trim_end_matches('_').to_string()
}

fn make_slug(organization: &str, project: &str) -> String {
    let base = format!("{}_{}", slug_part(organization), slug_part(project));
    if base.len() > MAX_SLUG_LEN {
        base[..MAX_SLUG_LEN].trim_end_matches('_').to_string()
    } else {
        base
    }
}

/// Resolve the data directory: explicit path > TG_DATA_DIR > XDG data dir.
pub fn resolve_data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    if let Ok(path) = std::env::var("TG_DATA_DIR") {
        if !path.is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    dirs::data_dir()
        .map(|d| d.join("triagraph"))
        .ok_or_else(|| Error::Other("could not determine a data directory".into()))
}

/// Shared engine state: the data root plus the per-tenant model caches.
///
/// One `Engine` is constructed at startup and handed to the command layer;
/// registries inside it are thread-safe and shared read-only.
pub struct Engine {
    data_dir: PathBuf,
    topic_models: TopicModelRegistry,
    rankers: RankerRegistry,
}

impl Engine {
    pub fn new(data_dir: PathBuf) -> Self {
        let topic_models = TopicModelRegistry::new(data_dir.clone());
        let rankers = RankerRegistry::new(data_dir.clone());
        Self {
            data_dir,
            topic_models,
            rankers,
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn topic_models(&self) -> &TopicModelRegistry {
        &self.topic_models
    }

    pub fn rankers(&self) -> &RankerRegistry {
        &self.rankers
    }
}
