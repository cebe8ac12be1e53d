//! Triagraph - bug-report triage over a per-tenant graph store.
//!
//! This library powers the `tg` CLI. It infers a latent topic for each
//! incoming bug report, links topical near-duplicates, and recommends the
//! developer most likely to resolve a report - first via graph-frequency
//! heuristics, then via a trained pairwise ranking model.

pub mod cli;
pub mod commands;
pub mod models;
pub mod nlp;
pub mod ranker;
pub mod recommend;
pub mod similarity;
pub mod storage;
pub mod tenant;
pub mod topic;
pub mod training;


/// Library-level error type for Triagraph operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Not initialized: run `tg init` for this tenant first")]
    NotInitialized,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("No trained model available: {0}")]
    ModelUnavailable(String),

    #[error("Transient store failure (safe to retry): {0}")]
    TransientStore(String),

    #[error("Training refused: {reason}")]
    TrainingPrecondition {
        /// Structured reason code, e.g. "not_enough_bugs_for_training".
        reason: String,
    },

    #[error("Training already in progress for this tenant (run {0})")]
    TrainingInProgress(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Structured reason code for training refusals, if this is one.
    pub fn training_reason(&self) -> Option<&str> {
        match self {
            Error::TrainingPrecondition { reason } => Some(reason),
            _ => None,
        }
    }
}

/// Result type alias for Triagraph operations.
pub type Result<T> = std::result::Result<T, Error>;
