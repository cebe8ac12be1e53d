//! Asynchronous ranker training.
//!
//! A training run is claimed exclusively per tenant, executed on a
//! background thread, and observed through polled status records in the
//! tenant database. The pipeline: fetch resolved (bug, developer) pairs,
//! build a labeled dataset with sampled negatives, split by bug id, fit a
//! pairwise logistic scorer, evaluate on the holdout, write a versioned
//! artifact.
//!
//! All randomness is seeded, so the same history always yields the same
//! dataset, split, and model.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::thread::JoinHandle;
use uuid::Uuid;

use crate::models::{RunStatus, UNASSIGNED};
use crate::ranker::features::{build_profiles, feature_row, DevProfile, FEATURE_COLUMNS};
use crate::ranker::{RankerModel, RankerRegistry, RANKER_FILE};
use crate::storage::Storage;
use crate::tenant::Tenant;
use crate::{Error, Result};

/// Negatives sampled per bug when building the dataset.
pub const NEGATIVES_PER_BUG: usize = 10;

/// Seed for negative sampling and the train/holdout split.
pub const RANDOM_SEED: u64 = 42;

/// Minimum ingested bugs before training is attempted.
pub const MIN_TRAINING_BUGS: usize = 5;

/// Fraction of bugs held out for evaluation.
const HOLDOUT_FRACTION: f64 = 0.2;

const EPOCHS: usize = 200;
const LEARNING_RATE: f64 = 0.1;

/// Structured refusal reason codes.
pub const REASON_NOT_ENOUGH_BUGS: &str = "not_enough_bugs_for_training";
pub const REASON_NO_PAIRS: &str = "no_bug_dev_pairs";
pub const REASON_NO_DEVELOPERS: &str = "no_developers";

/// One labeled (bug, developer) example.
#[derive(Debug, Clone)]
pub struct Example {
    pub bug_id: String,
    pub dev_id: String,
    /// 1.0 for the developer who actually fixed the bug, 0.0 for sampled
    /// negatives
    pub label: f64,
    pub values: [f64; 5],
}

/// Labeled dataset split by bug id (no bug contributes to both sides).
#[derive(Debug, Clone)]
pub struct Dataset {
    pub train: Vec<Example>,
    pub holdout: Vec<Example>,
}

/// Summary of a completed run, as returned to the spawning caller.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrainingOutcome {
    pub run_id: String,
    pub model_version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holdout_accuracy: Option<f64>,
    pub train_examples: usize,
    pub holdout_examples: usize,
}

/// Resolved history fetched from storage, gated on the training
/// preconditions.
pub struct TrainingInputs {
    pairs: Vec<crate::storage::ResolvedPair>,
    dev_ids: Vec<String>,
    last_active: BTreeMap<String, Option<chrono::DateTime<Utc>>>,
}

/// Fetch the resolved (bug, developer) history and candidate developers.
///
/// Refuses (with a structured reason) rather than training a model on
/// insufficient data.
pub fn fetch_training_inputs(storage: &Storage) -> Result<TrainingInputs> {
    if (storage.count_bugs()? as usize) < MIN_TRAINING_BUGS {
        return Err(Error::TrainingPrecondition {
            reason: REASON_NOT_ENOUGH_BUGS.to_string(),
        });
    }
    let pairs = storage.resolved_pairs()?;
    if pairs.is_empty() {
        return Err(Error::TrainingPrecondition {
            reason: REASON_NO_PAIRS.to_string(),
        });
    }
    let developers = storage.list_developers()?;
    let dev_ids: Vec<String> = developers
        .iter()
        .map(|d| d.dev_id.clone())
        .filter(|d| d != UNASSIGNED)
        .collect();
    if dev_ids.is_empty() {
        return Err(Error::TrainingPrecondition {
            reason: REASON_NO_DEVELOPERS.to_string(),
        });
    }
    let last_active = developers
        .into_iter()
        .map(|d| (d.dev_id, d.last_active_at))
        .collect();
    Ok(TrainingInputs {
        pairs,
        dev_ids,
        last_active,
    })
}

/// Convenience wrapper: fetch and featurize in one call.
pub fn build_dataset(storage: &Storage) -> Result<Dataset> {
    Ok(build_dataset_from(&fetch_training_inputs(storage)?))
}

/// Featurize fetched history into the labeled, split dataset.
pub fn build_dataset_from(inputs: &TrainingInputs) -> Dataset {
    let TrainingInputs {
        pairs,
        dev_ids,
        last_active,
    } = inputs;
    let profiles = build_profiles(pairs);
    let now = Utc::now();
    let mut rng = StdRng::seed_from_u64(RANDOM_SEED);

    // Group history per bug; BTreeMap keeps iteration deterministic.
    let mut by_bug: BTreeMap<String, (i64, String, BTreeSet<String>)> = BTreeMap::new();
    for p in pairs {
        let entry = by_bug
            .entry(p.bug_id.clone())
            .or_insert_with(|| (p.topic_id, p.component.clone(), BTreeSet::new()));
        entry.2.insert(p.dev_id.clone());
    }

    let empty_profile = DevProfile::default();
    let featurize = |dev_id: &str, topic: i64, component: &str| {
        let profile = profiles.get(dev_id).unwrap_or(&empty_profile);
        feature_row(
            profile,
            topic,
            component,
            last_active.get(dev_id).copied().flatten(),
            now,
        )
        .values
    };

    let mut examples: Vec<Example> = Vec::new();
    for (bug_id, (topic, component, positives)) in &by_bug {
        for dev in positives {
            examples.push(Example {
                bug_id: bug_id.clone(),
                dev_id: dev.clone(),
                label: 1.0,
                values: featurize(dev, *topic, component),
            });
        }
        let negatives: Vec<&String> = dev_ids.iter().filter(|d| !positives.contains(*d)).collect();
        for dev in negatives.choose_multiple(&mut rng, NEGATIVES_PER_BUG) {
            examples.push(Example {
                bug_id: bug_id.clone(),
                dev_id: (*dev).clone(),
                label: 0.0,
                values: featurize(dev, *topic, component),
            });
        }
    }

    // Split by bug id so the holdout is genuinely unseen.
    let mut bug_ids: Vec<&String> = by_bug.keys().collect();
    bug_ids.shuffle(&mut rng);
    let holdout_count = if bug_ids.len() >= 2 {
        ((bug_ids.len() as f64 * HOLDOUT_FRACTION).round() as usize).max(1)
    } else {
        0
    };
    let holdout_bugs: BTreeSet<&String> = bug_ids[..holdout_count].iter().copied().collect();

    let (holdout, train): (Vec<Example>, Vec<Example>) = examples
        .into_iter()
        .partition(|e| holdout_bugs.contains(&e.bug_id));

    Dataset { train, holdout }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Per-bug (positive, negative) index pairs within one example slice.
fn pairwise_pairs(examples: &[Example]) -> Vec<(usize, usize)> {
    let mut by_bug: BTreeMap<&str, (Vec<usize>, Vec<usize>)> = BTreeMap::new();
    for (i, e) in examples.iter().enumerate() {
        let entry = by_bug.entry(&e.bug_id).or_default();
        if e.label > 0.5 {
            entry.0.push(i);
        } else {
            entry.1.push(i);
        }
    }
    let mut out = Vec::new();
    for (_, (pos, neg)) in by_bug {
        for &p in &pos {
            for &n in &neg {
                out.push((p, n));
            }
        }
    }
    out
}

/// Fit the pairwise logistic scorer on the training split.
pub fn train_model(dataset: &Dataset, version: u32) -> Result<RankerModel> {
    let n = FEATURE_COLUMNS.len();
    if dataset.train.is_empty() {
        return Err(Error::TrainingPrecondition {
            reason: REASON_NO_PAIRS.to_string(),
        });
    }

    // Standardization parameters from the training split only. Scoring
    // floors the std at 1, so training must standardize the same way.
    let mut means = vec![0.0; n];
    for e in &dataset.train {
        for i in 0..n {
            means[i] += e.values[i];
        }
    }
    for m in means.iter_mut() {
        *m /= dataset.train.len() as f64;
    }
    let mut stds = vec![0.0; n];
    for e in &dataset.train {
        for i in 0..n {
            let d = e.values[i] - means[i];
            stds[i] += d * d;
        }
    }
    for s in stds.iter_mut() {
        *s = (*s / dataset.train.len() as f64).sqrt();
    }

    let standardize = |values: &[f64; 5]| -> [f64; 5] {
        let mut z = [0.0; 5];
        for i in 0..n {
            z[i] = (values[i] - means[i]) / stds[i].max(1.0);
        }
        z
    };
    let z: Vec<[f64; 5]> = dataset.train.iter().map(|e| standardize(&e.values)).collect();
    let pairs = pairwise_pairs(&dataset.train);

    // Gradient descent on the RankNet-style objective: for each ordered
    // (positive, negative) pair, push sigmoid(w . (zp - zn)) toward 1.
    let mut weights = vec![0.0; n];
    if !pairs.is_empty() {
        for _ in 0..EPOCHS {
            let mut grad = vec![0.0; n];
            for &(p, q) in &pairs {
                let mut margin = 0.0;
                let mut diff = [0.0; 5];
                for i in 0..n {
                    diff[i] = z[p][i] - z[q][i];
                    margin += weights[i] * diff[i];
                }
                let err = sigmoid(margin) - 1.0;
                for i in 0..n {
                    grad[i] += err * diff[i];
                }
            }
            for i in 0..n {
                weights[i] -= LEARNING_RATE * grad[i] / pairs.len() as f64;
            }
        }
    }

    let train_bugs = dataset
        .train
        .iter()
        .map(|e| e.bug_id.as_str())
        .collect::<BTreeSet<_>>()
        .len();
    let mut model = RankerModel {
        version,
        trained_at: Utc::now(),
        feature_names: FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect(),
        weights,
        bias: 0.0,
        feature_means: means,
        feature_stds: stds,
        holdout_accuracy: None,
        train_examples: dataset.train.len(),
        train_bugs,
    };
    // Evaluate through the assembled model so the artifact's own score
    // path is what gets measured.
    let accuracy = evaluate(&dataset.holdout, |values| model.score(values));
    model.holdout_accuracy = accuracy;
    Ok(model)
}

/// Pairwise accuracy: fraction of holdout (positive, negative) pairs the
/// scorer orders correctly. None when the holdout has no such pairs.
fn evaluate<F: Fn(&[f64; 5]) -> f64>(holdout: &[Example], score: F) -> Option<f64> {
    let pairs = pairwise_pairs(holdout);
    if pairs.is_empty() {
        return None;
    }
    let correct = pairs
        .iter()
        .filter(|&&(p, q)| score(&holdout[p].values) > score(&holdout[q].values))
        .count();
    Some(correct as f64 / pairs.len() as f64)
}

/// Pipeline stage names, as written to the polled status record.
mod stage {
    pub const FETCHING_PAIRS: &str = "fetching_pairs";
    pub const BUILDING_DATASET: &str = "building_dataset";
    pub const SPLITTING: &str = "splitting";
    pub const TRAINING: &str = "training";
    pub const EVALUATING: &str = "evaluating";
    pub const WRITING_ARTIFACT: &str = "writing_artifact";
}

/// Spawns and supervises exclusive per-tenant training runs.
pub struct TrainingCoordinator {
    data_dir: PathBuf,
    rankers: RankerRegistry,
}

/// A claimed, running training run.
pub struct TrainingHandle {
    pub run_id: String,
    handle: JoinHandle<()>,
}

impl TrainingHandle {
    /// Wait for the background run to finish. The outcome is read from
    /// the status record, not returned here.
    pub fn join(self) {
        if self.handle.join().is_err() {
            tracing::warn!(run_id = %self.run_id, "training thread panicked");
        }
    }
}

impl TrainingCoordinator {
    pub fn new(data_dir: PathBuf, rankers: RankerRegistry) -> Self {
        Self { data_dir, rankers }
    }

    /// Claim and start a training run for a tenant.
    ///
    /// Fails immediately with `TrainingInProgress` when another run is
    /// still active; otherwise the returned handle's run id can be polled
    /// via `Storage::get_training_run` while the thread works.
    pub fn spawn(&self, tenant: &Tenant) -> Result<TrainingHandle> {
        let run_id = Uuid::new_v4().to_string();
        {
            let mut storage = Storage::open_with_data_dir(tenant, &self.data_dir)?;
            storage.claim_training_run(&run_id)?;
        }

        let data_dir = self.data_dir.clone();
        let tenant = tenant.clone();
        let rankers = self.rankers.clone();
        let thread_run_id = run_id.clone();
        let handle = std::thread::spawn(move || {
            run_claimed(&data_dir, &tenant, &thread_run_id, &rankers);
        });

        Ok(TrainingHandle { run_id, handle })
    }
}

/// Execute an already-claimed run and record its terminal state.
fn run_claimed(data_dir: &PathBuf, tenant: &Tenant, run_id: &str, rankers: &RankerRegistry) {
    match run_pipeline(data_dir, tenant, run_id) {
        Ok(outcome) => {
            rankers.invalidate(tenant);
            tracing::info!(
                run_id,
                version = outcome.model_version,
                accuracy = ?outcome.holdout_accuracy,
                "training completed"
            );
        }
        Err(err) => {
            let reason = err
                .training_reason()
                .map(str::to_string)
                .unwrap_or_else(|| err.to_string());
            tracing::warn!(run_id, %reason, "training failed");
            match Storage::open_with_data_dir(tenant, data_dir) {
                Ok(mut storage) => {
                    if let Err(e) =
                        storage.finish_training_run(run_id, RunStatus::Failed, None, Some(&reason))
                    {
                        tracing::warn!(run_id, error = %e, "could not record training failure");
                    }
                }
                Err(e) => {
                    tracing::warn!(run_id, error = %e, "could not open storage to record failure")
                }
            }
        }
    }
}

/// Best-effort status/log update; a bookkeeping failure never aborts the
/// run itself.
fn progress(storage: &mut Storage, run_id: &str, stage: &str, pct: u8, msg: &str) {
    if let Err(e) = storage.update_training_run(run_id, stage, pct, msg) {
        tracing::warn!(run_id, stage, error = %e, "could not update run status");
    }
    if let Err(e) = storage.append_training_log(run_id, msg) {
        tracing::warn!(run_id, error = %e, "could not append training log");
    }
}

fn run_pipeline(data_dir: &PathBuf, tenant: &Tenant, run_id: &str) -> Result<TrainingOutcome> {
    let mut storage = Storage::open_with_data_dir(tenant, data_dir)?;

    progress(&mut storage, run_id, stage::FETCHING_PAIRS, 10, "Fetching resolved bug-developer pairs");
    let inputs = fetch_training_inputs(&storage)?;
    progress(&mut storage, run_id, stage::BUILDING_DATASET, 30, "Building labeled dataset");
    let dataset = build_dataset_from(&inputs);
    progress(
        &mut storage,
        run_id,
        stage::SPLITTING,
        50,
        &format!(
            "Split dataset by bug id ({} train, {} holdout examples)",
            dataset.train.len(),
            dataset.holdout.len()
        ),
    );
    progress(
        &mut storage,
        run_id,
        stage::TRAINING,
        60,
        &format!(
            "Training on {} examples ({} held out)",
            dataset.train.len(),
            dataset.holdout.len()
        ),
    );

    let artifact_path = tenant.models_dir(data_dir).join(RANKER_FILE);
    let version = match RankerModel::load(&artifact_path) {
        Ok(previous) => previous.version + 1,
        Err(Error::ModelUnavailable(_)) => 1,
        Err(e) => return Err(e),
    };
    let model = train_model(&dataset, version)?;

    progress(&mut storage, run_id, stage::EVALUATING, 85, "Evaluating on holdout split");
    progress(&mut storage, run_id, stage::WRITING_ARTIFACT, 95, "Writing ranker artifact");
    model.save(&artifact_path)?;

    storage.finish_training_run(run_id, RunStatus::Completed, Some(version), None)?;

    Ok(TrainingOutcome {
        run_id: run_id.to_string(),
        model_version: version,
        holdout_accuracy: model.holdout_accuracy,
        train_examples: dataset.train.len(),
        holdout_examples: dataset.holdout.len(),
    })
}
