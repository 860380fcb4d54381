//! Process-wide gradient-boosted-trees model.
//!
//! One model instance is shared by every connection: inference runs against
//! the *active* booster under the predict mutex, incremental training runs
//! against a *shadow* booster under the train mutex, and every
//! `swap_every_n_updates`-th successful update publishes the shadow as the
//! new active booster.
//!
//! Lock order is train_lock → predict_lock, always. The swap is the only
//! place both are held, and inference threads observe either the pre-swap or
//! the post-swap booster, never a torn mix. Between swaps, training progress
//! lives in shadow-side counters; the public `num_trees`/`total_updates`
//! atomics are release-stored only at publication, under both locks, so a
//! reader that observes `num_trees > 1` is guaranteed to see the trained
//! booster through the active handle.
//!
//! Every failure degrades: prediction errors return the 0 sentinel ("use the
//! engine estimate"), training errors abort the update without publishing
//! partial trees.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::LazyLock;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::ModelConfig;
use crate::features::FEATURE_VECTOR_SIZE;
use crate::model::booster::{Booster, BoosterParams};
use crate::model::buffer::TrainingSample;

/// Upper clamp on predicted log-cardinality; exp(15) ≈ 3.3M rows.
const MAX_LOG_CARDINALITY: f64 = 15.0;

/// Minimum number of samples for a meaningful incremental update.
const MIN_TRAINING_SAMPLES: usize = 10;

/// Training-side state, guarded by the train mutex.
///
/// The counters here track the shadow booster and run ahead of the public
/// atomics, which only catch up when a swap publishes the shadow.
struct TrainState {
    /// Booster being trained; `None` until the first update after a swap
    /// (or bootstrap) clones the active booster.
    shadow: Option<Booster>,
    /// Tree count of the shadow side (includes the bootstrap tree)
    training_num_trees: usize,
    /// Successful updates performed on the shadow side
    training_total_updates: u64,
    /// Update calls that added at least one tree; drives the swap period
    training_update_calls: u64,
}

/// The shared GBT ensemble with its concurrent inference/training discipline.
pub struct BoostingModel {
    config: ModelConfig,
    initialized: AtomicBool,
    /// Active booster; inference serializes on this lock
    active: Mutex<Booster>,
    /// Shadow booster and training counters
    train: Mutex<TrainState>,
    /// Ensemble size visible to inference (release/acquire)
    num_trees: AtomicU64,
    /// Update count visible to inference (release/acquire)
    total_updates: AtomicU64,
}

/// Train the single dummy tree that fixes the booster's feature count.
fn bootstrap_booster(config: &ModelConfig) -> crate::error::Result<Booster> {
    let mut booster = Booster::new(BoosterParams::from(config), FEATURE_VECTOR_SIZE);
    let rows = vec![vec![0.0; FEATURE_VECTOR_SIZE]];
    let labels = vec![1.0];
    booster.train_one_iter(0, &rows, &labels)?;
    Ok(booster)
}

impl BoostingModel {
    /// Create a model and bootstrap it. `num_trees` starts at 1 (the dummy
    /// tree); the model is not ready until a real update lands.
    pub fn new(config: ModelConfig) -> Self {
        let (active, initialized) = match bootstrap_booster(&config) {
            Ok(booster) => (booster, true),
            Err(err) => {
                warn!("[RL BOOSTING ERROR] bootstrap failed: {err}");
                (
                    Booster::new(BoosterParams::from(&config), FEATURE_VECTOR_SIZE),
                    false,
                )
            }
        };
        let num_trees = active.num_trees() as u64;
        debug!(
            "[RL BOOSTING] initialized: max_depth={}, eta={}, trees_per_update={}, objective={:?}",
            config.max_depth, config.learning_rate, config.trees_per_update, config.objective
        );
        Self {
            config,
            initialized: AtomicBool::new(initialized),
            active: Mutex::new(active),
            train: Mutex::new(TrainState {
                shadow: None,
                training_num_trees: num_trees as usize,
                training_total_updates: 0,
                training_update_calls: 0,
            }),
            num_trees: AtomicU64::new(num_trees),
            total_updates: AtomicU64::new(0),
        }
    }

    /// The process-wide model instance, configured from the environment.
    pub fn global() -> &'static BoostingModel {
        static MODEL: LazyLock<BoostingModel> =
            LazyLock::new(|| BoostingModel::new(ModelConfig::global().clone()));
        &MODEL
    }

    /// Size of the published ensemble — the booster inference actually
    /// serves. Shadow-side training that has not been swapped in yet is not
    /// counted.
    pub fn num_trees(&self) -> u64 {
        self.num_trees.load(Ordering::Acquire)
    }

    /// Number of incremental updates reflected in the published ensemble.
    pub fn total_updates(&self) -> u64 {
        self.total_updates.load(Ordering::Acquire)
    }

    /// The model is ready once at least one real update landed beyond the
    /// bootstrap tree.
    pub fn is_ready(&self) -> bool {
        self.initialized.load(Ordering::Acquire) && self.num_trees() > 1
    }

    fn clamp_to_cardinality(log_cardinality: f64) -> f64 {
        let clamped = log_cardinality.clamp(0.0, MAX_LOG_CARDINALITY);
        clamped.exp().max(1.0)
    }

    /// Predict a cardinality from one feature vector.
    ///
    /// Returns 0.0 — the universal "no prediction" sentinel — when the width
    /// is wrong, the model is not ready, or the booster fails.
    pub fn predict(&self, features: &[f64]) -> f64 {
        if features.len() != FEATURE_VECTOR_SIZE {
            debug!(
                "[RL BOOSTING] rejected feature vector of width {} (expected {})",
                features.len(),
                FEATURE_VECTOR_SIZE
            );
            return 0.0;
        }
        if !self.is_ready() {
            return 0.0;
        }

        let log_cardinality = {
            let active = self.active.lock();
            match active.predict_row(features) {
                Ok(value) => value,
                Err(err) => {
                    warn!("[RL BOOSTING ERROR] prediction failed: {err}");
                    return 0.0;
                }
            }
        };

        Self::clamp_to_cardinality(log_cardinality)
    }

    /// Predict cardinalities for an n×W dense matrix. Output positions align
    /// with input rows; the whole call degrades to zeros on failure.
    pub fn predict_batch(&self, matrix: &[Vec<f64>]) -> Vec<f64> {
        if matrix.is_empty() {
            return Vec::new();
        }
        if !self.is_ready() || matrix.iter().any(|row| row.len() != FEATURE_VECTOR_SIZE) {
            return vec![0.0; matrix.len()];
        }

        let margins = {
            let active = self.active.lock();
            active.predict_matrix(matrix)
        };
        match margins {
            Ok(values) => values
                .into_iter()
                .map(Self::clamp_to_cardinality)
                .collect(),
            Err(err) => {
                warn!("[RL BOOSTING ERROR] batch prediction failed: {err}");
                vec![0.0; matrix.len()]
            }
        }
    }

    /// Train incrementally on recent samples from the sliding window.
    ///
    /// Silent no-op below [`MIN_TRAINING_SAMPLES`] samples, when the model is
    /// uninitialized, or once the tree cap is reached. Errors abort the
    /// update without touching the shadow booster.
    pub fn update_incremental(&self, samples: &[TrainingSample]) {
        if !self.initialized.load(Ordering::Acquire) || samples.len() < MIN_TRAINING_SAMPLES {
            return;
        }

        let mut train = self.train.lock();

        let remaining = self
            .config
            .max_total_trees
            .saturating_sub(train.training_num_trees);
        let trees_to_add = self.config.trees_per_update.min(remaining);
        if trees_to_add == 0 {
            return;
        }

        // Clone the active booster into the shadow when none exists: the
        // previous swap handed the shadow over, or this is the first update.
        if train.shadow.is_none() {
            let snapshot = {
                // train → predict order
                let active = self.active.lock();
                active.to_snapshot()
            };
            let shadow = snapshot.and_then(|bytes| Booster::from_snapshot(&bytes));
            match shadow {
                Ok(booster) => train.shadow = Some(booster),
                Err(err) => {
                    warn!("[RL BOOSTING ERROR] shadow clone failed: {err}");
                    return;
                }
            }
        }

        let rows: Vec<Vec<f64>> = samples.iter().map(|s| s.features.clone()).collect();
        let labels: Vec<f64> = samples
            .iter()
            .map(|s| (s.actual_cardinality.max(1) as f64).ln())
            .collect();

        // Train a working copy and commit only on full success, so an error
        // mid-update leaves the shadow exactly as it was.
        let Some(shadow) = train.shadow.as_ref() else {
            return;
        };
        let mut working = shadow.clone();
        for i in 0..trees_to_add {
            let iteration =
                train.training_total_updates * self.config.trees_per_update as u64 + i as u64;
            if let Err(err) = working.train_one_iter(iteration, &rows, &labels) {
                warn!("[RL BOOSTING ERROR] training iteration failed: {err}");
                return;
            }
        }

        train.shadow = Some(working);
        train.training_num_trees += trees_to_add;
        train.training_total_updates += 1;
        train.training_update_calls += 1;

        // Publish the shadow as the new active booster every Nth update call
        // that added trees. The public atomics are stored under both locks,
        // together with the handle replacement: a reader that observes the
        // new counters sees the republished booster, never shadow-side
        // progress that inference cannot serve yet.
        if train.training_update_calls % self.config.swap_every_n_updates as u64 == 0 {
            let Some(published) = train.shadow.take() else {
                return;
            };
            {
                // train → predict order; old active is freed on drop.
                let mut active = self.active.lock();
                *active = published;
                self.num_trees
                    .store(train.training_num_trees as u64, Ordering::Release);
                self.total_updates
                    .store(train.training_total_updates, Ordering::Release);
            }
            let total_q_error: f64 = samples.iter().map(|s| s.q_error).sum();
            let avg_q_error = total_q_error / samples.len() as f64;
            info!(
                "[RL BOOSTING] Incremental update #{}: trained on {} samples, total trees={}, avg Q-error={:.6}",
                train.training_total_updates,
                samples.len(),
                train.training_num_trees,
                avg_q_error
            );
        }
    }

    /// Emergency recovery: free both boosters, zero every counter and
    /// re-bootstrap. Takes the train lock, then the predict lock.
    pub fn reset(&self) {
        let mut train = self.train.lock();
        let mut active = self.active.lock();

        train.shadow = None;
        train.training_total_updates = 0;
        train.training_update_calls = 0;
        match bootstrap_booster(&self.config) {
            Ok(booster) => {
                train.training_num_trees = booster.num_trees();
                *active = booster;
                self.initialized.store(true, Ordering::Release);
            }
            Err(err) => {
                warn!("[RL BOOSTING ERROR] reset bootstrap failed: {err}");
                train.training_num_trees = 0;
                self.initialized.store(false, Ordering::Release);
            }
        }
        self.num_trees
            .store(train.training_num_trees as u64, Ordering::Release);
        self.total_updates.store(0, Ordering::Release);
        info!("[RL BOOSTING] Model reset");
    }
}
