//! Execution-time tracking of per-operator cardinalities.
//!
//! [`TrackerState`] is attached to a physical operator at plan time and
//! bridges compilation and execution: it owns the operator's feature vector
//! and both predictions, counts the rows the operator actually produced, and
//! is harvested into training samples once the query finishes.
//!
//! [`ExecutionTracker`] is the registry pipelines report into. Its hot path
//! is a per-thread cache stamped with `(tracker id, generation)` so row
//! recording normally touches no lock; `reset` bumps the generation and every
//! thread's cache invalidates at once.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use fxhash::FxHashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::features::FeatureVector;
use crate::model::{BoostingModel, TrainingBuffer};
use crate::planner::PhysicalOperator;

/// Sliding-window size handed to each incremental update.
pub const COLLECTION_WINDOW: usize = 500;

/// Per-operator state attached to a physical operator.
///
/// Attached exactly once, never reassigned; its lifetime is contained in the
/// physical plan's lifetime.
#[derive(Debug)]
pub struct TrackerState {
    features: FeatureVector,
    predicted_cardinality: u64,
    engine_cardinality: u64,
    actual_rows: AtomicU64,
    has_prediction: bool,
    actuals_collected: AtomicBool,
}

impl TrackerState {
    pub fn new(features: FeatureVector, predicted_cardinality: u64, engine_cardinality: u64) -> Self {
        Self {
            features,
            predicted_cardinality,
            engine_cardinality,
            actual_rows: AtomicU64::new(0),
            has_prediction: predicted_cardinality > 0,
            actuals_collected: AtomicBool::new(false),
        }
    }

    /// Count rows emitted by the operator. Called from execution pipelines.
    pub fn add_rows(&self, n: u64) {
        self.actual_rows.fetch_add(n, Ordering::Relaxed);
    }

    /// Rows the operator actually produced so far.
    pub fn actual_cardinality(&self) -> u64 {
        self.actual_rows.load(Ordering::Relaxed)
    }

    pub fn predicted_cardinality(&self) -> u64 {
        self.predicted_cardinality
    }

    pub fn engine_cardinality(&self) -> u64 {
        self.engine_cardinality
    }

    pub fn has_prediction(&self) -> bool {
        self.has_prediction
    }

    pub fn features(&self) -> &FeatureVector {
        &self.features
    }

    /// Whether the post-query walk already consumed this tracker.
    pub fn collected(&self) -> bool {
        self.actuals_collected.load(Ordering::Acquire)
    }

    /// Mark collected; returns false if another walk got here first.
    fn try_collect(&self) -> bool {
        !self.actuals_collected.swap(true, Ordering::AcqRel)
    }
}

fn collect_recursive(op: &PhysicalOperator, buffer: &TrainingBuffer) {
    if let Some(tracker) = &op.tracker {
        let actual = tracker.actual_cardinality();
        if (tracker.has_prediction() || actual > 0) && tracker.try_collect() {
            buffer.add_sample(
                tracker.features().clone(),
                actual,
                tracker.predicted_cardinality(),
            );
        }
    }
    for child in &op.children {
        collect_recursive(child, buffer);
    }
}

/// Walk a finished plan, turn its trackers into training samples, and
/// trigger one incremental update on the tail of the buffer.
///
/// Called once per query after execution completes.
pub fn collect_actual_cardinalities_with_model(
    root: &PhysicalOperator,
    buffer: &TrainingBuffer,
    model: &BoostingModel,
) {
    collect_recursive(root, buffer);
    let recent = buffer.recent_samples(COLLECTION_WINDOW);
    model.update_incremental(&recent);
}

/// [`collect_actual_cardinalities_with_model`] against the process-wide
/// model.
pub fn collect_actual_cardinalities(root: &PhysicalOperator, buffer: &TrainingBuffer) {
    collect_actual_cardinalities_with_model(root, buffer, BoostingModel::global());
}

/// Row statistics for one operator in the execution registry.
#[derive(Debug, Default)]
pub struct OperatorRowStats {
    estimated_cardinality: AtomicU64,
    actual_rows: AtomicU64,
}

impl OperatorRowStats {
    pub fn add_actual_rows(&self, n: u64) {
        self.actual_rows.fetch_add(n, Ordering::Relaxed);
    }

    pub fn actual_rows(&self) -> u64 {
        self.actual_rows.load(Ordering::Relaxed)
    }

    pub fn estimated_cardinality(&self) -> u64 {
        self.estimated_cardinality.load(Ordering::Relaxed)
    }
}

/// Bound on each per-thread registry cache; small enough for a linear scan.
const THREAD_CACHE_CAPACITY: usize = 64;

#[derive(Default)]
struct ThreadCache {
    tracker_id: u64,
    generation: u64,
    entries: Vec<(u64, Arc<OperatorRowStats>)>,
}

thread_local! {
    static REGISTRY_CACHE: RefCell<ThreadCache> = RefCell::new(ThreadCache::default());
}

static NEXT_TRACKER_ID: AtomicU64 = AtomicU64::new(1);

/// Mutex-guarded per-operator row statistics with a lock-free fast path.
pub struct ExecutionTracker {
    tracker_id: u64,
    generation: AtomicU64,
    stats: Mutex<FxHashMap<u64, Arc<OperatorRowStats>>>,
}

impl ExecutionTracker {
    pub fn new() -> Self {
        Self {
            tracker_id: NEXT_TRACKER_ID.fetch_add(1, Ordering::Relaxed),
            generation: AtomicU64::new(1),
            stats: Mutex::new(FxHashMap::default()),
        }
    }

    fn cached_entry(&self, operator_key: u64) -> Option<Arc<OperatorRowStats>> {
        let generation = self.generation.load(Ordering::Acquire);
        REGISTRY_CACHE.with(|cell| {
            let mut cache = cell.borrow_mut();
            if cache.tracker_id != self.tracker_id || cache.generation != generation {
                cache.tracker_id = self.tracker_id;
                cache.generation = generation;
                cache.entries.clear();
            }
            cache
                .entries
                .iter()
                .find(|(key, _)| *key == operator_key)
                .map(|(_, stats)| Arc::clone(stats))
        })
    }

    fn cache_entry(&self, operator_key: u64, stats: &Arc<OperatorRowStats>) {
        REGISTRY_CACHE.with(|cell| {
            let mut cache = cell.borrow_mut();
            if cache.tracker_id == self.tracker_id
                && cache.generation == self.generation.load(Ordering::Acquire)
                && cache.entries.len() < THREAD_CACHE_CAPACITY
            {
                cache.entries.push((operator_key, Arc::clone(stats)));
            }
        });
    }

    /// Register an operator before its pipeline starts.
    pub fn start_operator(&self, operator_key: u64, estimated_cardinality: u64) {
        if self.cached_entry(operator_key).is_some() {
            return;
        }
        let stats = {
            let mut registry = self.stats.lock();
            Arc::clone(registry.entry(operator_key).or_default())
        };
        if stats.estimated_cardinality() == 0 {
            stats
                .estimated_cardinality
                .store(estimated_cardinality, Ordering::Relaxed);
        }
        self.cache_entry(operator_key, &stats);
    }

    /// Record rows an operator emitted. Fast path is the per-thread cache;
    /// the registry lock is only taken on a cache miss.
    pub fn record_rows(&self, operator_key: u64, rows: u64) {
        if rows == 0 {
            return;
        }
        if let Some(stats) = self.cached_entry(operator_key) {
            stats.add_actual_rows(rows);
            return;
        }
        let stats = {
            let registry = self.stats.lock();
            registry.get(&operator_key).cloned()
        };
        if let Some(stats) = stats {
            stats.add_actual_rows(rows);
            self.cache_entry(operator_key, &stats);
        }
    }

    /// Rows recorded for one operator.
    pub fn actual_rows(&self, operator_key: u64) -> u64 {
        self.stats
            .lock()
            .get(&operator_key)
            .map(|stats| stats.actual_rows())
            .unwrap_or(0)
    }

    /// Log per-operator q-errors after execution.
    pub fn finalize(&self) {
        let registry = self.stats.lock();
        for (key, stats) in registry.iter() {
            let actual = stats.actual_rows();
            let estimated = stats.estimated_cardinality();
            if actual > 0 && estimated > 0 {
                let ratio = actual as f64 / estimated as f64;
                let q_error = if ratio < 1.0 { 1.0 / ratio } else { ratio };
                debug!(
                    "operator {key}: actual={actual}, estimated={estimated}, q-error={q_error:.3}"
                );
            }
        }
    }

    /// Drop all statistics and invalidate every thread's cache at once.
    pub fn reset(&self) {
        let mut registry = self.stats.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        registry.clear();
    }
}

impl Default for ExecutionTracker {
    fn default() -> Self {
        Self::new()
    }
}
