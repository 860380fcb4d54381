//! Prediction interface between the extractor and the model.
//!
//! Two entry points sit on top of [`BoostingModel`]: one for the
//! physical-plan shim and one for optimizer exploration. Each has its own
//! per-thread fingerprint→prediction cache and its own per-query prediction
//! cap, so planner exploration cannot evict physical predictions or burn the
//! physical budget. Caches are thread-local — no locks — bounded, and
//! invalidated when the query id changes.

use std::cell::RefCell;
use std::sync::Arc;

use fxhash::FxHashMap;
use tracing::debug;

use crate::features::{features_to_vector, JoinFeatures, OperatorFeatures};
use crate::execution::TrackerState;
use crate::model::boosting_model::BoostingModel;
use crate::optimizer::FeatureCollector;
use crate::planner::PhysicalOperator;

/// Per-thread, per-query bound on model predictions.
pub const MAX_PREDICTIONS_PER_QUERY: usize = 300;

/// Bound on each per-thread prediction cache; full clear on overflow.
pub const PREDICTION_CACHE_CAPACITY: usize = 5_000;

/// Query id used before any query is active.
const INVALID_QUERY_ID: u64 = u64::MAX;

#[derive(Default)]
struct PredictionCache {
    query_id: u64,
    predictions: FxHashMap<String, u64>,
    prediction_count: usize,
}

impl PredictionCache {
    fn validate_query(&mut self, query_id: u64) {
        if self.query_id != query_id {
            self.predictions.clear();
            self.prediction_count = 0;
            self.query_id = query_id;
        }
    }

    fn insert(&mut self, key: String, prediction: u64) {
        if self.predictions.len() >= PREDICTION_CACHE_CAPACITY {
            self.predictions.clear();
        }
        self.predictions.insert(key, prediction);
        self.prediction_count += 1;
    }
}

thread_local! {
    /// Physical-plan prediction cache.
    static PHYSICAL_CACHE: RefCell<PredictionCache> = RefCell::new(PredictionCache {
        query_id: INVALID_QUERY_ID,
        ..Default::default()
    });
    /// Optimizer-exploration prediction cache.
    static PLANNING_CACHE: RefCell<PredictionCache> = RefCell::new(PredictionCache {
        query_id: INVALID_QUERY_ID,
        ..Default::default()
    });
    /// Relation-set cache for the join-order planner callback.
    static PLANNER_CALLBACK_CACHE: RefCell<FxHashMap<String, f64>> =
        RefCell::new(FxHashMap::default());
}

/// Binds the feature extractor to the model for one query.
pub struct ModelInterface {
    model: &'static BoostingModel,
    query_id: u64,
}

/// Build the `|`-delimited cache fingerprint for an operator.
fn fingerprint(features: &OperatorFeatures) -> String {
    let mut key = String::with_capacity(128);
    key.push_str(features.operator_kind);
    key.push('|');

    if let Some(scan) = &features.scan {
        key.push_str(&scan.table_name);
        key.push('|');
        key.push_str(&scan.filter_kinds.len().to_string());
        key.push('|');
        for comparison in &scan.comparison_kinds {
            key.push_str(&comparison.to_string());
            key.push(',');
        }
    } else if let Some(join) = &features.join {
        key.push_str(&join.join_type.to_string());
        key.push('|');
        key.push_str(&join.relation_set);
        key.push('|');
        if let Some(comparison) = join.comparison_kind {
            key.push_str(&comparison.to_string());
        }
    } else if let Some(filter) = &features.filter {
        key.push_str(&filter.predicate_kinds.len().to_string());
        key.push('|');
        for comparison in &filter.comparison_kinds {
            key.push_str(&comparison.to_string());
            key.push(',');
        }
    } else if let Some(aggregate) = &features.aggregate {
        key.push_str(&aggregate.group_count.to_string());
        key.push('|');
        key.push_str(&aggregate.aggregate_count.to_string());
        key.push('|');
        key.push_str(&aggregate.grouping_set_count.to_string());
    }

    key
}

impl ModelInterface {
    /// Create an interface bound to the process-wide model for the given
    /// query. The query id drives per-thread cache invalidation.
    pub fn new(query_id: u64) -> Self {
        Self {
            model: BoostingModel::global(),
            query_id,
        }
    }

    /// Bind to an explicit model instance (tests).
    pub fn with_model(model: &'static BoostingModel, query_id: u64) -> Self {
        Self { model, query_id }
    }

    fn predict_cached(
        &self,
        cache: &'static std::thread::LocalKey<RefCell<PredictionCache>>,
        features: &OperatorFeatures,
    ) -> u64 {
        cache.with(|cell| {
            let mut cache = cell.borrow_mut();
            cache.validate_query(self.query_id);

            let key = fingerprint(features);
            if let Some(&cached) = cache.predictions.get(&key) {
                return cached;
            }

            if cache.prediction_count >= MAX_PREDICTIONS_PER_QUERY {
                return features.estimated_cardinality;
            }

            let vector = features_to_vector(features);
            let prediction = self.model.predict(&vector);
            if prediction <= 0.0 {
                return 0;
            }
            let prediction = prediction as u64;
            cache.insert(key, prediction);
            prediction
        })
    }

    /// Observe-only prediction for the physical-plan shim. Returns 0 when no
    /// prediction is available; past the per-query cap, returns the engine
    /// estimate.
    pub fn predict_cardinality(&self, features: &OperatorFeatures) -> u64 {
        self.predict_cached(&PHYSICAL_CACHE, features)
    }

    /// Prediction for planning/optimization, with a cache and cap separate
    /// from the physical path so optimizer exploration cannot interfere.
    pub fn predict_planning_cardinality(&self, features: &OperatorFeatures) -> u64 {
        self.predict_cached(&PLANNING_CACHE, features)
    }

    /// Planning estimate for optimizer and execution decisions: the model
    /// prediction when available, the engine estimate otherwise. Overrides
    /// are restricted to join operators, where they matter most.
    pub fn cardinality_estimate(&self, features: &OperatorFeatures) -> u64 {
        if features.join.is_none() {
            return features.estimated_cardinality;
        }
        let prediction = self.predict_planning_cardinality(features);
        if prediction > 0 {
            prediction
        } else {
            features.estimated_cardinality
        }
    }

    /// Attach tracker state to a physical operator. Called exactly once per
    /// participating operator; a second attach is ignored.
    pub fn attach_state(
        &self,
        physical_op: &mut PhysicalOperator,
        features: &OperatorFeatures,
        rl_prediction: u64,
        engine_estimate: u64,
    ) {
        if physical_op.tracker.is_some() {
            debug!("tracker already attached to {}", physical_op.kind);
            return;
        }
        let vector = features_to_vector(features);
        physical_op.tracker = Some(Arc::new(TrackerState::new(
            vector,
            rl_prediction,
            engine_estimate,
        )));
    }

    /// Clear both per-thread prediction caches. Call at query boundaries.
    pub fn reset_prediction_caches_for_thread() {
        PHYSICAL_CACHE.with(|cell| {
            let mut cache = cell.borrow_mut();
            cache.predictions.clear();
            cache.prediction_count = 0;
            cache.query_id = INVALID_QUERY_ID;
        });
        PLANNING_CACHE.with(|cell| {
            let mut cache = cell.borrow_mut();
            cache.predictions.clear();
            cache.prediction_count = 0;
            cache.query_id = INVALID_QUERY_ID;
        });
        PLANNER_CALLBACK_CACHE.with(|cell| cell.borrow_mut().clear());
    }
}

/// Convert planner-side join features into an operator record the model
/// understands. Per-side cardinalities can be missing (0 or u64::MAX) for
/// complex join sets; they are then derived from the numerator, which is the
/// product of the input cardinalities.
fn join_features_to_operator(features: &JoinFeatures) -> OperatorFeatures {
    let mut record = OperatorFeatures::minimal(
        "LOGICAL_COMPARISON_JOIN",
        features.estimated_cardinality,
    );
    let mut join = crate::features::JoinBlock::new(features.join_type);
    join.overlay(features);

    let invalid = |card: u64| card == 0 || card == u64::MAX;
    if invalid(features.left_relation_card) || invalid(features.right_relation_card) {
        if features.numerator > 0.0 {
            let split = features.numerator.sqrt();
            join.left_cardinality = split as u64;
            join.right_cardinality = split as u64;
        } else {
            join.left_cardinality = 1;
            join.right_cardinality = 1;
        }
    } else {
        join.left_cardinality = features.left_relation_card;
        join.right_cardinality = features.right_relation_card;
    }

    record.join = Some(join);
    record
}

/// Register the model as the collector's predictor so the join-order planner
/// can consult it while exploring plans. Predictions are cached per thread by
/// relation-set fingerprint.
pub fn register_planner_predictor(collector: &FeatureCollector) {
    let model = BoostingModel::global();
    collector.register_predictor(Arc::new(move |features: &JoinFeatures| {
        if model.num_trees() < 2 {
            return 0.0;
        }

        PLANNER_CALLBACK_CACHE.with(|cell| {
            let mut cache = cell.borrow_mut();
            if let Some(&cached) = cache.get(&features.relation_set) {
                return cached;
            }

            let record = join_features_to_operator(features);
            let vector = features_to_vector(&record);
            let prediction = model.predict(&vector);

            if cache.len() >= PREDICTION_CACHE_CAPACITY {
                cache.clear();
            }
            cache.insert(features.relation_set.clone(), prediction);
            prediction
        })
    }));
}
