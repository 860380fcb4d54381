//! Process-wide statistics collector.
//!
//! During statistics propagation the engine records per-operator auxiliary
//! features here: table-scan filter breakdowns, join TDOM and denominator
//! terms. Entries are keyed three ways — operator identity, relation-set
//! fingerprint, and estimated cardinality — because the join-order planner
//! explores plans whose operators do not survive into the final tree.
//!
//! This is the only place cross-plan state lives; the engine must call
//! [`FeatureCollector::clear`] after every query. All maps share one mutex
//! and are bounded: exceeding [`MAP_CAPACITY`] clears the map wholesale
//! before the insert, never partially.

use std::sync::{Arc, LazyLock};

use fxhash::FxHashMap;
use parking_lot::Mutex;

use crate::features::{FilterFeatures, JoinFeatures, TableScanFeatures};
use crate::planner::OperatorId;

/// Hard bound on every collector map.
pub const MAP_CAPACITY: usize = 500;

/// Callback the prediction interface registers so the join-order planner can
/// consult the model while exploring plans.
pub type PredictorCallback = Arc<dyn Fn(&JoinFeatures) -> f64 + Send + Sync>;

#[derive(Default)]
struct CollectorState {
    table_scans: FxHashMap<OperatorId, TableScanFeatures>,
    joins: FxHashMap<OperatorId, JoinFeatures>,
    joins_by_relation_set: FxHashMap<String, JoinFeatures>,
    joins_by_estimate: FxHashMap<u64, JoinFeatures>,
    filters: FxHashMap<OperatorId, FilterFeatures>,
    predictor: Option<PredictorCallback>,
}

/// Registry of features captured during statistics propagation.
pub struct FeatureCollector {
    state: Mutex<CollectorState>,
}

impl FeatureCollector {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CollectorState::default()),
        }
    }

    /// The process-wide collector instance.
    pub fn global() -> &'static FeatureCollector {
        static COLLECTOR: LazyLock<FeatureCollector> = LazyLock::new(FeatureCollector::new);
        &COLLECTOR
    }

    /// Record table-scan features for an operator. Idempotent by key.
    pub fn add_table_scan_features(&self, op: OperatorId, features: TableScanFeatures) {
        let mut state = self.state.lock();
        if state.table_scans.len() > MAP_CAPACITY {
            state.table_scans.clear();
        }
        state.table_scans.insert(op, features);
    }

    /// Record join features for an operator. Idempotent by key.
    pub fn add_join_features(&self, op: OperatorId, features: JoinFeatures) {
        let mut state = self.state.lock();
        if state.joins.len() > MAP_CAPACITY {
            state.joins.clear();
        }
        state.joins.insert(op, features);
    }

    /// Record join features under the relation-set fingerprint, and under the
    /// estimated-cardinality key when the estimate is known. The two maps are
    /// cleared together so they never disagree about which plans they cover.
    pub fn add_join_features_by_relation_set(&self, relation_set: &str, features: JoinFeatures) {
        let mut state = self.state.lock();
        if state.joins_by_relation_set.len() > MAP_CAPACITY {
            state.joins_by_relation_set.clear();
            state.joins_by_estimate.clear();
        }
        if features.estimated_cardinality > 0 {
            state
                .joins_by_estimate
                .insert(features.estimated_cardinality, features.clone());
        }
        state
            .joins_by_relation_set
            .insert(relation_set.to_string(), features);
    }

    /// Record standalone-filter features for an operator. Idempotent by key.
    pub fn add_filter_features(&self, op: OperatorId, features: FilterFeatures) {
        let mut state = self.state.lock();
        if state.filters.len() > MAP_CAPACITY {
            state.filters.clear();
        }
        state.filters.insert(op, features);
    }

    /// Look up table-scan features, copying out of the registry.
    pub fn table_scan_features(&self, op: OperatorId) -> Option<TableScanFeatures> {
        self.state.lock().table_scans.get(&op).cloned()
    }

    /// Look up join features by operator identity.
    pub fn join_features(&self, op: OperatorId) -> Option<JoinFeatures> {
        self.state.lock().joins.get(&op).cloned()
    }

    /// Look up join features by relation-set fingerprint.
    pub fn join_features_by_relation_set(&self, relation_set: &str) -> Option<JoinFeatures> {
        self.state
            .lock()
            .joins_by_relation_set
            .get(relation_set)
            .cloned()
    }

    /// Look up join features by the engine's estimated cardinality.
    pub fn join_features_by_estimate(&self, estimated_cardinality: u64) -> Option<JoinFeatures> {
        self.state
            .lock()
            .joins_by_estimate
            .get(&estimated_cardinality)
            .cloned()
    }

    /// Look up standalone-filter features by operator identity.
    pub fn filter_features(&self, op: OperatorId) -> Option<FilterFeatures> {
        self.state.lock().filters.get(&op).cloned()
    }

    /// Register the model-side predictor consulted by
    /// [`predict_cardinality`](Self::predict_cardinality).
    pub fn register_predictor(&self, callback: PredictorCallback) {
        self.state.lock().predictor = Some(callback);
    }

    /// Predict the cardinality of a join set while the planner explores
    /// plans. Returns 0.0 when no predictor is registered or the model
    /// declines. The callback is cloned out under the lock and invoked
    /// outside it.
    pub fn predict_cardinality(&self, features: &JoinFeatures) -> f64 {
        let predictor = self.state.lock().predictor.clone();
        match predictor {
            Some(predict) => predict(features),
            None => 0.0,
        }
    }

    /// Number of entries in the relation-set map (observability and tests).
    pub fn relation_set_entries(&self) -> usize {
        self.state.lock().joins_by_relation_set.len()
    }

    /// Drop every captured entry. Called by the engine after each query.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.table_scans.clear();
        state.joins.clear();
        state.joins_by_relation_set.clear();
        state.joins_by_estimate.clear();
        state.filters.clear();
    }
}

impl Default for FeatureCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::JoinType;

    fn join_features(relation_set: &str, estimate: u64) -> JoinFeatures {
        JoinFeatures {
            join_type: JoinType::Inner,
            relation_set: relation_set.into(),
            relation_count: 2,
            estimated_cardinality: estimate,
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_is_idempotent_by_key() {
        let collector = FeatureCollector::new();
        let op = OperatorId::next();
        collector.add_join_features(op, join_features("[1, 2]", 10));
        collector.add_join_features(op, join_features("[1, 2]", 20));
        assert_eq!(
            collector.join_features(op).unwrap().estimated_cardinality,
            20
        );
    }

    #[test]
    fn test_missing_entries_are_not_errors() {
        let collector = FeatureCollector::new();
        assert!(collector.table_scan_features(OperatorId::next()).is_none());
        assert!(collector.join_features_by_relation_set("[9]").is_none());
    }

    #[test]
    fn test_overflow_clears_wholesale() {
        let collector = FeatureCollector::new();
        for i in 0..=(MAP_CAPACITY as u64) {
            collector
                .add_join_features_by_relation_set(&format!("[{i}]"), join_features("", i + 1));
        }
        assert_eq!(collector.relation_set_entries(), MAP_CAPACITY + 1);
        // The next insert finds the map over capacity and clears it first.
        collector.add_join_features_by_relation_set("[overflow]", join_features("", 999_999));
        assert_eq!(collector.relation_set_entries(), 1);
        assert!(collector
            .join_features_by_relation_set("[overflow]")
            .is_some());
        // The estimate-keyed map was cleared together with it.
        assert!(collector.join_features_by_estimate(1).is_none());
        assert!(collector.join_features_by_estimate(999_999).is_some());
    }

    #[test]
    fn test_clear_drops_everything() {
        let collector = FeatureCollector::new();
        let op = OperatorId::next();
        collector.add_table_scan_features(op, TableScanFeatures::default());
        collector.add_filter_features(op, FilterFeatures::default());
        collector.add_join_features_by_relation_set("[1]", join_features("[1]", 5));
        collector.clear();
        assert!(collector.table_scan_features(op).is_none());
        assert!(collector.filter_features(op).is_none());
        assert!(collector.join_features_by_relation_set("[1]").is_none());
        assert!(collector.join_features_by_estimate(5).is_none());
    }

    #[test]
    fn test_predictor_round_trip() {
        let collector = FeatureCollector::new();
        assert_eq!(collector.predict_cardinality(&join_features("[1]", 1)), 0.0);
        collector.register_predictor(Arc::new(|features| {
            features.estimated_cardinality as f64 * 2.0
        }));
        assert_eq!(
            collector.predict_cardinality(&join_features("[1]", 21)),
            42.0
        );
    }
}
