//! Per-operator feature records and the fixed-width vector encoding.
//!
//! `OperatorFeatures` is the structured record the extractor builds from a
//! logical operator plus collector hints; `FeatureVector` is its dense
//! numeric encoding. The vector layout is a frozen contract with the model:
//! changing it requires bumping [`FEATURE_VECTOR_SIZE`] and resetting the
//! model — there is no migration path.

mod extract;

pub use extract::{extract_features, features_to_vector};

use fxhash::FxHashMap;

use crate::planner::{ComparisonKind, FilterExpressionKind, JoinType};

/// Width of every feature vector accepted by the model.
///
/// One-hot operator type (10) + table scan (24) + join (27) + aggregate (4)
/// + filter (2) + context (1) + zero padding (12).
pub const FEATURE_VECTOR_SIZE: usize = 80;

/// Dense fixed-width feature vector.
pub type FeatureVector = Vec<f64>;

/// Table-scan features captured during statistics propagation.
#[derive(Debug, Clone, Default)]
pub struct TableScanFeatures {
    pub table_name: String,
    pub base_cardinality: u64,
    /// column name → estimated distinct count (HLL-backed when available)
    pub column_distinct_counts: FxHashMap<String, u64>,
    pub num_table_filters: usize,
    /// Cardinality after applying all pushed-down filters
    pub final_cardinality: u64,
    pub filter_selectivity: f64,
    pub used_default_selectivity: bool,
    pub cardinality_after_default_selectivity: u64,
    pub filter_kinds: Vec<FilterExpressionKind>,
    pub comparison_kinds: Vec<ComparisonKind>,
    pub filter_column_ids: Vec<u64>,
}

/// Join features captured by the statistics propagator / join-order planner.
#[derive(Debug, Clone)]
pub struct JoinFeatures {
    pub join_type: JoinType,
    pub tdom_value: u64,
    pub tdom_from_hll: bool,
    /// Canonical fingerprint of the set of base relations joined
    pub relation_set: String,
    pub relation_count: usize,
    pub left_relation_card: u64,
    pub right_relation_card: u64,
    pub left_denominator: f64,
    pub right_denominator: f64,
    pub comparison_kind: Option<ComparisonKind>,
    pub extra_ratio: f64,
    /// Product of input cardinalities
    pub numerator: f64,
    /// TDOM-derived denominator
    pub denominator: f64,
    /// The engine's estimate when this entry was recorded; also the key of
    /// the by-estimate collector map
    pub estimated_cardinality: u64,
}

impl Default for JoinFeatures {
    fn default() -> Self {
        Self {
            join_type: JoinType::Inner,
            tdom_value: 0,
            tdom_from_hll: false,
            relation_set: String::new(),
            relation_count: 0,
            left_relation_card: 0,
            right_relation_card: 0,
            left_denominator: 1.0,
            right_denominator: 1.0,
            comparison_kind: None,
            extra_ratio: 1.0,
            numerator: 0.0,
            denominator: 1.0,
            estimated_cardinality: 0,
        }
    }
}

/// Standalone-filter features captured during statistics propagation.
#[derive(Debug, Clone, Default)]
pub struct FilterFeatures {
    pub comparison_kinds: Vec<ComparisonKind>,
}

/// Join block of an operator feature record.
#[derive(Debug, Clone)]
pub struct JoinBlock {
    pub join_type: JoinType,
    pub condition_count: usize,
    pub equality_condition_count: usize,
    /// Hash of the join-key signature, normalized to [0,1]
    pub key_signature_hash: f64,
    /// Fraction of conditions whose sides share a type, in [0,1]
    pub key_same_type_ratio: f64,
    /// Fraction of conditions over plain column references, in [0,1]
    pub key_simple_ref_ratio: f64,
    /// Estimated cardinality of the left child
    pub left_cardinality: u64,
    /// Estimated cardinality of the right child
    pub right_cardinality: u64,
    pub tdom_value: u64,
    pub tdom_from_hll: bool,
    pub relation_set: String,
    pub relation_count: usize,
    pub left_denominator: f64,
    pub right_denominator: f64,
    pub comparison_kind: Option<ComparisonKind>,
    pub extra_ratio: f64,
    pub numerator: f64,
    pub denominator: f64,
}

impl JoinBlock {
    /// A join block with neutral denominators and no collector overlay.
    pub fn new(join_type: JoinType) -> Self {
        Self {
            join_type,
            condition_count: 0,
            equality_condition_count: 0,
            key_signature_hash: 0.0,
            key_same_type_ratio: 0.0,
            key_simple_ref_ratio: 0.0,
            left_cardinality: 0,
            right_cardinality: 0,
            tdom_value: 0,
            tdom_from_hll: false,
            relation_set: String::new(),
            relation_count: 0,
            left_denominator: 1.0,
            right_denominator: 1.0,
            comparison_kind: None,
            extra_ratio: 1.0,
            numerator: 0.0,
            denominator: 1.0,
        }
    }

    /// Copy collector-supplied fields into this block.
    pub fn overlay(&mut self, details: &JoinFeatures) {
        self.tdom_value = details.tdom_value;
        self.tdom_from_hll = details.tdom_from_hll;
        self.relation_set = details.relation_set.clone();
        self.relation_count = details.relation_count;
        self.left_denominator = details.left_denominator;
        self.right_denominator = details.right_denominator;
        self.comparison_kind = details.comparison_kind;
        self.extra_ratio = details.extra_ratio;
        self.numerator = details.numerator;
        self.denominator = details.denominator;
    }
}

/// Filter block of an operator feature record.
#[derive(Debug, Clone, Default)]
pub struct FilterBlock {
    pub predicate_kinds: Vec<FilterExpressionKind>,
    pub comparison_kinds: Vec<ComparisonKind>,
    /// Estimated cardinality of the filter's child
    pub child_cardinality: u64,
}

/// Aggregate block of an operator feature record.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregateBlock {
    pub group_count: usize,
    pub aggregate_count: usize,
    pub grouping_set_count: usize,
}

/// Structured feature record for a single operator.
#[derive(Debug, Clone)]
pub struct OperatorFeatures {
    /// Stable operator kind tag (fingerprints, logs)
    pub operator_kind: &'static str,
    /// The engine's cardinality estimate for the operator
    pub estimated_cardinality: u64,
    pub scan: Option<TableScanFeatures>,
    pub join: Option<JoinBlock>,
    pub filter: Option<FilterBlock>,
    pub aggregate: Option<AggregateBlock>,
}

impl OperatorFeatures {
    /// A minimal record with zero-filled specific blocks.
    pub fn minimal(operator_kind: &'static str, estimated_cardinality: u64) -> Self {
        Self {
            operator_kind,
            estimated_cardinality,
            scan: None,
            join: None,
            filter: None,
            aggregate: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_features_defaults_are_neutral() {
        let features = JoinFeatures::default();
        assert_eq!(features.extra_ratio, 1.0);
        assert_eq!(features.denominator, 1.0);
        assert_eq!(features.left_denominator, 1.0);
        assert_eq!(features.tdom_value, 0);
    }

    #[test]
    fn test_overlay_copies_collector_fields() {
        let mut block = JoinBlock::new(JoinType::Inner);
        let details = JoinFeatures {
            tdom_value: 42,
            tdom_from_hll: true,
            relation_set: "[1, 3]".into(),
            relation_count: 2,
            numerator: 1e6,
            denominator: 50.0,
            ..Default::default()
        };
        block.overlay(&details);
        assert_eq!(block.tdom_value, 42);
        assert!(block.tdom_from_hll);
        assert_eq!(block.relation_set, "[1, 3]");
        assert_eq!(block.denominator, 50.0);
    }
}
