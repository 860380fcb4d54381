//! Feature extraction and vector encoding.
//!
//! Extraction reads a logical operator plus whatever the statistics
//! collector captured for it and produces a structured record; encoding
//! lowers the record into the frozen fixed-width vector. Both are pure:
//! nothing is mutated except the caller's output, so they are safe to call
//! from any number of planning threads.

use crate::optimizer::FeatureCollector;
use crate::planner::{ComparisonKind, JoinType, LogicalOperator, LogicalOperatorKind};

use super::{
    AggregateBlock, FeatureVector, FilterBlock, JoinBlock, OperatorFeatures, FEATURE_VECTOR_SIZE,
};

// Block offsets within the feature vector. The partition is a frozen
// contract with the model; changing it requires bumping FEATURE_VECTOR_SIZE
// and resetting the model.
const OP_TYPE_OFFSET: usize = 0;
const SCAN_OFFSET: usize = 10;
const JOIN_OFFSET: usize = 34;
const AGGREGATE_OFFSET: usize = 61;
const FILTER_OFFSET: usize = 65;
const CONTEXT_OFFSET: usize = 67;

/// ln(max(1, x)) — finite and monotone for any input.
fn safe_log(value: f64) -> f64 {
    value.max(1.0).ln()
}

fn safe_log_u64(value: u64) -> f64 {
    safe_log(value as f64)
}

/// Stable hash of a string, normalized to [0, 1).
fn normalized_hash(value: &str) -> f64 {
    (fxhash::hash64(value.as_bytes()) % 10_000) as f64 / 10_000.0
}

/// Extract a structured feature record for one logical operator.
///
/// Dispatch is by operator kind; collector-supplied details are overlaid
/// when present. Missing collector entries are not errors — the record
/// simply carries the coarser plan-level features.
pub fn extract_features(op: &LogicalOperator, collector: &FeatureCollector) -> OperatorFeatures {
    let mut features = OperatorFeatures::minimal(op.kind.name(), op.estimated_cardinality);

    match &op.kind {
        LogicalOperatorKind::TableScan {
            table,
            base_cardinality,
            filter_count,
        } => {
            let mut scan = collector.table_scan_features(op.id).unwrap_or_default();
            if scan.table_name.is_empty() {
                scan.table_name = table.clone();
            }
            if scan.base_cardinality == 0 {
                scan.base_cardinality = base_cardinality.unwrap_or(0);
            }
            if scan.num_table_filters == 0 {
                scan.num_table_filters = *filter_count;
            }
            features.scan = Some(scan);
        }
        LogicalOperatorKind::Filter { predicates } => {
            let mut filter = FilterBlock {
                predicate_kinds: predicates.clone(),
                comparison_kinds: Vec::new(),
                child_cardinality: op
                    .children
                    .first()
                    .map(|child| child.estimated_cardinality)
                    .unwrap_or(0),
            };
            if let Some(details) = collector.filter_features(op.id) {
                filter.comparison_kinds = details.comparison_kinds;
            }
            features.filter = Some(filter);
        }
        LogicalOperatorKind::ComparisonJoin {
            join_type,
            conditions,
        } => {
            let mut join = JoinBlock::new(*join_type);
            join.condition_count = conditions.len();
            join.equality_condition_count = conditions
                .iter()
                .filter(|c| c.comparison == ComparisonKind::Equal)
                .count();
            if !conditions.is_empty() {
                let n = conditions.len() as f64;
                join.key_same_type_ratio =
                    conditions.iter().filter(|c| c.same_types).count() as f64 / n;
                join.key_simple_ref_ratio =
                    conditions.iter().filter(|c| c.simple_references).count() as f64 / n;
                let signature: String = conditions
                    .iter()
                    .map(|c| c.comparison.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                join.key_signature_hash = normalized_hash(&signature);
            }
            if op.children.len() >= 2 {
                join.left_cardinality = op.children[0].estimated_cardinality;
                join.right_cardinality = op.children[1].estimated_cardinality;
            }
            // Prefer the operator-keyed entry; fall back to the
            // estimated-cardinality key the join-order planner records under.
            let details = collector.join_features(op.id).or_else(|| {
                if op.estimated_cardinality > 0 {
                    collector.join_features_by_estimate(op.estimated_cardinality)
                } else {
                    None
                }
            });
            if let Some(details) = details {
                join.overlay(&details);
            }
            features.join = Some(join);
        }
        LogicalOperatorKind::Aggregate {
            group_count,
            aggregate_count,
            grouping_set_count,
        } => {
            features.aggregate = Some(AggregateBlock {
                group_count: *group_count,
                aggregate_count: *aggregate_count,
                grouping_set_count: *grouping_set_count,
            });
        }
        _ => {}
    }

    features
}

fn write_comparison_one_hot(vector: &mut [f64], offset: usize, kinds: &[ComparisonKind]) {
    for kind in kinds {
        let slot = match kind {
            ComparisonKind::Equal => 0,
            ComparisonKind::LessThan => 1,
            ComparisonKind::GreaterThan => 2,
            ComparisonKind::LessThanOrEqualTo => 3,
            ComparisonKind::GreaterThanOrEqualTo => 4,
            ComparisonKind::NotEqual => 5,
        };
        vector[offset + slot] = 1.0;
    }
}

/// Lower a feature record into the frozen fixed-width vector.
pub fn features_to_vector(features: &OperatorFeatures) -> FeatureVector {
    let mut vector = vec![0.0; FEATURE_VECTOR_SIZE];

    // 1. Operator type one-hot.
    // GET, JOIN, FILTER, AGGREGATE, then slot 9 for everything else.
    let type_slot = if features.scan.is_some() {
        0
    } else if features.join.is_some() {
        1
    } else if features.filter.is_some() {
        2
    } else if features.aggregate.is_some() {
        3
    } else {
        9
    };
    vector[OP_TYPE_OFFSET + type_slot] = 1.0;

    // 2. Table scan block.
    if let Some(scan) = &features.scan {
        let mut idx = SCAN_OFFSET;
        vector[idx] = normalized_hash(&scan.table_name);
        idx += 1;
        vector[idx] = safe_log_u64(scan.base_cardinality);
        idx += 1;
        vector[idx] = scan.num_table_filters as f64;
        idx += 1;
        vector[idx] = scan.filter_selectivity.clamp(0.0, 1.0);
        idx += 1;
        vector[idx] = if scan.used_default_selectivity { 1.0 } else { 0.0 };
        idx += 1;
        vector[idx] = scan.filter_kinds.len() as f64;
        idx += 1;
        vector[idx] = scan.column_distinct_counts.len() as f64;
        idx += 1;

        // Column distinct-count statistics. Aggregates only, so map
        // iteration order cannot leak into the encoding.
        if !scan.column_distinct_counts.is_empty() && scan.base_cardinality > 0 {
            let base = scan.base_cardinality as f64;
            let mut ratio_sum = 0.0;
            let mut log_sum = 0.0;
            let mut min_ratio = 1.0_f64;
            let mut max_ratio = 0.0_f64;
            let mut min_distinct = scan.base_cardinality;
            let mut max_distinct = 0_u64;
            let mut high_card_columns = 0_u64;
            let mut low_card_columns = 0_u64;
            for &distinct in scan.column_distinct_counts.values() {
                let ratio = (distinct as f64 / base).clamp(0.0, 1.0);
                ratio_sum += ratio;
                log_sum += safe_log_u64(distinct);
                min_ratio = min_ratio.min(ratio);
                max_ratio = max_ratio.max(ratio);
                min_distinct = min_distinct.min(distinct);
                max_distinct = max_distinct.max(distinct);
                if ratio > 0.5 {
                    high_card_columns += 1;
                }
                if ratio < 0.05 {
                    low_card_columns += 1;
                }
            }
            let columns = scan.column_distinct_counts.len() as f64;
            vector[idx] = ratio_sum / columns;
            vector[idx + 1] = max_ratio;
            vector[idx + 2] = min_ratio;
            vector[idx + 3] = log_sum / columns;
            vector[idx + 4] = high_card_columns as f64;
            vector[idx + 5] = low_card_columns as f64;
            vector[idx + 6] = safe_log_u64(min_distinct);
            vector[idx + 7] = safe_log_u64(max_distinct);
        }
        idx += 8;

        write_comparison_one_hot(&mut vector, idx, &scan.comparison_kinds);
        // Slots idx+6 .. SCAN_OFFSET+24 stay zero.
    }

    // 3. Join block.
    if let Some(join) = &features.join {
        let mut idx = JOIN_OFFSET;
        vector[idx] = safe_log_u64(join.left_cardinality);
        idx += 1;
        vector[idx] = safe_log_u64(join.right_cardinality);
        idx += 1;
        vector[idx] = safe_log_u64(join.tdom_value);
        idx += 1;
        vector[idx] = if join.tdom_from_hll { 1.0 } else { 0.0 };
        idx += 1;

        let join_type_slot = match join.join_type {
            JoinType::Inner => Some(0),
            JoinType::Left => Some(1),
            JoinType::Right => Some(2),
            JoinType::Semi => Some(3),
            JoinType::Anti => Some(4),
            JoinType::Full | JoinType::Mark => None,
        };
        if let Some(slot) = join_type_slot {
            vector[idx + slot] = 1.0;
        }
        idx += 5;

        if let Some(comparison) = join.comparison_kind {
            write_comparison_one_hot(&mut vector, idx, &[comparison]);
        }
        idx += 6;

        vector[idx] = safe_log(join.extra_ratio);
        idx += 1;
        vector[idx] = safe_log(join.numerator);
        idx += 1;
        vector[idx] = safe_log(join.denominator);
        idx += 1;
        vector[idx] = join.relation_count as f64;
        idx += 1;
        vector[idx] = safe_log(join.left_denominator);
        idx += 1;
        vector[idx] = safe_log(join.right_denominator);
        idx += 1;

        // Derived selectivity features. These separate high-selectivity
        // joins from cross-product-like joins that plain cardinalities
        // cannot distinguish.
        let left = join.left_cardinality as f64;
        let right = join.right_cardinality as f64;
        let cross_product = left * right;
        let selectivity_factor = if join.denominator > 0.0 {
            cross_product / join.denominator
        } else {
            1.0
        };
        vector[idx] = safe_log(selectivity_factor);
        idx += 1;
        let tdom_ratio = if join.left_cardinality > 0 && join.right_cardinality > 0 && join.tdom_value > 0
        {
            join.tdom_value as f64 / ((left + right) / 2.0)
        } else {
            0.0
        };
        vector[idx] = tdom_ratio;
        idx += 1;
        let selectivity_ratio = if join.numerator > 0.0 {
            join.denominator / join.numerator
        } else {
            1.0
        };
        vector[idx] = safe_log(selectivity_ratio);
        idx += 1;
        let size_imbalance = if join.left_cardinality > 0 && join.right_cardinality > 0 {
            left.max(right) / left.min(right)
        } else {
            1.0
        };
        vector[idx] = safe_log(size_imbalance);
        idx += 1;
        vector[idx] = if join.tdom_value > 0 && join.tdom_value < 1000 {
            1.0
        } else {
            0.0
        };
        idx += 1;
        let expected_output = if join.numerator > 0.0 && join.denominator > 0.0 {
            join.numerator / join.denominator
        } else {
            0.0
        };
        vector[idx] = safe_log(expected_output);
    }

    // 4. Aggregate block.
    if let Some(aggregate) = &features.aggregate {
        vector[AGGREGATE_OFFSET] = safe_log_u64(features.estimated_cardinality);
        vector[AGGREGATE_OFFSET + 1] = aggregate.group_count as f64;
        vector[AGGREGATE_OFFSET + 2] = aggregate.aggregate_count as f64;
        vector[AGGREGATE_OFFSET + 3] = aggregate.grouping_set_count as f64;
    }

    // 5. Filter block.
    if let Some(filter) = &features.filter {
        vector[FILTER_OFFSET] = safe_log_u64(filter.child_cardinality);
        vector[FILTER_OFFSET + 1] = filter.predicate_kinds.len() as f64;
    }

    // 6. Context: the engine's own estimate, always present.
    vector[CONTEXT_OFFSET] = safe_log_u64(features.estimated_cardinality);

    // Remaining slots are padding, already zero.
    vector
}
