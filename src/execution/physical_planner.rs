//! Physical-plan generation with observe-only predictions.
//!
//! For every logical operator the generator builds the physical children,
//! extracts features, computes a model prediction, and attaches tracker
//! state to the physical operator — but the operator itself is always built
//! from the engine's estimate. Only the optimizer hook is permitted to steer
//! planning with predictions; here they are recorded for training and
//! nothing else.

use crate::features::extract_features;
use crate::model::ModelInterface;
use crate::optimizer::FeatureCollector;
use crate::planner::{
    ComparisonKind, JoinCondition, LogicalOperator, LogicalOperatorKind, PhysicalOperator,
    PhysicalOperatorKind,
};

/// Below this input size, range joins fall back to nested-loop execution.
const NESTED_LOOP_JOIN_THRESHOLD: u64 = 1024;

/// Generates the physical plan for a compiled query.
pub struct PhysicalPlanner<'a> {
    collector: &'a FeatureCollector,
    interface: ModelInterface,
}

fn is_range_comparison(comparison: ComparisonKind) -> bool {
    matches!(
        comparison,
        ComparisonKind::LessThan
            | ComparisonKind::GreaterThan
            | ComparisonKind::LessThanOrEqualTo
            | ComparisonKind::GreaterThanOrEqualTo
    )
}

/// Pick the join algorithm from the condition structure and the inputs'
/// engine estimates.
fn join_operator_kind(
    conditions: &[JoinCondition],
    left_estimate: u64,
    right_estimate: u64,
) -> PhysicalOperatorKind {
    if conditions.is_empty() {
        return PhysicalOperatorKind::CrossProduct;
    }
    if conditions
        .iter()
        .any(|c| c.comparison == ComparisonKind::Equal)
    {
        return PhysicalOperatorKind::HashJoin;
    }
    let has_range = conditions.iter().any(|c| is_range_comparison(c.comparison));
    if has_range
        && left_estimate >= NESTED_LOOP_JOIN_THRESHOLD
        && right_estimate >= NESTED_LOOP_JOIN_THRESHOLD
    {
        return PhysicalOperatorKind::PiecewiseMergeJoin;
    }
    if conditions
        .iter()
        .all(|c| is_range_comparison(c.comparison) || c.comparison == ComparisonKind::NotEqual)
    {
        return PhysicalOperatorKind::NestedLoopJoin;
    }
    PhysicalOperatorKind::BlockwiseNlJoin
}

fn physical_kind(op: &LogicalOperator, children: &[PhysicalOperator]) -> PhysicalOperatorKind {
    match &op.kind {
        LogicalOperatorKind::TableScan { .. } => PhysicalOperatorKind::TableScan,
        LogicalOperatorKind::Filter { .. } => PhysicalOperatorKind::Filter,
        LogicalOperatorKind::ComparisonJoin { conditions, .. } => {
            let left = children.first().map(|c| c.estimated_cardinality).unwrap_or(0);
            let right = children.get(1).map(|c| c.estimated_cardinality).unwrap_or(0);
            join_operator_kind(conditions, left, right)
        }
        LogicalOperatorKind::Aggregate { .. } => PhysicalOperatorKind::HashAggregate,
        LogicalOperatorKind::Projection => PhysicalOperatorKind::Projection,
        LogicalOperatorKind::Order => PhysicalOperatorKind::Order,
        LogicalOperatorKind::TopN { .. } => PhysicalOperatorKind::TopN,
        LogicalOperatorKind::Limit { .. } => PhysicalOperatorKind::Limit,
        LogicalOperatorKind::CrossProduct => PhysicalOperatorKind::CrossProduct,
        LogicalOperatorKind::Union => PhysicalOperatorKind::Union,
        LogicalOperatorKind::Window => PhysicalOperatorKind::Window,
        LogicalOperatorKind::Distinct => PhysicalOperatorKind::Distinct,
    }
}

impl<'a> PhysicalPlanner<'a> {
    pub fn new(collector: &'a FeatureCollector, interface: ModelInterface) -> Self {
        Self {
            collector,
            interface,
        }
    }

    /// Build the physical plan for a logical subtree.
    pub fn create_plan(&self, op: &LogicalOperator) -> PhysicalOperator {
        let children: Vec<PhysicalOperator> =
            op.children.iter().map(|child| self.create_plan(child)).collect();

        let mut features = extract_features(op, self.collector);
        // Filters take their child-cardinality context from the physical
        // child that was actually built.
        if let Some(filter) = features.filter.as_mut() {
            if let Some(child) = children.first() {
                filter.child_cardinality = child.estimated_cardinality;
            }
        }

        let engine_estimate = op.baseline_estimate();
        let raw_prediction = self.interface.predict_cardinality(&features);
        let rl_prediction = if raw_prediction > 0 {
            raw_prediction
        } else {
            engine_estimate
        };

        // The operator is built from the engine estimate; the prediction is
        // only recorded on the tracker.
        let kind = physical_kind(op, &children);
        let mut physical =
            PhysicalOperator::new(kind, op.estimated_cardinality).with_children(children);
        self.interface
            .attach_state(&mut physical, &features, rl_prediction, engine_estimate);
        physical
    }
}
