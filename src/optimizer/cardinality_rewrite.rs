//! Optimizer hook: rewrite logical estimates to model predictions.
//!
//! A post-order visitor over the logical plan. Children are rewritten first
//! so each operator's prediction sees updated child context; the engine's
//! original estimate is preserved in the baseline shadow field before the
//! first overwrite, keeping it available for the physical-plan trackers and
//! for logging. Downstream optimizer decisions — join algorithm, build side,
//! top-N — then run on the rewritten estimates.
//!
//! This hook is optional and the only place predictions may influence
//! planning; the physical side is observe-only.

use crate::features::extract_features;
use crate::model::ModelInterface;
use crate::planner::LogicalOperator;

use super::FeatureCollector;

/// How a prediction combines with the engine's estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RewriteMode {
    /// Replace the estimate outright.
    #[default]
    Replace,
    /// Take the geometric mean of prediction and engine estimate.
    GeometricMean,
}

/// Post-order visitor that applies planning predictions to a logical plan.
pub struct CardinalityRewriter<'a> {
    collector: &'a FeatureCollector,
    interface: ModelInterface,
    mode: RewriteMode,
}

impl<'a> CardinalityRewriter<'a> {
    pub fn new(collector: &'a FeatureCollector, interface: ModelInterface) -> Self {
        Self {
            collector,
            interface,
            mode: RewriteMode::Replace,
        }
    }

    pub fn with_mode(mut self, mode: RewriteMode) -> Self {
        self.mode = mode;
        self
    }

    /// Rewrite estimates across a whole plan, children before parents.
    pub fn rewrite(&self, op: &mut LogicalOperator) {
        for child in &mut op.children {
            self.rewrite(child);
        }
        self.apply(op);
    }

    fn apply(&self, op: &mut LogicalOperator) {
        // Preserve the engine baseline the first time we touch this node.
        if op.baseline_cardinality.is_none() {
            op.baseline_cardinality = Some(op.estimated_cardinality);
        }

        let mut features = extract_features(op, self.collector);
        // Fill missing child-cardinality context from the first child.
        if let Some(filter) = features.filter.as_mut() {
            if filter.child_cardinality == 0 {
                if let Some(child) = op.children.first() {
                    filter.child_cardinality = child.estimated_cardinality;
                }
            }
        }

        let prediction = self.interface.predict_planning_cardinality(&features);
        if prediction == 0 {
            return;
        }
        let effective = match self.mode {
            RewriteMode::Replace => prediction,
            RewriteMode::GeometricMean => {
                let baseline = op.baseline_estimate().max(1) as f64;
                (prediction as f64 * baseline).sqrt() as u64
            }
        };
        op.estimated_cardinality = effective.max(1);
    }
}
