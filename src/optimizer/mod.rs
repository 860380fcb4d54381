//! Optimizer-side integration.
//!
//! The statistics collector captures per-operator auxiliary features while
//! the engine propagates statistics, and the cardinality rewriter (the
//! optional optimizer hook) steers planning with model predictions.

mod cardinality_rewrite;
mod collector;

pub use cardinality_rewrite::{CardinalityRewriter, RewriteMode};
pub use collector::{FeatureCollector, PredictorCallback, MAP_CAPACITY};
