//! Execution-side integration: tracker state, the post-query collection
//! walk, and the physical-plan generator shim.

mod physical_planner;
mod tracker;

pub use physical_planner::PhysicalPlanner;
pub use tracker::{
    collect_actual_cardinalities, collect_actual_cardinalities_with_model, ExecutionTracker,
    OperatorRowStats, TrackerState, COLLECTION_WINDOW,
};
