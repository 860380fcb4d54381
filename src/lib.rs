//! ember — online-learning cardinality estimation for analytical query
//! engines.
//!
//! ember augments an engine's built-in cardinality estimator with a
//! gradient-boosted-trees model that learns from the engine's own
//! executions. During compilation, features are extracted from every
//! logical operator and a shared ensemble predicts a log-cardinality that
//! is attached to the physical operator alongside the engine's estimate.
//! After execution, actual row counts are joined with the feature vectors
//! into training samples, and a handful of new trees are added from a
//! sliding window of recent samples. The next query sees the updated model
//! — there is no offline training phase.
//!
//! Predictions are observe-only on the physical plan: operators are always
//! built from the engine's estimate, and the model's number is recorded for
//! training. Only the optional [`optimizer::CardinalityRewriter`] hook is
//! allowed to steer planning decisions with predictions. Whenever the model
//! is cold, unsure, or failing, every entry point degrades to the 0
//! sentinel and the engine's baseline estimator carries the query.
//!
//! # Per-query flow
//!
//! ```rust,no_run
//! use ember::execution::{collect_actual_cardinalities, PhysicalPlanner};
//! use ember::model::{ModelInterface, TrainingBuffer};
//! use ember::optimizer::FeatureCollector;
//! use ember::planner::{LogicalOperator, LogicalOperatorKind};
//!
//! let collector = FeatureCollector::global();
//! let query_id = 1;
//!
//! // 1. The engine compiles the query; statistics propagation fills the
//! //    collector. 2. Physical planning predicts and attaches trackers.
//! let logical = LogicalOperator::new(
//!     LogicalOperatorKind::TableScan {
//!         table: "lineitem".into(),
//!         base_cardinality: Some(6_000_000),
//!         filter_count: 0,
//!     },
//!     6_000_000,
//! );
//! let planner = PhysicalPlanner::new(collector, ModelInterface::new(query_id));
//! let physical = planner.create_plan(&logical);
//!
//! // 3. Execution counts rows through the attached trackers...
//! if let Some(tracker) = &physical.tracker {
//!     tracker.add_rows(5_900_000);
//! }
//!
//! // 4. ...and completion turns them into training samples.
//! collect_actual_cardinalities(&physical, TrainingBuffer::global());
//! collector.clear();
//! ModelInterface::reset_prediction_caches_for_thread();
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod features;
pub mod model;
pub mod optimizer;
pub mod planner;

// Re-export commonly used types
pub use config::ModelConfig;
pub use error::{EmberError, Result};
pub use features::{OperatorFeatures, FEATURE_VECTOR_SIZE};
pub use model::{BoostingModel, ModelInterface, TrainingBuffer};
pub use optimizer::FeatureCollector;
