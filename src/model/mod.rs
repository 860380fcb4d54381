//! The shared GBT model and everything that feeds it.

mod booster;
mod boosting_model;
mod buffer;
mod interface;
mod tree;

pub use booster::{Booster, BoosterParams};
pub use boosting_model::BoostingModel;
pub use buffer::{TrainingBuffer, TrainingSample, DEFAULT_BUFFER_CAPACITY};
pub use interface::{
    register_planner_predictor, ModelInterface, MAX_PREDICTIONS_PER_QUERY,
    PREDICTION_CACHE_CAPACITY,
};
pub use tree::{RegressionTree, TreeParams};
