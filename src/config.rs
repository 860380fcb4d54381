//! Model configuration.
//!
//! Hyperparameters are read from `RL_*` environment variables exactly once at
//! startup and are immutable afterwards. Malformed values fall back to the
//! defaults silently; the learned estimator must never prevent the engine
//! from starting.

use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

/// Training objective for the booster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Objective {
    /// Squared-error regression (`reg:squarederror`)
    SquaredError,
    /// Absolute-error regression (`reg:absoluteerror`)
    AbsoluteError,
}

impl Objective {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "reg:squarederror" => Some(Self::SquaredError),
            "reg:absoluteerror" => Some(Self::AbsoluteError),
            _ => None,
        }
    }
}

/// Hyperparameters for the boosting model.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Maximum depth of each regression tree (`RL_MAX_DEPTH`)
    pub max_depth: usize,
    /// Learning rate / shrinkage (`RL_ETA`)
    pub learning_rate: f64,
    /// Trees added per incremental update (`RL_TREES_PER_UPDATE`)
    pub trees_per_update: usize,
    /// Row sampling fraction per tree (`RL_SUBSAMPLE`)
    pub subsample: f64,
    /// Feature sampling fraction per tree (`RL_COLSAMPLE_BYTREE`)
    pub colsample_bytree: f64,
    /// Minimum hessian sum in a leaf (`RL_MIN_CHILD_WEIGHT`)
    pub min_child_weight: f64,
    /// Training objective (`RL_OBJECTIVE`)
    pub objective: Objective,
    /// L2 regularization on leaf weights (`RL_LAMBDA`)
    pub lambda: f64,
    /// L1 regularization on leaf weights (`RL_ALPHA`)
    pub alpha: f64,
    /// Minimum loss reduction to split (`RL_GAMMA`)
    pub gamma: f64,
    /// Hard cap on ensemble size (`RL_MAX_TOTAL_TREES`)
    pub max_total_trees: usize,
    /// Shadow-to-active publication period in updates (`RL_SWAP_EVERY_N_UPDATES`)
    pub swap_every_n_updates: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_depth: 6,
            learning_rate: 0.1,
            trees_per_update: 10,
            subsample: 0.8,
            colsample_bytree: 0.8,
            min_child_weight: 3.0,
            objective: Objective::AbsoluteError,
            lambda: 1.0,
            alpha: 0.0,
            gamma: 0.0,
            max_total_trees: 2000,
            swap_every_n_updates: 5,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl ModelConfig {
    /// Read the configuration from `RL_*` environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_depth: env_parse("RL_MAX_DEPTH", defaults.max_depth),
            learning_rate: env_parse("RL_ETA", defaults.learning_rate),
            trees_per_update: env_parse("RL_TREES_PER_UPDATE", defaults.trees_per_update),
            subsample: env_parse("RL_SUBSAMPLE", defaults.subsample),
            colsample_bytree: env_parse("RL_COLSAMPLE_BYTREE", defaults.colsample_bytree),
            min_child_weight: env_parse("RL_MIN_CHILD_WEIGHT", defaults.min_child_weight),
            objective: std::env::var("RL_OBJECTIVE")
                .ok()
                .and_then(|v| Objective::parse(&v))
                .unwrap_or(defaults.objective),
            lambda: env_parse("RL_LAMBDA", defaults.lambda),
            alpha: env_parse("RL_ALPHA", defaults.alpha),
            gamma: env_parse("RL_GAMMA", defaults.gamma),
            max_total_trees: env_parse("RL_MAX_TOTAL_TREES", defaults.max_total_trees),
            swap_every_n_updates: env_parse(
                "RL_SWAP_EVERY_N_UPDATES",
                defaults.swap_every_n_updates,
            ),
        }
    }

    /// The process-wide configuration snapshot, read once on first use.
    pub fn global() -> &'static ModelConfig {
        static CONFIG: LazyLock<ModelConfig> = LazyLock::new(ModelConfig::from_env);
        &CONFIG
    }
}
