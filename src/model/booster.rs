//! Gradient booster.
//!
//! This is the tree-ensemble layer underneath the process-wide model: it
//! owns the trees, grows one per training iteration, and evaluates rows.
//! The API is deliberately narrow — train-one-iteration, predict, snapshot —
//! so the model above can treat it as an opaque handle and a different
//! boosting backend could sit behind the same seam.

use rand::prelude::SliceRandom;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::{ModelConfig, Objective};
use crate::error::{EmberError, Result};

use super::tree::{RegressionTree, TreeParams};

/// Hyperparameters the booster needs from the model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoosterParams {
    pub max_depth: usize,
    pub learning_rate: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub min_child_weight: f64,
    pub objective: Objective,
    pub lambda: f64,
    pub alpha: f64,
    pub gamma: f64,
}

impl From<&ModelConfig> for BoosterParams {
    fn from(config: &ModelConfig) -> Self {
        Self {
            max_depth: config.max_depth,
            learning_rate: config.learning_rate,
            subsample: config.subsample,
            colsample_bytree: config.colsample_bytree,
            min_child_weight: config.min_child_weight,
            objective: config.objective,
            lambda: config.lambda,
            alpha: config.alpha,
            gamma: config.gamma,
        }
    }
}

/// An additive ensemble of regression trees.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booster {
    params: BoosterParams,
    num_features: usize,
    base_score: f64,
    trees: Vec<RegressionTree>,
}

impl Booster {
    /// Create an empty booster for rows of exactly `num_features` columns.
    pub fn new(params: BoosterParams, num_features: usize) -> Self {
        Self {
            params,
            num_features,
            base_score: 0.0,
            trees: Vec::new(),
        }
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    fn check_width(&self, row: &[f64]) -> Result<()> {
        if row.len() != self.num_features {
            return Err(EmberError::FeatureWidth {
                got: row.len(),
                expected: self.num_features,
            });
        }
        Ok(())
    }

    /// Raw margin for one row: base score plus the sum of tree outputs.
    pub fn predict_row(&self, row: &[f64]) -> Result<f64> {
        self.check_width(row)?;
        let mut output = self.base_score;
        for tree in &self.trees {
            output += tree.predict(row);
        }
        Ok(output)
    }

    /// Raw margins for an n-row dense matrix.
    pub fn predict_matrix(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }

    fn gradient(&self, predicted: f64, label: f64) -> (f64, f64) {
        match self.params.objective {
            Objective::SquaredError => (predicted - label, 1.0),
            // Absolute error: constant-magnitude gradient, unit hessian so
            // leaf weights stay bounded by the learning rate.
            Objective::AbsoluteError => ((predicted - label).signum(), 1.0),
        }
    }

    /// Add exactly one tree fitted to the current residuals.
    ///
    /// `iteration` seeds row and column sampling, so a given update sequence
    /// is reproducible. Rows must all have the frozen feature width.
    pub fn train_one_iter(&mut self, iteration: u64, rows: &[Vec<f64>], labels: &[f64]) -> Result<()> {
        if rows.is_empty() {
            return Err(EmberError::training("no training rows"));
        }
        if rows.len() != labels.len() {
            return Err(EmberError::training(format!(
                "rows/labels mismatch: {} vs {}",
                rows.len(),
                labels.len()
            )));
        }
        for row in rows {
            self.check_width(row)?;
        }

        let mut gradients = Vec::with_capacity(rows.len());
        let mut hessians = Vec::with_capacity(rows.len());
        for (row, &label) in rows.iter().zip(labels) {
            let predicted = self.predict_row(row)?;
            let (g, h) = self.gradient(predicted, label);
            gradients.push(g);
            hessians.push(h);
        }

        let mut rng = StdRng::seed_from_u64(iteration);

        let mut row_indices: Vec<usize> = (0..rows.len()).collect();
        let sampled_rows = ((rows.len() as f64) * self.params.subsample).ceil() as usize;
        if sampled_rows < rows.len() {
            row_indices.shuffle(&mut rng);
            row_indices.truncate(sampled_rows.max(1));
        }

        let mut features: Vec<usize> = (0..self.num_features).collect();
        let sampled_features =
            ((self.num_features as f64) * self.params.colsample_bytree).ceil() as usize;
        if sampled_features < self.num_features {
            features.shuffle(&mut rng);
            features.truncate(sampled_features.max(1));
        }

        let row_refs: Vec<&[f64]> = rows.iter().map(|row| row.as_slice()).collect();
        let tree = RegressionTree::fit(
            &row_refs,
            &gradients,
            &hessians,
            &row_indices,
            &features,
            TreeParams {
                max_depth: self.params.max_depth,
                learning_rate: self.params.learning_rate,
                min_child_weight: self.params.min_child_weight,
                lambda: self.params.lambda,
                alpha: self.params.alpha,
                gamma: self.params.gamma,
            },
        );
        self.trees.push(tree);
        Ok(())
    }

    /// Serialize the full ensemble state.
    pub fn to_snapshot(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Restore an ensemble from a snapshot.
    pub fn from_snapshot(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_params() -> BoosterParams {
        BoosterParams {
            max_depth: 3,
            learning_rate: 0.5,
            subsample: 1.0,
            colsample_bytree: 1.0,
            min_child_weight: 1.0,
            objective: Objective::SquaredError,
            lambda: 1.0,
            alpha: 0.0,
            gamma: 0.0,
        }
    }

    fn training_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        // Label is ln of a cardinality that grows with the first feature.
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64 / 10.0, 1.0]).collect();
        let labels: Vec<f64> = (0..40).map(|i| (1.0 + i as f64).ln()).collect();
        (rows, labels)
    }

    #[test]
    fn test_train_adds_one_tree_per_iter() {
        let (rows, labels) = training_data();
        let mut booster = Booster::new(test_params(), 2);
        for iteration in 0..5 {
            booster.train_one_iter(iteration, &rows, &labels).unwrap();
        }
        assert_eq!(booster.num_trees(), 5);
    }

    #[test]
    fn test_training_reduces_error() {
        let (rows, labels) = training_data();
        let mut booster = Booster::new(test_params(), 2);
        let mse = |booster: &Booster| -> f64 {
            rows.iter()
                .zip(&labels)
                .map(|(row, &label)| {
                    let e = booster.predict_row(row).unwrap() - label;
                    e * e
                })
                .sum::<f64>()
                / rows.len() as f64
        };
        let before = mse(&booster);
        for iteration in 0..20 {
            booster.train_one_iter(iteration, &rows, &labels).unwrap();
        }
        let after = mse(&booster);
        assert!(after < before / 4.0, "before={before}, after={after}");
    }

    #[test]
    fn test_width_rejection() {
        let mut booster = Booster::new(test_params(), 3);
        assert!(matches!(
            booster.predict_row(&[1.0, 2.0]),
            Err(EmberError::FeatureWidth {
                got: 2,
                expected: 3
            })
        ));
        let rows = vec![vec![1.0, 2.0]];
        let labels = vec![0.0];
        assert!(booster.train_one_iter(0, &rows, &labels).is_err());
        assert_eq!(booster.num_trees(), 0);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let (rows, labels) = training_data();
        let mut booster = Booster::new(test_params(), 2);
        for iteration in 0..3 {
            booster.train_one_iter(iteration, &rows, &labels).unwrap();
        }
        let snapshot = booster.to_snapshot().unwrap();
        let restored = Booster::from_snapshot(&snapshot).unwrap();
        assert_eq!(restored.num_trees(), 3);
        assert_eq!(
            restored.predict_row(&rows[7]).unwrap(),
            booster.predict_row(&rows[7]).unwrap()
        );
    }

    #[test]
    fn test_sampling_is_reproducible() {
        let (rows, labels) = training_data();
        let mut params = test_params();
        params.subsample = 0.5;
        params.colsample_bytree = 0.5;
        let mut a = Booster::new(params.clone(), 2);
        let mut b = Booster::new(params, 2);
        a.train_one_iter(7, &rows, &labels).unwrap();
        b.train_one_iter(7, &rows, &labels).unwrap();
        assert_eq!(
            a.predict_row(&rows[3]).unwrap(),
            b.predict_row(&rows[3]).unwrap()
        );
    }

    #[test]
    fn test_absolute_error_objective_trains() {
        let (rows, labels) = training_data();
        let mut params = test_params();
        params.objective = Objective::AbsoluteError;
        let mut booster = Booster::new(params, 2);
        for iteration in 0..10 {
            booster.train_one_iter(iteration, &rows, &labels).unwrap();
        }
        assert_eq!(booster.num_trees(), 10);
        let prediction = booster.predict_row(&rows[39]).unwrap();
        assert!(prediction.is_finite());
    }
}
