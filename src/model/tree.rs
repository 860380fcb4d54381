//! Depth-limited regression tree.
//!
//! Trees are grown by exact greedy splitting on first- and second-order
//! gradient statistics, with L1/L2 shrinkage on leaf weights and a minimum
//! gain threshold. Nodes live in a flat arena indexed by position, which
//! keeps the tree serializable and the traversal allocation-free.

use serde::{Deserialize, Serialize};

/// Split-search and regularization parameters for growing one tree.
#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub learning_rate: f64,
    pub min_child_weight: f64,
    pub lambda: f64,
    pub alpha: f64,
    pub gamma: f64,
}

/// A node in the flat arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        weight: f64,
    },
}

/// A single regression tree of the ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

/// L1 soft-thresholding of the gradient sum.
fn threshold_gradient(gradient_sum: f64, alpha: f64) -> f64 {
    if gradient_sum > alpha {
        gradient_sum - alpha
    } else if gradient_sum < -alpha {
        gradient_sum + alpha
    } else {
        0.0
    }
}

struct TreeBuilder<'a> {
    rows: &'a [&'a [f64]],
    gradients: &'a [f64],
    hessians: &'a [f64],
    features: &'a [usize],
    params: TreeParams,
    nodes: Vec<TreeNode>,
}

impl<'a> TreeBuilder<'a> {
    fn score(&self, gradient_sum: f64, hessian_sum: f64) -> f64 {
        let g = threshold_gradient(gradient_sum, self.params.alpha);
        g * g / (hessian_sum + self.params.lambda)
    }

    fn leaf_weight(&self, gradient_sum: f64, hessian_sum: f64) -> f64 {
        let g = threshold_gradient(gradient_sum, self.params.alpha);
        -g / (hessian_sum + self.params.lambda) * self.params.learning_rate
    }

    /// Grow the subtree over `row_indices`, returning its arena index.
    fn build(&mut self, row_indices: &[usize], depth: usize) -> usize {
        let gradient_sum: f64 = row_indices.iter().map(|&i| self.gradients[i]).sum();
        let hessian_sum: f64 = row_indices.iter().map(|&i| self.hessians[i]).sum();

        if depth < self.params.max_depth && row_indices.len() >= 2 {
            if let Some(split) = self.best_split(row_indices, gradient_sum, hessian_sum) {
                let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = row_indices
                    .iter()
                    .copied()
                    .partition(|&i| self.rows[i][split.feature] < split.threshold);
                let left = self.build(&left_rows, depth + 1);
                let right = self.build(&right_rows, depth + 1);
                self.nodes.push(TreeNode::Split {
                    feature: split.feature,
                    threshold: split.threshold,
                    left,
                    right,
                });
                return self.nodes.len() - 1;
            }
        }

        self.nodes.push(TreeNode::Leaf {
            weight: self.leaf_weight(gradient_sum, hessian_sum),
        });
        self.nodes.len() - 1
    }

    /// Exact greedy search over the sampled features.
    fn best_split(
        &self,
        row_indices: &[usize],
        gradient_sum: f64,
        hessian_sum: f64,
    ) -> Option<SplitCandidate> {
        let parent_score = self.score(gradient_sum, hessian_sum);
        let mut best: Option<SplitCandidate> = None;

        for &feature in self.features {
            // Sort once per feature, then sweep the prefix.
            let mut ordered: Vec<usize> = row_indices.to_vec();
            ordered.sort_by(|&a, &b| {
                self.rows[a][feature]
                    .partial_cmp(&self.rows[b][feature])
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            let mut left_gradient = 0.0;
            let mut left_hessian = 0.0;
            for window in ordered.windows(2) {
                let (current, next) = (window[0], window[1]);
                left_gradient += self.gradients[current];
                left_hessian += self.hessians[current];

                let current_value = self.rows[current][feature];
                let next_value = self.rows[next][feature];
                if current_value == next_value {
                    continue;
                }

                let right_hessian = hessian_sum - left_hessian;
                if left_hessian < self.params.min_child_weight
                    || right_hessian < self.params.min_child_weight
                {
                    continue;
                }

                let right_gradient = gradient_sum - left_gradient;
                let gain = 0.5
                    * (self.score(left_gradient, left_hessian)
                        + self.score(right_gradient, right_hessian)
                        - parent_score)
                    - self.params.gamma;
                if gain <= 0.0 {
                    continue;
                }
                if best.as_ref().map(|b| gain > b.gain).unwrap_or(true) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: (current_value + next_value) / 2.0,
                        gain,
                    });
                }
            }
        }

        best
    }
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Fit one tree to the given gradient statistics.
    ///
    /// `row_indices` selects the (sub)sampled rows, `features` the sampled
    /// columns. The learning rate is folded into the leaf weights.
    pub fn fit(
        rows: &[&[f64]],
        gradients: &[f64],
        hessians: &[f64],
        row_indices: &[usize],
        features: &[usize],
        params: TreeParams,
    ) -> Self {
        let mut builder = TreeBuilder {
            rows,
            gradients,
            hessians,
            features,
            params,
            nodes: Vec::new(),
        };
        let root = builder.build(row_indices, 0);
        debug_assert_eq!(root, builder.nodes.len() - 1);
        Self {
            nodes: builder.nodes,
        }
    }

    /// Evaluate the tree for one row. The root is the last node pushed.
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut index = self.nodes.len() - 1;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { weight } => return *weight,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] < *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> TreeParams {
        TreeParams {
            max_depth: 4,
            learning_rate: 1.0,
            min_child_weight: 1.0,
            lambda: 1.0,
            alpha: 0.0,
            gamma: 0.0,
        }
    }

    /// Squared-error gradients for a constant-zero current prediction:
    /// g = -label, h = 1.
    fn fit_on_labels(rows: &[&[f64]], labels: &[f64], p: TreeParams) -> RegressionTree {
        let gradients: Vec<f64> = labels.iter().map(|y| -y).collect();
        let hessians = vec![1.0; labels.len()];
        let row_indices: Vec<usize> = (0..rows.len()).collect();
        let features: Vec<usize> = (0..rows[0].len()).collect();
        RegressionTree::fit(rows, &gradients, &hessians, &row_indices, &features, p)
    }

    #[test]
    fn test_single_leaf_when_no_split_gains() {
        let rows: Vec<&[f64]> = vec![&[1.0, 0.0], &[1.0, 0.0]];
        let tree = fit_on_labels(&rows, &[3.0, 3.0], params());
        assert_eq!(tree.node_count(), 1);
        // Leaf weight = G / (H + lambda) with the sign flipped: 6 / 3 = 2.
        assert!((tree.predict(&[1.0, 0.0]) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_splits_separate_the_data() {
        let rows: Vec<&[f64]> = vec![&[0.0], &[0.1], &[0.9], &[1.0]];
        let tree = fit_on_labels(&rows, &[0.0, 0.0, 10.0, 10.0], params());
        assert!(tree.node_count() > 1);
        let low = tree.predict(&[0.05]);
        let high = tree.predict(&[0.95]);
        assert!(high > low);
        assert!(high > 5.0);
        assert!(low < 1.0);
    }

    #[test]
    fn test_depth_limit_honored() {
        let rows: Vec<Vec<f64>> = (0..64).map(|i| vec![i as f64]).collect();
        let row_refs: Vec<&[f64]> = rows.iter().map(|r| r.as_slice()).collect();
        let labels: Vec<f64> = (0..64).map(|i| i as f64).collect();
        let mut p = params();
        p.max_depth = 2;
        let tree = fit_on_labels(&row_refs, &labels, p);
        // Depth 2 means at most 3 splits + 4 leaves.
        assert!(tree.node_count() <= 7);
    }

    #[test]
    fn test_min_child_weight_blocks_tiny_leaves() {
        let rows: Vec<&[f64]> = vec![&[0.0], &[1.0]];
        let mut p = params();
        p.min_child_weight = 5.0;
        let tree = fit_on_labels(&rows, &[0.0, 100.0], p);
        assert_eq!(tree.node_count(), 1);
    }

    #[test]
    fn test_serde_round_trip() {
        let rows: Vec<&[f64]> = vec![&[0.0], &[1.0], &[2.0], &[3.0]];
        let tree = fit_on_labels(&rows, &[1.0, 2.0, 3.0, 4.0], params());
        let encoded = serde_json::to_string(&tree).unwrap();
        let decoded: RegressionTree = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.predict(&[1.5]), tree.predict(&[1.5]));
    }
}
