//! Gradient-boosted decision trees with logistic loss.
//!
//! Each round fits a depth-limited regression tree to the gradient and
//! hessian of the log-loss at the current margin:
//!
//! - leaf weight `w = -G / (H + lambda)`, shrunk by `learning_rate`
//! - split gain `½ [G_L²/(H_L+λ) + G_R²/(H_R+λ) - G²/(H+λ)]`
//! - exact greedy search over the sorted values of each sampled column
//! - rows are Bernoulli-subsampled and columns sampled without replacement
//!   per tree from one seeded `StdRng`
//! - `NaN` feature values always route to the right child

use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::{Classifier, ClassifierError, Learner, TrainingSet};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbtParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    pub subsample: f64,
    pub colsample: f64,
    pub lambda: f64,
    pub min_child_weight: f64,
    pub seed: u64,
}

impl Default for GbtParams {
    fn default() -> Self {
        Self {
            n_estimators: 500,
            max_depth: 3,
            learning_rate: 0.05,
            subsample: 0.8,
            colsample: 0.8,
            lambda: 1.0,
            min_child_weight: 1.0,
            seed: 42,
        }
    }
}

impl GbtParams {
    pub fn validate(&self) -> Result<(), ClassifierError> {
        let fraction_ok = |v: f64| v > 0.0 && v <= 1.0;
        if self.n_estimators == 0 {
            return Err(ClassifierError::InvalidParams("n_estimators must be >= 1".into()));
        }
        if self.max_depth == 0 {
            return Err(ClassifierError::InvalidParams("max_depth must be >= 1".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ClassifierError::InvalidParams(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !fraction_ok(self.subsample) || !fraction_ok(self.colsample) {
            return Err(ClassifierError::InvalidParams(format!(
                "subsample and colsample must be in (0, 1], got {} and {}",
                self.subsample, self.colsample
            )));
        }
        if self.lambda < 0.0 || self.min_child_weight < 0.0 {
            return Err(ClassifierError::InvalidParams(
                "lambda and min_child_weight must be >= 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, x: &[f64]) -> f64 {
        let mut at = 0;
        loop {
            match self.nodes[at] {
                Node::Leaf(w) => return w,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    // NaN compares false and therefore goes right.
                    at = if x[feature] < threshold { left } else { right };
                }
            }
        }
    }
}

/// Fitted ensemble.
#[derive(Debug, Clone)]
pub struct BoostedModel {
    trees: Vec<Tree>,
    n_features: usize,
}

impl BoostedModel {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    fn margin(&self, x: &[f64]) -> f64 {
        self.trees.iter().map(|t| t.predict(x)).sum()
    }
}

impl Classifier for BoostedModel {
    fn predict_probability(&self, features: &[f64]) -> f64 {
        debug_assert_eq!(features.len(), self.n_features);
        sigmoid(self.margin(features))
    }
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[derive(Debug, Clone, Default)]
pub struct GradientBoostedTrees {
    params: GbtParams,
}

impl GradientBoostedTrees {
    pub fn new(params: GbtParams) -> Result<Self, ClassifierError> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &GbtParams {
        &self.params
    }

    /// Fit and return the concrete model type.
    pub fn fit_model(&self, data: &TrainingSet, seed: u64) -> Result<BoostedModel, ClassifierError> {
        if data.is_empty() {
            return Err(ClassifierError::EmptyTrainingSet);
        }
        let p = &self.params;
        let rows = data.rows();
        let labels: Vec<f64> = data.labels().iter().map(|&l| f64::from(l)).collect();
        let n = rows.len();
        let n_features = data.n_features();
        let n_cols = ((p.colsample * n_features as f64).round() as usize).clamp(1, n_features.max(1));

        let mut rng = StdRng::seed_from_u64(seed);
        let mut margin = vec![0.0; n];
        let mut grad = vec![0.0; n];
        let mut hess = vec![0.0; n];
        let mut trees = Vec::with_capacity(p.n_estimators);

        for _ in 0..p.n_estimators {
            for i in 0..n {
                let prob = sigmoid(margin[i]);
                grad[i] = prob - labels[i];
                hess[i] = (prob * (1.0 - prob)).max(1e-16);
            }

            let mut sampled: Vec<usize> = (0..n).filter(|_| rng.gen::<f64>() < p.subsample).collect();
            if sampled.is_empty() {
                sampled.push(rng.gen_range(0..n));
            }
            let mut columns = if n_features == 0 {
                Vec::new()
            } else {
                sample(&mut rng, n_features, n_cols).into_vec()
            };
            columns.sort_unstable();

            let builder = TreeBuilder {
                rows,
                grad: &grad,
                hess: &hess,
                columns: &columns,
                params: p,
            };
            let tree = builder.build(sampled);
            for (i, row) in rows.iter().enumerate() {
                margin[i] += tree.predict(row);
            }
            trees.push(tree);
        }

        Ok(BoostedModel { trees, n_features })
    }
}

impl Learner for GradientBoostedTrees {
    fn name(&self) -> &str {
        "gradient_boosted_trees"
    }

    fn fit(&self, data: &TrainingSet, seed: u64) -> Result<Box<dyn Classifier>, ClassifierError> {
        Ok(Box::new(self.fit_model(data, seed)?))
    }
}

// ─── Tree construction ───────────────────────────────────────────────

struct TreeBuilder<'a> {
    rows: &'a [Vec<f64>],
    grad: &'a [f64],
    hess: &'a [f64],
    columns: &'a [usize],
    params: &'a GbtParams,
}

struct SplitChoice {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl TreeBuilder<'_> {
    fn build(&self, rows: Vec<usize>) -> Tree {
        let mut tree = Tree { nodes: Vec::new() };
        self.grow(&mut tree, rows, 0);
        tree
    }

    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter()
            .fold((0.0, 0.0), |(g, h), &i| (g + self.grad[i], h + self.hess[i]))
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        g * g / (h + self.params.lambda)
    }

    fn grow(&self, tree: &mut Tree, rows: Vec<usize>, depth: usize) -> usize {
        let at = tree.nodes.len();
        let (g, h) = self.sums(&rows);
        let leaf = -g / (h + self.params.lambda) * self.params.learning_rate;
        tree.nodes.push(Node::Leaf(leaf));

        if depth >= self.params.max_depth || rows.len() < 2 {
            return at;
        }
        let Some(split) = self.best_split(&rows, g, h) else {
            return at;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&i| self.rows[i][split.feature] < split.threshold);
        let left = self.grow(tree, left_rows, depth + 1);
        let right = self.grow(tree, right_rows, depth + 1);
        tree.nodes[at] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        at
    }

    fn best_split(&self, rows: &[usize], g_total: f64, h_total: f64) -> Option<SplitChoice> {
        let parent = self.score(g_total, h_total);
        let min_child = self.params.min_child_weight;
        let mut best: Option<SplitChoice> = None;

        for &feature in self.columns {
            let mut present: Vec<(f64, usize)> = rows
                .iter()
                .map(|&i| (self.rows[i][feature], i))
                .filter(|(v, _)| !v.is_nan())
                .collect();
            present.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

            let (mut gl, mut hl) = (0.0, 0.0);
            for k in 0..present.len().saturating_sub(1) {
                let (value, i) = present[k];
                gl += self.grad[i];
                hl += self.hess[i];
                let next = present[k + 1].0;
                if next <= value {
                    continue;
                }
                // Everything not on the left, NaN rows included, is on the right.
                let (gr, hr) = (g_total - gl, h_total - hl);
                if hl < min_child || hr < min_child {
                    continue;
                }
                let gain = 0.5 * (self.score(gl, hl) + self.score(gr, hr) - parent);
                if gain > best.as_ref().map_or(1e-12, |b| b.gain) {
                    best = Some(SplitChoice {
                        feature,
                        threshold: value + (next - value) / 2.0,
                        gain,
                    });
                }
            }
        }
        best
    }
}
