use crate::backend::{check_training_set, ModelError, RegressionBackend};
use crate::features::FeatureVector;
use crate::tree::{RegressionTree, TreeParams};

/// Least-squares gradient boosting over shallow regression trees.
#[derive(Clone, Debug)]
pub struct GradientBoostedTrees {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    base: Option<f64>,
    trees: Vec<RegressionTree>,
}

impl Default for GradientBoostedTrees {
    fn default() -> Self {
        Self::new(100, 0.1, 3)
    }
}

impl GradientBoostedTrees {
    pub fn new(n_estimators: usize, learning_rate: f64, max_depth: usize) -> Self {
        Self {
            n_estimators,
            learning_rate,
            max_depth,
            min_samples_leaf: 1,
            base: None,
            trees: Vec::new(),
        }
    }

    fn raw_predict(&self, base: f64, x: &FeatureVector) -> f64 {
        base + self
            .trees
            .iter()
            .map(|t| self.learning_rate * t.predict(x))
            .sum::<f64>()
    }
}

impl RegressionBackend for GradientBoostedTrees {
    fn name(&self) -> &'static str {
        "gradient_boosted_trees"
    }

    fn fit(&mut self, features: &[FeatureVector], labels: &[f64]) -> Result<(), ModelError> {
        check_training_set(features, labels)?;

        let params = TreeParams {
            max_depth: self.max_depth,
            min_samples_split: 2 * self.min_samples_leaf.max(1),
            min_samples_leaf: self.min_samples_leaf,
        };
        let base = labels.iter().sum::<f64>() / labels.len() as f64;
        let mut current = vec![base; labels.len()];
        let mut trees = Vec::with_capacity(self.n_estimators);

        for _ in 0..self.n_estimators {
            let residuals: Vec<f64> = labels.iter().zip(&current).map(|(y, p)| y - p).collect();
            if residuals.iter().all(|r| r.abs() < 1e-9) {
                break;
            }
            let tree = RegressionTree::fit(features, &residuals, (0..labels.len()).collect(), params);
            for (p, x) in current.iter_mut().zip(features) {
                *p += self.learning_rate * tree.predict(x);
            }
            trees.push(tree);
        }

        self.base = Some(base);
        self.trees = trees;
        Ok(())
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        let base = self.base.ok_or(ModelError::NotFitted)?;
        Ok(self.raw_predict(base, features))
    }
}
