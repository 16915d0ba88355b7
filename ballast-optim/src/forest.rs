use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::{check_training_set, ModelError, RegressionBackend};
use crate::features::FeatureVector;
use crate::tree::{RegressionTree, TreeParams};

/// Bagged ensemble of deep regression trees.
#[derive(Clone, Debug)]
pub struct RandomForest {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Bootstrap sampling seed; fixed so retrains are reproducible.
    pub seed: u64,
    trees: Vec<RegressionTree>,
}

impl Default for RandomForest {
    fn default() -> Self {
        Self::new(50, 10, 2, 42)
    }
}

impl RandomForest {
    pub fn new(n_trees: usize, max_depth: usize, min_samples_leaf: usize, seed: u64) -> Self {
        Self {
            n_trees: n_trees.max(1),
            max_depth,
            min_samples_leaf,
            seed,
            trees: Vec::new(),
        }
    }
}

impl RegressionBackend for RandomForest {
    fn name(&self) -> &'static str {
        "random_forest"
    }

    fn fit(&mut self, features: &[FeatureVector], labels: &[f64]) -> Result<(), ModelError> {
        check_training_set(features, labels)?;

        let params = TreeParams {
            max_depth: self.max_depth,
            min_samples_split: 2 * self.min_samples_leaf.max(1),
            min_samples_leaf: self.min_samples_leaf,
        };
        let n = labels.len();
        let mut rng = StdRng::seed_from_u64(self.seed);
        self.trees = (0..self.n_trees)
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(features, labels, sample, params)
            })
            .collect();
        Ok(())
    }

    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        if self.trees.is_empty() {
            return Err(ModelError::NotFitted);
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(features)).sum();
        Ok(sum / self.trees.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset() -> (Vec<FeatureVector>, Vec<f64>) {
        (0..80)
            .map(|i| {
                let mut f = [0.0; 9];
                f[0] = i as f64;
                (f, if i < 40 { 32.0 } else { 128.0 })
            })
            .unzip()
    }

    #[test]
    fn separates_two_regimes() {
        let (x, y) = dataset();
        let mut m = RandomForest::default();
        m.fit(&x, &y).unwrap();
        assert!(m.predict(&x[5]).unwrap() < 64.0);
        assert!(m.predict(&x[70]).unwrap() > 96.0);
    }

    #[test]
    fn same_seed_same_model() {
        let (x, y) = dataset();
        let mut a = RandomForest::default();
        let mut b = RandomForest::default();
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict(&x[39]).unwrap(), b.predict(&x[39]).unwrap());
    }

    #[test]
    fn empty_training_set_rejected() {
        let mut m = RandomForest::default();
        assert_eq!(m.fit(&[], &[]), Err(ModelError::EmptyTrainingSet));
    }
}
