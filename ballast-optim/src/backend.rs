use std::sync::Arc;

use thiserror::Error;

use crate::features::FeatureVector;
use crate::forest::RandomForest;
use crate::gbt::GradientBoostedTrees;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    #[error("model has not been fitted")]
    NotFitted,
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("{features} feature rows but {labels} labels")]
    LengthMismatch { features: usize, labels: usize },
    #[error("non-finite value in {0}")]
    NonFinite(&'static str),
    #[error("no regression backend available")]
    NoBackendAvailable,
    #[error("backend {backend} failed: {message}")]
    Backend { backend: &'static str, message: String },
}

/// A regression model the optimizer can train on its history.
pub trait RegressionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn fit(&mut self, features: &[FeatureVector], labels: &[f64]) -> Result<(), ModelError>;

    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError>;

    /// Coefficient of determination over the given set.
    fn score(&self, features: &[FeatureVector], labels: &[f64]) -> Result<f64, ModelError> {
        check_training_set(features, labels)?;
        let predictions = features
            .iter()
            .map(|x| self.predict(x))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(r2_score(labels, &predictions))
    }
}

/// Builds a fresh, unfitted backend; `None` means the backend is unavailable
/// in this build or environment.
pub type BackendFactory = Arc<dyn Fn() -> Option<Box<dyn RegressionBackend>> + Send + Sync>;

/// Candidates in preference order: boosted trees first, then the forest.
pub fn default_candidates() -> Vec<BackendFactory> {
    let boosted: BackendFactory =
        Arc::new(|| Some(Box::new(GradientBoostedTrees::default()) as Box<dyn RegressionBackend>));
    let forest: BackendFactory =
        Arc::new(|| Some(Box::new(RandomForest::default()) as Box<dyn RegressionBackend>));
    vec![boosted, forest]
}

pub(crate) fn check_training_set(features: &[FeatureVector], labels: &[f64]) -> Result<(), ModelError> {
    if features.len() != labels.len() {
        return Err(ModelError::LengthMismatch {
            features: features.len(),
            labels: labels.len(),
        });
    }
    if features.is_empty() {
        return Err(ModelError::EmptyTrainingSet);
    }
    if labels.iter().any(|y| !y.is_finite()) {
        return Err(ModelError::NonFinite("labels"));
    }
    if features.iter().flatten().any(|v| !v.is_finite()) {
        return Err(ModelError::NonFinite("features"));
    }
    Ok(())
}

/// R^2. A constant target scores 1.0 when matched exactly and 0.0 otherwise.
pub fn r2_score(labels: &[f64], predictions: &[f64]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let mean = labels.iter().sum::<f64>() / labels.len() as f64;
    let ss_tot: f64 = labels.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = labels
        .iter()
        .zip(predictions)
        .map(|(y, p)| (y - p).powi(2))
        .sum();
    if ss_tot == 0.0 {
        if ss_res < 1e-12 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - ss_res / ss_tot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_fit_scores_one() {
        assert_eq!(r2_score(&[1.0, 2.0, 3.0], &[1.0, 2.0, 3.0]), 1.0);
    }

    #[test]
    fn mean_prediction_scores_zero() {
        assert!(r2_score(&[1.0, 2.0, 3.0], &[2.0, 2.0, 2.0]).abs() < 1e-12);
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let err = check_training_set(&[[0.0; 9]], &[]).unwrap_err();
        assert_eq!(err, ModelError::LengthMismatch { features: 1, labels: 0 });
    }

    #[test]
    fn default_candidates_are_boosting_then_forest() {
        let names: Vec<_> = default_candidates()
            .iter()
            .filter_map(|f| f())
            .map(|b| b.name())
            .collect();
        assert_eq!(names, vec!["gradient_boosted_trees", "random_forest"]);
    }
}
