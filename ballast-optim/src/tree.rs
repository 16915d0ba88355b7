//! CART regression tree shared by the boosted and bagged ensembles.

use crate::features::{FeatureVector, FEATURE_COUNT};

#[derive(Clone, Copy, Debug)]
pub(crate) struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

#[derive(Clone, Debug)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct RegressionTree {
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    sse: f64,
    /// Rows sorted on `feature`; the first `left_len` go left.
    sorted: Vec<usize>,
    left_len: usize,
}

impl RegressionTree {
    /// Fit on the subset `rows` of `x`/`y` (rows may repeat, as in a bootstrap sample).
    pub fn fit(x: &[FeatureVector], y: &[f64], rows: Vec<usize>, params: TreeParams) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(x, y, rows, 0, params);
        tree
    }

    pub fn predict(&self, sample: &FeatureVector) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf(v) => return *v,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if sample[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    fn grow(&mut self, x: &[FeatureVector], y: &[f64], rows: Vec<usize>, depth: usize, params: TreeParams) -> usize {
        let id = self.nodes.len();
        let mean = rows.iter().map(|&r| y[r]).sum::<f64>() / rows.len().max(1) as f64;
        self.nodes.push(Node::Leaf(mean));

        if depth >= params.max_depth || rows.len() < params.min_samples_split {
            return id;
        }
        let Some(split) = best_split(x, y, &rows, params.min_samples_leaf) else {
            return id;
        };

        let parent_sse: f64 = rows.iter().map(|&r| (y[r] - mean).powi(2)).sum();
        if parent_sse - split.sse <= 1e-12 {
            return id;
        }

        let mut sorted = split.sorted;
        let right_rows = sorted.split_off(split.left_len);
        let left = self.grow(x, y, sorted, depth + 1, params);
        let right = self.grow(x, y, right_rows, depth + 1, params);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }
}

fn best_split(x: &[FeatureVector], y: &[f64], rows: &[usize], min_leaf: usize) -> Option<BestSplit> {
    let n = rows.len();
    let min_leaf = min_leaf.max(1);
    if n < 2 * min_leaf {
        return None;
    }
    let total_sum: f64 = rows.iter().map(|&r| y[r]).sum();
    let total_sq: f64 = rows.iter().map(|&r| y[r] * y[r]).sum();

    let mut best: Option<BestSplit> = None;
    for feature in 0..FEATURE_COUNT {
        let mut sorted = rows.to_vec();
        sorted.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        let mut best_here: Option<(f64, usize, f64)> = None;
        for i in 0..n - 1 {
            let yi = y[sorted[i]];
            left_sum += yi;
            left_sq += yi * yi;

            let left_len = i + 1;
            let here = x[sorted[i]][feature];
            let next = x[sorted[i + 1]][feature];
            if left_len < min_leaf || n - left_len < min_leaf || here == next {
                continue;
            }

            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / left_len as f64)
                + (right_sq - right_sum * right_sum / (n - left_len) as f64);
            if best_here.map_or(true, |(s, _, _)| sse < s) {
                best_here = Some((sse, left_len, (here + next) / 2.0));
            }
        }

        if let Some((sse, left_len, threshold)) = best_here {
            if best.as_ref().map_or(true, |b| sse < b.sse) {
                best = Some(BestSplit {
                    feature,
                    threshold,
                    sse,
                    sorted,
                    left_len,
                });
            }
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(v: f64) -> FeatureVector {
        let mut f = [0.0; FEATURE_COUNT];
        f[0] = v;
        f
    }

    const PARAMS: TreeParams = TreeParams {
        max_depth: 4,
        min_samples_split: 2,
        min_samples_leaf: 1,
    };

    #[test]
    fn learns_a_step_function() {
        let x: Vec<_> = (0..20).map(|i| row(i as f64)).collect();
        let y: Vec<_> = (0..20).map(|i| if i < 10 { 16.0 } else { 64.0 }).collect();
        let tree = RegressionTree::fit(&x, &y, (0..20).collect(), PARAMS);
        assert_eq!(tree.predict(&row(3.0)), 16.0);
        assert_eq!(tree.predict(&row(15.0)), 64.0);
        assert_eq!(tree.predict(&row(9.6)), 64.0);
    }

    #[test]
    fn constant_target_is_a_single_leaf() {
        let x: Vec<_> = (0..10).map(|i| row(i as f64)).collect();
        let y = vec![32.0; 10];
        let tree = RegressionTree::fit(&x, &y, (0..10).collect(), PARAMS);
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.predict(&row(100.0)), 32.0);
    }

    #[test]
    fn depth_zero_predicts_mean() {
        let x: Vec<_> = (0..4).map(|i| row(i as f64)).collect();
        let y = vec![1.0, 2.0, 3.0, 4.0];
        let params = TreeParams { max_depth: 0, ..PARAMS };
        let tree = RegressionTree::fit(&x, &y, (0..4).collect(), params);
        assert_eq!(tree.predict(&row(0.0)), 2.5);
    }
}
