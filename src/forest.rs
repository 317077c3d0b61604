use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::EngineError;
use crate::features::{FeatureVector, TrainingMatrix, FEATURE_COUNT};
use crate::models::Category;

const CATEGORY_COUNT: usize = Category::ALL.len();

/// Below this many samples the fit is accepted as-is and flagged as sparse.
/// Small-sample instability is a known limitation, not corrected.
const FULL_SAMPLE_THRESHOLD: usize = 5;

/// Fixed ensemble hyperparameters. These are part of the deployment's
/// reproducibility contract: changing any of them changes every prediction
/// for chapters the student has not attempted.
#[derive(Debug, Clone)]
pub struct ForestConfig {
    pub tree_count: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        ForestConfig {
            tree_count: 50,
            max_depth: 6,
            min_samples_split: 3,
            seed: 42,
        }
    }
}

/// Capability set of a trained (or untrained) model, made explicit instead of
/// branching ad hoc at call sites.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    /// Zero samples. Prediction is an error, never a guess.
    Untrained,
    /// Fewer than five samples; predictions are served but low-confidence.
    TrainedOnSparseData,
    TrainedOnFullData,
}

#[derive(Debug, Clone)]
enum TreeNode {
    Leaf {
        counts: [usize; CATEGORY_COUNT],
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

#[derive(Debug, Clone)]
struct DecisionTree {
    root: TreeNode,
}

fn label_counts(labels: &[Category], indices: &[usize]) -> [usize; CATEGORY_COUNT] {
    let mut counts = [0usize; CATEGORY_COUNT];
    for &index in indices {
        counts[labels[index].index()] += 1;
    }
    counts
}

fn gini(counts: &[usize; CATEGORY_COUNT]) -> f64 {
    let total: usize = counts.iter().sum();
    if total == 0 {
        return 0.0;
    }
    let mut impurity = 1.0;
    for &count in counts {
        let p = count as f64 / total as f64;
        impurity -= p * p;
    }
    impurity
}

fn majority(counts: &[usize; CATEGORY_COUNT]) -> Category {
    let mut best = Category::ALL[0];
    let mut best_count = counts[0];
    for (slot, &count) in counts.iter().enumerate().skip(1) {
        if count > best_count {
            best = Category::ALL[slot];
            best_count = count;
        }
    }
    best
}

impl DecisionTree {
    fn fit(
        features: &[FeatureVector],
        labels: &[Category],
        indices: &[usize],
        config: &ForestConfig,
    ) -> DecisionTree {
        DecisionTree {
            root: Self::grow(features, labels, indices, 0, config),
        }
    }

    fn grow(
        features: &[FeatureVector],
        labels: &[Category],
        indices: &[usize],
        depth: usize,
        config: &ForestConfig,
    ) -> TreeNode {
        let counts = label_counts(labels, indices);
        let impurity = gini(&counts);

        let stop = depth >= config.max_depth
            || indices.len() < config.min_samples_split
            || impurity == 0.0;
        if stop {
            return TreeNode::Leaf { counts };
        }

        let Some((feature, threshold)) = Self::best_split(features, labels, indices, impurity)
        else {
            return TreeNode::Leaf { counts };
        };

        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&index| features[index][feature] <= threshold);
        if left.is_empty() || right.is_empty() {
            return TreeNode::Leaf { counts };
        }

        TreeNode::Split {
            feature,
            threshold,
            left: Box::new(Self::grow(features, labels, &left, depth + 1, config)),
            right: Box::new(Self::grow(features, labels, &right, depth + 1, config)),
        }
    }

    /// Exhaustive threshold search: midpoints between consecutive distinct
    /// values per feature, minimizing weighted Gini impurity. Features and
    /// thresholds are scanned in fixed order and a candidate must be strictly
    /// better, so the chosen split is deterministic.
    fn best_split(
        features: &[FeatureVector],
        labels: &[Category],
        indices: &[usize],
        parent_impurity: f64,
    ) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        let mut best_impurity = parent_impurity;

        for feature in 0..FEATURE_COUNT {
            let mut values: Vec<f64> = indices
                .iter()
                .map(|&index| features[index][feature])
                .collect();
            values.sort_by(|a, b| a.total_cmp(b));
            values.dedup();

            for pair in values.windows(2) {
                let threshold = (pair[0] + pair[1]) / 2.0;
                let mut left = [0usize; CATEGORY_COUNT];
                let mut right = [0usize; CATEGORY_COUNT];
                for &index in indices {
                    if features[index][feature] <= threshold {
                        left[labels[index].index()] += 1;
                    } else {
                        right[labels[index].index()] += 1;
                    }
                }

                let left_total: usize = left.iter().sum();
                let right_total: usize = right.iter().sum();
                let total = (left_total + right_total) as f64;
                let weighted = gini(&left) * left_total as f64 / total
                    + gini(&right) * right_total as f64 / total;

                if weighted < best_impurity {
                    best_impurity = weighted;
                    best = Some((feature, threshold));
                }
            }
        }

        best
    }

    fn predict(&self, features: &FeatureVector) -> Category {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf { counts } => return majority(counts),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if features[*feature] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }
}

/// Bagged decision-tree ensemble over the mastery categories. Retrained from
/// the current snapshot on every recommendation pass; nothing is persisted.
#[derive(Debug, Clone)]
pub struct RecommendationModel {
    state: ModelState,
    trees: Vec<DecisionTree>,
}

impl RecommendationModel {
    pub fn train(matrix: &TrainingMatrix) -> RecommendationModel {
        Self::train_with(matrix, &ForestConfig::default())
    }

    pub fn train_with(matrix: &TrainingMatrix, config: &ForestConfig) -> RecommendationModel {
        if matrix.is_empty() {
            debug!("no training samples, model left untrained");
            return RecommendationModel {
                state: ModelState::Untrained,
                trees: Vec::new(),
            };
        }

        let state = if matrix.len() < FULL_SAMPLE_THRESHOLD {
            debug!(
                samples = matrix.len(),
                "fitting on a sparse sample set, predictions will be low-confidence"
            );
            ModelState::TrainedOnSparseData
        } else {
            ModelState::TrainedOnFullData
        };

        let sample_count = matrix.len();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let trees = (0..config.tree_count)
            .map(|_| {
                let bootstrap: Vec<usize> = (0..sample_count)
                    .map(|_| rng.gen_range(0..sample_count))
                    .collect();
                DecisionTree::fit(&matrix.features, &matrix.labels, &bootstrap, config)
            })
            .collect();

        RecommendationModel { state, trees }
    }

    pub fn state(&self) -> ModelState {
        self.state
    }

    /// Majority vote across the ensemble. Ties resolve to the worse category
    /// (fixed declaration order), which keeps predictions deterministic and
    /// errs toward recommending more study.
    pub fn predict_one(&self, features: &FeatureVector) -> Result<Category, EngineError> {
        let votes = self.votes(features)?;
        Ok(majority(&votes))
    }

    /// Vote share per category across the ensemble.
    pub fn predict_proba_one(
        &self,
        features: &FeatureVector,
    ) -> Result<BTreeMap<Category, f64>, EngineError> {
        let votes = self.votes(features)?;
        let total: usize = votes.iter().sum();
        Ok(Category::ALL
            .iter()
            .map(|&category| (category, votes[category.index()] as f64 / total as f64))
            .collect())
    }

    fn votes(&self, features: &FeatureVector) -> Result<[usize; CATEGORY_COUNT], EngineError> {
        if self.state == ModelState::Untrained {
            return Err(EngineError::UntrainedModel);
        }
        let mut votes = [0usize; CATEGORY_COUNT];
        for tree in &self.trees {
            votes[tree.predict(features).index()] += 1;
        }
        Ok(votes)
    }
}
