use std::collections::BTreeMap;

use tracing::debug;
use uuid::Uuid;

use crate::graph::DependencyGraph;
use crate::models::{Category, Snapshot};

pub const FEATURE_COUNT: usize = 5;

/// `[current_score, mean, min, max, std]` over the prerequisite scores the
/// student actually has. Ephemeral; never persisted.
pub type FeatureVector = [f64; FEATURE_COUNT];

#[derive(Debug, Clone, Default)]
pub struct TrainingMatrix {
    pub features: Vec<FeatureVector>,
    pub labels: Vec<Category>,
}

impl TrainingMatrix {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Population statistics over the prerequisite scores. A single score has a
/// standard deviation of 0 by definition; no scores at all yields all zeros.
fn prerequisite_stats(scores: &[f64]) -> [f64; 4] {
    if scores.is_empty() {
        return [0.0, 0.0, 0.0, 0.0];
    }

    let mean = scores.iter().sum::<f64>() / scores.len() as f64;
    let min = scores.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let std = if scores.len() < 2 {
        0.0
    } else {
        let variance = scores
            .iter()
            .map(|score| (score - mean).powi(2))
            .sum::<f64>()
            / scores.len() as f64;
        variance.sqrt()
    };

    [mean, min, max, std]
}

/// One (student, chapter) sample. Prerequisites the student has not attempted
/// are omitted from the statistics, never treated as zero.
pub fn build_sample(
    chapter_id: Uuid,
    current_score: f64,
    graph: &DependencyGraph,
    student_scores: &BTreeMap<Uuid, f64>,
) -> (FeatureVector, Category) {
    let prereq_scores: Vec<f64> = graph
        .prerequisites_of(chapter_id)
        .iter()
        .filter_map(|prerequisite| student_scores.get(prerequisite).copied())
        .collect();

    let [mean, min, max, std] = prerequisite_stats(&prereq_scores);
    let features = [current_score, mean, min, max, std];
    (features, Category::from_score(current_score))
}

/// Assembles the full training matrix: every (student, chapter) pair with a
/// recorded score, students then chapters, both in stable id order so the
/// matrix is reproducible for a fixed snapshot.
pub fn build_training_matrix(snapshot: &Snapshot, graph: &DependencyGraph) -> TrainingMatrix {
    let student_ids = snapshot.students_with_any_grade();

    let mut chapter_ids: Vec<Uuid> = snapshot.chapters.iter().map(|c| c.id).collect();
    chapter_ids.sort();

    let mut matrix = TrainingMatrix::default();
    for student_id in student_ids {
        let scores = snapshot.scores_for(student_id);
        for &chapter_id in &chapter_ids {
            let Some(&current_score) = scores.get(&chapter_id) else {
                continue;
            };
            let (features, label) = build_sample(chapter_id, current_score, graph, &scores);
            matrix.features.push(features);
            matrix.labels.push(label);
        }
    }

    debug!(samples = matrix.len(), "training matrix assembled");
    matrix
}
