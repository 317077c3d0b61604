use std::collections::BTreeMap;

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::EngineError;
use crate::features::{build_sample, build_training_matrix};
use crate::forest::RecommendationModel;
use crate::graph::DependencyGraph;
use crate::models::{Category, Snapshot, Status, Verdict};

/// Full recommendation pass for one student: fresh graph, fresh training
/// matrix, fresh model, one verdict per chapter. Reads only the snapshot,
/// persists nothing.
pub fn recommend(
    snapshot: &Snapshot,
    student_id: Uuid,
) -> Result<BTreeMap<Uuid, Verdict>, EngineError> {
    let graph = DependencyGraph::from_snapshot(&snapshot.chapters, &snapshot.edges)?;
    let student_scores = snapshot.scores_for(student_id);

    // Without a single recorded score there is no signal to predict from;
    // every chapter gets the blanket default, including chapters with no
    // prerequisites that could in principle carry a class-level baseline.
    if student_scores.is_empty() {
        info!(%student_id, "student has no grades, defaulting every chapter");
        return Ok(snapshot
            .chapters
            .iter()
            .map(|chapter| (chapter.id, Verdict::Status(Status::NeedsStudy)))
            .collect());
    }

    let matrix = build_training_matrix(snapshot, &graph);
    let model = RecommendationModel::train(&matrix);
    info!(
        %student_id,
        samples = matrix.len(),
        state = ?model.state(),
        "model retrained for recommendation pass"
    );

    let mut verdicts = BTreeMap::new();
    for chapter in &snapshot.chapters {
        let verdict = if let Some(&score) = student_scores.get(&chapter.id) {
            // Attempted chapter: the true label is a direct policy lookup.
            Verdict::Category(Category::from_score(score))
        } else {
            let prerequisites = graph.prerequisites_of(chapter.id);
            if prerequisites.is_empty() {
                Verdict::Status(Status::NotStarted)
            } else if prerequisites
                .iter()
                .all(|prerequisite| student_scores.contains_key(prerequisite))
            {
                // Current score is unknown, so its slot carries 0 and the
                // prerequisite statistics do the work.
                let (features, _) = build_sample(chapter.id, 0.0, &graph, &student_scores);
                let predicted = model.predict_one(&features)?;
                let confidence = model
                    .predict_proba_one(&features)?
                    .get(&predicted)
                    .copied()
                    .unwrap_or(0.0);
                debug!(
                    chapter = %chapter.name,
                    category = predicted.label(),
                    confidence,
                    "predicted mastery for unattempted chapter"
                );
                Verdict::Category(predicted)
            } else {
                Verdict::Status(Status::PrerequisitesIncomplete)
            }
        };
        verdicts.insert(chapter.id, verdict);
    }

    Ok(verdicts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chapter, DependencyEdge, GradeRecord, StudentRecord};
    use chrono::NaiveDate;

    fn chapter(name: &str) -> Chapter {
        Chapter {
            id: Uuid::new_v4(),
            name: name.to_string(),
        }
    }

    fn student(name: &str, email: &str) -> StudentRecord {
        StudentRecord {
            id: Uuid::new_v4(),
            full_name: name.to_string(),
            email: email.to_string(),
            class_label: "10A".to_string(),
        }
    }

    fn grade(student_id: Uuid, chapter_id: Uuid, score: f64) -> GradeRecord {
        GradeRecord {
            student_id,
            chapter_id,
            score,
            recorded_at: NaiveDate::from_ymd_opt(2026, 2, 10).unwrap(),
        }
    }

    #[test]
    fn no_grades_defaults_every_chapter() {
        let a = chapter("Algebra Basics");
        let learner = student("Avery Lee", "avery.lee@example.com");
        let snapshot = Snapshot {
            chapters: vec![a.clone()],
            edges: vec![],
            students: vec![learner.clone()],
            grades: vec![],
        };

        let verdicts = recommend(&snapshot, learner.id).unwrap();
        assert_eq!(verdicts.len(), 1);
        assert_eq!(
            verdicts.get(&a.id),
            Some(&Verdict::Status(Status::NeedsStudy))
        );
    }

    #[test]
    fn no_grades_bypasses_even_dependent_chapters() {
        let a = chapter("Algebra Basics");
        let b = chapter("Linear Equations");
        let learner = student("Avery Lee", "avery.lee@example.com");
        let snapshot = Snapshot {
            chapters: vec![a.clone(), b.clone()],
            edges: vec![DependencyEdge {
                chapter_id: b.id,
                prerequisite_id: a.id,
            }],
            students: vec![learner.clone()],
            grades: vec![],
        };

        let verdicts = recommend(&snapshot, learner.id).unwrap();
        assert_eq!(
            verdicts.get(&a.id),
            Some(&Verdict::Status(Status::NeedsStudy))
        );
        assert_eq!(
            verdicts.get(&b.id),
            Some(&Verdict::Status(Status::NeedsStudy))
        );
    }

    #[test]
    fn satisfied_prerequisites_get_a_model_prediction() {
        let a = chapter("Algebra Basics");
        let b = chapter("Linear Equations");
        let learner = student("Avery Lee", "avery.lee@example.com");
        let snapshot = Snapshot {
            chapters: vec![a.clone(), b.clone()],
            edges: vec![DependencyEdge {
                chapter_id: b.id,
                prerequisite_id: a.id,
            }],
            students: vec![learner.clone()],
            grades: vec![grade(learner.id, a.id, 95.0)],
        };

        let verdicts = recommend(&snapshot, learner.id).unwrap();
        assert_eq!(
            verdicts.get(&a.id),
            Some(&Verdict::Category(Category::Mastered))
        );
        // The dependent chapter is model-predicted, never a sentinel.
        assert!(matches!(verdicts.get(&b.id), Some(Verdict::Category(_))));
    }

    #[test]
    fn missing_prerequisite_blocks_prediction() {
        let a = chapter("Algebra Basics");
        let f = chapter("Functions");
        let e = chapter("Exponential Functions");
        let learner = student("Avery Lee", "avery.lee@example.com");
        let snapshot = Snapshot {
            chapters: vec![a.clone(), f.clone(), e.clone()],
            edges: vec![
                DependencyEdge {
                    chapter_id: e.id,
                    prerequisite_id: a.id,
                },
                DependencyEdge {
                    chapter_id: e.id,
                    prerequisite_id: f.id,
                },
            ],
            students: vec![learner.clone()],
            grades: vec![grade(learner.id, a.id, 82.0)],
        };

        let verdicts = recommend(&snapshot, learner.id).unwrap();
        assert_eq!(
            verdicts.get(&e.id),
            Some(&Verdict::Status(Status::PrerequisitesIncomplete))
        );
        // Functions has no prerequisites and no score: not started.
        assert_eq!(
            verdicts.get(&f.id),
            Some(&Verdict::Status(Status::NotStarted))
        );
    }

    #[test]
    fn three_sample_matrix_still_recommends() {
        let a = chapter("Algebra Basics");
        let b = chapter("Linear Equations");
        let c = chapter("Inequalities");
        let d = chapter("Functions");
        let learner = student("Avery Lee", "avery.lee@example.com");
        let snapshot = Snapshot {
            chapters: vec![a.clone(), b.clone(), c.clone(), d.clone()],
            edges: vec![DependencyEdge {
                chapter_id: d.id,
                prerequisite_id: a.id,
            }],
            students: vec![learner.clone()],
            grades: vec![
                grade(learner.id, a.id, 91.0),
                grade(learner.id, b.id, 76.0),
                grade(learner.id, c.id, 64.0),
            ],
        };

        let verdicts = recommend(&snapshot, learner.id).unwrap();
        assert_eq!(
            verdicts.get(&a.id),
            Some(&Verdict::Category(Category::Mastered))
        );
        assert_eq!(
            verdicts.get(&b.id),
            Some(&Verdict::Category(Category::NeedsReview))
        );
        assert_eq!(
            verdicts.get(&c.id),
            Some(&Verdict::Category(Category::NeedsStudy))
        );
        assert!(matches!(verdicts.get(&d.id), Some(Verdict::Category(_))));
    }

    #[test]
    fn recommendation_is_idempotent() {
        let a = chapter("Algebra Basics");
        let b = chapter("Linear Equations");
        let c = chapter("Quadratic Equations");
        let learner = student("Avery Lee", "avery.lee@example.com");
        let peer = student("Jules Moreno", "jules.moreno@example.com");
        let snapshot = Snapshot {
            chapters: vec![a.clone(), b.clone(), c.clone()],
            edges: vec![
                DependencyEdge {
                    chapter_id: b.id,
                    prerequisite_id: a.id,
                },
                DependencyEdge {
                    chapter_id: c.id,
                    prerequisite_id: b.id,
                },
            ],
            students: vec![learner.clone(), peer.clone()],
            grades: vec![
                grade(learner.id, a.id, 88.0),
                grade(learner.id, b.id, 79.0),
                grade(peer.id, a.id, 93.0),
                grade(peer.id, b.id, 85.0),
                grade(peer.id, c.id, 81.0),
            ],
        };

        let first = recommend(&snapshot, learner.id).unwrap();
        let second = recommend(&snapshot, learner.id).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn dangling_edge_fails_the_pass() {
        let a = chapter("Algebra Basics");
        let ghost = Uuid::new_v4();
        let learner = student("Avery Lee", "avery.lee@example.com");
        let snapshot = Snapshot {
            chapters: vec![a.clone()],
            edges: vec![DependencyEdge {
                chapter_id: a.id,
                prerequisite_id: ghost,
            }],
            students: vec![learner.clone()],
            grades: vec![grade(learner.id, a.id, 75.0)],
        };

        let err = recommend(&snapshot, learner.id).unwrap_err();
        assert!(matches!(err, EngineError::DataIntegrity { .. }));
    }
}
