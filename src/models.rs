use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct Chapter {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct DependencyEdge {
    pub chapter_id: Uuid,
    pub prerequisite_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct StudentRecord {
    pub id: Uuid,
    pub full_name: String,
    pub email: String,
    pub class_label: String,
}

#[derive(Debug, Clone)]
pub struct GradeRecord {
    pub student_id: Uuid,
    pub chapter_id: Uuid,
    pub score: f64,
    pub recorded_at: NaiveDate,
}

/// One consistent read of the store. The engine trains and predicts against
/// a single snapshot so a concurrent grade write can never tear one pass.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Chapters in stable id order.
    pub chapters: Vec<Chapter>,
    pub edges: Vec<DependencyEdge>,
    /// Students in stable id order.
    pub students: Vec<StudentRecord>,
    pub grades: Vec<GradeRecord>,
}

impl Snapshot {
    /// Recorded scores for one student, keyed by chapter.
    pub fn scores_for(&self, student_id: Uuid) -> BTreeMap<Uuid, f64> {
        self.grades
            .iter()
            .filter(|grade| grade.student_id == student_id)
            .map(|grade| (grade.chapter_id, grade.score))
            .collect()
    }

    /// Students holding at least one grade, in stable id order. Students
    /// without grades contribute nothing to training and are skipped.
    pub fn students_with_any_grade(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.grades.iter().map(|grade| grade.student_id).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Mastery category derived from a score on the 0-100 scale. Ordinal: a
/// variant later in the declaration is a strictly better outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    NeedsStudy,
    NeedsReview,
    Proficient,
    Mastered,
}

impl Category {
    pub const ALL: [Category; 4] = [
        Category::NeedsStudy,
        Category::NeedsReview,
        Category::Proficient,
        Category::Mastered,
    ];

    /// Threshold table on the canonical 0-100 scale.
    pub fn from_score(score: f64) -> Category {
        if score >= 90.0 {
            Category::Mastered
        } else if score >= 80.0 {
            Category::Proficient
        } else if score >= 70.0 {
            Category::NeedsReview
        } else {
            Category::NeedsStudy
        }
    }

    /// Position in `ALL`, used for vote counting in the forest.
    pub fn index(self) -> usize {
        match self {
            Category::NeedsStudy => 0,
            Category::NeedsReview => 1,
            Category::Proficient => 2,
            Category::Mastered => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Category::NeedsStudy => "NEEDS_STUDY",
            Category::NeedsReview => "NEEDS_REVIEW",
            Category::Proficient => "PROFICIENT",
            Category::Mastered => "MASTERED",
        }
    }
}

/// Non-predictive outcomes. `NeedsStudy` here is the default issued when a
/// student has no grades at all, kept apart from the category of the same
/// name so callers can tell "no data" apart from a real classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    NotStarted,
    PrerequisitesIncomplete,
    NeedsStudy,
}

impl Status {
    pub fn label(self) -> &'static str {
        match self {
            Status::NotStarted => "NOT_STARTED",
            Status::PrerequisitesIncomplete => "PREREQUISITES_INCOMPLETE",
            Status::NeedsStudy => "NEEDS_STUDY",
        }
    }
}

/// Per-chapter outcome of a recommendation pass. Serializes to the bare
/// string label either way, so the JSON surface stays `{chapter_id: label}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Verdict {
    Category(Category),
    Status(Status),
}

impl Verdict {
    pub fn label(self) -> &'static str {
        match self {
            Verdict::Category(category) => category.label(),
            Verdict::Status(status) => status.label(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_boundaries() {
        assert_eq!(Category::from_score(90.0), Category::Mastered);
        assert_eq!(Category::from_score(89.999), Category::Proficient);
        assert_eq!(Category::from_score(80.0), Category::Proficient);
        assert_eq!(Category::from_score(79.999), Category::NeedsReview);
        assert_eq!(Category::from_score(70.0), Category::NeedsReview);
        assert_eq!(Category::from_score(69.999), Category::NeedsStudy);
        assert_eq!(Category::from_score(0.0), Category::NeedsStudy);
        assert_eq!(Category::from_score(100.0), Category::Mastered);
    }

    #[test]
    fn category_is_monotonic() {
        let mut score = 0.0;
        let mut previous = Category::from_score(score);
        while score <= 100.0 {
            let current = Category::from_score(score);
            assert!(current >= previous, "category regressed at score {score}");
            previous = current;
            score += 0.25;
        }
    }

    #[test]
    fn verdict_serializes_to_bare_label() {
        let category = serde_json::to_string(&Verdict::Category(Category::Mastered)).unwrap();
        assert_eq!(category, "\"MASTERED\"");
        let status =
            serde_json::to_string(&Verdict::Status(Status::PrerequisitesIncomplete)).unwrap();
        assert_eq!(status, "\"PREREQUISITES_INCOMPLETE\"");
    }

    #[test]
    fn scores_for_filters_by_student() {
        let student = Uuid::new_v4();
        let other = Uuid::new_v4();
        let chapter = Uuid::new_v4();
        let snapshot = Snapshot {
            grades: vec![
                GradeRecord {
                    student_id: student,
                    chapter_id: chapter,
                    score: 88.0,
                    recorded_at: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                },
                GradeRecord {
                    student_id: other,
                    chapter_id: chapter,
                    score: 55.0,
                    recorded_at: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
                },
            ],
            ..Snapshot::default()
        };

        let scores = snapshot.scores_for(student);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores.get(&chapter), Some(&88.0));
    }
}
