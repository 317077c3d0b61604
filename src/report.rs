use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::NaiveDate;

use crate::error::EngineError;
use crate::graph::DependencyGraph;
use crate::models::Snapshot;
use crate::recommend;

/// Markdown study-plan report for a class (or the whole roster). Chapters are
/// listed in dependency order so the plan reads front-to-back.
pub fn build_report(
    snapshot: &Snapshot,
    class_label: Option<&str>,
    today: NaiveDate,
) -> Result<String, EngineError> {
    let graph = DependencyGraph::from_snapshot(&snapshot.chapters, &snapshot.edges)?;
    let ordered = graph.topological_order(&snapshot.chapters);

    let students: Vec<_> = snapshot
        .students
        .iter()
        .filter(|student| class_label.map_or(true, |label| student.class_label == label))
        .collect();

    let mut output = String::new();
    let scope = class_label.unwrap_or("all classes");

    let _ = writeln!(output, "# Chapter Mastery Report");
    let _ = writeln!(output, "Generated for {scope} on {today}");
    let _ = writeln!(output);
    let _ = writeln!(output, "## Curriculum Order");

    for (position, chapter) in ordered.iter().enumerate() {
        let _ = writeln!(output, "{}. {}", position + 1, chapter.name);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students");

    if students.is_empty() {
        let _ = writeln!(output, "No students on the roster for this scope.");
        return Ok(output);
    }

    let mut label_counts: BTreeMap<&'static str, usize> = BTreeMap::new();

    for student in &students {
        let verdicts = recommend::recommend(snapshot, student.id)?;
        let latest = snapshot
            .grades
            .iter()
            .filter(|grade| grade.student_id == student.id)
            .map(|grade| grade.recorded_at)
            .max();

        let _ = writeln!(output);
        let _ = writeln!(
            output,
            "### {} ({}, {})",
            student.full_name, student.email, student.class_label
        );
        match latest {
            Some(date) => {
                let _ = writeln!(output, "Latest grade recorded {date}.");
            }
            None => {
                let _ = writeln!(output, "No grades recorded yet.");
            }
        }

        for chapter in &ordered {
            if let Some(verdict) = verdicts.get(&chapter.id) {
                let _ = writeln!(output, "- {}: {}", chapter.name, verdict.label());
                *label_counts.entry(verdict.label()).or_default() += 1;
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Verdict Mix");
    for (label, count) in &label_counts {
        let _ = writeln!(output, "- {label}: {count}");
    }

    Ok(output)
}
