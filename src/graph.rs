use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{Chapter, DependencyEdge};

/// In-memory view of the chapter -> prerequisite edges. Built fresh from the
/// snapshot on every engine pass so it always reflects current edges.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    prereqs: HashMap<Uuid, Vec<Uuid>>,
}

impl DependencyGraph {
    /// Builds the adjacency from the full edge list. Every edge endpoint must
    /// be a chapter the store returned; a dangling id is a data-integrity
    /// fault and fails the whole pass rather than silently skewing the
    /// prerequisite statistics downstream.
    pub fn from_snapshot(
        chapters: &[Chapter],
        edges: &[DependencyEdge],
    ) -> Result<Self, EngineError> {
        let known: HashSet<Uuid> = chapters.iter().map(|chapter| chapter.id).collect();
        let mut prereqs: HashMap<Uuid, Vec<Uuid>> = HashMap::new();

        for edge in edges {
            for id in [edge.chapter_id, edge.prerequisite_id] {
                if !known.contains(&id) {
                    return Err(EngineError::DataIntegrity { chapter_id: id });
                }
            }
            let entry = prereqs.entry(edge.chapter_id).or_default();
            if !entry.contains(&edge.prerequisite_id) {
                entry.push(edge.prerequisite_id);
            }
        }

        Ok(DependencyGraph { prereqs })
    }

    /// Direct prerequisites of a chapter, in edge-list order. Empty slice for
    /// chapters with no incoming requirements.
    pub fn prerequisites_of(&self, chapter_id: Uuid) -> &[Uuid] {
        self.prereqs
            .get(&chapter_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Orders chapters so that, for any acyclic edge set, every chapter
    /// follows all of its prerequisites. Depth-first with the visited mark
    /// set before recursion, so a cyclic edge set terminates; chapters inside
    /// a cycle come out in discovery order, which is deterministic for a
    /// fixed edge set and fixed input order.
    pub fn topological_order<'a>(&self, chapters: &'a [Chapter]) -> Vec<&'a Chapter> {
        let by_id: HashMap<Uuid, &Chapter> =
            chapters.iter().map(|chapter| (chapter.id, chapter)).collect();
        let mut visited = HashSet::new();
        let mut order = Vec::with_capacity(chapters.len());

        for chapter in chapters {
            self.visit(chapter.id, &by_id, &mut visited, &mut order);
        }

        order
    }

    fn visit<'a>(
        &self,
        chapter_id: Uuid,
        by_id: &HashMap<Uuid, &'a Chapter>,
        visited: &mut HashSet<Uuid>,
        order: &mut Vec<&'a Chapter>,
    ) {
        if !visited.insert(chapter_id) {
            return;
        }
        for &prerequisite in self.prerequisites_of(chapter_id) {
            self.visit(prerequisite, by_id, visited, order);
        }
        // Appended only once the prerequisite traversal completes.
        if let Some(&chapter) = by_id.get(&chapter_id) {
            order.push(chapter);
        }
    }
}
