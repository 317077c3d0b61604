use thiserror::Error;
use uuid::Uuid;

/// Failures surfaced by the recommendation engine itself. Store and CLI
/// failures stay on `anyhow` at the binary boundary.
#[derive(Debug, Error)]
pub enum EngineError {
    /// `predict_one` was called on a model fitted with zero samples. The
    /// empty-scores short-circuit in `recommend` should make this
    /// unreachable; reaching it is a caller bug and must propagate.
    #[error("model was trained with zero samples and cannot predict")]
    UntrainedModel,

    /// A dependency edge references a chapter id the store never returned.
    #[error("dependency edge references unknown chapter {chapter_id}")]
    DataIntegrity { chapter_id: Uuid },
}
