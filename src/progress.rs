//! Pure progress calculation over a document's step records.

use crate::models::{Document, DocumentStatus, StepStatus};

/// Overall progress of a document in [0.0, 1.0].
///
/// `Uploaded` reports 0.0 and `Processed` reports 1.0 regardless of step
/// records. Otherwise progress is the fraction of non-terminal steps that
/// are done, plus the fractional progress of any in-flight step. A failed
/// document keeps whatever value it had reached, frozen.
pub fn progress(document: &Document) -> f32 {
    match document.status {
        DocumentStatus::Uploaded => return 0.0,
        DocumentStatus::Processed => return 1.0,
        DocumentStatus::Processing | DocumentStatus::Failed => {}
    }

    let countable: Vec<_> = document
        .steps
        .iter()
        .filter(|s| !s.kind.is_terminal_marker())
        .collect();
    if countable.is_empty() {
        return 0.0;
    }

    let total = countable.len() as f32;
    let mut done = 0.0f32;
    for step in &countable {
        if step.status.is_done() {
            done += 1.0;
        } else if step.status == StepStatus::InProgress {
            done += step.progress.clamp(0.0, 1.0);
        }
    }

    (done / total).clamp(0.0, 1.0)
}
