//! Error taxonomy for the pipeline and chat layers.
//!
//! Step-local errors ([`StepError`]) are caught at the orchestrator step
//! boundary, recorded on the step record and document, and never propagate
//! further. [`PipelineError`] and [`ChatError`] cover the operations callers
//! invoke directly (lookups, run admission, session management).

use thiserror::Error;
use uuid::Uuid;

use crate::models::DocumentStatus;

/// Failure of a single pipeline step. The original message is preserved
/// verbatim on the step record for operator diagnosis.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    #[error("text extraction failed: {0}")]
    Extraction(String),
    #[error("OCR failed: {0}")]
    Ocr(String),
    #[error("table detection failed: {0}")]
    TableDetection(String),
    /// Recoverable: the chunking call site falls back to a single
    /// whole-text chunk instead of failing the document.
    #[error("chunking failed: {0}")]
    Chunking(String),
    #[error("embedding generation failed: {0}")]
    Embedding(String),
    #[error("metadata extraction failed: {0}")]
    Metadata(String),
}

/// Errors returned by orchestrator operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("document {0} not found")]
    NotFound(Uuid),
    #[error("invalid document reference: {0}")]
    InvalidDocumentReference(String),
    /// A run is already in flight for this document id.
    #[error("document {0} is already being processed")]
    AlreadyProcessing(Uuid),
    #[error("document {id} cannot be restarted from status {status:?}")]
    InvalidRestart { id: Uuid, status: DocumentStatus },
}

/// Errors returned by chat session operations.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat session {0} not found")]
    SessionNotFound(Uuid),
    #[error("document {0} not found")]
    DocumentNotFound(Uuid),
    #[error("maximum documents per chat ({0}) reached")]
    DocumentLimit(usize),
    #[error("unknown completion provider: {0}")]
    UnknownProvider(String),
    #[error("completion failed: {0}")]
    Completion(String),
}

/// Parse a document id string, mapping malformed input to
/// [`PipelineError::InvalidDocumentReference`].
pub fn parse_document_id(raw: &str) -> Result<Uuid, PipelineError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| PipelineError::InvalidDocumentReference(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_document_id_accepts_valid_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(parse_document_id(&id.to_string()).unwrap(), id);
    }

    #[test]
    fn parse_document_id_rejects_garbage() {
        let err = parse_document_id("not-a-uuid").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidDocumentReference(_)));
    }

    #[test]
    fn step_error_messages_are_preserved() {
        let err = StepError::Extraction("boom".to_string());
        assert_eq!(err.to_string(), "text extraction failed: boom");
    }
}
