//! Core data models for the ingestion pipeline and chat layer.
//!
//! These types represent documents, their per-step processing state, the
//! chunks and tables extracted from them, and the chat sessions that query
//! them. A [`Document`] is mutated only by the pipeline orchestrator; status
//! readers see cloned snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Processed,
    Failed,
}

/// The fixed, ordered stages of the ingestion pipeline.
///
/// `Completed` is a terminal marker with no real work; the progress
/// calculator excludes it from its denominator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    TextExtraction,
    Ocr,
    TableDetection,
    TextChunking,
    EmbeddingGeneration,
    MetadataExtraction,
    Completed,
}

impl StepKind {
    /// All step kinds in execution order.
    pub const ALL: [StepKind; 7] = [
        StepKind::TextExtraction,
        StepKind::Ocr,
        StepKind::TableDetection,
        StepKind::TextChunking,
        StepKind::EmbeddingGeneration,
        StepKind::MetadataExtraction,
        StepKind::Completed,
    ];

    /// Whether this is the terminal marker step.
    pub fn is_terminal_marker(&self) -> bool {
        matches!(self, StepKind::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::TextExtraction => "text_extraction",
            StepKind::Ocr => "ocr",
            StepKind::TableDetection => "table_detection",
            StepKind::TextChunking => "text_chunking",
            StepKind::EmbeddingGeneration => "embedding_generation",
            StepKind::MetadataExtraction => "metadata_extraction",
            StepKind::Completed => "completed",
        }
    }
}

/// State of a single step record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Completed and Skipped both count as done for progress purposes.
    pub fn is_done(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Skipped)
    }
}

/// Per-step processing state. One record per [`StepKind`] per document,
/// created at run start and mutated in place as the step executes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub kind: StepKind,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Fractional progress of this step in [0, 1].
    pub progress: f32,
    pub message: Option<String>,
    pub error: Option<String>,
}

impl StepRecord {
    pub fn new(kind: StepKind) -> Self {
        Self {
            kind,
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            progress: 0.0,
            message: None,
            error: None,
        }
    }
}

/// Axis-aligned bounding box in PDF coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

/// A bounded, retrievable span of document text with optional positional
/// and section annotations. Immutable once produced by the chunker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub id: Uuid,
    pub text: String,
    pub page_number: Option<u32>,
    pub paragraph_number: Option<u32>,
    pub section_title: Option<String>,
    pub coordinates: Option<Rect>,
    /// SHA-256 of the chunk text, hex-encoded. Used for duplicate
    /// detection when upserting into a vector collection.
    pub hash: String,
}

/// Structured representation of a detected table. Immutable once extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Table {
    pub id: Uuid,
    pub page_number: u32,
    pub rows: usize,
    pub cols: usize,
    pub coordinates: Option<Rect>,
    pub caption: Option<String>,
    pub header: Option<Vec<String>>,
    pub data: Vec<Vec<String>>,
}

impl Table {
    /// Flatten the table into embeddable text: header line, then one line
    /// per data row, cells comma-joined.
    pub fn as_text(&self) -> String {
        let mut lines = Vec::with_capacity(self.data.len() + 1);
        if let Some(header) = &self.header {
            lines.push(header.join(", "));
        }
        for row in &self.data {
            lines.push(row.join(", "));
        }
        lines.join("\n")
    }
}

/// Metadata extracted from a document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub created_date: Option<DateTime<Utc>>,
    pub modified_date: Option<DateTime<Utc>>,
    pub page_count: Option<usize>,
    pub word_count: Option<usize>,
    pub content_type: Option<String>,
}

/// A document admitted to the pipeline.
///
/// Owned exclusively by the orchestrator for mutation; read concurrently
/// by status and progress queries as cloned snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub original_filename: String,
    /// Path the uploaded bytes were stored at; extractors read from here.
    pub stored_path: String,
    pub file_size: u64,
    /// Declared type, normally the lowercase file extension.
    pub file_type: String,
    pub upload_time: DateTime<Utc>,
    pub status: DocumentStatus,
    pub steps: Vec<StepRecord>,
    pub metadata: Option<DocumentMetadata>,
    pub chunks: Vec<TextChunk>,
    pub tables: Vec<Table>,
    /// Name of the vector collection holding this document's embeddings.
    pub collection: Option<String>,
    pub error: Option<String>,
}

impl Document {
    pub fn new(original_filename: &str, stored_path: &str, file_size: u64, file_type: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            original_filename: original_filename.to_string(),
            stored_path: stored_path.to_string(),
            file_size,
            file_type: file_type.to_lowercase(),
            upload_time: Utc::now(),
            status: DocumentStatus::Uploaded,
            steps: Vec::new(),
            metadata: None,
            chunks: Vec::new(),
            tables: Vec::new(),
            collection: None,
            error: None,
        }
    }

    /// Create one pending record per step kind, in execution order.
    pub fn init_steps(&mut self) {
        self.steps = StepKind::ALL.iter().map(|k| StepRecord::new(*k)).collect();
    }

    pub fn step(&self, kind: StepKind) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.kind == kind)
    }

    pub fn step_mut(&mut self, kind: StepKind) -> Option<&mut StepRecord> {
        self.steps.iter_mut().find(|s| s.kind == kind)
    }

    /// Title for retrieval provenance: extracted metadata title when
    /// present, otherwise the original filename.
    pub fn display_title(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|m| m.title.as_deref())
            .unwrap_or(&self.original_filename)
    }

    /// Status derived from the aggregate of step records: `Processed` iff
    /// every non-terminal step is Completed or Skipped, `Failed` iff any
    /// step is Failed, `Processing` otherwise.
    pub fn derived_status(&self) -> DocumentStatus {
        if self.steps.is_empty() {
            return DocumentStatus::Uploaded;
        }
        if self.steps.iter().any(|s| s.status == StepStatus::Failed) {
            return DocumentStatus::Failed;
        }
        let non_terminal_done = self
            .steps
            .iter()
            .filter(|s| !s.kind.is_terminal_marker())
            .all(|s| s.status.is_done());
        if non_terminal_done {
            DocumentStatus::Processed
        } else {
            DocumentStatus::Processing
        }
    }
}

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single message in a chat session. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl ChatMessage {
    pub fn user(text: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::User,
            text: text.to_string(),
            timestamp: Utc::now(),
            metadata: serde_json::json!({}),
        }
    }

    pub fn assistant(text: String, metadata: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: Role::Assistant,
            text,
            timestamp: Utc::now(),
            metadata,
        }
    }
}

/// A chat session holding an ordered set of attached documents and an
/// append-only message history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub name: String,
    pub document_ids: Vec<Uuid>,
    pub messages: Vec<ChatMessage>,
    /// Completion provider name this session dispatches to.
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(name: Option<String>, provider: &str) -> Self {
        let id = Uuid::new_v4();
        let name = name.unwrap_or_else(|| format!("Chat {}", &id.to_string()[..8]));
        let now = Utc::now();
        Self {
            id,
            name,
            document_ids: Vec::new(),
            messages: Vec::new(),
            provider: provider.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_message(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.updated_at = Utc::now();
    }

    /// The trailing `limit` messages, oldest first.
    pub fn recent_messages(&self, limit: usize) -> &[ChatMessage] {
        let start = self.messages.len().saturating_sub(limit);
        &self.messages[start..]
    }
}
