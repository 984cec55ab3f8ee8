//! Pipeline orchestrator: admits documents and drives them through the
//! fixed step sequence.
//!
//! One run per document at a time, enforced by the store's run lock;
//! overall concurrency is bounded by a semaphore sized from
//! `pipeline.max_workers`. Steps execute strictly in order and the task
//! yields between them so status polls stay responsive. A step failure
//! freezes the document as `Failed` with the error recorded on both the
//! step and the document; `restart_document` returns a failed document to
//! `Uploaded` for a fresh run.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::chunker::{self, ChunkParams};
use crate::config::Config;
use crate::error::{PipelineError, StepError};
use crate::extract::Extractor;
use crate::models::{Document, DocumentStatus, StepKind, StepStatus};
use crate::store::DocumentStore;
use crate::vector::VectorStore;

pub struct Pipeline {
    store: Arc<DocumentStore>,
    extractor: Arc<dyn Extractor>,
    vectors: Arc<dyn VectorStore>,
    config: Config,
    workers: Arc<Semaphore>,
}

impl Pipeline {
    pub fn new(
        store: Arc<DocumentStore>,
        extractor: Arc<dyn Extractor>,
        vectors: Arc<dyn VectorStore>,
        config: Config,
    ) -> Self {
        let workers = Arc::new(Semaphore::new(config.pipeline.max_workers));
        Self {
            store,
            extractor,
            vectors,
            config,
            workers,
        }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    pub fn vectors(&self) -> &Arc<dyn VectorStore> {
        &self.vectors
    }

    /// Register an uploaded file and return its document record.
    pub fn admit(
        &self,
        original_filename: &str,
        stored_path: &str,
        file_size: u64,
        file_type: &str,
    ) -> Document {
        let document = Document::new(original_filename, stored_path, file_size, file_type);
        tracing::info!(id = %document.id, filename = original_filename, "document admitted");
        self.store.insert(document.clone());
        document
    }

    /// Start a processing run in the background.
    ///
    /// Only `Uploaded` documents are eligible; a document with a run in
    /// flight yields [`PipelineError::AlreadyProcessing`], and terminal
    /// documents must go through [`Pipeline::restart_document`] first.
    pub fn spawn_processing(self: &Arc<Self>, id: Uuid) -> Result<JoinHandle<()>, PipelineError> {
        let snapshot = self.store.get(id)?;
        match snapshot.status {
            DocumentStatus::Uploaded => {}
            DocumentStatus::Processing => return Err(PipelineError::AlreadyProcessing(id)),
            status => return Err(PipelineError::InvalidRestart { id, status }),
        }
        let guard = self.store.try_run_guard(id)?;
        let pipeline = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let _guard = guard;
            let permit = match Arc::clone(&pipeline.workers).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let _permit = permit;
            pipeline.run(id).await;
        }))
    }

    /// Start a run and wait for it to finish, returning the final
    /// document snapshot.
    pub async fn process_and_wait(self: &Arc<Self>, id: Uuid) -> Result<Document, PipelineError> {
        let handle = self.spawn_processing(id)?;
        let _ = handle.await;
        self.store.get(id)
    }

    /// Return a failed document to `Uploaded` with fresh step records so
    /// it can be processed again from scratch.
    pub fn restart_document(&self, id: Uuid) -> Result<Document, PipelineError> {
        let snapshot = self.store.get(id)?;
        if snapshot.status != DocumentStatus::Failed {
            return Err(PipelineError::InvalidRestart {
                id,
                status: snapshot.status,
            });
        }
        // Restart still races a (stale) in-flight run without this check.
        let _guard = self.store.try_run_guard(id)?;
        tracing::info!(%id, "restarting failed document");
        self.store.update_with(id, |doc| {
            doc.status = DocumentStatus::Uploaded;
            doc.steps.clear();
            doc.chunks.clear();
            doc.tables.clear();
            doc.metadata = None;
            doc.error = None;
        })
    }

    /// Remove a document, its vector collection, and its stored file.
    pub async fn delete_document(&self, id: Uuid) -> Result<(), PipelineError> {
        let document = self.store.remove(id)?;
        if let Some(collection) = &document.collection {
            if let Err(err) = self.vectors.delete_collection(collection).await {
                tracing::warn!(%id, error = %err, "failed to drop vector collection");
            }
        }
        let _ = tokio::fs::remove_file(&document.stored_path).await;
        Ok(())
    }

    async fn run(&self, id: Uuid) {
        tracing::info!(%id, "processing started");
        match self.execute(id).await {
            Ok(()) => tracing::info!(%id, "processing finished"),
            Err(RunAbort::StepFailed(kind)) => {
                tracing::warn!(%id, step = kind.as_str(), "processing failed")
            }
            Err(RunAbort::DocumentGone) => {
                tracing::warn!(%id, "document removed mid-run")
            }
        }
    }

    async fn execute(&self, id: Uuid) -> Result<(), RunAbort> {
        self.store
            .update_with(id, |doc| {
                doc.status = DocumentStatus::Processing;
                doc.init_steps();
                doc.error = None;
                doc.chunks.clear();
                doc.tables.clear();
                doc.metadata = None;
            })
            .map_err(|_| RunAbort::DocumentGone)?;

        let snapshot = self.store.get(id).map_err(|_| RunAbort::DocumentGone)?;

        // Text extraction
        self.step_started(id, StepKind::TextExtraction)?;
        let extraction = match self.extractor.extract(&snapshot).await {
            Ok(extraction) => extraction,
            Err(err) => return self.step_failed(id, StepKind::TextExtraction, err),
        };
        let mut text = extraction.text;
        self.step_completed(
            id,
            StepKind::TextExtraction,
            Some(format!("{} characters extracted", text.len())),
        )?;
        tokio::task::yield_now().await;

        // OCR
        if extraction.needs_ocr {
            self.step_started(id, StepKind::Ocr)?;
            match self.extractor.ocr(&snapshot).await {
                Ok(ocr_text) => {
                    if text.trim().is_empty() {
                        text = ocr_text;
                    } else {
                        text.push_str("\n\n");
                        text.push_str(&ocr_text);
                    }
                    self.step_completed(id, StepKind::Ocr, None)?;
                }
                Err(err) => return self.step_failed(id, StepKind::Ocr, err),
            }
        } else {
            self.step_skipped(id, StepKind::Ocr, "sufficient text extracted")?;
        }
        tokio::task::yield_now().await;

        // Table detection
        if self.config.pipeline.extract_tables {
            self.step_started(id, StepKind::TableDetection)?;
            match self.extractor.detect_tables(&snapshot, &text).await {
                Ok(tables) => {
                    let count = tables.len();
                    self.store
                        .update_with(id, |doc| doc.tables = tables)
                        .map_err(|_| RunAbort::DocumentGone)?;
                    self.step_completed(
                        id,
                        StepKind::TableDetection,
                        Some(format!("{} tables detected", count)),
                    )?;
                }
                Err(err) => return self.step_failed(id, StepKind::TableDetection, err),
            }
        } else {
            self.step_skipped(id, StepKind::TableDetection, "table extraction disabled")?;
        }
        tokio::task::yield_now().await;

        // Chunking
        self.step_started(id, StepKind::TextChunking)?;
        let params = ChunkParams {
            chunk_size: self.config.chunking.chunk_size,
            chunk_overlap: self.config.chunking.chunk_overlap,
        };
        let pages = self
            .extractor
            .page_texts(&snapshot)
            .await
            .unwrap_or_default();
        // Chunking is CPU-bound; keep it off the runtime workers. A panic
        // in the blocking task surfaces as an empty list and takes the
        // whole-text fallback below.
        let chunk_input = text.clone();
        let mut chunks = tokio::task::spawn_blocking(move || {
            chunker::chunk_text_with_pages(&chunk_input, &params, &pages)
        })
        .await
        .unwrap_or_default();
        let mut chunk_note = format!("{} chunks produced", chunks.len());
        if chunks.is_empty() && !text.trim().is_empty() {
            // Never forfeit successfully extracted text.
            chunks = vec![chunker::whole_text_chunk(&text)];
            chunk_note = "fell back to a single whole-text chunk".to_string();
        }
        let chunks_for_doc = chunks.clone();
        self.store
            .update_with(id, |doc| doc.chunks = chunks_for_doc)
            .map_err(|_| RunAbort::DocumentGone)?;
        self.step_completed(id, StepKind::TextChunking, Some(chunk_note))?;
        tokio::task::yield_now().await;

        // Embedding / indexing
        self.step_started(id, StepKind::EmbeddingGeneration)?;
        let collection = format!("doc_{}", id);
        let snapshot = self.store.get(id).map_err(|_| RunAbort::DocumentGone)?;
        let indexed = async {
            // Re-runs rebuild the collection from scratch.
            self.vectors.delete_collection(&collection).await?;
            let mut indexed = self.vectors.upsert_chunks(&collection, &chunks).await?;
            indexed += self
                .vectors
                .upsert_tables(&collection, &snapshot.tables)
                .await?;
            Ok::<usize, StepError>(indexed)
        }
        .await;
        match indexed {
            Ok(indexed) => {
                self.store
                    .update_with(id, |doc| doc.collection = Some(collection.clone()))
                    .map_err(|_| RunAbort::DocumentGone)?;
                self.step_completed(
                    id,
                    StepKind::EmbeddingGeneration,
                    Some(format!("{} entries indexed", indexed)),
                )?;
            }
            Err(err) => return self.step_failed(id, StepKind::EmbeddingGeneration, err),
        }
        tokio::task::yield_now().await;

        // Metadata
        self.step_started(id, StepKind::MetadataExtraction)?;
        match self.extractor.extract_metadata(&snapshot, &text).await {
            Ok(metadata) => {
                self.store
                    .update_with(id, |doc| doc.metadata = Some(metadata))
                    .map_err(|_| RunAbort::DocumentGone)?;
                self.step_completed(id, StepKind::MetadataExtraction, None)?;
            }
            Err(err) => return self.step_failed(id, StepKind::MetadataExtraction, err),
        }

        // Terminal marker
        self.store
            .update_with(id, |doc| {
                if let Some(step) = doc.step_mut(StepKind::Completed) {
                    step.status = StepStatus::Completed;
                    step.finished_at = Some(chrono::Utc::now());
                    step.progress = 1.0;
                }
                doc.status = doc.derived_status();
            })
            .map_err(|_| RunAbort::DocumentGone)?;

        Ok(())
    }

    fn step_started(&self, id: Uuid, kind: StepKind) -> Result<(), RunAbort> {
        tracing::debug!(%id, step = kind.as_str(), "step started");
        self.store
            .update_with(id, |doc| {
                if let Some(step) = doc.step_mut(kind) {
                    step.status = StepStatus::InProgress;
                    step.started_at = Some(chrono::Utc::now());
                }
            })
            .map(|_| ())
            .map_err(|_| RunAbort::DocumentGone)
    }

    fn step_completed(
        &self,
        id: Uuid,
        kind: StepKind,
        message: Option<String>,
    ) -> Result<(), RunAbort> {
        self.store
            .update_with(id, |doc| {
                if let Some(step) = doc.step_mut(kind) {
                    step.status = StepStatus::Completed;
                    step.finished_at = Some(chrono::Utc::now());
                    step.progress = 1.0;
                    step.message = message;
                }
            })
            .map(|_| ())
            .map_err(|_| RunAbort::DocumentGone)
    }

    fn step_skipped(&self, id: Uuid, kind: StepKind, reason: &str) -> Result<(), RunAbort> {
        tracing::debug!(%id, step = kind.as_str(), reason, "step skipped");
        let reason = reason.to_string();
        self.store
            .update_with(id, |doc| {
                if let Some(step) = doc.step_mut(kind) {
                    step.status = StepStatus::Skipped;
                    step.finished_at = Some(chrono::Utc::now());
                    step.progress = 1.0;
                    step.message = Some(reason);
                }
            })
            .map(|_| ())
            .map_err(|_| RunAbort::DocumentGone)
    }

    fn step_failed(&self, id: Uuid, kind: StepKind, err: StepError) -> Result<(), RunAbort> {
        let message = err.to_string();
        tracing::warn!(%id, step = kind.as_str(), error = %message, "step failed");
        let _ = self.store.update_with(id, |doc| {
            if let Some(step) = doc.step_mut(kind) {
                step.status = StepStatus::Failed;
                step.finished_at = Some(chrono::Utc::now());
                step.error = Some(message.clone());
            }
            doc.status = DocumentStatus::Failed;
            doc.error = Some(message.clone());
        });
        Err(RunAbort::StepFailed(kind))
    }
}

enum RunAbort {
    StepFailed(StepKind),
    DocumentGone,
}
