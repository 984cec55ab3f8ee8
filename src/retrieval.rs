//! Cross-document retrieval and context formatting.
//!
//! Each attached document owns one vector collection; retrieval fans out
//! the query to every collection concurrently, merges the per-document
//! hits, and re-ranks them globally by ascending distance. Failures in a
//! single collection degrade the result instead of aborting retrieval.
//!
//! The winning hits are rendered into a context block with provenance
//! annotations:
//!
//! ```text
//! [Relevance: 0.95 (Source: Document: report.pdf, Page 3, Section: 2. Methods)]
//! <chunk text>
//! ```

use std::sync::Arc;

use futures::future::join_all;
use uuid::Uuid;

use crate::config::RetrievalConfig;
use crate::models::{ChatMessage, Document};
use crate::store::DocumentStore;
use crate::vector::VectorStore;

/// One globally ranked retrieval hit with its provenance.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub text: String,
    /// Dissimilarity in [0, 1]; lower ranks first.
    pub distance: f64,
    pub document_id: Uuid,
    pub document_title: String,
    pub page_number: Option<u32>,
    pub section_title: Option<String>,
}

/// Result of retrieval over a session's attached documents.
#[derive(Debug, Clone, Default)]
pub struct RetrievedContext {
    pub hits: Vec<RetrievedChunk>,
    /// Whether any hit was found; providers use this to avoid answering
    /// from thin air.
    pub grounded: bool,
}

impl RetrievedContext {
    /// Render the hits into the annotated context block, or `None` when
    /// nothing was retrieved.
    pub fn format_block(&self) -> Option<String> {
        if self.hits.is_empty() {
            return None;
        }
        let sections: Vec<String> = self
            .hits
            .iter()
            .map(|hit| {
                let mut source = format!("Document: {}", hit.document_title);
                if let Some(page) = hit.page_number {
                    source.push_str(&format!(", Page {}", page));
                }
                if let Some(section) = &hit.section_title {
                    source.push_str(&format!(", Section: {}", section));
                }
                format!(
                    "[Relevance: {:.2} (Source: {})]\n{}",
                    1.0 - hit.distance,
                    source,
                    hit.text
                )
            })
            .collect();
        Some(sections.join("\n\n"))
    }
}

/// Query every attached document's collection and merge the hits into a
/// single globally ranked list of at most `top_k` chunks.
///
/// Documents that are missing, not yet indexed, or whose collection query
/// fails are skipped with a warning.
pub async fn retrieve_context(
    store: &DocumentStore,
    vectors: &Arc<dyn VectorStore>,
    document_ids: &[Uuid],
    query: &str,
    config: &RetrievalConfig,
) -> RetrievedContext {
    let documents: Vec<Document> = document_ids
        .iter()
        .filter_map(|id| store.get(*id).ok())
        .collect();

    let lookups = documents.iter().filter_map(|doc| {
        let collection = doc.collection.clone()?;
        let vectors = Arc::clone(vectors);
        let k = config.per_document_k;
        Some(async move {
            let hits = vectors.query(&collection, query, k).await;
            (doc, hits)
        })
    });

    // (distance, document id, per-document rank) keyed for a total,
    // deterministic order across documents.
    let mut ranked: Vec<(f64, Uuid, usize, RetrievedChunk)> = Vec::new();
    for (doc, hits) in join_all(lookups).await {
        let hits = match hits {
            Ok(hits) => hits,
            Err(err) => {
                tracing::warn!(document = %doc.id, error = %err, "collection query failed");
                continue;
            }
        };
        for (rank, hit) in hits.into_iter().enumerate() {
            ranked.push((
                hit.distance,
                doc.id,
                rank,
                RetrievedChunk {
                    text: hit.text,
                    distance: hit.distance,
                    document_id: doc.id,
                    document_title: doc.display_title().to_string(),
                    page_number: hit.page_number,
                    section_title: hit.section_title,
                },
            ));
        }
    }

    ranked.sort_by(|a, b| {
        a.0.total_cmp(&b.0)
            .then_with(|| a.1.cmp(&b.1))
            .then_with(|| a.2.cmp(&b.2))
    });
    ranked.truncate(config.top_k);

    let hits: Vec<RetrievedChunk> = ranked.into_iter().map(|(_, _, _, hit)| hit).collect();
    let grounded = !hits.is_empty();
    RetrievedContext { hits, grounded }
}

/// Build the retrieval query from the user's message plus a trailing
/// window of conversation history.
pub fn build_query(history: &[ChatMessage], message: &str) -> String {
    if history.is_empty() {
        return message.to_string();
    }
    let context: Vec<String> = history
        .iter()
        .map(|m| format!("{}: {}", m.role.as_str(), m.text))
        .collect();
    format!("Context:\n{}\n\nQuestion: {}", context.join("\n"), message)
}
