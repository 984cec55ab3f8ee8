//! Vector collection abstraction and the in-memory reference store.
//!
//! The orchestrator writes one collection per document; retrieval queries
//! each attached document's collection independently. [`InMemoryVectorStore`]
//! scores by word-set overlap, which keeps the store dependency-free and
//! fully deterministic for tests; real deployments can implement
//! [`VectorStore`] over an external engine.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StepError;
use crate::models::{Table, TextChunk};

/// One retrieval hit from a single collection.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: uuid::Uuid,
    pub text: String,
    /// Dissimilarity in [0, 1]; lower is more relevant.
    pub distance: f64,
    pub page_number: Option<u32>,
    pub section_title: Option<String>,
}

/// Storage and query seam for per-document chunk collections.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert chunks into `collection`, creating it if absent. Chunks whose
    /// content hash is already present are silently dropped.
    async fn upsert_chunks(
        &self,
        collection: &str,
        chunks: &[TextChunk],
    ) -> Result<usize, StepError>;

    /// Insert flattened table text alongside the chunks, keeping the
    /// table's page and coordinates as hit provenance.
    async fn upsert_tables(&self, collection: &str, tables: &[Table]) -> Result<usize, StepError> {
        let chunks: Vec<TextChunk> = tables
            .iter()
            .map(|t| {
                let mut chunk = crate::chunker::whole_text_chunk(&t.as_text());
                chunk.page_number = Some(t.page_number);
                chunk.coordinates = t.coordinates;
                chunk
            })
            .collect();
        self.upsert_chunks(collection, &chunks).await
    }

    /// The `k` nearest entries to `query`, ordered by ascending distance.
    /// An unknown collection yields an empty list, not an error.
    async fn query(&self, collection: &str, query: &str, k: usize)
        -> Result<Vec<VectorHit>, StepError>;

    /// Drop a collection and all its entries. Idempotent.
    async fn delete_collection(&self, collection: &str) -> Result<(), StepError>;
}

#[derive(Debug, Clone)]
struct Entry {
    chunk_id: uuid::Uuid,
    text: String,
    hash: String,
    page_number: Option<u32>,
    section_title: Option<String>,
}

/// Reference store: collections in a `RwLock`ed map, similarity from the
/// fraction of query words present in an entry.
#[derive(Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<Entry>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection_len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .map(|c| c.get(collection).map_or(0, Vec::len))
            .unwrap_or(0)
    }
}

fn lock_poisoned() -> StepError {
    StepError::Embedding("vector store lock poisoned".to_string())
}

/// Lowercased words with surrounding punctuation stripped, so "Safety."
/// and "safety" compare equal.
fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert_chunks(
        &self,
        collection: &str,
        chunks: &[TextChunk],
    ) -> Result<usize, StepError> {
        let mut collections = self.collections.write().map_err(|_| lock_poisoned())?;
        let entries = collections.entry(collection.to_string()).or_default();
        let existing: HashSet<String> = entries.iter().map(|e| e.hash.clone()).collect();

        let mut inserted = 0;
        for chunk in chunks {
            if existing.contains(&chunk.hash) {
                continue;
            }
            entries.push(Entry {
                chunk_id: chunk.id,
                text: chunk.text.clone(),
                hash: chunk.hash.clone(),
                page_number: chunk.page_number,
                section_title: chunk.section_title.clone(),
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn query(
        &self,
        collection: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<VectorHit>, StepError> {
        let collections = self.collections.read().map_err(|_| lock_poisoned())?;
        let Some(entries) = collections.get(collection) else {
            return Ok(Vec::new());
        };

        let query_words = word_set(query);
        if query_words.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<VectorHit> = Vec::new();
        for entry in entries {
            let entry_words = word_set(&entry.text);
            let common = query_words.intersection(&entry_words).count();
            if common == 0 {
                continue;
            }
            let score = common as f64 / query_words.len() as f64;
            hits.push(VectorHit {
                chunk_id: entry.chunk_id,
                text: entry.text.clone(),
                distance: 1.0 - score,
                page_number: entry.page_number,
                section_title: entry.section_title.clone(),
            });
        }

        // Stable order: distance, then insertion order (sort is stable).
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), StepError> {
        let mut collections = self.collections.write().map_err(|_| lock_poisoned())?;
        collections.remove(collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::whole_text_chunk;

    fn chunks(texts: &[&str]) -> Vec<TextChunk> {
        texts.iter().map(|t| whole_text_chunk(t)).collect()
    }

    #[tokio::test]
    async fn upsert_and_query_ranks_by_overlap() {
        let store = InMemoryVectorStore::new();
        store
            .upsert_chunks(
                "doc_a",
                &chunks(&[
                    "rust ownership and borrowing rules",
                    "gardening tips for spring",
                    "rust lifetimes explained with borrowing",
                ]),
            )
            .await
            .unwrap();

        let hits = store
            .query("doc_a", "rust borrowing lifetimes", 2)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].text.contains("lifetimes"));
        assert!(hits[0].distance < hits[1].distance);
    }

    #[tokio::test]
    async fn non_matching_entries_are_excluded() {
        let store = InMemoryVectorStore::new();
        store
            .upsert_chunks("doc_a", &chunks(&["alpha beta", "gamma delta"]))
            .await
            .unwrap();
        let hits = store.query("doc_a", "alpha", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn unknown_collection_is_empty_not_error() {
        let store = InMemoryVectorStore::new();
        let hits = store.query("missing", "anything", 3).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn duplicate_hashes_are_dropped() {
        let store = InMemoryVectorStore::new();
        let batch = chunks(&["same text"]);
        assert_eq!(store.upsert_chunks("c", &batch).await.unwrap(), 1);
        assert_eq!(store.upsert_chunks("c", &batch).await.unwrap(), 0);
        assert_eq!(store.collection_len("c"), 1);
    }

    #[tokio::test]
    async fn delete_collection_is_idempotent() {
        let store = InMemoryVectorStore::new();
        store
            .upsert_chunks("c", &chunks(&["some text"]))
            .await
            .unwrap();
        store.delete_collection("c").await.unwrap();
        store.delete_collection("c").await.unwrap();
        assert_eq!(store.collection_len("c"), 0);
    }

    #[tokio::test]
    async fn table_text_is_upserted_as_chunks() {
        let store = InMemoryVectorStore::new();
        let table = Table {
            id: uuid::Uuid::new_v4(),
            page_number: 4,
            rows: 1,
            cols: 2,
            coordinates: None,
            caption: None,
            header: Some(vec!["metric".into(), "value".into()]),
            data: vec![vec!["revenue".into(), "42".into()]],
        };
        let inserted = store.upsert_tables("c", &[table]).await.unwrap();
        assert_eq!(inserted, 1);
        let hits = store.query("c", "revenue", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        // Table hits keep their source page.
        assert_eq!(hits[0].page_number, Some(4));
    }

    #[tokio::test]
    async fn query_matching_is_case_insensitive() {
        let store = InMemoryVectorStore::new();
        store
            .upsert_chunks("c", &chunks(&["Rust Ownership Model"]))
            .await
            .unwrap();
        let hits = store.query("c", "rust ownership", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].distance < 0.01);
    }
}
