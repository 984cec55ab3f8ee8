//! # docpipe
//!
//! A document ingestion pipeline and chunk-retrieval engine for
//! conversational agents.
//!
//! docpipe drives uploaded documents through a fixed sequence of
//! processing steps (extraction, OCR, table detection, chunking,
//! indexing, metadata), stores the resulting chunks in per-document
//! vector collections, and answers questions over the attached documents
//! by merging and re-ranking retrieval hits across collections.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────────────────────┐   ┌─────────────┐
//! │  Upload  │──▶│  Pipeline                      │──▶│ VectorStore │
//! │  (file)  │   │ extract→ocr→tables→chunk→index │   │ doc_<id>    │
//! └──────────┘   └───────────────────────────────┘   └──────┬──────┘
//!                                                           │
//!                        ┌──────────────┐   ┌───────────────┤
//!                        │ ChatService  │◀──│  Retrieval    │
//!                        │ sessions     │   │ merge+re-rank │
//!                        └──────────────┘   └───────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | Format-specific text/table/metadata extraction |
//! | [`chunker`] | Section-aware overlapping chunker |
//! | [`vector`] | Vector collection abstraction |
//! | [`store`] | Document and session stores |
//! | [`pipeline`] | Step orchestrator |
//! | [`progress`] | Progress calculation |
//! | [`retrieval`] | Cross-document retrieval and ranking |
//! | [`provider`] | Completion providers and registry |
//! | [`chat`] | Chat sessions over documents |

pub mod chat;
pub mod chunker;
pub mod config;
pub mod error;
pub mod extract;
pub mod models;
pub mod pipeline;
pub mod progress;
pub mod provider;
pub mod retrieval;
pub mod store;
pub mod vector;
