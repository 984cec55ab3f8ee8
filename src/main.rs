//! # docpipe CLI
//!
//! Command-line front end for the document pipeline.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docpipe process <files>` | Run files through the pipeline and print per-step status |
//! | `docpipe ask <files> -q "<question>"` | Process files, then answer a question over them |
//!
//! ## Examples
//!
//! ```bash
//! docpipe process report.pdf notes.txt
//! docpipe ask report.pdf -q "what were the quarterly results?"
//! docpipe --config docpipe.toml ask report.pdf -q "summarize" --provider openai
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docpipe::chat::ChatService;
use docpipe::config::{self, Config};
use docpipe::extract::FileExtractor;
use docpipe::models::Document;
use docpipe::pipeline::Pipeline;
use docpipe::progress::progress;
use docpipe::provider::ProviderRegistry;
use docpipe::store::{DocumentStore, SessionStore};
use docpipe::vector::{InMemoryVectorStore, VectorStore};

#[derive(Parser)]
#[command(
    name = "docpipe",
    about = "Document ingestion pipeline and chunk-retrieval engine",
    version
)]
struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process files through the pipeline and print per-step status.
    Process {
        /// Files to ingest.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Process files, then answer a question over them.
    Ask {
        /// Files to ingest.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// The question to answer.
        #[arg(short, long)]
        question: String,

        /// Completion provider (defaults to the configured one).
        #[arg(long)]
        provider: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };

    let documents = Arc::new(DocumentStore::new());
    let vectors: Arc<dyn VectorStore> = Arc::new(InMemoryVectorStore::new());
    let extractor = Arc::new(FileExtractor::new(config.pipeline.ocr_text_threshold));
    let pipeline = Arc::new(Pipeline::new(
        Arc::clone(&documents),
        extractor,
        Arc::clone(&vectors),
        config.clone(),
    ));

    match cli.command {
        Commands::Process { files } => {
            let processed = ingest_files(&pipeline, &files).await?;
            for document in &processed {
                print_document(document);
            }
        }
        Commands::Ask {
            files,
            question,
            provider,
        } => {
            let processed = ingest_files(&pipeline, &files).await?;

            let chat = ChatService::new(
                Arc::new(SessionStore::new()),
                Arc::clone(&documents),
                Arc::clone(&vectors),
                ProviderRegistry::with_builtins(),
                config,
            );
            let session = chat.create_session(None, provider.as_deref())?;
            for document in &processed {
                chat.attach_document(session.id, document.id)?;
            }

            let reply = chat.generate_response(session.id, &question).await?;
            println!("{}", reply.text);
        }
    }

    Ok(())
}

/// Admit each file and run all of them through the pipeline concurrently.
async fn ingest_files(pipeline: &Arc<Pipeline>, files: &[PathBuf]) -> Result<Vec<Document>> {
    let mut ids = Vec::with_capacity(files.len());
    for file in files {
        let metadata = std::fs::metadata(file)
            .with_context(|| format!("cannot read {}", file.display()))?;
        let document = pipeline.admit(
            &file_name(file),
            &file.to_string_lossy(),
            metadata.len(),
            &file_type(file),
        );
        ids.push(document.id);
    }

    let mut handles = Vec::with_capacity(ids.len());
    for id in &ids {
        handles.push(pipeline.spawn_processing(*id)?);
    }
    for handle in handles {
        let _ = handle.await;
    }

    let mut processed = Vec::with_capacity(ids.len());
    for id in ids {
        processed.push(pipeline.store().get(id)?);
    }
    Ok(processed)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn file_type(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn print_document(document: &Document) {
    println!(
        "{}  {:?}  {:.0}%  {}",
        document.id,
        document.status,
        progress(document) * 100.0,
        document.original_filename
    );
    for step in &document.steps {
        let note = step
            .error
            .as_deref()
            .or(step.message.as_deref())
            .unwrap_or("");
        println!("  {:<22} {:<12} {}", step.kind.as_str(), format!("{:?}", step.status), note);
    }
    if let Some(error) = &document.error {
        println!("  error: {}", error);
    }
}
