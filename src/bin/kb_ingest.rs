use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use knowledge_rag::config::{EmbedderArgs, StoreArgs};
use knowledge_rag::{logging, Chunker, IngestRequest, Ingestor, QueueWorker};

#[derive(Parser, Debug)]
#[command(
    name = "kb-ingest",
    about = "Chunk and embed a document into the knowledge base, or drain the re-embedding backlog"
)]
struct IngestCli {
    /// Drain the re-embedding backlog instead of processing a document
    #[arg(long, default_value_t = false)]
    drain_queue: bool,

    /// Backlog items to drain (capped at 10)
    #[arg(long, requires = "drain_queue")]
    limit: Option<usize>,

    /// Document record that receives chunk zero
    #[arg(long, required_unless_present = "drain_queue")]
    document_id: Option<String>,

    /// Knowledge base owning the document (defaults to the record's own)
    #[arg(long, default_value = "")]
    knowledge_base_id: String,

    /// Source name stamped into chunk metadata
    #[arg(long, default_value = "")]
    source_name: String,

    /// Extracted page text files, in page order (repeatable)
    #[arg(long = "page")]
    pages: Vec<PathBuf>,

    /// Milliseconds to pause between successive embedding calls
    #[arg(long, env = "KB_EMBED_DELAY_MS", default_value_t = 100)]
    embed_delay_ms: u64,

    #[command(flatten)]
    embedder: EmbedderArgs,

    #[command(flatten)]
    store: StoreArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("info");
    let cli = IngestCli::parse();

    let embedder = Arc::new(cli.embedder.build_embedder()?);
    let store = Arc::new(cli.store.connect().await?);
    let config = cli.embedder.ingest_config(cli.embed_delay_ms);

    let output = if cli.drain_queue {
        let worker = QueueWorker::new(embedder, store, config);
        let report = worker.drain(cli.limit).await?;
        serde_json::to_string_pretty(&report)?
    } else {
        let mut pages = Vec::with_capacity(cli.pages.len());
        for path in &cli.pages {
            let text = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read page {:?}", path))?;
            pages.push(text);
        }
        let request = IngestRequest {
            document_id: cli.document_id.unwrap_or_default(),
            knowledge_base_id: cli.knowledge_base_id,
            source_name: cli.source_name,
            pages,
        };
        let ingestor = Ingestor::new(embedder, store, Chunker::default(), config);
        let report = ingestor.process(&request).await?;
        serde_json::to_string_pretty(&report)?
    };
    println!("{output}");
    Ok(())
}
