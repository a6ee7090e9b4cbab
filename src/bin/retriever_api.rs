use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use knowledge_rag::config::{EmbedderArgs, RetrievalArgs, StoreArgs};
use knowledge_rag::{logging, router, AppState, Chunker, Ingestor, QueueWorker, Retriever};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "kb-retriever",
    about = "HTTP API serving budgeted knowledge-base context to conversational agents"
)]
struct ApiCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "KB_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Milliseconds to pause between successive embedding calls.
    #[arg(long, env = "KB_EMBED_DELAY_MS", default_value_t = 100)]
    embed_delay_ms: u64,

    #[command(flatten)]
    embedder: EmbedderArgs,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    retrieval: RetrievalArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("info,tower_http=info");
    let cli = ApiCli::parse();

    let embedder = Arc::new(cli.embedder.build_embedder()?);
    let store = Arc::new(cli.store.connect().await?);
    let ingest_config = cli.embedder.ingest_config(cli.embed_delay_ms);

    let state = AppState {
        retriever: Arc::new(Retriever::new(
            embedder.clone(),
            store.clone(),
            cli.retrieval.build_config(&cli.embedder.embed_model),
        )),
        ingestor: Arc::new(Ingestor::new(
            embedder.clone(),
            store.clone(),
            Chunker::default(),
            ingest_config.clone(),
        )),
        worker: Arc::new(QueueWorker::new(embedder, store, ingest_config)),
    };

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("kb-retriever listening on http://{addr}");
    axum::serve(listener, router(state))
        .await
        .context("server shutdown")?;
    Ok(())
}
