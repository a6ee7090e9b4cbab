mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{EmbeddingStub, UnitEmbedder};
use knowledge_rag::embedder::openai::OpenAiEmbedder;
use knowledge_rag::{
    Chunker, DocumentRecord, DocumentStore, IngestConfig, IngestRequest, Ingestor, MemoryStore,
    ProcessingStatus,
};
use pretty_assertions::assert_eq;

fn fast_config() -> IngestConfig {
    IngestConfig {
        inter_call_delay: Duration::ZERO,
        ..IngestConfig::default()
    }
}

async fn store_with(id: &str) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .put_document(DocumentRecord::pending(id, "kb-1"), None)
        .await;
    store
}

fn prose_pages() -> Vec<String> {
    let paragraph = vec!["lorem"; 250].join(" ");
    // Two pages; headings and links are normalized away before chunking.
    vec![
        format!("# Handbook\n\n{}", vec![paragraph.clone(); 4].join("\n\n")),
        format!("See [the annex](https://example.com)\n\n{}", vec![paragraph; 4].join("\n\n")),
    ]
}

fn request(pages: Vec<String>) -> IngestRequest {
    IngestRequest {
        document_id: "doc-1".into(),
        knowledge_base_id: "kb-1".into(),
        source_name: "handbook.pdf".into(),
        pages,
    }
}

#[tokio::test]
async fn prose_document_becomes_chunk_zero_plus_siblings() {
    let store = store_with("doc-1").await;
    let ingestor = Ingestor::new(
        Arc::new(UnitEmbedder { axis: 0 }),
        store.clone(),
        Chunker::default(),
        fast_config(),
    );

    let report = ingestor.process(&request(prose_pages())).await.unwrap();
    assert_eq!(report.status, ProcessingStatus::Completed);
    assert_eq!(report.chunks_total, 3);
    assert_eq!(report.chunks_embedded, 3);

    let records = store.chunks_for_source("doc-1").await;
    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["doc-1", "doc-1#1", "doc-1#2"]);
    assert_eq!(records[1].parent_id.as_deref(), Some("doc-1"));
    assert_eq!(records[0].metadata["chunkType"], "paragraph");
    assert_eq!(records[0].metadata["sourceName"], "handbook.pdf");
    assert!(records
        .iter()
        .all(|r| r.content.as_deref().is_some_and(|c| !c.contains('#'))));
    assert_eq!(store.embedding_len("doc-1#2").await, Some(3072));
}

#[tokio::test]
async fn reprocessing_is_idempotent() {
    let store = store_with("doc-1").await;
    let ingestor = Ingestor::new(
        Arc::new(UnitEmbedder { axis: 0 }),
        store.clone(),
        Chunker::default(),
        fast_config(),
    );
    let first = ingestor.process(&request(prose_pages())).await.unwrap();
    let second = ingestor.process(&request(prose_pages())).await.unwrap();
    assert_eq!(first.per_chunk_status, second.per_chunk_status);
    assert_eq!(store.chunks_for_source("doc-1").await.len(), 3);
}

#[tokio::test]
async fn line_item_document_repeats_header_per_batch() {
    let store = store_with("doc-1").await;
    let ingestor = Ingestor::new(
        Arc::new(UnitEmbedder { axis: 0 }),
        store.clone(),
        Chunker::default(),
        fast_config(),
    );
    let mut page = String::from("Código | Descripción | Precio\n");
    for row in 0..40 {
        page.push_str(&format!("A{row:03} | Widget model {row} | {row}.50\n"));
    }

    let report = ingestor.process(&request(vec![page])).await.unwrap();
    assert_eq!(report.chunks_total, 3);

    let records = store.chunks_for_source("doc-1").await;
    let rows: Vec<u64> = records
        .iter()
        .map(|r| r.metadata["productCount"].as_u64().unwrap())
        .collect();
    assert_eq!(rows, vec![15, 15, 10]);
    for record in &records {
        assert_eq!(record.metadata["chunkType"], "product_list");
        assert_eq!(record.metadata["totalProducts"], 40);
        assert!(record
            .content
            .as_deref()
            .unwrap()
            .starts_with("Código | Descripción | Precio"));
    }
}

#[tokio::test]
async fn wrong_dimension_embedding_updates_no_record() {
    let stub = EmbeddingStub::with_vector_len(512).await;
    let embedder =
        OpenAiEmbedder::new("sk-test", &stub.base_url, Duration::from_secs(5)).expect("client");
    let store = store_with("doc-1").await;
    let ingestor = Ingestor::new(Arc::new(embedder), store.clone(), Chunker::default(), fast_config());

    let report = ingestor
        .process(&request(vec!["A short policy note.".into()]))
        .await
        .unwrap();
    assert_eq!(report.status, ProcessingStatus::Failed);
    assert_eq!(report.chunks_embedded, 0);
    let error = report.error.unwrap();
    assert!(error.contains("expected 3072 dimensions, not 512"), "{error}");

    let parent = store.document("doc-1").await.unwrap();
    assert_eq!(parent.content, None);
    assert_eq!(parent.status, ProcessingStatus::Failed);
    assert_eq!(store.embedding_len("doc-1").await, None);
    assert!(store.chunks_for_source("doc-1").await.is_empty());
}
