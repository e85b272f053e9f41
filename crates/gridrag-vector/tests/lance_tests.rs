#![cfg(feature = "lancedb")]

use gridrag_core::traits::{DenseEntry, DenseStore};
use gridrag_vector::LanceVectorStore;
use tempfile::TempDir;

fn entry(id: &str, document_id: &str, seq: u64, vector: [f32; 3]) -> DenseEntry {
    DenseEntry { id: id.into(), document_id: document_id.into(), seq, vector: vector.to_vec() }
}

#[tokio::test]
async fn lance_store_full_flow() {
    let tmp = TempDir::new().unwrap();
    let uri = tmp.path().to_string_lossy().to_string();
    let store = LanceVectorStore::open(&uri, "chunks", 3).await.expect("open");

    store
        .upsert(&[entry("a:0", "a", 0, [1.0, 0.0, 0.0]), entry("b:0", "b", 1, [0.0, 1.0, 0.0])])
        .await
        .expect("upsert");
    let hits = store.search(&[1.0, 0.0, 0.0], 2).await.expect("search");
    assert_eq!(hits[0].id, "a:0");
    assert!(hits[0].score > hits[1].score);

    store.retire_document("a").await.expect("retire");
    let ids = store.chunk_ids().await.expect("ids");
    assert_eq!(ids.len(), 1);
    assert!(ids.contains("b:0"));

    assert_eq!(store.embedder_id().await.expect("meta"), None);
    store.set_embedder_id("bge-m3").await.expect("set meta");
    store.set_embedder_id("bge-m3").await.expect("set meta twice");
    assert_eq!(store.embedder_id().await.expect("meta").as_deref(), Some("bge-m3"));

    store.clear().await.expect("clear");
    assert!(store.chunk_ids().await.expect("ids").is_empty());
}
