use gridrag_core::traits::{DenseEntry, DenseStore};
use gridrag_vector::MemoryVectorStore;

fn entry(id: &str, document_id: &str, seq: u64, vector: &[f32]) -> DenseEntry {
    DenseEntry { id: id.into(), document_id: document_id.into(), seq, vector: vector.to_vec() }
}

#[tokio::test]
async fn search_orders_by_cosine_then_sequence() {
    let store = MemoryVectorStore::new();
    store
        .upsert(&[
            entry("late", "d", 9, &[1.0, 0.0]),
            entry("early", "d", 2, &[2.0, 0.0]),
            entry("off", "d", 5, &[0.0, 1.0]),
        ])
        .await
        .expect("upsert");

    let hits = store.search(&[1.0, 0.0], 10).await.expect("search");

    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["early", "late", "off"]);
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    assert_eq!(store.search(&[1.0, 0.0], 1).await.expect("search").len(), 1);
}

#[tokio::test]
async fn retired_and_deleted_vectors_never_surface() {
    let store = MemoryVectorStore::new();
    store
        .upsert(&[entry("a:0", "a", 0, &[1.0, 0.0]), entry("a:1", "a", 1, &[0.9, 0.1]), entry("b:0", "b", 2, &[0.8, 0.2])])
        .await
        .expect("upsert");

    store.retire_document("a").await.expect("retire");
    let ids: Vec<String> = store.search(&[1.0, 0.0], 10).await.expect("search").into_iter().map(|h| h.id).collect();
    assert_eq!(ids, vec!["b:0".to_string()]);

    store.delete_chunks(&["b:0".to_string()]).await.expect("delete");
    assert!(store.search(&[1.0, 0.0], 10).await.expect("search").is_empty());
    assert!(store.chunk_ids().await.expect("ids").is_empty());
}

#[tokio::test]
async fn reupsert_replaces_and_compaction_reclaims_tombstones() {
    let store = MemoryVectorStore::new();
    store.upsert(&[entry("x", "d", 0, &[1.0, 0.0])]).await.expect("upsert");
    store.upsert(&[entry("x", "d", 0, &[0.0, 1.0])]).await.expect("upsert again");

    let hits = store.search(&[0.0, 1.0], 10).await.expect("search");
    assert_eq!(hits.len(), 1);
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    assert_eq!(store.len(), 1);
    assert_eq!(store.tombstone_count(), 0, "half the entries were tombstoned, so the write compacted");
}

#[tokio::test]
async fn dimension_mismatch_is_rejected() {
    let store = MemoryVectorStore::new();
    store.upsert(&[entry("x", "d", 0, &[1.0, 0.0])]).await.expect("upsert");
    assert!(store.upsert(&[entry("y", "d", 1, &[1.0, 0.0, 0.0])]).await.is_err());
    assert!(store.search(&[1.0], 3).await.is_err());
}

#[tokio::test]
async fn clear_keeps_embedder_identity_record() {
    let store = MemoryVectorStore::new();
    store.set_embedder_id("hash-xxh64-2").await.expect("set");
    store.upsert(&[entry("x", "d", 0, &[1.0, 0.0])]).await.expect("upsert");

    store.clear().await.expect("clear");

    assert!(store.is_empty());
    assert_eq!(store.embedder_id().await.expect("id").as_deref(), Some("hash-xxh64-2"));
    store.upsert(&[entry("y", "d", 1, &[1.0, 0.0, 0.0])]).await.expect("dimension resets after clear");
}
