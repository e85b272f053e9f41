use std::collections::HashSet;

use async_trait::async_trait;

use crate::types::{ChunkId, GenerationRequest, IndexedChunk, SearchHit};

/// Pluggable embedding function.
///
/// Vectors for a given `model_id` must all have length `dim()`; vectors from
/// different model ids are not comparable.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;
    fn dim(&self) -> usize;
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Pluggable language-model backend.
#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<String>;
}

/// Keyword index over chunk text. Calls may block on IO.
pub trait SparseStore: Send + Sync {
    /// Insert or replace chunks; visible to searches once this returns.
    fn upsert(&self, chunks: &[IndexedChunk]) -> anyhow::Result<()>;
    fn search(&self, query: &str, k: usize) -> anyhow::Result<Vec<SearchHit>>;
    fn delete_chunks(&self, ids: &[ChunkId]) -> anyhow::Result<()>;
    fn retire_document(&self, document_id: &str) -> anyhow::Result<()>;
    /// Every live chunk, used to rebuild the catalog on open.
    fn load_all(&self) -> anyhow::Result<Vec<IndexedChunk>>;
}

/// A vector ready for the dense store.
#[derive(Debug, Clone)]
pub struct DenseEntry {
    pub id: ChunkId,
    pub document_id: String,
    pub seq: u64,
    pub vector: Vec<f32>,
}

/// Nearest-neighbour index over chunk embeddings.
#[async_trait]
pub trait DenseStore: Send + Sync {
    async fn upsert(&self, entries: &[DenseEntry]) -> anyhow::Result<()>;
    /// Up to `k` hits by cosine similarity; tombstoned entries never appear.
    async fn search(&self, query: &[f32], k: usize) -> anyhow::Result<Vec<SearchHit>>;
    async fn retire_document(&self, document_id: &str) -> anyhow::Result<()>;
    async fn delete_chunks(&self, ids: &[ChunkId]) -> anyhow::Result<()>;
    async fn chunk_ids(&self) -> anyhow::Result<HashSet<ChunkId>>;
    /// Drop every vector (embedding model change).
    async fn clear(&self) -> anyhow::Result<()>;
    async fn embedder_id(&self) -> anyhow::Result<Option<String>>;
    async fn set_embedder_id(&self, id: &str) -> anyhow::Result<()>;
}
