use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use gridrag_answer::{AnswerComposer, ChatCompletionsGenerator};
use gridrag_core::config::{expand_path, Settings};
use gridrag_core::error::{IndexError, IngestError, QueryError};
use gridrag_core::traits::{DenseStore, Generator, SparseStore};
use gridrag_core::types::{Answer, Document, DocumentBody, IngestResult};
use gridrag_core::Chunker;
use gridrag_embed::get_default_embedder;
use gridrag_hybrid::{DualIndex, HybridRetriever, IndexStats, RetryReport};
use gridrag_text::TantivySparseIndex;
use gridrag_vector::MemoryVectorStore;

#[cfg(feature = "lancedb")]
const LANCE_TABLE: &str = "chunks";

/// Entry point for ingestion and question answering.
///
/// Holds no per-query state; `answer` may be called concurrently from many
/// tasks and dropping its future cancels in-flight backend calls.
pub struct RagEngine {
    index: Arc<DualIndex>,
    retriever: HybridRetriever,
    composer: AnswerComposer,
    chunker: Chunker,
    settings: Settings,
    retry_task: Option<JoinHandle<()>>,
}

impl RagEngine {
    pub fn new(index: Arc<DualIndex>, composer: AnswerComposer, settings: Settings) -> Self {
        let retriever = HybridRetriever::new(Arc::clone(&index), settings.retrieval.clone());
        let chunker = Chunker::new(settings.chunking.clone());
        Self { index, retriever, composer, chunker, settings, retry_task: None }
    }

    /// Start the periodic dense retry task at `index.dense_retry_interval_ms`.
    /// The task is aborted when the engine is dropped.
    pub fn with_dense_retry(mut self) -> Self {
        if let Some(previous) = self.retry_task.take() {
            previous.abort();
        }
        self.retry_task = Some(self.index.spawn_dense_retry(self.settings.index.dense_retry_interval()));
        self
    }

    /// Build every backend from configuration.
    pub async fn from_settings(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let embedder = get_default_embedder(&settings.embedding)?;

        let memory = settings.index.writer_memory_bytes;
        let sparse: Arc<dyn SparseStore> = if settings.data.tantivy_index_dir.trim().is_empty() {
            Arc::new(TantivySparseIndex::in_ram(memory)?)
        } else {
            Arc::new(TantivySparseIndex::open_or_create(&expand_path(&settings.data.tantivy_index_dir), memory)?)
        };
        let dense = open_dense(&settings, embedder.dim()).await?;

        let index = Arc::new(DualIndex::open(sparse, dense, embedder, &settings).await?);
        let generator: Arc<dyn Generator> = Arc::new(ChatCompletionsGenerator::from_settings(&settings.generation));
        let composer = AnswerComposer::from_settings(generator, &settings.composer, &settings.backends, &settings.policy);
        Ok(Self::new(index, composer, settings).with_dense_retry())
    }

    pub fn index(&self) -> &Arc<DualIndex> {
        &self.index
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Chunk and index one document version, then retire the generation it
    /// supersedes.
    ///
    /// If the embedding backend is down the chunks are still searchable by
    /// keyword and the generation is recorded, but the call reports
    /// `EmbeddingUnavailable` so the caller knows dense coverage is pending.
    pub async fn ingest(&self, document: Document) -> Result<IngestResult, IngestError> {
        let document_id = document.document_id();
        let _guard = self.index.lock_source(&document.source_id).await;

        let chunks = self.chunker.chunk(&document)?;
        if chunks.is_empty() {
            // nothing to index, and the live generation is left untouched
            info!(%document_id, "document has no text, nothing indexed");
            return Ok(IngestResult { document_id, chunk_count: 0 });
        }
        if let DocumentBody::Text(text) = &document.body {
            info!(%document_id, bytes = text.len(), chunks = chunks.len(), "ingesting document");
        }

        // re-ingesting the live version replaces its chunks wholesale
        if self.index.live_generation(&document.source_id).as_deref() == Some(document_id.as_str()) {
            self.index.retire(&document_id).await.map_err(|e| ingest_err(&document_id, e))?;
        }

        let chunk_count = chunks.len();
        let embedding_failure = match self.index.upsert(chunks).await {
            Ok(_) => None,
            Err(IndexError::EmbeddingUnavailable { reason, .. }) => Some(reason),
            Err(e) => return Err(ingest_err(&document_id, e)),
        };

        if let Some(previous) = self.index.register_generation(&document.source_id, &document_id) {
            info!(%previous, current = %document_id, "retiring superseded generation");
            self.index.retire(&previous).await.map_err(|e| ingest_err(&document_id, e))?;
        }

        match embedding_failure {
            Some(reason) => {
                warn!(%document_id, %reason, "document indexed by keyword only, dense retry pending");
                Err(IngestError::EmbeddingUnavailable { document_id, reason })
            }
            None => Ok(IngestResult { document_id, chunk_count }),
        }
    }

    /// Answer with the configured `retrieval.top_k`.
    pub async fn answer(&self, query: &str, role: &str) -> Result<Answer, QueryError> {
        self.answer_top_k(query, role, self.settings.retrieval.top_k).await
    }

    pub async fn answer_top_k(&self, query: &str, role: &str, top_k: usize) -> Result<Answer, QueryError> {
        if query.trim().is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        if top_k == 0 {
            return Err(QueryError::InvalidTopK);
        }

        let started = Instant::now();
        let retrieval = self.retriever.retrieve(query, top_k).await?;
        let retrieval_ms = started.elapsed().as_millis() as u64;

        let composing = Instant::now();
        let mut answer = self.composer.compose(query, &retrieval.candidates, role).await?;
        let composition_ms = composing.elapsed().as_millis() as u64;

        answer.degraded = retrieval.degraded;
        answer.metadata.retrieval_ms = retrieval_ms;
        answer.metadata.composition_ms = composition_ms;
        answer.metadata.total_ms = started.elapsed().as_millis() as u64;
        answer.metadata.candidates_retrieved = retrieval.retrieved;
        answer.metadata.unavailable_index = retrieval.unavailable;

        info!(
            risk = %answer.risk_level,
            confidence = answer.confidence,
            citations = answer.citations.len(),
            degraded = answer.degraded,
            total_ms = answer.metadata.total_ms,
            "answered query"
        );
        Ok(answer)
    }

    /// Remove every chunk of one document version from both indexes.
    /// Serialized with ingestion of the same source.
    pub async fn retire(&self, document_id: &str) -> Result<usize, IndexError> {
        let _guard = match self.index.source_of(document_id) {
            Some(source_id) => Some(self.index.lock_source(&source_id).await),
            None => None,
        };
        self.index.retire(document_id).await
    }

    pub async fn retry_pending_dense(&self) -> Result<RetryReport, IndexError> {
        self.index.retry_pending_dense().await
    }

    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }
}

impl Drop for RagEngine {
    fn drop(&mut self) {
        if let Some(task) = self.retry_task.take() {
            task.abort();
        }
    }
}

fn ingest_err(document_id: &str, err: IndexError) -> IngestError {
    match err {
        IndexError::EmbeddingUnavailable { reason, .. } => {
            IngestError::EmbeddingUnavailable { document_id: document_id.to_string(), reason }
        }
        IndexError::Store { backend, reason } => IngestError::Storage { document_id: document_id.to_string(), backend, reason },
    }
}

async fn open_dense(settings: &Settings, dim: usize) -> Result<Arc<dyn DenseStore>> {
    match settings.index.dense_backend.as_str() {
        "memory" => Ok(Arc::new(MemoryVectorStore::new())),
        #[cfg(feature = "lancedb")]
        "lancedb" => {
            let uri = expand_path(&settings.data.lancedb_index_dir);
            let store = gridrag_vector::LanceVectorStore::open(&uri.to_string_lossy(), LANCE_TABLE, dim).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "lancedb"))]
        "lancedb" => {
            let _ = dim;
            bail!("dense backend 'lancedb' requires building with the `lancedb` feature")
        }
        other => bail!("unknown dense backend '{other}'"),
    }
}
