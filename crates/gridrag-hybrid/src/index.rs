use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use gridrag_core::config::Settings;
use gridrag_core::error::{Backend, IndexError};
use gridrag_core::traits::{DenseEntry, DenseStore, Embedder, SparseStore};
use gridrag_core::types::{Chunk, ChunkId, DocumentId, IndexedChunk, SearchHit};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexStats {
    pub chunks: usize,
    pub documents: usize,
    pub pending_dense: usize,
}

/// Outcome of one pass over the dense retry queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryReport {
    pub recovered: usize,
    pub pending: usize,
    pub quarantined: usize,
}

struct DenseFailure {
    stored: usize,
    backend: Backend,
    reason: String,
}

/// Owns the keyword index, the vector index and the chunk catalog.
///
/// The catalog is the liveness record: a store hit whose id is not in the
/// catalog (retired, quarantined, or written by a batch that never finished)
/// is never returned. Chunks that reached the sparse index without a vector
/// sit in the pending queue until a retry embeds them or the retry window
/// expires and they are quarantined.
pub struct DualIndex {
    sparse: Arc<dyn SparseStore>,
    dense: Arc<dyn DenseStore>,
    embedder: Arc<dyn Embedder>,
    catalog: RwLock<HashMap<ChunkId, Arc<IndexedChunk>>>,
    /// source_id -> live document generation.
    generations: Mutex<HashMap<String, DocumentId>>,
    /// Chunks without a vector, with the time they entered the queue.
    pending: Mutex<HashMap<ChunkId, Instant>>,
    next_seq: AtomicU64,
    source_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    batch_size: usize,
    retry_window: Duration,
    embedding_timeout: Duration,
}

async fn run_sparse<T, F>(sparse: &Arc<dyn SparseStore>, op: F) -> Result<T, IndexError>
where
    T: Send + 'static,
    F: FnOnce(&dyn SparseStore) -> anyhow::Result<T> + Send + 'static,
{
    let sparse = Arc::clone(sparse);
    tokio::task::spawn_blocking(move || op(sparse.as_ref()))
        .await
        .map_err(|e| IndexError::store(Backend::SparseIndex, e))?
        .map_err(|e| IndexError::store(Backend::SparseIndex, e))
}

fn dense_err(e: anyhow::Error) -> IndexError {
    IndexError::store(Backend::DenseIndex, e)
}

fn rank_hits(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.seq.cmp(&b.seq)));
}

impl DualIndex {
    /// Open the index over existing stores.
    ///
    /// Rebuilds the catalog from the sparse store, retires generations that
    /// were superseded before a crash, and reconciles the dense store: if it
    /// was built by a different embedder it is cleared and every chunk is
    /// queued for re-embedding.
    pub async fn open(
        sparse: Arc<dyn SparseStore>,
        dense: Arc<dyn DenseStore>,
        embedder: Arc<dyn Embedder>,
        settings: &Settings,
    ) -> Result<Self, IndexError> {
        let mut loaded = run_sparse(&sparse, |s| s.load_all()).await?;
        loaded.sort_by_key(|c| c.seq);

        let index = Self {
            sparse,
            dense,
            embedder,
            catalog: RwLock::new(HashMap::new()),
            generations: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(loaded.last().map_or(0, |c| c.seq + 1)),
            source_locks: Mutex::new(HashMap::new()),
            batch_size: settings.index.embed_batch_size.max(1),
            retry_window: settings.index.dense_retry_window(),
            embedding_timeout: settings.backends.embedding_timeout(),
        };

        let mut superseded = HashSet::new();
        {
            let mut catalog = index.catalog.write();
            let mut generations = index.generations.lock();
            for c in loaded {
                let source = c.chunk.metadata.source_id.clone();
                if let Some(previous) = generations.insert(source, c.chunk.document_id.clone()) {
                    if previous != c.chunk.document_id {
                        superseded.insert(previous);
                    }
                }
                catalog.insert(c.chunk.id.clone(), Arc::new(c));
            }
        }
        for document_id in superseded {
            warn!(%document_id, "retiring generation superseded before last shutdown");
            index.retire(&document_id).await?;
        }

        index.reconcile_dense().await?;
        let stats = index.stats();
        info!(chunks = stats.chunks, documents = stats.documents, pending_dense = stats.pending_dense, "dual index opened");
        Ok(index)
    }

    async fn reconcile_dense(&self) -> Result<(), IndexError> {
        let active = self.embedder.model_id().to_string();
        let recorded = self.dense.embedder_id().await.map_err(dense_err)?;
        let missing: Vec<ChunkId> = if recorded.as_deref() == Some(active.as_str()) {
            let stored = self.dense.chunk_ids().await.map_err(dense_err)?;
            let (stale, missing) = {
                let catalog = self.catalog.read();
                let stale: Vec<ChunkId> = stored.iter().filter(|id| !catalog.contains_key(*id)).cloned().collect();
                let missing: Vec<ChunkId> = catalog.keys().filter(|id| !stored.contains(*id)).cloned().collect();
                (stale, missing)
            };
            if !stale.is_empty() {
                self.dense.delete_chunks(&stale).await.map_err(dense_err)?;
            }
            missing
        } else {
            if recorded.is_some() {
                info!(recorded = ?recorded, %active, "embedding model changed, rebuilding dense index");
            }
            self.dense.clear().await.map_err(dense_err)?;
            self.dense.set_embedder_id(&active).await.map_err(dense_err)?;
            self.catalog.read().keys().cloned().collect()
        };
        let now = Instant::now();
        let mut pending = self.pending.lock();
        for id in missing {
            pending.insert(id, now);
        }
        Ok(())
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Serializes writers of one source document; other sources proceed.
    pub async fn lock_source(&self, source_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.source_locks.lock();
            // an entry nobody holds or waits on can go
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(source_id.to_string()).or_default())
        };
        lock.lock_owned().await
    }

    /// Source a live document generation belongs to.
    pub fn source_of(&self, document_id: &str) -> Option<String> {
        let generations = self.generations.lock();
        if let Some((source, _)) = generations.iter().find(|(_, live)| live.as_str() == document_id) {
            return Some(source.clone());
        }
        drop(generations);
        self.catalog
            .read()
            .values()
            .find(|c| c.chunk.document_id == document_id)
            .map(|c| c.chunk.metadata.source_id.clone())
    }

    /// Write chunks to the sparse index, then embed them into the dense index.
    ///
    /// Returns the number of chunks written. If embedding fails the chunks stay
    /// searchable by keyword and are queued for dense retry.
    pub async fn upsert(&self, chunks: Vec<Chunk>) -> Result<usize, IndexError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        let indexed: Vec<IndexedChunk> = {
            let catalog = self.catalog.read();
            chunks
                .into_iter()
                .map(|chunk| {
                    let seq = catalog.get(&chunk.id).map_or_else(|| self.next_seq.fetch_add(1, Ordering::SeqCst), |c| c.seq);
                    IndexedChunk { seq, chunk }
                })
                .collect()
        };
        let batch = indexed.clone();
        run_sparse(&self.sparse, move |s| s.upsert(&batch)).await?;

        let stored: Vec<Arc<IndexedChunk>> = indexed.into_iter().map(Arc::new).collect();
        {
            let mut catalog = self.catalog.write();
            for c in &stored {
                catalog.insert(c.chunk.id.clone(), Arc::clone(c));
            }
        }
        {
            let now = Instant::now();
            let mut pending = self.pending.lock();
            for c in &stored {
                pending.entry(c.chunk.id.clone()).or_insert(now);
            }
        }
        debug!(chunks = stored.len(), "sparse write committed");

        match self.embed_and_store(&stored).await {
            Ok(n) => Ok(n),
            Err(f) => {
                let pending = stored.len() - f.stored;
                warn!(backend = %f.backend, pending, reason = %f.reason, "dense write failed, chunks queued for retry");
                Err(match f.backend {
                    Backend::Embedding => IndexError::EmbeddingUnavailable { pending, reason: f.reason },
                    backend => IndexError::Store { backend, reason: f.reason },
                })
            }
        }
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, String> {
        let vectors = match tokio::time::timeout(self.embedding_timeout, self.embedder.embed_batch(texts)).await {
            Err(_) => return Err(format!("timed out after {} ms", self.embedding_timeout.as_millis())),
            Ok(Err(e)) => return Err(e.to_string()),
            Ok(Ok(v)) => v,
        };
        if vectors.len() != texts.len() {
            return Err(format!("returned {} vectors for {} texts", vectors.len(), texts.len()));
        }
        let dim = self.embedder.dim();
        if let Some(v) = vectors.iter().find(|v| v.len() != dim) {
            return Err(format!("returned a {}-dimensional vector, expected {dim}", v.len()));
        }
        Ok(vectors)
    }

    async fn embed_and_store(&self, chunks: &[Arc<IndexedChunk>]) -> Result<usize, DenseFailure> {
        let mut stored = 0;
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.chunk.text.clone()).collect();
            let vectors = self
                .embed(&texts)
                .await
                .map_err(|reason| DenseFailure { stored, backend: Backend::Embedding, reason })?;
            let entries: Vec<DenseEntry> = batch
                .iter()
                .zip(vectors)
                .map(|(c, vector)| DenseEntry { id: c.chunk.id.clone(), document_id: c.chunk.document_id.clone(), seq: c.seq, vector })
                .collect();
            self.dense
                .upsert(&entries)
                .await
                .map_err(|e| DenseFailure { stored, backend: Backend::DenseIndex, reason: e.to_string() })?;
            {
                let mut pending = self.pending.lock();
                for c in batch {
                    pending.remove(&c.chunk.id);
                }
            }
            stored += batch.len();
            self.drop_dead_vectors(batch).await;
        }
        Ok(stored)
    }

    /// A chunk retired or quarantined while its batch was being embedded has
    /// just had its vector written back; remove it again.
    async fn drop_dead_vectors(&self, batch: &[Arc<IndexedChunk>]) {
        let dead: Vec<ChunkId> = {
            let catalog = self.catalog.read();
            batch
                .iter()
                .filter(|c| !catalog.contains_key(&c.chunk.id))
                .map(|c| c.chunk.id.clone())
                .collect()
        };
        if dead.is_empty() {
            return;
        }
        debug!(chunks = dead.len(), "removing vectors of chunks retired during embedding");
        if let Err(e) = self.dense.delete_chunks(&dead).await {
            warn!(error = %e, chunks = dead.len(), "failed to remove vectors of retired chunks");
        }
    }

    fn live_hits(&self, hits: Vec<SearchHit>, k: usize) -> Vec<SearchHit> {
        let catalog = self.catalog.read();
        let mut live: Vec<SearchHit> = hits
            .into_iter()
            .filter_map(|mut h| {
                let c = catalog.get(&h.id)?;
                h.seq = c.seq;
                Some(h)
            })
            .collect();
        rank_hits(&mut live);
        live.truncate(k);
        live
    }

    /// Up to `k` live chunks by cosine similarity to the embedded query.
    pub async fn query_dense(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self
            .embed(&[query.to_string()])
            .await
            .map_err(|reason| IndexError::Store { backend: Backend::Embedding, reason })?
            .pop()
            .ok_or_else(|| IndexError::store(Backend::Embedding, "no query vector"))?;
        let hits = self.dense.search(&vector, k).await.map_err(dense_err)?;
        Ok(self.live_hits(hits, k))
    }

    /// Up to `k` live chunks by BM25 relevance.
    pub async fn query_sparse(&self, query: &str, k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let q = query.to_string();
        let hits = run_sparse(&self.sparse, move |s| s.search(&q, k)).await?;
        Ok(self.live_hits(hits, k))
    }

    pub fn chunk(&self, id: &str) -> Option<Arc<IndexedChunk>> {
        self.catalog.read().get(id).cloned()
    }

    /// Record `document_id` as the live generation of `source_id`, returning
    /// the generation it replaces, if any.
    pub fn register_generation(&self, source_id: &str, document_id: &str) -> Option<DocumentId> {
        let previous = self.generations.lock().insert(source_id.to_string(), document_id.to_string());
        previous.filter(|p| p != document_id)
    }

    pub fn live_generation(&self, source_id: &str) -> Option<DocumentId> {
        self.generations.lock().get(source_id).cloned()
    }

    /// Remove every chunk of `document_id` from both stores.
    ///
    /// The catalog entry goes first, so queries stop returning the chunks
    /// before the stores are touched. Returns the number of chunks retired.
    pub async fn retire(&self, document_id: &str) -> Result<usize, IndexError> {
        let removed: Vec<ChunkId> = {
            let mut catalog = self.catalog.write();
            let ids: Vec<ChunkId> = catalog.values().filter(|c| c.chunk.document_id == document_id).map(|c| c.chunk.id.clone()).collect();
            for id in &ids {
                catalog.remove(id);
            }
            ids
        };
        {
            let mut pending = self.pending.lock();
            for id in &removed {
                pending.remove(id);
            }
        }
        self.generations.lock().retain(|_, live| live != document_id);

        let doc = document_id.to_string();
        run_sparse(&self.sparse, move |s| s.retire_document(&doc)).await?;
        self.dense.retire_document(document_id).await.map_err(dense_err)?;
        info!(%document_id, chunks = removed.len(), "document retired");
        Ok(removed.len())
    }

    pub fn pending_dense(&self) -> usize {
        self.pending.lock().len()
    }

    /// Try to embed every queued chunk. Chunks that still have no vector and
    /// have waited longer than the retry window are quarantined.
    pub async fn retry_pending_dense(&self) -> Result<RetryReport, IndexError> {
        let snapshot: Vec<(ChunkId, Instant)> = self.pending.lock().iter().map(|(id, t)| (id.clone(), *t)).collect();
        if snapshot.is_empty() {
            return Ok(RetryReport::default());
        }
        let (mut chunks, orphans): (Vec<Arc<IndexedChunk>>, Vec<ChunkId>) = {
            let catalog = self.catalog.read();
            let mut chunks = Vec::new();
            let mut orphans = Vec::new();
            for (id, _) in &snapshot {
                match catalog.get(id) {
                    Some(c) => chunks.push(Arc::clone(c)),
                    None => orphans.push(id.clone()),
                }
            }
            (chunks, orphans)
        };
        if !orphans.is_empty() {
            let mut pending = self.pending.lock();
            for id in &orphans {
                pending.remove(id);
            }
        }
        chunks.sort_by_key(|c| c.seq);

        let recovered = match self.embed_and_store(&chunks).await {
            Ok(n) => n,
            Err(f) => {
                warn!(backend = %f.backend, reason = %f.reason, recovered = f.stored, "dense retry incomplete");
                f.stored
            }
        };

        let expired: Vec<ChunkId> = {
            let pending = self.pending.lock();
            snapshot
                .iter()
                .filter(|(id, since)| pending.contains_key(id) && since.elapsed() >= self.retry_window)
                .map(|(id, _)| id.clone())
                .collect()
        };
        if !expired.is_empty() {
            self.quarantine(&expired).await?;
        }
        let report = RetryReport { recovered, pending: self.pending_dense(), quarantined: expired.len() };
        if report.recovered > 0 {
            info!(recovered = report.recovered, pending = report.pending, "dense retry recovered chunks");
        }
        Ok(report)
    }

    async fn quarantine(&self, ids: &[ChunkId]) -> Result<(), IndexError> {
        {
            let mut catalog = self.catalog.write();
            let mut pending = self.pending.lock();
            for id in ids {
                catalog.remove(id);
                pending.remove(id);
            }
        }
        error!(
            chunks = ids.len(),
            window_secs = self.retry_window.as_secs(),
            first = %ids[0],
            "chunks had no vector within the retry window and were quarantined"
        );
        let batch = ids.to_vec();
        run_sparse(&self.sparse, move |s| s.delete_chunks(&batch)).await?;
        self.dense.delete_chunks(ids).await.map_err(dense_err)
    }

    /// Run [`DualIndex::retry_pending_dense`] every `interval` until the index
    /// is dropped.
    pub fn spawn_dense_retry(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            // first pass one interval after start, not immediately
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(index) = weak.upgrade() else { break };
                if index.pending_dense() == 0 {
                    continue;
                }
                if let Err(e) = index.retry_pending_dense().await {
                    warn!(error = %e, "dense retry pass failed");
                }
            }
        })
    }

    pub fn stats(&self) -> IndexStats {
        let catalog = self.catalog.read();
        let documents: HashSet<&str> = catalog.values().map(|c| c.chunk.document_id.as_str()).collect();
        IndexStats { chunks: catalog.len(), documents: documents.len(), pending_dense: self.pending_dense() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridrag_embed::HashEmbedder;
    use gridrag_text::TantivySparseIndex;
    use gridrag_vector::MemoryVectorStore;

    async fn empty_index() -> DualIndex {
        let sparse: Arc<dyn SparseStore> = Arc::new(TantivySparseIndex::in_ram(15_000_000).expect("sparse"));
        DualIndex::open(sparse, Arc::new(MemoryVectorStore::new()), Arc::new(HashEmbedder::new(16)), &Settings::default())
            .await
            .expect("open")
    }

    #[tokio::test]
    async fn idle_source_locks_are_pruned() {
        let index = empty_index().await;

        drop(index.lock_source("pump").await);
        let held = index.lock_source("relay").await;
        assert_eq!(index.source_locks.lock().len(), 1);

        let other = index.lock_source("pump").await;
        assert_eq!(index.source_locks.lock().len(), 2);
        drop((held, other));
    }
}
