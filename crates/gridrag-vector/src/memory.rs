use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use gridrag_core::traits::{DenseEntry, DenseStore};
use gridrag_core::types::{ChunkId, SearchHit, SourceKind};

/// Tombstone ratio above which the next write compacts the entry list.
const COMPACTION_RATIO: f32 = 0.3;

#[derive(Default)]
struct State {
    entries: Vec<DenseEntry>,
    /// Live chunk id -> position in `entries`.
    positions: HashMap<ChunkId, usize>,
    /// Soft-deleted positions, skipped by search until compaction.
    tombstones: HashSet<usize>,
    dim: Option<usize>,
    embedder_id: Option<String>,
}

impl State {
    fn tombstone(&mut self, id: &str) {
        if let Some(pos) = self.positions.remove(id) {
            self.tombstones.insert(pos);
        }
    }

    fn tombstone_ratio(&self) -> f32 {
        if self.entries.is_empty() {
            0.0
        } else {
            self.tombstones.len() as f32 / self.entries.len() as f32
        }
    }

    fn compact(&mut self) -> usize {
        let removed = self.tombstones.len();
        if removed == 0 {
            return 0;
        }
        let tombstones = std::mem::take(&mut self.tombstones);
        let entries = std::mem::take(&mut self.entries);
        self.positions.clear();
        for (pos, entry) in entries.into_iter().enumerate() {
            if !tombstones.contains(&pos) {
                self.positions.insert(entry.id.clone(), self.entries.len());
                self.entries.push(entry);
            }
        }
        removed
    }
}

/// Exact (brute-force) cosine store held in memory.
///
/// Every write batch runs under one write lock, so a search observes a batch
/// entirely or not at all. Deletions are tombstones; the entry list is
/// compacted once tombstones exceed 30% of it.
#[derive(Default)]
pub struct MemoryVectorStore {
    state: RwLock<State>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tombstone_count(&self) -> usize {
        self.state.read().tombstones.len()
    }

    /// Drop tombstoned entries; returns how many were removed.
    pub fn compact(&self) -> usize {
        self.state.write().compact()
    }
}

pub(crate) fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b = b.iter().map(|y| y * y).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

#[async_trait]
impl DenseStore for MemoryVectorStore {
    async fn upsert(&self, entries: &[DenseEntry]) -> Result<()> {
        let mut state = self.state.write();
        let dim = state.dim.or_else(|| entries.first().map(|e| e.vector.len()));
        if let Some(bad) = entries.iter().find(|e| Some(e.vector.len()) != dim) {
            bail!("vector for {} has dimension {}, store expects {:?}", bad.id, bad.vector.len(), dim);
        }
        state.dim = dim;
        for entry in entries {
            state.tombstone(&entry.id);
            let pos = state.entries.len();
            state.positions.insert(entry.id.clone(), pos);
            state.entries.push(entry.clone());
        }
        if state.tombstone_ratio() > COMPACTION_RATIO {
            let removed = state.compact();
            debug!(removed, "compacted in-memory vector store");
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        let state = self.state.read();
        if let Some(dim) = state.dim {
            if query.len() != dim {
                bail!("query vector has dimension {}, store expects {dim}", query.len());
            }
        }
        let mut hits: Vec<SearchHit> = state
            .entries
            .iter()
            .enumerate()
            .filter(|(pos, _)| !state.tombstones.contains(pos))
            .map(|(_, e)| SearchHit { id: e.id.clone(), score: cosine(query, &e.vector), seq: e.seq, source: SourceKind::Dense })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.seq.cmp(&b.seq)));
        hits.truncate(k);
        Ok(hits)
    }

    async fn retire_document(&self, document_id: &str) -> Result<()> {
        let mut state = self.state.write();
        let ids: Vec<ChunkId> = state
            .positions
            .iter()
            .filter(|(_, &pos)| state.entries[pos].document_id == document_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &ids {
            state.tombstone(id);
        }
        Ok(())
    }

    async fn delete_chunks(&self, ids: &[ChunkId]) -> Result<()> {
        let mut state = self.state.write();
        for id in ids {
            state.tombstone(id);
        }
        Ok(())
    }

    async fn chunk_ids(&self) -> Result<HashSet<ChunkId>> {
        Ok(self.state.read().positions.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.state.write();
        let embedder_id = state.embedder_id.take();
        *state = State { embedder_id, ..State::default() };
        Ok(())
    }

    async fn embedder_id(&self) -> Result<Option<String>> {
        Ok(self.state.read().embedder_id.clone())
    }

    async fn set_embedder_id(&self, id: &str) -> Result<()> {
        self.state.write().embedder_id = Some(id.to_string());
        Ok(())
    }
}
