use std::sync::Arc;

use tracing::{debug, warn};

use gridrag_core::config::RetrievalSettings;
use gridrag_core::error::RetrievalError;
use gridrag_core::types::{Candidate, SourceKind};

use crate::fusion::fuse;
use crate::index::DualIndex;

/// Ranked candidates for one query.
#[derive(Debug, Clone, Default)]
pub struct Retrieval {
    pub candidates: Vec<Candidate>,
    /// One index failed and the ranking comes from the other alone.
    pub degraded: bool,
    pub unavailable: Option<SourceKind>,
    /// Distinct chunks returned by the two lists before truncation.
    pub retrieved: usize,
}

pub struct HybridRetriever {
    index: Arc<DualIndex>,
    settings: RetrievalSettings,
}

impl HybridRetriever {
    pub fn new(index: Arc<DualIndex>, settings: RetrievalSettings) -> Self {
        Self { index, settings }
    }

    pub fn index(&self) -> &Arc<DualIndex> {
        &self.index
    }

    pub async fn retrieve(&self, query: &str, top_k: usize) -> Result<Retrieval, RetrievalError> {
        let m = top_k.saturating_mul(self.settings.candidate_multiplier.max(1));
        let (dense, sparse) = tokio::join!(self.index.query_dense(query, m), self.index.query_sparse(query, m));

        // A surviving list keeps its own weight: min-max always lifts its top
        // hit to 1.0, so full weight would admit anything during an outage.
        let (dense_hits, sparse_hits, unavailable) = match (dense, sparse) {
            (Ok(d), Ok(s)) => (d, s, None),
            (Ok(d), Err(e)) => {
                warn!(error = %e, "sparse retrieval failed, ranking from dense index alone");
                (d, Vec::new(), Some(SourceKind::Sparse))
            }
            (Err(e), Ok(s)) => {
                warn!(error = %e, "dense retrieval failed, ranking from sparse index alone");
                (Vec::new(), s, Some(SourceKind::Dense))
            }
            (Err(d), Err(s)) => {
                return Err(RetrievalError::BothIndicesUnavailable { dense: d.to_string(), sparse: s.to_string() });
            }
        };

        let fused = fuse(&dense_hits, &sparse_hits, self.settings.dense_weight, self.settings.sparse_weight);
        let retrieved = fused.len();
        let candidates: Vec<Candidate> = fused
            .into_iter()
            .filter_map(|f| {
                let chunk = self.index.chunk(&f.id)?;
                Some(Candidate { chunk, score: f.score, dense_score: f.dense, sparse_score: f.sparse, provenance: f.provenance })
            })
            .take(top_k)
            .collect();
        debug!(
            dense = dense_hits.len(),
            sparse = sparse_hits.len(),
            returned = candidates.len(),
            top = candidates.first().map_or(0.0, |c| c.score),
            "hybrid retrieval"
        );
        Ok(Retrieval { candidates, degraded: unavailable.is_some(), unavailable, retrieved })
    }
}
