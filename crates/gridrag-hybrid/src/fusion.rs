//! Score fusion for the two retrieval lists.

use std::cmp::Ordering;
use std::collections::HashMap;

use gridrag_core::types::{ChunkId, Provenance, SearchHit};

#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: ChunkId,
    pub seq: u64,
    pub score: f32,
    pub dense: Option<f32>,
    pub sparse: Option<f32>,
    pub provenance: Provenance,
}

/// Min-max normalize scores to [0, 1]. A list whose scores are all equal
/// (including a single hit) maps every entry to 1.0.
pub fn min_max_normalize(hits: &[SearchHit]) -> Vec<f32> {
    let (min, max) = hits
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), h| (lo.min(h.score), hi.max(h.score)));
    let range = max - min;
    hits.iter()
        .map(|h| if range > f32::EPSILON { (h.score - min) / range } else { 1.0 })
        .collect()
}

fn provenance_rank(p: Provenance) -> u8 {
    match p {
        Provenance::Both => 0,
        Provenance::Dense | Provenance::Sparse => 1,
    }
}

/// Deterministic candidate order: score, then dual-source over single-source,
/// then insertion sequence.
pub fn compare_fused(a: &FusedHit, b: &FusedHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then(provenance_rank(a.provenance).cmp(&provenance_rank(b.provenance)))
        .then(a.seq.cmp(&b.seq))
}

/// Merge normalized dense and sparse hits by chunk id.
///
/// A chunk found by both lists scores `dense_weight * d + sparse_weight * s`;
/// a chunk found by one list scores that list's normalized score times its
/// weight. The result is sorted with [`compare_fused`].
pub fn fuse(dense: &[SearchHit], sparse: &[SearchHit], dense_weight: f32, sparse_weight: f32) -> Vec<FusedHit> {
    let mut by_id: HashMap<ChunkId, FusedHit> = HashMap::with_capacity(dense.len() + sparse.len());
    for (hit, norm) in dense.iter().zip(min_max_normalize(dense)) {
        by_id.insert(
            hit.id.clone(),
            FusedHit { id: hit.id.clone(), seq: hit.seq, score: 0.0, dense: Some(norm), sparse: None, provenance: Provenance::Dense },
        );
    }
    for (hit, norm) in sparse.iter().zip(min_max_normalize(sparse)) {
        by_id
            .entry(hit.id.clone())
            .and_modify(|f| {
                f.sparse = Some(norm);
                f.provenance = Provenance::Both;
            })
            .or_insert_with(|| FusedHit {
                id: hit.id.clone(),
                seq: hit.seq,
                score: 0.0,
                dense: None,
                sparse: Some(norm),
                provenance: Provenance::Sparse,
            });
    }
    let mut fused: Vec<FusedHit> = by_id
        .into_values()
        .map(|mut f| {
            f.score = f.dense.map_or(0.0, |d| d * dense_weight) + f.sparse.map_or(0.0, |s| s * sparse_weight);
            f
        })
        .collect();
    fused.sort_by(compare_fused);
    fused
}
