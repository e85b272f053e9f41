//! gridrag-text
//!
//! Tantivy-based keyword (sparse) index over chunks. Scores are BM25; ties are
//! broken by chunk insertion sequence.

pub mod index;
pub mod tantivy_utils;

pub use index::TantivySparseIndex;
