//! gridrag-hybrid
//!
//! The dual (keyword + vector) index over chunks and the hybrid retriever that
//! fuses both rankings.

pub mod fusion;
pub mod index;
pub mod retriever;

pub use index::{DualIndex, IndexStats, RetryReport};
pub use retriever::{HybridRetriever, Retrieval};
