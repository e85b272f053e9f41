//! gridrag-vector
//!
//! Dense (embedding) stores implementing [`gridrag_core::traits::DenseStore`].

mod memory;
pub use memory::MemoryVectorStore;

#[cfg(feature = "lancedb")]
mod lance;
#[cfg(feature = "lancedb")]
pub mod schema;
#[cfg(feature = "lancedb")]
pub mod table;
#[cfg(feature = "lancedb")]
pub use lance::LanceVectorStore;
