//! gridrag-core
//!
//! Data model, backend traits, error taxonomy, configuration and the chunker
//! shared by every gridrag crate.

pub mod chunker;
pub mod config;
pub mod error;
pub mod loader;
pub mod traits;
pub mod types;

pub use chunker::{count_tokens, Chunker};
pub use config::{Config, Settings};
pub use error::{Backend, CompositionError, IndexError, IngestError, QueryError, RetrievalError};
