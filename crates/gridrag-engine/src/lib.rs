//! gridrag-engine
//!
//! The query orchestrator: the two public operations (`ingest`, `answer`)
//! over the dual index, hybrid retriever and answer composer.

mod engine;

pub use engine::RagEngine;
