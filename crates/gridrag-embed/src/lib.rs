//! gridrag-embed
//!
//! Embedding functions behind the [`Embedder`] trait. The hashing embedder is
//! always available; BGE-M3 on candle is compiled with the `candle` feature.

use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::info;

use gridrag_core::config::EmbeddingSettings;
use gridrag_core::traits::Embedder;

mod hash;
pub use hash::HashEmbedder;

#[cfg(feature = "candle")]
mod bge;
#[cfg(feature = "candle")]
pub mod device;
#[cfg(feature = "candle")]
pub mod pool;
#[cfg(feature = "candle")]
pub mod tokenize;
#[cfg(feature = "candle")]
pub use bge::BgeM3Embedder;
#[cfg(feature = "candle")]
pub use pool::masked_mean_l2;

fn fake_embeddings_forced() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .ok()
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Build the configured embedder. `APP_USE_FAKE_EMBEDDINGS=1` forces the
/// hashing embedder regardless of the provider.
pub fn get_default_embedder(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    if fake_embeddings_forced() {
        info!(dim = settings.dim, "APP_USE_FAKE_EMBEDDINGS set, using hashing embedder");
        return Ok(Arc::new(HashEmbedder::new(settings.dim)));
    }
    match settings.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(settings.dim))),
        "bge-m3" => load_bge(settings),
        other => bail!("unknown embedding provider '{other}'"),
    }
}

#[cfg(feature = "candle")]
fn load_bge(settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    Ok(Arc::new(BgeM3Embedder::load(settings.model_dir.as_deref())?))
}

#[cfg(not(feature = "candle"))]
fn load_bge(_settings: &EmbeddingSettings) -> Result<Arc<dyn Embedder>> {
    bail!("embedding provider 'bge-m3' requires building gridrag-embed with the `candle` feature")
}
