use std::hash::Hasher;

use anyhow::Result;
use async_trait::async_trait;
use twox_hash::XxHash64;

use gridrag_core::traits::Embedder;

/// Deterministic bag-of-words embedder based on signed feature hashing.
///
/// Each lowercase alphanumeric token is hashed into one of `dim` buckets with
/// a sign taken from the high bit, then the vector is L2-normalized. Texts that
/// share vocabulary get a high cosine similarity; there is no model download
/// and no network, which makes it the default for offline use and tests.
pub struct HashEmbedder {
    dim: usize,
    model_id: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self { dim, model_id: format!("hash-xxh64-{dim}") }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in tokens(text) {
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(token.as_bytes());
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 1e-6 {
            for x in &mut v {
                *x /= norm;
            }
        }
        v
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).map(str::to_lowercase)
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}
