use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use gridrag_core::config::expand_path;
use gridrag_core::traits::Embedder;

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

const MAX_LEN: usize = 256;
const DIM: usize = 1024;

struct Model {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl Model {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, MAX_LEN, &self.device)?;
        let token_type_ids = Tensor::zeros((texts.len(), MAX_LEN), DType::U32, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let out: Vec<Vec<f32>> = pooled.to_device(&Device::Cpu)?.to_vec2()?;
        debug!(batch = texts.len(), elapsed_ms = start.elapsed().as_millis() as u64, "bge-m3 batch embedded");
        Ok(out)
    }
}

/// BGE-M3 (XLM-RoBERTa) sentence embedder running locally on candle.
pub struct BgeM3Embedder {
    inner: Arc<Model>,
}

impl BgeM3Embedder {
    pub fn load(model_dir: Option<&str>) -> Result<Self> {
        let model_dir = resolve_model_dir(model_dir)?;
        let device = select_device();
        info!(dir = %model_dir.display(), "loading bge-m3");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("failed to load tokenizer from {}: {e}", tokenizer_path.display()))?;
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(model_dir.join("config.json"))?)?;
        let weights: HashMap<String, Tensor> = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?.into_iter().collect();
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;
        info!("bge-m3 loaded");
        Ok(Self { inner: Arc::new(Model { model, tokenizer, device }) })
    }
}

#[async_trait]
impl Embedder for BgeM3Embedder {
    fn model_id(&self) -> &str {
        "bge-m3"
    }

    fn dim(&self) -> usize {
        DIM
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let inner = Arc::clone(&self.inner);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || inner.embed(&texts)).await?
    }
}

fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    let candidates = configured
        .map(expand_path)
        .into_iter()
        .chain(std::env::var("APP_MODEL_DIR").ok().map(PathBuf::from))
        .chain(std::env::var("MODEL_DIR").ok().map(PathBuf::from))
        .chain([Path::new("../models/bge-m3").to_path_buf(), Path::new("models/bge-m3").to_path_buf()]);
    for p in candidates {
        if p.exists() {
            return Ok(p);
        }
    }
    Err(anyhow!("could not locate the BGE-M3 model directory"))
}
