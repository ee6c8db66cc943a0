use std::sync::Mutex;

use anyhow::{Context, Result};
use fastembed::{EmbeddingModel, TextEmbedding, TextInitOptions};

use super::{model_cache_dir, Embedder, EMBEDDING_DIM};
use crate::error::BackendError;

/// Name of the model the engine loads, as reported by `repograph setup`.
pub const MODEL_NAME: &str = "bge-small-en-v1.5-q";

/// Batch size for fastembed internal sub-batching.
/// Smaller batches reduce padding waste when text lengths vary widely.
const EMBED_BATCH_SIZE: usize = 64;

/// Embedding engine wrapping a fastembed ONNX model.
///
/// fastembed needs `&mut` for inference, so the model sits behind a mutex and
/// concurrent queries embed one at a time.
pub struct EmbeddingEngine {
    model: Mutex<TextEmbedding>,
}

impl std::fmt::Debug for EmbeddingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingEngine").finish_non_exhaustive()
    }
}

impl EmbeddingEngine {
    /// Load the quantized BGE-small-en-v1.5 model from the shared cache
    /// (see [`super::model_cache_dir`]), downloading it on first use.
    pub fn new() -> Result<Self> {
        Self::load(false)
    }

    /// Same as [`new`](Self::new), showing download progress on stdout.
    pub fn new_with_progress() -> Result<Self> {
        Self::load(true)
    }

    fn load(show_progress: bool) -> Result<Self> {
        let model = TextEmbedding::try_new(
            TextInitOptions::new(EmbeddingModel::BGESmallENV15Q)
                .with_cache_dir(model_cache_dir())
                .with_show_download_progress(show_progress),
        )
        .context("Failed to initialize embedding model")?;

        Ok(Self {
            model: Mutex::new(model),
        })
    }

    fn run(&self, texts: &[&str], batch: usize) -> Result<Vec<Vec<f32>>> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| anyhow::anyhow!("embedding engine lock poisoned"))?;
        let vectors = model
            .embed(texts, Some(batch))
            .context("Embedding failed")?;

        debug_assert!(
            vectors.iter().all(|v| v.len() == EMBEDDING_DIM),
            "All embeddings should be {EMBEDDING_DIM}-dim"
        );
        Ok(vectors)
    }
}

impl Embedder for EmbeddingEngine {
    fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let vector = self
            .run(&[text], 1)?
            .into_iter()
            .next()
            .context("No embedding returned")?;
        Ok(vector)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.run(texts, EMBED_BATCH_SIZE)?)
    }
}

/// Serialize a vector to little-endian bytes for sqlite-vec storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}
