use anyhow::{ensure, Context, Result};

use super::embeddings::{EmbeddingEngine, MODEL_NAME};
use super::{model_cache_dir, Embedder, EMBEDDING_DIM};

/// Where the embedding model ended up, and what it produces.
#[derive(Debug, serde::Serialize)]
pub struct SetupResult {
    pub model: &'static str,
    pub model_dir: String,
    pub dimension: usize,
}

/// Download the embedding model and check it produces vectors of the
/// expected size.
///
/// fastembed fetches the ONNX files from HuggingFace on first use; loading
/// the engine here triggers that download eagerly so the user sees progress
/// before the first `embed` run.
pub fn download_model() -> Result<SetupResult> {
    let cache_dir = model_cache_dir();

    let engine =
        EmbeddingEngine::new_with_progress().context("Failed to download embedding model")?;
    let sample = engine
        .embed("class Session: pass")
        .map_err(|e| anyhow::anyhow!(e))
        .context("Embedding model loaded but failed to embed")?;
    ensure!(
        sample.len() == EMBEDDING_DIM,
        "embedding model returned {} dimensions, expected {EMBEDDING_DIM}",
        sample.len()
    );

    Ok(SetupResult {
        model: MODEL_NAME,
        model_dir: cache_dir.display().to_string(),
        dimension: sample.len(),
    })
}
