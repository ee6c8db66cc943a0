//! Semantic-search collaborators: text embedding and nearest-neighbour search.
//!
//! The retriever only sees the [`Embedder`] and [`VectorIndex`] traits. The
//! default implementations are a fastembed ONNX model ([`embeddings`]) and a
//! sqlite-vec store ([`store`]); [`memory`] is a brute-force index for tests
//! and small graphs.

pub mod embeddings;
pub mod indexer;
pub mod memory;
pub mod setup;
pub mod store;

use serde::{Deserialize, Serialize};

use crate::error::BackendError;
use crate::types::{LineSpan, NodeKind};

/// Embedding dimension for the bge-small-en-v1.5 model.
pub const EMBEDDING_DIM: usize = 384;

/// Turns text into a fixed-length vector. Must be deterministic for
/// identical input.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;

    /// Embed several texts at once. The default embeds one at a time.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, BackendError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// What the vector store keeps next to each vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitPayload {
    pub kind: NodeKind,
    pub file: String,
    pub location: Option<LineSpan>,
    pub text: String,
}

/// One nearest-neighbour result.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    /// Cosine similarity, higher is closer.
    pub similarity: f64,
    pub payload: Option<HitPayload>,
}

/// Nearest-neighbour search over symbol vectors.
pub trait VectorIndex: Send + Sync {
    /// Up to `k` hits, closest first. Ordering among equal similarities must
    /// be stable across calls on an unchanged index.
    fn search(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>, BackendError>;

    /// Stored payload for an id, if the index keeps one.
    fn payload(&self, _id: &str) -> Result<Option<HitPayload>, BackendError> {
        Ok(None)
    }
}

impl<T: Embedder + ?Sized> Embedder for std::sync::Arc<T> {
    fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        (**self).embed(text)
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, BackendError> {
        (**self).embed_batch(texts)
    }
}

impl<T: VectorIndex + ?Sized> VectorIndex for std::sync::Arc<T> {
    fn search(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>, BackendError> {
        (**self).search(vector, k)
    }

    fn payload(&self, id: &str) -> Result<Option<HitPayload>, BackendError> {
        (**self).payload(id)
    }
}

/// Cosine similarity of two equal-length vectors; `0.0` when either is zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Shared model cache directory for the ONNX embedding model.
///
/// Precedence:
/// 1. `FASTEMBED_CACHE_DIR` env var (fastembed's own convention)
/// 2. `XDG_CACHE_HOME/repograph/models` (XDG standard)
/// 3. `~/.cache/repograph/models` (fallback)
pub fn model_cache_dir() -> std::path::PathBuf {
    if let Ok(dir) = std::env::var("FASTEMBED_CACHE_DIR") {
        return std::path::PathBuf::from(dir);
    }

    if let Ok(xdg) = std::env::var("XDG_CACHE_HOME") {
        return std::path::PathBuf::from(xdg).join("repograph").join("models");
    }

    if let Some(home) = home_dir() {
        return home.join(".cache").join("repograph").join("models");
    }

    // Last resort: fastembed's default (CWD/.fastembed_cache)
    std::path::PathBuf::from(".fastembed_cache")
}

fn home_dir() -> Option<std::path::PathBuf> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE")) // Windows fallback
        .ok()
        .map(std::path::PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_cache_dir_is_not_local() {
        if std::env::var("FASTEMBED_CACHE_DIR").is_err() {
            let dir = model_cache_dir();
            let dir_str = dir.to_string_lossy();
            assert!(
                dir_str.contains("repograph"),
                "cache dir should contain 'repograph', got: {dir_str}"
            );
            assert!(dir.ends_with("models"));
        }
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 1.0], &[-1.0, -1.0]) + 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
