//! Shared helpers for integration tests: the records fixture and a
//! deterministic embedder that needs no model download.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use repograph::error::BackendError;
use repograph::rag::Embedder;
use repograph::records::load_records;
use repograph::{SymbolGraph, SymbolGraphBuilder, SymbolRecord};

pub const DIM: usize = 64;

pub fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("benchmarks")
        .join("fixtures")
        .join("records.json")
}

pub fn fixture_records() -> Vec<SymbolRecord> {
    load_records(fixture_path())
        .expect("load fixture")
        .into_iter()
        .filter_map(Result::ok)
        .collect()
}

pub fn fixture_graph() -> SymbolGraph {
    SymbolGraphBuilder::new().build(fixture_records()).graph
}

/// Bag-of-words embedder: every lower-cased alphanumeric token adds 1.0 to
/// an FNV-1a bucket. Texts sharing words end up close.
#[derive(Debug, Default)]
pub struct HashEmbedder {
    pub calls: AtomicUsize,
}

impl HashEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        for token in text
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hash: u64 = 0xcbf29ce484222325;
            for byte in token.to_ascii_lowercase().bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x100000001b3);
            }
            v[(hash % DIM as u64) as usize] += 1.0;
        }
        v
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        Ok(Self::vector(text))
    }
}

/// Always fails, like an embedding service that is down.
pub struct UnreachableEmbedder;

impl Embedder for UnreachableEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
        Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused").into())
    }
}
