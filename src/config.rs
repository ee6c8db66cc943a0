use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// Default location of the persisted graph document.
pub const GRAPH_FILE: &str = ".repograph/graph.json";

/// Default location of the vector store.
pub const STORE_FILE: &str = crate::rag::store::STORE_FILE;

pub const DEFAULT_ALPHA: f64 = 0.7;
pub const DEFAULT_BETA: f64 = 0.3;
pub const DEFAULT_TOP_K: usize = 10;

/// Weights and limits for [`crate::retriever::HybridRetriever`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Weight of the vector similarity.
    pub alpha: f64,
    /// Weight of the graph proximity.
    pub beta: f64,
    /// Cap on neighbours expanded per vector hit, in adjacency order.
    /// `None` expands all of them.
    pub max_neighbors_per_hit: Option<usize>,
    /// Fill hit text and location from the vector index payloads.
    pub hydrate: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            beta: DEFAULT_BETA,
            max_neighbors_per_hit: None,
            hydrate: false,
        }
    }
}

impl RetrievalConfig {
    pub fn with_weights(mut self, alpha: f64, beta: f64) -> Self {
        self.alpha = alpha;
        self.beta = beta;
        self
    }

    pub fn with_max_neighbors(mut self, max: Option<usize>) -> Self {
        self.max_neighbors_per_hit = max;
        self
    }

    pub fn with_hydration(mut self, hydrate: bool) -> Self {
        self.hydrate = hydrate;
        self
    }

    /// Weights must be finite and non-negative.
    pub fn validate(&self) -> Result<(), RetrievalError> {
        for (name, value) in [("alpha", self.alpha), ("beta", self.beta)] {
            if !value.is_finite() || value < 0.0 {
                return Err(RetrievalError::InvalidConfig(format!(
                    "{name} must be a finite non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}
