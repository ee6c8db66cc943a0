//! Hybrid retrieval: vector search fused with one-hop graph expansion.
//!
//! A query is embedded, the vector index returns its nearest symbols, and
//! each of those is expanded to its direct graph neighbours. Every candidate
//! gets a fused score
//!
//! ```text
//! vector hit:     alpha * similarity + beta * score(hit, hit)       = alpha * sim + beta
//! graph neighbor: beta * score(hit, neighbor)                       = 0.6 * beta
//! ```
//!
//! and the candidates are ranked by that score, ties kept in the order they
//! were first collected (vector hits in backend order, then their neighbours).

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::error::{Backend, RetrievalError};
use crate::graph::SymbolGraph;
use crate::rag::{Embedder, HitPayload, VectorHit, VectorIndex};
use crate::scorer;
use crate::types::{Provenance, RetrievalHit};

/// Answers queries against a loaded graph and a vector index over its
/// symbols. Holds no mutable state; share it behind an `Arc`.
pub struct HybridRetriever<E, V> {
    graph: Arc<SymbolGraph>,
    embedder: E,
    index: V,
    config: RetrievalConfig,
}

impl<E, V> std::fmt::Debug for HybridRetriever<E, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRetriever")
            .field("nodes", &self.graph.node_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A candidate before ranking.
struct Candidate {
    id: String,
    score: f64,
    provenance: Provenance,
    similarity: Option<f64>,
    via: Option<String>,
    payload: Option<HitPayload>,
}

impl<E: Embedder, V: VectorIndex> HybridRetriever<E, V> {
    pub fn new(
        graph: Arc<SymbolGraph>,
        embedder: E,
        index: V,
        config: RetrievalConfig,
    ) -> Result<Self, RetrievalError> {
        config.validate()?;
        Ok(Self {
            graph,
            embedder,
            index,
            config,
        })
    }

    pub fn graph(&self) -> &SymbolGraph {
        &self.graph
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Top `top_k` symbols for `text`, best first.
    ///
    /// Fails on blank text, and whenever the embedder or the index fails:
    /// a backend error is never turned into an empty result.
    pub fn query(&self, text: &str, top_k: usize) -> Result<Vec<RetrievalHit>, RetrievalError> {
        self.run(text, top_k, &self.config)
    }

    /// [`query`](Self::query) with per-call weights and limits.
    pub fn query_with(
        &self,
        text: &str,
        top_k: usize,
        config: &RetrievalConfig,
    ) -> Result<Vec<RetrievalHit>, RetrievalError> {
        config.validate()?;
        self.run(text, top_k, config)
    }

    fn run(
        &self,
        text: &str,
        top_k: usize,
        config: &RetrievalConfig,
    ) -> Result<Vec<RetrievalHit>, RetrievalError> {
        if text.trim().is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let vector = self
            .embedder
            .embed(text)
            .map_err(|e| RetrievalError::unavailable(Backend::Embedding, e))?;
        let vector_hits = self
            .index
            .search(&vector, top_k)
            .map_err(|e| RetrievalError::unavailable(Backend::VectorSearch, e))?;
        debug!(query = %text, hits = vector_hits.len(), "vector search done");

        let mut candidates = self.fuse(vector_hits, config);

        // sort_by is stable, so equal scores keep first-seen order.
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(top_k);

        candidates
            .into_iter()
            .map(|c| self.finish_hit(c, config.hydrate))
            .collect()
    }

    /// Score vector hits, then expand each one hop. First writer wins.
    fn fuse(&self, vector_hits: Vec<VectorHit>, config: &RetrievalConfig) -> Vec<Candidate> {
        let RetrievalConfig {
            alpha,
            beta,
            max_neighbors_per_hit,
            ..
        } = *config;

        let mut candidates: Vec<Candidate> = Vec::with_capacity(vector_hits.len());
        let mut seen: HashSet<String> = HashSet::with_capacity(vector_hits.len());

        for hit in vector_hits {
            if seen.contains(&hit.id) {
                debug!(id = %hit.id, "duplicate vector hit ignored");
                continue;
            }
            let proximity = scorer::score(&self.graph, &hit.id, &hit.id);
            seen.insert(hit.id.clone());
            candidates.push(Candidate {
                score: alpha * hit.similarity + beta * proximity,
                provenance: Provenance::Vector,
                similarity: Some(hit.similarity),
                via: None,
                payload: hit.payload,
                id: hit.id,
            });
        }

        let direct = candidates.len();
        for i in 0..direct {
            let center = candidates[i].id.clone();
            let mut expanded = 0usize;
            for neighbor in self.graph.neighbors(&center) {
                if max_neighbors_per_hit.is_some_and(|max| expanded >= max) {
                    break;
                }
                // Dangling endpoints (unresolved bases) are not retrievable.
                if seen.contains(neighbor) || !self.graph.contains(neighbor) {
                    continue;
                }
                seen.insert(neighbor.clone());
                candidates.push(Candidate {
                    id: neighbor.clone(),
                    score: beta * scorer::score(&self.graph, &center, neighbor),
                    provenance: Provenance::Graph,
                    similarity: None,
                    via: Some(center.clone()),
                    payload: None,
                });
                expanded += 1;
            }
        }

        debug!(
            direct,
            expanded = candidates.len() - direct,
            "graph expansion done"
        );
        candidates
    }

    fn finish_hit(&self, c: Candidate, hydrate: bool) -> Result<RetrievalHit, RetrievalError> {
        let payload = match c.payload {
            Some(p) => Some(p),
            None if hydrate => self
                .index
                .payload(&c.id)
                .map_err(|e| RetrievalError::unavailable(Backend::VectorSearch, e))?,
            None => None,
        };

        let node = self.graph.node(&c.id);
        let kind = node.map(|n| n.kind).or(payload.as_ref().map(|p| p.kind));
        let file = node
            .map(|n| n.file.clone())
            .or_else(|| payload.as_ref().map(|p| p.file.clone()));

        let (text, location) = match payload {
            Some(p) if hydrate => (Some(p.text), p.location),
            _ => (None, None),
        };

        Ok(RetrievalHit {
            id: c.id,
            kind,
            file,
            score: c.score,
            provenance: c.provenance,
            similarity: c.similarity,
            via: c.via,
            text,
            location,
        })
    }
}

/// Warn when the vector store was embedded from a different graph.
/// Returns `true` when the fingerprints match.
pub fn check_index_freshness(graph: &SymbolGraph, stored_fingerprint: Option<&str>) -> bool {
    match stored_fingerprint {
        Some(stored) if stored == graph.fingerprint() => true,
        Some(_) => {
            warn!("vector index was built from a different graph; re-run `repograph embed`");
            false
        }
        None => {
            warn!("vector index has no graph fingerprint; re-run `repograph embed`");
            false
        }
    }
}
