//! Typed symbol graphs over a codebase, and hybrid retrieval that fuses
//! vector similarity with one-hop graph proximity.
//!
//! Records from an external parser ([`records`]) are folded into a
//! [`SymbolGraph`] by the [`SymbolGraphBuilder`]. A persisted graph is loaded
//! read-only and queried through a [`HybridRetriever`], which embeds the query,
//! asks a [`rag::VectorIndex`] for the nearest symbols and expands each of
//! them to its direct neighbours.

pub mod builder;
pub mod config;
pub mod error;
pub mod graph;
pub mod rag;
pub mod records;
pub mod retriever;
pub mod scorer;
pub mod types;

pub use builder::{BuildOutcome, BuildReport, SymbolGraphBuilder};
pub use config::RetrievalConfig;
pub use error::{GraphError, GraphWarning, RecordError, RetrievalError, StoreError};
pub use graph::{GraphDocument, SymbolGraph};
pub use retriever::HybridRetriever;
pub use types::{
    EdgeKind, GraphEdge, GraphNode, NodeKind, Provenance, RetrievalHit, SymbolKind, SymbolRecord,
};
