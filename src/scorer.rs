use crate::graph::SymbolGraph;

/// Proximity of a node to itself.
pub const SELF_SCORE: f64 = 1.0;

/// Proximity of a direct (one-hop) neighbour.
pub const NEIGHBOR_SCORE: f64 = 0.6;

/// Single-hop graph proximity of `target` as seen from `center`.
///
/// `1.0` for the same id (whether or not it is in the graph), `0.6` for a
/// direct neighbour in either edge direction, `0.0` otherwise. Multi-hop
/// reach is the retriever's concern, not the scorer's.
pub fn score(graph: &SymbolGraph, center: &str, target: &str) -> f64 {
    if center == target {
        SELF_SCORE
    } else if graph.is_neighbor(center, target) {
        NEIGHBOR_SCORE
    } else {
        0.0
    }
}
