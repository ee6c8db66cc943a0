use std::collections::HashMap;

use super::{cosine_similarity, HitPayload, VectorHit, VectorIndex};
use crate::error::BackendError;

/// Brute-force cosine index held in memory.
///
/// Hits are ordered by similarity, ties by insertion order. Good for tests,
/// benchmarks and graphs small enough that a linear scan is cheaper than
/// opening a store.
#[derive(Debug, Default, Clone)]
pub struct MemoryIndex {
    entries: Vec<Entry>,
    by_id: HashMap<String, usize>,
}

#[derive(Debug, Clone)]
struct Entry {
    id: String,
    vector: Vec<f32>,
    payload: Option<HitPayload>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the vector for `id`. A replaced id keeps its original
    /// position for tie-breaking.
    pub fn insert(&mut self, id: impl Into<String>, vector: Vec<f32>, payload: Option<HitPayload>) {
        let id = id.into();
        if let Some(&idx) = self.by_id.get(&id) {
            self.entries[idx].vector = vector;
            self.entries[idx].payload = payload;
            return;
        }
        self.by_id.insert(id.clone(), self.entries.len());
        self.entries.push(Entry {
            id,
            vector,
            payload,
        });
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl VectorIndex for MemoryIndex {
    fn search(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>, BackendError> {
        let mut scored: Vec<(usize, f64)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(vector, &e.vector)))
            .collect();
        // sort_by is stable: equal similarities keep insertion order.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, similarity)| {
                let e = &self.entries[i];
                VectorHit {
                    id: e.id.clone(),
                    similarity,
                    payload: e.payload.clone(),
                }
            })
            .collect())
    }

    fn payload(&self, id: &str) -> Result<Option<HitPayload>, BackendError> {
        Ok(self
            .by_id
            .get(id)
            .and_then(|&i| self.entries[i].payload.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeKind;

    #[test]
    fn test_search_orders_by_similarity() {
        let mut index = MemoryIndex::new();
        index.insert("x", vec![1.0, 0.0], None);
        index.insert("y", vec![0.0, 1.0], None);
        index.insert("xy", vec![1.0, 1.0], None);

        let hits = index.search(&[1.0, 0.2], 3).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "xy", "y"]);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let mut index = MemoryIndex::new();
        index.insert("b", vec![1.0, 0.0], None);
        index.insert("a", vec![2.0, 0.0], None);
        index.insert("c", vec![1.0, 0.0], None);

        let hits = index.search(&[1.0, 0.0], 3).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_k_limits_results() {
        let mut index = MemoryIndex::new();
        for i in 0..10 {
            index.insert(format!("s{i}"), vec![1.0, i as f32], None);
        }
        assert_eq!(index.search(&[1.0, 0.0], 4).unwrap().len(), 4);
        assert!(index.search(&[1.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_reinsert_replaces_in_place() {
        let mut index = MemoryIndex::new();
        index.insert("a", vec![1.0, 0.0], None);
        index.insert(
            "a",
            vec![0.0, 1.0],
            Some(HitPayload {
                kind: NodeKind::Function,
                file: "a.py".into(),
                location: None,
                text: "Function a defined in a.py".into(),
            }),
        );
        assert_eq!(index.len(), 1);
        assert_eq!(index.payload("a").unwrap().unwrap().file, "a.py");
        assert!(index.payload("missing").unwrap().is_none());
    }
}
