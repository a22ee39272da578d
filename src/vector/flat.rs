//! Exact brute-force vector search.

use std::collections::HashMap;

use super::{VectorBackend, VectorHit, dot, rank};
use crate::scope::DocScope;

#[derive(Debug, Clone)]
struct Entry {
    chunk_id: String,
    doc_id: String,
    vector: Vec<f32>,
}

/// Exact nearest-neighbour search by scanning every vector.
#[derive(Debug, Default)]
pub struct FlatIndex {
    entries: Vec<Entry>,
    positions: HashMap<String, usize>,
}

impl FlatIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorBackend for FlatIndex {
    fn name(&self) -> &'static str {
        "flat"
    }

    fn insert(&mut self, chunk_id: &str, doc_id: &str, vector: &[f32]) {
        let entry = Entry {
            chunk_id: chunk_id.to_string(),
            doc_id: doc_id.to_string(),
            vector: vector.to_vec(),
        };
        match self.positions.get(chunk_id) {
            Some(&pos) => self.entries[pos] = entry,
            None => {
                self.positions.insert(chunk_id.to_string(), self.entries.len());
                self.entries.push(entry);
            }
        }
    }

    fn remove(&mut self, chunk_id: &str) {
        let Some(pos) = self.positions.remove(chunk_id) else {
            return;
        };
        self.entries.swap_remove(pos);
        if let Some(moved) = self.entries.get(pos) {
            self.positions.insert(moved.chunk_id.clone(), pos);
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.positions.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn knn(&self, query: &[f32], k: usize, scope: &DocScope) -> Vec<VectorHit> {
        if k == 0 || scope.is_empty() {
            return Vec::new();
        }
        let hits = self
            .entries
            .iter()
            .filter(|e| scope.allows(&e.doc_id))
            .map(|e| VectorHit {
                chunk_id: e.chunk_id.clone(),
                doc_id: e.doc_id.clone(),
                score: dot(query, &e.vector),
            })
            .collect();
        rank(hits, k)
    }
}
