use std::collections::{HashMap, HashSet};

use hnsw::{Hnsw, Searcher};
use rand_pcg::Pcg64;
use space::{Metric, Neighbor};

use super::{VectorBackend, VectorHit, dot, rank};
use crate::scope::DocScope;

/// Minimum `ef` used when querying the graph.
const MIN_EF_SEARCH: usize = 64;

/// Cosine distance over unit vectors, scaled into `u32`.
struct CosineDistance;

impl Metric<Box<[f32]>> for CosineDistance {
    type Unit = u32;

    fn distance(&self, a: &Box<[f32]>, b: &Box<[f32]>) -> u32 {
        let distance = (1.0 - dot(a, b)).clamp(0.0, 2.0);
        (distance * (u32::MAX as f32 / 2.0)) as u32
    }
}

/// Approximate nearest-neighbour search over an HNSW graph.
///
/// The graph does not support deletion, so removed or replaced entries are
/// tombstoned and skipped. Filtered queries that the graph candidates cannot
/// satisfy fall back to an exact scan over the live entries.
pub struct HnswIndex {
    graph: Hnsw<CosineDistance, Box<[f32]>, Pcg64, 16, 32>,
    /// Graph node -> (chunk_id, doc_id).
    nodes: Vec<(String, String)>,
    live: HashMap<String, usize>,
    tombstones: HashSet<usize>,
    doc_counts: HashMap<String, usize>,
}

impl HnswIndex {
    pub fn new() -> Self {
        Self {
            graph: Hnsw::new(CosineDistance),
            nodes: Vec::new(),
            live: HashMap::new(),
            tombstones: HashSet::new(),
            doc_counts: HashMap::new(),
        }
    }

    fn live_in_scope(&self, scope: &DocScope) -> usize {
        match scope {
            DocScope::All => self.live.len(),
            DocScope::Only(ids) => ids.iter().filter_map(|d| self.doc_counts.get(d)).sum(),
        }
    }

    fn hit(&self, node: usize, query: &[f32]) -> VectorHit {
        let (chunk_id, doc_id) = &self.nodes[node];
        VectorHit {
            chunk_id: chunk_id.clone(),
            doc_id: doc_id.clone(),
            score: dot(query, self.graph.feature(node)),
        }
    }

    fn exact(&self, query: &[f32], k: usize, scope: &DocScope) -> Vec<VectorHit> {
        let hits = self
            .live
            .values()
            .filter(|&&node| scope.allows(&self.nodes[node].1))
            .map(|&node| self.hit(node, query))
            .collect();
        rank(hits, k)
    }
}

impl Default for HnswIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswIndex")
            .field("live", &self.live.len())
            .field("tombstones", &self.tombstones.len())
            .finish_non_exhaustive()
    }
}

impl VectorBackend for HnswIndex {
    fn name(&self) -> &'static str {
        "hnsw"
    }

    fn insert(&mut self, chunk_id: &str, doc_id: &str, vector: &[f32]) {
        self.remove(chunk_id);

        let mut searcher = Searcher::default();
        let node = self
            .graph
            .insert(vector.to_vec().into_boxed_slice(), &mut searcher);
        debug_assert_eq!(node, self.nodes.len());

        self.nodes.push((chunk_id.to_string(), doc_id.to_string()));
        self.live.insert(chunk_id.to_string(), node);
        *self.doc_counts.entry(doc_id.to_string()).or_default() += 1;
    }

    fn remove(&mut self, chunk_id: &str) {
        let Some(node) = self.live.remove(chunk_id) else {
            return;
        };
        self.tombstones.insert(node);
        let doc_id = &self.nodes[node].1;
        if let Some(count) = self.doc_counts.get_mut(doc_id) {
            *count -= 1;
            if *count == 0 {
                self.doc_counts.remove(doc_id);
            }
        }
    }

    fn clear(&mut self) {
        *self = Self::new();
    }

    fn len(&self) -> usize {
        self.live.len()
    }

    fn knn(&self, query: &[f32], k: usize, scope: &DocScope) -> Vec<VectorHit> {
        if k == 0 || scope.is_empty() || self.live.is_empty() {
            return Vec::new();
        }

        let wanted = k.min(self.live_in_scope(scope));
        if wanted == 0 {
            return Vec::new();
        }

        let ef = (k * 4).max(MIN_EF_SEARCH);
        let capacity = ef.min(self.nodes.len());
        let mut neighbors = vec![
            Neighbor {
                index: !0,
                distance: !0,
            };
            capacity
        ];
        let query_box = query.to_vec().into_boxed_slice();
        let mut searcher = Searcher::default();
        let found = self
            .graph
            .nearest(&query_box, ef, &mut searcher, &mut neighbors);

        let hits: Vec<VectorHit> = found
            .iter()
            .filter(|n| n.index != !0 && !self.tombstones.contains(&n.index))
            .filter(|n| scope.allows(&self.nodes[n.index].1))
            .map(|n| self.hit(n.index, query))
            .collect();

        if hits.len() < wanted {
            return self.exact(query, k, scope);
        }
        rank(hits, k)
    }
}
