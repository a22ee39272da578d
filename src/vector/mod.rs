//! In-memory nearest-neighbour backends over normalized chunk vectors.
//!
//! The backends hold no data of their own that is not also in
//! `index.redb`; they are rebuilt from it when a store is opened.

mod flat;
#[cfg(feature = "ann")]
mod hnsw;

pub use flat::FlatIndex;
#[cfg(feature = "ann")]
pub use hnsw::HnswIndex;

use crate::{error::Error, scope::DocScope};

/// A nearest-neighbour hit.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub chunk_id: String,
    pub doc_id: String,
    /// Cosine similarity.
    pub score: f32,
}

/// A searchable set of `(chunk_id, doc_id, vector)` entries.
///
/// Every implementation honours the same filter contract: [`DocScope::All`]
/// is unrestricted, an empty [`DocScope::Only`] returns nothing, and equal
/// scores are ordered by `chunk_id` ascending.
pub trait VectorBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Insert or replace the vector for `chunk_id`. The vector must already
    /// be L2-normalized.
    fn insert(&mut self, chunk_id: &str, doc_id: &str, vector: &[f32]);

    fn remove(&mut self, chunk_id: &str);

    fn clear(&mut self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Top `k` chunks by cosine similarity to `query` within `scope`.
    fn knn(&self, query: &[f32], k: usize, scope: &DocScope) -> Vec<VectorHit>;
}

/// Which backend a store should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Brute-force cosine scan.
    Flat,
    /// Approximate HNSW graph. Needs the `ann` feature.
    Hnsw,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(feature = "ann") {
            BackendKind::Hnsw
        } else {
            BackendKind::Flat
        }
    }
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Flat => "flat",
            BackendKind::Hnsw => "hnsw",
        }
    }

    pub fn build(self) -> Box<dyn VectorBackend> {
        match self {
            BackendKind::Flat => Box::new(FlatIndex::new()),
            #[cfg(feature = "ann")]
            BackendKind::Hnsw => Box::new(HnswIndex::new()),
            #[cfg(not(feature = "ann"))]
            BackendKind::Hnsw => {
                tracing::warn!("built without the `ann` feature, using the flat backend");
                Box::new(FlatIndex::new())
            }
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flat" => Ok(BackendKind::Flat),
            "hnsw" => Ok(BackendKind::Hnsw),
            other => Err(Error::Config(format!("unknown vector backend: {other}"))),
        }
    }
}

/// Scale `v` to unit length in place. Returns `false` for a zero vector.
pub fn normalize(v: &mut [f32]) -> bool {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Order hits by score descending, then `chunk_id` ascending, and keep `k`.
pub(crate) fn rank(mut hits: Vec<VectorHit>, k: usize) -> Vec<VectorHit> {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_unit_length() {
        let mut v = vec![3.0, 4.0];
        assert!(normalize(&mut v));
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalize_rejects_zero() {
        let mut v = vec![0.0, 0.0];
        assert!(!normalize(&mut v));
    }

    #[test]
    fn rank_breaks_ties_by_chunk_id() {
        let hit = |id: &str, score| VectorHit {
            chunk_id: id.to_string(),
            doc_id: "d".to_string(),
            score,
        };
        let ranked = rank(vec![hit("b", 0.5), hit("a", 0.5), hit("c", 0.9)], 2);
        let ids: Vec<_> = ranked.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn backend_kind_parses() {
        assert_eq!("flat".parse::<BackendKind>().unwrap(), BackendKind::Flat);
        assert!("annoy".parse::<BackendKind>().is_err());
    }
}
