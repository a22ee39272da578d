//! Reciprocal Rank Fusion of the vector and lexical candidate lists.

use std::{cmp::Ordering, collections::HashMap};

use crate::{lexical_index::LexicalHit, vector::VectorHit};

/// RRF damping constant.
pub const RRF_K: f64 = 60.0;

/// Default per-document cap on fused results.
pub const DIVERSITY_CAP: usize = 3;

/// A chunk after fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub score: f64,
    /// 1-based rank in the vector list.
    pub vector_rank: Option<usize>,
    /// 1-based rank in the lexical list.
    pub lexical_rank: Option<usize>,
}

/// Fuse two ranked lists: `score = Σ 1 / (k_rrf + rank)` over the lists
/// containing the chunk.
///
/// Output is ordered by score descending; ties go to the earlier vector
/// rank (chunks absent from the vector list last), then to `chunk_id`.
pub fn rrf(vector: &[VectorHit], lexical: &[LexicalHit], k_rrf: f64) -> Vec<FusedHit> {
    let mut fused: HashMap<&str, FusedHit> = HashMap::new();

    for (i, hit) in vector.iter().enumerate() {
        let rank = i + 1;
        let entry = fused.entry(&hit.chunk_id).or_insert_with(|| FusedHit {
            chunk_id: hit.chunk_id.clone(),
            doc_id: hit.doc_id.clone(),
            score: 0.0,
            vector_rank: None,
            lexical_rank: None,
        });
        if entry.vector_rank.is_none() {
            entry.vector_rank = Some(rank);
            entry.score += 1.0 / (k_rrf + rank as f64);
        }
    }

    for (i, hit) in lexical.iter().enumerate() {
        let rank = i + 1;
        let entry = fused.entry(&hit.chunk_id).or_insert_with(|| FusedHit {
            chunk_id: hit.chunk_id.clone(),
            doc_id: hit.doc_id.clone(),
            score: 0.0,
            vector_rank: None,
            lexical_rank: None,
        });
        if entry.lexical_rank.is_none() {
            entry.lexical_rank = Some(rank);
            entry.score += 1.0 / (k_rrf + rank as f64);
        }
    }

    let mut hits: Vec<FusedHit> = fused.into_values().collect();
    hits.sort_by(compare);
    hits
}

fn compare(a: &FusedHit, b: &FusedHit) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| match (a.vector_rank, b.vector_rank) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

/// Keep at most `cap` hits per document (no limit with `None`), then the
/// first `top_k`.
pub fn diversify(hits: Vec<FusedHit>, cap: Option<usize>, top_k: usize) -> Vec<FusedHit> {
    let mut per_doc: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(top_k.min(hits.len()));
    for hit in hits {
        if out.len() >= top_k {
            break;
        }
        if let Some(cap) = cap {
            let count = per_doc.entry(hit.doc_id.clone()).or_default();
            if *count >= cap {
                continue;
            }
            *count += 1;
        }
        out.push(hit);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(id: &str, doc: &str) -> VectorHit {
        VectorHit {
            chunk_id: id.into(),
            doc_id: doc.into(),
            score: 0.0,
        }
    }

    fn l(id: &str, doc: &str) -> LexicalHit {
        LexicalHit {
            chunk_id: id.into(),
            doc_id: doc.into(),
            score: 0.0,
        }
    }

    fn ids(hits: &[FusedHit]) -> Vec<&str> {
        hits.iter().map(|h| h.chunk_id.as_str()).collect()
    }

    #[test]
    fn scores_sum_over_lists() {
        let fused = rrf(&[v("a", "d"), v("b", "d")], &[l("b", "d"), l("c", "d")], RRF_K);
        assert_eq!(ids(&fused), vec!["b", "a", "c"]);
        let b = &fused[0];
        assert!((b.score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
        assert_eq!(b.vector_rank, Some(2));
        assert_eq!(b.lexical_rank, Some(1));
    }

    #[test]
    fn ties_prefer_vector_rank_then_chunk_id() {
        // "x" is first in the vector list and "y" first in the lexical list,
        // so both score 1/61.
        let fused = rrf(&[v("x", "d")], &[l("y", "d")], RRF_K);
        assert_eq!(ids(&fused), vec!["x", "y"]);

        let fused = rrf(&[], &[l("q", "d"), l("p", "d")], RRF_K);
        assert_eq!(ids(&fused), vec!["q", "p"]);

        // Both lists agree on nothing and have the same shape: each pair
        // ties on score, the vector-listed chunk wins.
        let fused = rrf(&[v("m", "d"), v("n", "d")], &[l("k", "d"), l("j", "d")], RRF_K);
        assert_eq!(ids(&fused), vec!["m", "k", "n", "j"]);
    }

    #[test]
    fn duplicate_entries_count_once() {
        let fused = rrf(&[v("a", "d"), v("a", "d")], &[], RRF_K);
        assert_eq!(fused.len(), 1);
        assert!((fused[0].score - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn diversity_cap_limits_each_document() {
        let vector: Vec<VectorHit> = (0..6).map(|i| v(&format!("a{i}"), "d1")).collect();
        let lexical = vec![l("b0", "d2"), l("b1", "d2")];
        let fused = rrf(&vector, &lexical, RRF_K);

        let capped = diversify(fused.clone(), Some(3), 10);
        assert_eq!(capped.iter().filter(|h| h.doc_id == "d1").count(), 3);
        assert_eq!(capped.len(), 5);

        let uncapped = diversify(fused, None, 4);
        assert_eq!(uncapped.len(), 4);
    }
}
