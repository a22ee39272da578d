use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    chunk::{Chunk, Locator, Modality},
    embedding_index::EmbeddingIndexer,
    error::{EmbeddingError, Error, Result},
    expansion::{self, VideoBundle},
    fusion::{self, DIVERSITY_CAP, RRF_K},
    index_db::DocumentSummary,
    router::{self, EXHAUSTIVE_ROUTER_DOCS, Filters, ROUTER_DOCS},
    scope::DocScope,
    store::IndexStore,
};

pub const DEFAULT_TOP_K: usize = 10;

/// Retrieval profile.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Normal,
    /// Wider candidate pools and no diversity cap, for checklist-style
    /// questions that need every matching item.
    Exhaustive,
}

impl Mode {
    pub fn profile(self) -> Profile {
        match self {
            Mode::Normal => Profile {
                vector_k: 15,
                lexical_k: 15,
                router_docs: ROUTER_DOCS,
                diversity_cap: Some(DIVERSITY_CAP),
            },
            Mode::Exhaustive => Profile {
                vector_k: 50,
                lexical_k: 50,
                router_docs: EXHAUSTIVE_ROUTER_DOCS,
                diversity_cap: None,
            },
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "normal" => Ok(Mode::Normal),
            "exhaustive" => Ok(Mode::Exhaustive),
            other => Err(Error::Config(format!(
                "unknown retrieval mode: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Mode::Normal => "normal",
            Mode::Exhaustive => "exhaustive",
        })
    }
}

/// Candidate pool sizes for one mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Profile {
    pub vector_k: usize,
    pub lexical_k: usize,
    pub router_docs: usize,
    pub diversity_cap: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrieveRequest {
    pub query: String,
    pub filters: Filters,
    pub top_k: usize,
    pub mode: Mode,
    /// Budget for the whole call, including the query embedding.
    pub timeout: Option<Duration>,
}

impl RetrieveRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filters: Filters::default(),
            top_k: DEFAULT_TOP_K,
            mode: Mode::Normal,
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Ok,
    NoResults,
    IndexNotBuilt,
}

/// One ranked fragment with everything needed to cite it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceItem {
    pub rank: usize,
    pub chunk_id: String,
    pub doc_id: String,
    pub doc_name: String,
    pub file_type: String,
    pub modality: Modality,
    pub locator: Locator,
    pub heading_path: Vec<String>,
    pub text: String,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lexical_rank: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video: Option<VideoBundle>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResponse {
    pub query: String,
    pub status: Status,
    pub mode: Mode,
    pub filters: Filters,
    pub items: Vec<EvidenceItem>,
}

impl RetrievalResponse {
    fn empty(request: &RetrieveRequest, status: Status) -> Self {
        Self {
            query: request.query.clone(),
            status,
            mode: request.mode,
            filters: request.filters.clone(),
            items: Vec::new(),
        }
    }
}

struct Deadline {
    start: Instant,
    budget: Option<Duration>,
}

impl Deadline {
    fn remaining(&self) -> Option<Duration> {
        self.budget.map(|b| b.saturating_sub(self.start.elapsed()))
    }

    fn check(&self) -> Result<()> {
        match self.budget {
            Some(budget) if self.start.elapsed() > budget => Err(self.expired()),
            _ => Ok(()),
        }
    }

    fn expired(&self) -> Error {
        Error::Timeout {
            elapsed_ms: self.start.elapsed().as_millis() as u64,
        }
    }
}

/// Run the two-stage hybrid retrieval.
///
/// 1. Resolve the document scope: caller filters or documents named in the
///    query, else the catalog router.
/// 2. Vector kNN and BM25 within the scope, fused with RRF.
/// 3. Per-document diversity cap, top `top_k`.
/// 4. Video hits are expanded into time-window bundles.
///
/// Empty corpora, empty scopes and unbuilt indexes are reported through
/// [`RetrievalResponse::status`], never as errors.
pub fn retrieve(
    store: &IndexStore,
    indexer: &EmbeddingIndexer,
    request: &RetrieveRequest,
) -> Result<RetrievalResponse> {
    let deadline = Deadline {
        start: Instant::now(),
        budget: request.timeout,
    };
    let profile = request.mode.profile();

    if !store.is_built()? {
        return Ok(RetrievalResponse::empty(request, Status::IndexNotBuilt));
    }
    if request.query.trim().is_empty() || request.top_k == 0 {
        return Ok(RetrievalResponse::empty(request, Status::NoResults));
    }

    let docs = store.index_db().documents()?;
    let scope = resolve_scope(store, request, &docs, profile.router_docs)?;
    if scope.is_empty() {
        return Ok(RetrievalResponse::empty(request, Status::NoResults));
    }
    deadline.check()?;

    let query_vector = match indexer.embed_query(
        &request.query,
        deadline.remaining(),
        store.index_db().dimension()?,
    ) {
        Ok(v) => Some(v),
        Err(EmbeddingError::Timeout) => return Err(deadline.expired()),
        Err(error) => {
            warn!(%error, "query embedding failed, using lexical results only");
            None
        }
    };
    deadline.check()?;

    // Commits are blocked from here on, not while the query is embedded.
    let _read = store.read_lock();

    let vector_hits = query_vector
        .map(|q| store.knn_search(&q, profile.vector_k, &scope))
        .unwrap_or_default();
    let lexical_hits =
        store.lexical_search(&request.query, profile.lexical_k, &scope)?;

    // Only chunks with a committed metadata row are materialized.
    let candidate_ids: Vec<String> = vector_hits
        .iter()
        .map(|h| h.chunk_id.clone())
        .chain(lexical_hits.iter().map(|h| h.chunk_id.clone()))
        .collect();
    let committed = store.index_db().chunks(&candidate_ids)?;
    let vector_hits: Vec<_> = vector_hits
        .into_iter()
        .filter(|h| committed.contains_key(&h.chunk_id))
        .collect();
    let lexical_hits: Vec<_> = lexical_hits
        .into_iter()
        .filter(|h| committed.contains_key(&h.chunk_id))
        .collect();
    debug!(
        vector = vector_hits.len(),
        lexical = lexical_hits.len(),
        "stage B candidates"
    );

    let single_doc = scope.len().unwrap_or(docs.len()) == 1;
    let cap = if single_doc { None } else { profile.diversity_cap };
    let fused = fusion::diversify(
        fusion::rrf(&vector_hits, &lexical_hits, RRF_K),
        cap,
        request.top_k,
    );
    deadline.check()?;

    let summaries: HashMap<&str, &DocumentSummary> =
        docs.iter().map(|d| (d.doc_id.as_str(), d)).collect();
    let mut doc_chunks: HashMap<String, Vec<Chunk>> = HashMap::new();
    let mut items = Vec::with_capacity(fused.len());

    for (i, hit) in fused.into_iter().enumerate() {
        let Some(chunk) = committed.get(&hit.chunk_id) else {
            continue;
        };
        let summary = summaries.get(chunk.doc_id.as_str());

        let video = if chunk.modality.is_video() {
            let siblings = match doc_chunks.get(&chunk.doc_id) {
                Some(c) => c,
                None => {
                    let loaded = store.index_db().chunks_for_doc(&chunk.doc_id)?;
                    doc_chunks.entry(chunk.doc_id.clone()).or_insert(loaded)
                }
            };
            let duration_ms = summary.and_then(|s| s.duration_ms);
            expansion::expand(chunk, siblings, duration_ms)
        } else {
            None
        };

        items.push(EvidenceItem {
            rank: i + 1,
            chunk_id: chunk.chunk_id.clone(),
            doc_id: chunk.doc_id.clone(),
            doc_name: summary
                .map_or_else(|| chunk.source.name.clone(), |s| s.name.clone()),
            file_type: summary.map_or_else(
                || chunk.source.file_type.clone(),
                |s| s.file_type.clone(),
            ),
            modality: chunk.modality,
            locator: chunk.locator.clone(),
            heading_path: chunk.heading_path.clone(),
            text: chunk.text.clone(),
            score: hit.score,
            vector_rank: hit.vector_rank,
            lexical_rank: hit.lexical_rank,
            video,
        });
    }

    let status = if items.is_empty() {
        Status::NoResults
    } else {
        Status::Ok
    };
    Ok(RetrievalResponse {
        query: request.query.clone(),
        status,
        mode: request.mode,
        filters: request.filters.clone(),
        items,
    })
}

/// Stage A: explicit scope, else documents named in the query, else the
/// catalog router plus any documents the query mentions.
fn resolve_scope(
    store: &IndexStore,
    request: &RetrieveRequest,
    docs: &[DocumentSummary],
    router_docs: usize,
) -> Result<DocScope> {
    if let Some(scope) = router::explicit_scope(&request.filters, docs) {
        debug!(docs = ?scope.len(), "explicit scope from filters");
        return Ok(scope);
    }
    let named = router::named_documents(&request.query, docs);
    if !named.is_empty() {
        debug!(docs = named.len(), "query names documents");
        return Ok(DocScope::Only(named));
    }
    let mut scope = router::route(
        store.lexical(),
        &request.query,
        docs.len(),
        router_docs,
    )?;
    scope.extend(router::mentioned_documents(&request.query, docs));
    Ok(scope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles() {
        let normal = Mode::Normal.profile();
        assert_eq!((normal.vector_k, normal.lexical_k), (15, 15));
        assert_eq!(normal.diversity_cap, Some(3));
        assert_eq!(normal.router_docs, 20);

        let exhaustive = Mode::Exhaustive.profile();
        assert_eq!((exhaustive.vector_k, exhaustive.lexical_k), (50, 50));
        assert_eq!(exhaustive.diversity_cap, None);
    }

    #[test]
    fn mode_parses() {
        assert_eq!("exhaustive".parse::<Mode>().unwrap(), Mode::Exhaustive);
        assert!("fast".parse::<Mode>().is_err());
    }

    #[test]
    fn expired_deadline_is_a_timeout() {
        let deadline = Deadline {
            start: Instant::now() - Duration::from_millis(50),
            budget: Some(Duration::from_millis(1)),
        };
        assert!(matches!(deadline.check(), Err(Error::Timeout { .. })));
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));

        let open = Deadline {
            start: Instant::now(),
            budget: None,
        };
        assert!(open.check().is_ok());
    }
}
