//! Document scope resolution and the catalog router.
//!
//! Explicit scopes come from the caller's filters or from a query that
//! names a document outright, by its full name or a quoted stem. Otherwise
//! a cheap BM25 pass over document summaries picks the documents worth a
//! full hybrid search, and documents whose stem the query merely mentions
//! are kept in that pick.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    error::Result,
    index_db::DocumentSummary,
    lexical_index::LexicalIndex,
    scope::DocScope,
};

/// Documents kept by the router in normal mode.
pub const ROUTER_DOCS: usize = 20;

/// Documents kept by the router in exhaustive mode.
pub const EXHAUSTIVE_ROUTER_DOCS: usize = 40;

/// Shortest document stem that counts as a mention when it appears in a
/// query.
pub const MIN_NAME_LEN: usize = 4;

/// Caller-supplied restrictions on which documents may be searched.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    schemars::JsonSchema,
)]
pub struct Filters {
    /// Source file type, compared case-insensitively (e.g. `pdf`, `mp4`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    /// Case-insensitive substring of the document name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_name: Option<String>,
    /// Exact document IDs. An empty list matches nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_ids: Option<Vec<String>>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        self.file_type.is_none()
            && self.doc_name.is_none()
            && self.doc_ids.is_none()
    }
}

/// The scope the caller asked for, or `None` when no filter is set.
pub fn explicit_scope(
    filters: &Filters,
    docs: &[DocumentSummary],
) -> Option<DocScope> {
    if filters.is_empty() {
        return None;
    }

    let mut scope = DocScope::from_filter(filters.doc_ids.as_deref());

    if let Some(file_type) = &filters.file_type {
        let wanted = file_type.trim().trim_start_matches('.').to_lowercase();
        let ids = docs
            .iter()
            .filter(|d| d.file_type.to_lowercase() == wanted)
            .map(|d| d.doc_id.clone())
            .collect();
        scope = scope.intersect(&DocScope::Only(ids));
    }

    if let Some(name) = &filters.doc_name {
        let needle = name.to_lowercase();
        let ids = docs
            .iter()
            .filter(|d| d.name.to_lowercase().contains(&needle))
            .map(|d| d.doc_id.clone())
            .collect();
        scope = scope.intersect(&DocScope::Only(ids));
    }

    Some(scope)
}

/// Documents the query refers to explicitly: the full name with its
/// extension as a whole word ("what does roadmap.pdf say"), or the name or
/// its stem in quotes ("summarize \"standup\"").
pub fn named_documents(
    query: &str,
    docs: &[DocumentSummary],
) -> BTreeSet<String> {
    let haystack = query.to_lowercase();
    let quoted = quoted_phrases(&haystack);
    docs.iter()
        .filter(|d| {
            let name = d.name.to_lowercase();
            let stem = stem(&name);
            (stem != name && contains_word(&haystack, &name))
                || quoted.iter().any(|q| *q == name || *q == stem)
        })
        .map(|d| d.doc_id.clone())
        .collect()
}

/// Documents whose stem appears as a whole word in the query, e.g.
/// "standup" for `standup.mp4`. Stems shorter than [`MIN_NAME_LEN`] are
/// ignored.
///
/// A mention is weaker than a name: plain words such as "notes" or
/// "report" collide with stems, so mentions only keep a document in the
/// routed scope and never narrow it.
pub fn mentioned_documents(
    query: &str,
    docs: &[DocumentSummary],
) -> BTreeSet<String> {
    let haystack = query.to_lowercase();
    docs.iter()
        .filter(|d| {
            let name = d.name.to_lowercase();
            let stem = stem(&name);
            stem.chars().count() >= MIN_NAME_LEN && contains_word(&haystack, stem)
        })
        .map(|d| d.doc_id.clone())
        .collect()
}

fn stem(name: &str) -> &str {
    name.rsplit_once('.').map_or(name, |(s, _)| s)
}

fn quoted_phrases(query: &str) -> Vec<&str> {
    ['"', '`']
        .iter()
        .flat_map(|&q| query.split(q).skip(1).step_by(2))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric)
            && !after.is_some_and(char::is_alphanumeric)
    })
}

/// Narrow an unrestricted search to the `limit` best-matching documents.
///
/// Returns [`DocScope::All`] when the corpus is no larger than `limit` or
/// when no document summary matches the query.
pub fn route(
    lexical: &LexicalIndex,
    query: &str,
    corpus_docs: usize,
    limit: usize,
) -> Result<DocScope> {
    if corpus_docs <= limit {
        return Ok(DocScope::All);
    }
    let hits = lexical.search_catalog(query, limit)?;
    if hits.is_empty() {
        debug!("router matched nothing, searching every document");
        return Ok(DocScope::All);
    }
    debug!(docs = hits.len(), "router narrowed the scope");
    Ok(DocScope::Only(hits.into_iter().map(|h| h.doc_id).collect()))
}
