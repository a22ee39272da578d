//! Build, update and rebuild the index from a converted corpus.
//!
//! Every step is keyed by `chunk_id`, so an interrupted run is resumed by
//! simply running `update` again: the chunk log already knows the live
//! chunks and only the ones without a committed vector are embedded.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::{
    chunk::{Chunk, Modality, SourceInfo},
    chunk_log::{DocumentRecord, now_secs},
    chunking::{ChunkerConfig, PartRef, chunk_part},
    corpus::{self, DocumentEntry},
    doc_id::DocumentId,
    embedding_index::EmbeddingIndexer,
    error::Result,
    incremental::diff_corpus,
    store::IndexStore,
};

/// Number of chunks embedded and committed per store transaction.
pub const DEFAULT_COMMIT_BATCH: usize = 256;

/// Offsets of further time-indexed parts of the same modality are shifted by
/// this much so their chunk IDs cannot collide with the first part's.
const TIMED_PART_SHIFT: u32 = 40;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub chunker: ChunkerConfig,
    pub commit_batch: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            commit_batch: DEFAULT_COMMIT_BATCH,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub new_docs: usize,
    pub changed_docs: usize,
    pub unchanged_docs: usize,
    pub removed_docs: usize,
    /// Chunks newly embedded and committed.
    pub chunks_indexed: usize,
    /// Derived rows of retired chunks that were deleted.
    pub chunks_removed: usize,
    /// Chunks whose embedding failed; `repair` retries them.
    pub failed: Vec<String>,
}

/// Progress callback: `(done, total)` chunks embedded in this run.
pub type Progress<'a> = &'a mut dyn FnMut(usize, usize);

/// Chunk every part of a document.
///
/// Parts are processed in order. Several parts of the same modality get
/// distinct offset ranges, so their chunk IDs never collide.
pub fn chunk_document(
    entry: &DocumentEntry,
    corpus_root: &str,
    config: &ChunkerConfig,
) -> (DocumentRecord, Vec<Chunk>) {
    let doc_id = DocumentId::new(corpus_root, &entry.source_path, &entry.checksum).into_string();

    let mut bases: HashMap<Modality, (u64, u64)> = HashMap::new();
    let mut chunks = Vec::new();
    for part in &entry.parts {
        let (seen, bytes) = bases.entry(part.modality).or_default();
        let offset_base = if part.modality.is_video() {
            *seen << TIMED_PART_SHIFT
        } else {
            *bytes
        };
        *seen += 1;
        *bytes += part.text.len() as u64 + 1;

        let source = SourceInfo {
            converted_path: part.path.clone(),
            name: entry.name.clone(),
            file_type: entry.file_type.clone(),
        };
        let part_ref = PartRef {
            source: &source,
            modality: part.modality,
            text: &part.text,
            offset_base,
        };
        chunks.extend(chunk_part(&doc_id, &part_ref, config));
    }

    let record = DocumentRecord {
        source_path: entry.source_path.clone(),
        doc_id,
        checksum: entry.checksum.clone(),
        name: entry.name.clone(),
        file_type: entry.file_type.clone(),
        duration_ms: entry.duration_ms,
        chunk_ids: chunks.iter().map(|c| c.chunk_id.clone()).collect(),
        indexed_at: now_secs(),
    };
    (record, chunks)
}

/// Re-chunk the whole corpus and index everything that is not indexed yet.
/// With `clean`, the derived index is dropped first.
pub fn build(
    store: &IndexStore,
    indexer: &EmbeddingIndexer,
    corpus_root: &Path,
    options: &IngestOptions,
    clean: bool,
    progress: Progress<'_>,
) -> Result<IngestReport> {
    let entries = corpus::load_corpus(corpus_root)?;
    let root = canonical_root(corpus_root)?;
    if clean {
        store.clear_derived()?;
    }

    let mut report = IngestReport::default();
    let diff = diff_corpus(store.log(), &root, entries.clone())?;
    report.new_docs = diff.new_docs.len();
    report.changed_docs = diff.changed_docs.len();
    report.unchanged_docs = diff.unchanged;
    report.removed_docs = diff.removed.len();

    let prepared = prepare(&entries, &root, &options.chunker);
    report.chunks_removed += remove_documents(store, &diff.removed)?;
    report.chunks_removed += record_documents(store, prepared)?;

    finish(store, indexer, options, progress, report)
}

/// Index new and changed documents, drop removed ones, and resume any
/// interrupted work.
pub fn update(
    store: &IndexStore,
    indexer: &EmbeddingIndexer,
    corpus_root: &Path,
    options: &IngestOptions,
    progress: Progress<'_>,
) -> Result<IngestReport> {
    let entries = corpus::load_corpus(corpus_root)?;
    let root = canonical_root(corpus_root)?;
    let diff = diff_corpus(store.log(), &root, entries)?;

    let mut report = IngestReport {
        new_docs: diff.new_docs.len(),
        changed_docs: diff.changed_docs.len(),
        unchanged_docs: diff.unchanged,
        removed_docs: diff.removed.len(),
        ..Default::default()
    };
    info!(
        new = report.new_docs,
        changed = report.changed_docs,
        removed = report.removed_docs,
        unchanged = report.unchanged_docs,
        "corpus diff"
    );

    let touched: Vec<DocumentEntry> = diff
        .new_docs
        .into_iter()
        .chain(diff.changed_docs.into_iter().map(|(entry, _)| entry))
        .collect();
    let prepared = prepare(&touched, &root, &options.chunker);
    report.chunks_removed += remove_documents(store, &diff.removed)?;
    report.chunks_removed += record_documents(store, prepared)?;

    finish(store, indexer, options, progress, report)
}

/// Drop the derived index, compact the chunk log and regenerate the index
/// from the log alone.
pub fn rebuild_index(
    store: &IndexStore,
    indexer: &EmbeddingIndexer,
    options: &IngestOptions,
    progress: Progress<'_>,
) -> Result<IngestReport> {
    store.clear_derived()?;
    let dropped = store.log().compact()?;
    info!(dropped, "chunk log compacted");
    let report = IngestReport {
        unchanged_docs: store.log().documents()?.len(),
        ..Default::default()
    };
    finish(store, indexer, options, progress, report)
}

fn canonical_root(root: &Path) -> Result<String> {
    Ok(root.canonicalize()?.to_string_lossy().into_owned())
}

fn prepare(
    entries: &[DocumentEntry],
    root: &str,
    config: &ChunkerConfig,
) -> Vec<(DocumentRecord, Vec<Chunk>)> {
    entries
        .par_iter()
        .map(|entry| chunk_document(entry, root, config))
        .collect()
}

/// Record documents in the log and delete derived rows of any chunks their
/// previous version had. Returns the number of retired chunks.
fn record_documents(store: &IndexStore, prepared: Vec<(DocumentRecord, Vec<Chunk>)>) -> Result<usize> {
    let mut retired = 0;
    for (record, chunks) in prepared {
        let previous = store.log().document(&record.source_path)?;
        store.log().record_document(&record, &chunks)?;

        if let Some(previous) = previous {
            let current: HashSet<&String> = record.chunk_ids.iter().collect();
            let stale: Vec<String> = previous
                .chunk_ids
                .into_iter()
                .filter(|id| !current.contains(id))
                .collect();
            if !stale.is_empty() {
                debug!(source = %record.source_path, stale = stale.len(), "retiring chunks");
                store.delete_chunks(&stale)?;
                retired += stale.len();
            }
        }
    }
    Ok(retired)
}

fn remove_documents(store: &IndexStore, removed: &[DocumentRecord]) -> Result<usize> {
    let mut retired = 0;
    for record in removed {
        if let Some(record) = store.log().remove_document(&record.source_path)? {
            info!(source = %record.source_path, "document removed");
            store.delete_chunks(&record.chunk_ids)?;
            store.delete_documents(std::slice::from_ref(&record.doc_id))?;
            retired += record.chunk_ids.len();
        }
    }
    Ok(retired)
}

/// Clean up leftovers of interrupted runs, embed every live chunk that is
/// not committed yet, and refresh the document summaries.
fn finish(
    store: &IndexStore,
    indexer: &EmbeddingIndexer,
    options: &IngestOptions,
    progress: Progress<'_>,
    mut report: IngestReport,
) -> Result<IngestReport> {
    let consistency = store.check()?;
    if !consistency.orphan_vectors.is_empty() {
        store.delete_chunks(&consistency.orphan_vectors)?;
        report.chunks_removed += consistency.orphan_vectors.len();
    }
    if !consistency.orphan_lexical.is_empty() {
        store.lexical().delete_chunks(&consistency.orphan_lexical)?;
    }

    let committed = store.index_db().chunk_ids()?;
    let pending: Vec<Chunk> = store
        .log()
        .live_chunks()?
        .into_iter()
        .filter(|c| !committed.contains(&c.chunk_id))
        .collect();

    let total = pending.len();
    let mut done = 0;
    progress(done, total);
    for batch in pending.chunks(options.commit_batch.max(1)) {
        let upserted = store.upsert(batch.to_vec(), indexer)?;
        report.chunks_indexed += upserted.indexed;
        report.failed.extend(upserted.failed);
        done += batch.len();
        progress(done, total);
    }

    store.sync_documents()?;

    if !report.failed.is_empty() {
        warn!(failed = report.failed.len(), "some chunks could not be embedded; run `repair` to retry");
    }
    info!(
        indexed = report.chunks_indexed,
        removed = report.chunks_removed,
        "index up to date"
    );
    Ok(report)
}
