//! The index store: one explicit handle over the chunk log and every
//! derived index.
//!
//! Writes follow a fixed order under the store's commit lock. For inserts
//! the lexical rows go first, then vectors and metadata in one redb
//! transaction, then the in-memory vector backend. Deletes run the other
//! way round. Retrieval only materializes chunks that have a metadata row,
//! so a reader holding [`IndexStore::read_lock`] sees each chunk either
//! fully indexed or not at all.

use std::{
    collections::{BTreeSet, HashMap, HashSet},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tracing::{debug, info, warn};

use crate::{
    chunk::Chunk,
    chunk_log::{ChunkLog, now_secs},
    data_dir::DataDir,
    embedding_index::EmbeddingIndexer,
    error::Result,
    index_db::{DocumentSummary, IndexDb},
    lexical_index::{LexicalHit, LexicalIndex},
    scope::DocScope,
    vector::{BackendKind, VectorBackend, VectorHit},
};

/// Result of [`IndexStore::upsert`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// Chunks newly committed to both indexes.
    pub indexed: usize,
    /// Chunks that were already committed.
    pub skipped: usize,
    /// Chunks whose embedding failed; retry them with `repair`.
    pub failed: Vec<String>,
}

/// Per-`chunk_id` disagreements between the chunk log and the derived
/// indexes.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ConsistencyReport {
    /// Live chunks without a committed vector and metadata row.
    pub missing_vectors: Vec<String>,
    /// Committed chunks without a lexical row.
    pub missing_lexical: Vec<String>,
    /// Lexical rows for chunks that are not committed.
    pub orphan_lexical: Vec<String>,
    /// Committed chunks that are no longer live in the log.
    pub orphan_vectors: Vec<String>,
    /// Metadata rows without a vector, or vectors without a metadata row.
    pub torn: Vec<String>,
    /// Live documents without a summary, or summaries of removed documents.
    pub stale_documents: usize,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_vectors.is_empty()
            && self.missing_lexical.is_empty()
            && self.orphan_lexical.is_empty()
            && self.orphan_vectors.is_empty()
            && self.torn.is_empty()
            && self.stale_documents == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct IndexStats {
    pub documents: usize,
    /// Live chunks in the log.
    pub chunks: usize,
    pub vectors: u64,
    pub lexical_rows: u64,
    pub dimension: Option<usize>,
    pub backend: &'static str,
    pub disk_bytes: u64,
    pub last_indexed_at: Option<u64>,
    pub consistency: ConsistencyReport,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    pub removed: usize,
    pub relexed: usize,
    pub reembedded: usize,
    pub failed: Vec<String>,
}

pub struct IndexStore {
    data_dir: DataDir,
    log: ChunkLog,
    db: IndexDb,
    lexical: LexicalIndex,
    vectors: RwLock<Box<dyn VectorBackend>>,
    commit: RwLock<()>,
}

impl IndexStore {
    /// Open the log and the derived indexes under `data_dir`, loading the
    /// committed vectors into a fresh `backend`.
    pub fn open(data_dir: &DataDir, backend: BackendKind) -> Result<Self> {
        let log = ChunkLog::open(&data_dir.chunks_db())?;
        let db = IndexDb::open(&data_dir.index_db())?;
        let lexical = LexicalIndex::open(&data_dir.tantivy_dir()?)?;

        let mut vectors = backend.build();
        for (chunk_id, doc_id, vector) in db.vectors()? {
            vectors.insert(&chunk_id, &doc_id, &vector);
        }
        debug!(backend = vectors.name(), vectors = vectors.len(), "vector backend loaded");

        Ok(Self {
            data_dir: data_dir.clone(),
            log,
            db,
            lexical,
            vectors: RwLock::new(vectors),
            commit: RwLock::new(()),
        })
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    pub fn log(&self) -> &ChunkLog {
        &self.log
    }

    pub fn index_db(&self) -> &IndexDb {
        &self.db
    }

    pub fn lexical(&self) -> &LexicalIndex {
        &self.lexical
    }

    /// Shared lock held by readers across the candidate searches and
    /// materialization of a retrieval.
    pub fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.commit.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.commit.write().unwrap_or_else(|e| e.into_inner())
    }

    fn backend_mut(&self) -> RwLockWriteGuard<'_, Box<dyn VectorBackend>> {
        self.vectors.write().unwrap_or_else(|e| e.into_inner())
    }

    fn backend(&self) -> RwLockReadGuard<'_, Box<dyn VectorBackend>> {
        self.vectors.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend().name()
    }

    /// True once anything has been committed.
    pub fn is_built(&self) -> Result<bool> {
        Ok(self.db.chunk_count()? > 0 || !self.db.documents()?.is_empty())
    }

    /// Embed and commit every chunk that is not already committed.
    /// Idempotent: a second call with the same chunks indexes nothing.
    pub fn upsert(&self, chunks: Vec<Chunk>, indexer: &EmbeddingIndexer) -> Result<UpsertReport> {
        let committed = self.db.chunk_ids()?;
        let total = chunks.len();
        let pending: Vec<Chunk> = chunks
            .into_iter()
            .filter(|c| !committed.contains(&c.chunk_id))
            .collect();
        let mut report = UpsertReport {
            skipped: total - pending.len(),
            ..Default::default()
        };
        if pending.is_empty() {
            return Ok(report);
        }

        let embedded = indexer.embed_chunks(pending, self.db.dimension()?);
        report.failed = embedded.failed;
        report.indexed = self.commit_batch(embedded.vectors)?;
        Ok(report)
    }

    /// Paired commit of already-embedded chunks.
    pub fn commit_batch(&self, entries: Vec<(Chunk, Vec<f32>)>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let _guard = self.write_lock();

        let chunks: Vec<Chunk> = entries.iter().map(|(c, _)| c.clone()).collect();
        self.lexical.upsert_chunks(&chunks)?;
        self.db.commit_chunks(&entries, now_secs())?;

        let mut backend = self.backend_mut();
        for (chunk, vector) in &entries {
            backend.insert(&chunk.chunk_id, &chunk.doc_id, vector);
        }
        debug!(count = entries.len(), "committed chunk batch");
        Ok(entries.len())
    }

    /// Remove chunks from every derived index.
    pub fn delete_chunks(&self, chunk_ids: &[String]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let _guard = self.write_lock();
        self.db.delete_chunks(chunk_ids)?;
        {
            let mut backend = self.backend_mut();
            for id in chunk_ids {
                backend.remove(id);
            }
        }
        self.lexical.delete_chunks(chunk_ids)
    }

    pub fn put_documents(&self, docs: &[DocumentSummary]) -> Result<()> {
        let _guard = self.write_lock();
        self.lexical.upsert_documents(docs)?;
        self.db.put_documents(docs)
    }

    pub fn delete_documents(&self, doc_ids: &[String]) -> Result<()> {
        let _guard = self.write_lock();
        self.db.delete_documents(doc_ids)?;
        self.lexical.delete_documents(doc_ids)
    }

    /// Drop the derived indexes. The chunk log is untouched.
    pub fn clear_derived(&self) -> Result<()> {
        let _guard = self.write_lock();
        self.db.clear()?;
        self.backend_mut().clear();
        self.lexical.clear()?;
        info!("derived index cleared");
        Ok(())
    }

    /// Recompute document summaries from the log, dropping summaries of
    /// documents that are gone.
    pub fn sync_documents(&self) -> Result<usize> {
        let records = self.log.documents()?;
        let mut by_doc: HashMap<String, Vec<Chunk>> = HashMap::new();
        for chunk in self.log.live_chunks()? {
            by_doc.entry(chunk.doc_id.clone()).or_default().push(chunk);
        }

        let live: HashSet<&str> = records.iter().map(|r| r.doc_id.as_str()).collect();
        let stale: Vec<String> = self
            .db
            .documents()?
            .into_iter()
            .map(|d| d.doc_id)
            .filter(|id| !live.contains(id.as_str()))
            .collect();
        self.delete_documents(&stale)?;

        let summaries: Vec<DocumentSummary> = records
            .iter()
            .map(|r| {
                let chunks = by_doc.get(&r.doc_id).map(Vec::as_slice).unwrap_or_default();
                DocumentSummary::from_chunks(r, chunks)
            })
            .collect();
        self.put_documents(&summaries)?;
        Ok(summaries.len())
    }

    /// Nearest chunks to a normalized query vector within `scope`.
    pub fn knn_search(&self, query: &[f32], k: usize, scope: &DocScope) -> Vec<VectorHit> {
        self.backend().knn(query, k, scope)
    }

    pub fn lexical_search(&self, query: &str, k: usize, scope: &DocScope) -> Result<Vec<LexicalHit>> {
        self.lexical.search(query, k, scope)
    }

    /// Compare the log against both derived indexes.
    pub fn check(&self) -> Result<ConsistencyReport> {
        let live: HashSet<String> = self
            .log
            .live_chunks()?
            .into_iter()
            .map(|c| c.chunk_id)
            .collect();
        let meta = self.db.chunk_ids()?;
        let vectors = self.db.vector_ids()?;
        let lexical = self.lexical.chunk_ids()?;

        let committed: HashSet<&String> = meta.intersection(&vectors).collect();
        let doc_ids: HashSet<String> = self.log.documents()?.into_iter().map(|r| r.doc_id).collect();
        let summaries: HashSet<String> = self.db.documents()?.into_iter().map(|d| d.doc_id).collect();

        Ok(ConsistencyReport {
            missing_vectors: sorted(live.iter().filter(|id| !committed.contains(id)).collect()),
            missing_lexical: sorted(meta.iter().filter(|id| !lexical.contains(*id)).collect()),
            orphan_lexical: sorted(lexical.iter().filter(|id| !meta.contains(*id)).collect()),
            orphan_vectors: sorted(meta.union(&vectors).filter(|id| !live.contains(*id)).collect()),
            torn: sorted(meta.symmetric_difference(&vectors).collect()),
            stale_documents: doc_ids.symmetric_difference(&summaries).count(),
        })
    }

    pub fn stats(&self) -> Result<IndexStats> {
        Ok(IndexStats {
            documents: self.log.documents()?.len(),
            chunks: self.log.live_chunks()?.len(),
            vectors: self.db.vector_count()?,
            lexical_rows: self.lexical.stats()?.chunks,
            dimension: self.db.dimension()?,
            backend: self.backend_name(),
            disk_bytes: self.data_dir.index_size_bytes(),
            last_indexed_at: self.db.last_indexed_at()?,
            consistency: self.check()?,
        })
    }

    /// Fix whichever side of each inconsistent chunk is missing, without
    /// rebuilding anything that is already correct.
    pub fn repair(&self, indexer: &EmbeddingIndexer) -> Result<RepairReport> {
        let report = self.check()?;
        let mut out = RepairReport::default();
        if report.is_consistent() {
            return Ok(out);
        }

        // Orphans and torn rows go first so they are re-added cleanly.
        let mut remove: BTreeSet<String> = report.orphan_vectors.iter().cloned().collect();
        remove.extend(report.torn.iter().cloned());
        let remove: Vec<String> = remove.into_iter().collect();
        self.delete_chunks(&remove)?;
        out.removed = remove.len();

        let orphan_lexical: Vec<String> = report
            .orphan_lexical
            .iter()
            .filter(|id| !remove.contains(id))
            .cloned()
            .collect();
        self.lexical.delete_chunks(&orphan_lexical)?;
        out.removed += orphan_lexical.len();

        let relex: Vec<String> = report
            .missing_lexical
            .iter()
            .filter(|id| !remove.contains(id))
            .cloned()
            .collect();
        if !relex.is_empty() {
            let chunks: Vec<Chunk> = self.db.chunks(&relex)?.into_values().collect();
            let _guard = self.write_lock();
            self.lexical.upsert_chunks(&chunks)?;
            out.relexed = chunks.len();
        }

        let missing: HashSet<String> = report
            .missing_vectors
            .iter()
            .chain(remove.iter())
            .cloned()
            .collect();
        let chunks: Vec<Chunk> = self
            .log
            .live_chunks()?
            .into_iter()
            .filter(|c| missing.contains(&c.chunk_id))
            .collect();
        let upserted = self.upsert(chunks, indexer)?;
        out.reembedded = upserted.indexed;
        out.failed = upserted.failed;

        if report.stale_documents > 0 {
            self.sync_documents()?;
        }

        if !out.failed.is_empty() {
            warn!(failed = out.failed.len(), "some chunks are still not embedded");
        }
        info!(
            removed = out.removed,
            relexed = out.relexed,
            reembedded = out.reembedded,
            "repair finished"
        );
        Ok(out)
    }
}

fn sorted(set: HashSet<&String>) -> Vec<String> {
    let ordered: BTreeSet<&String> = set.into_iter().collect();
    ordered.into_iter().cloned().collect()
}

impl std::fmt::Debug for IndexStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexStore")
            .field("root", &self.data_dir.root())
            .field("backend", &self.backend_name())
            .finish_non_exhaustive()
    }
}
