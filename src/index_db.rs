//! The derived index database (`index.redb`): vectors, chunk metadata,
//! per-document chunk lists and document summaries.
//!
//! Vectors and metadata are always written in the same transaction. The
//! metadata row is the commit marker for a chunk: a chunk without one is not
//! visible to retrieval.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
};

use redb::{
    Database,
    MultimapTableDefinition,
    ReadableDatabase,
    ReadableMultimapTable,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
};
use serde::{Deserialize, Serialize};

use crate::{
    chunk::Chunk,
    chunk_log::DocumentRecord,
    error::{EmbeddingError, Error, Result},
};

const VECTORS: TableDefinition<&str, &[u8]> = TableDefinition::new("vectors");
const CHUNK_META: TableDefinition<&str, &[u8]> = TableDefinition::new("chunk_meta");
const DOC_CHUNKS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("doc_chunks");
const DOCUMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");
const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

const DIMENSION_KEY: &str = "dimension";
const LAST_INDEXED_KEY: &str = "last_indexed_at";

/// Number of leading words of a document kept in its summary.
const SUMMARY_WORDS: usize = 80;

/// Maximum number of headings kept in a summary.
const SUMMARY_HEADINGS: usize = 24;

/// A committed chunk, as stored in the metadata table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub indexed_at: u64,
}

/// Per-document facts used by the catalog router, scope filters and the
/// video expansion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub doc_id: String,
    pub source_path: String,
    pub name: String,
    pub file_type: String,
    pub duration_ms: Option<u64>,
    pub chunk_count: usize,
    /// Headings followed by the opening words of the document.
    pub summary: String,
    pub indexed_at: u64,
}

impl DocumentSummary {
    pub fn from_chunks(record: &DocumentRecord, chunks: &[Chunk]) -> Self {
        let mut headings: Vec<&str> = Vec::new();
        for heading in chunks.iter().flat_map(|c| c.heading_path.iter()) {
            if headings.len() >= SUMMARY_HEADINGS {
                break;
            }
            if !headings.contains(&heading.as_str()) {
                headings.push(heading);
            }
        }

        let opening: Vec<&str> = chunks
            .iter()
            .flat_map(|c| c.text.split_whitespace())
            .take(SUMMARY_WORDS)
            .collect();

        let mut summary = headings.join("; ");
        if !summary.is_empty() && !opening.is_empty() {
            summary.push('\n');
        }
        summary.push_str(&opening.join(" "));

        Self {
            doc_id: record.doc_id.clone(),
            source_path: record.source_path.clone(),
            name: record.name.clone(),
            file_type: record.file_type.clone(),
            duration_ms: record.duration_ms,
            chunk_count: chunks.len(),
            summary,
            indexed_at: record.indexed_at,
        }
    }
}

pub struct IndexDb {
    db: Database,
}

impl IndexDb {
    /// Open or create the index database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;
        Self::init_tables(&db)?;
        Ok(Self { db })
    }

    fn init_tables(db: &Database) -> Result<()> {
        let txn = db.begin_write()?;
        txn.open_table(VECTORS)?;
        txn.open_table(CHUNK_META)?;
        txn.open_multimap_table(DOC_CHUNKS)?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;
        Ok(())
    }

    /// Commit vectors and metadata for a batch of chunks in one
    /// transaction.
    ///
    /// The first committed vector fixes the store's dimension; later
    /// vectors of another length are rejected before anything is written.
    pub fn commit_chunks(&self, entries: &[(Chunk, Vec<f32>)], indexed_at: u64) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let txn = self.db.begin_write()?;
        {
            let mut settings = txn.open_table(SETTINGS)?;
            let stored: Option<usize> = settings
                .get(DIMENSION_KEY)?
                .and_then(|v| v.value().parse().ok());
            let expected = stored.unwrap_or(entries[0].1.len());
            if let Some((_, bad)) = entries.iter().find(|(_, v)| v.len() != expected) {
                return Err(Error::Embedding(EmbeddingError::Dimension {
                    expected,
                    got: bad.len(),
                }));
            }
            if stored.is_none() {
                settings.insert(DIMENSION_KEY, expected.to_string().as_str())?;
            }
            settings.insert(LAST_INDEXED_KEY, indexed_at.to_string().as_str())?;

            let mut vectors = txn.open_table(VECTORS)?;
            let mut meta = txn.open_table(CHUNK_META)?;
            let mut doc_chunks = txn.open_multimap_table(DOC_CHUNKS)?;
            for (chunk, vector) in entries {
                let id = chunk.chunk_id.as_str();
                vectors.insert(id, bytemuck::cast_slice::<f32, u8>(vector.as_slice()))?;
                let row = IndexedChunk {
                    chunk: chunk.clone(),
                    indexed_at,
                };
                meta.insert(id, serde_json::to_vec(&row)?.as_slice())?;
                doc_chunks.insert(chunk.doc_id.as_str(), id)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Remove vectors, metadata and list entries for the given chunks.
    pub fn delete_chunks(&self, chunk_ids: &[String]) -> Result<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut vectors = txn.open_table(VECTORS)?;
            let mut meta = txn.open_table(CHUNK_META)?;
            let mut doc_chunks = txn.open_multimap_table(DOC_CHUNKS)?;
            for id in chunk_ids {
                vectors.remove(id.as_str())?;
                let removed: Option<IndexedChunk> = meta
                    .remove(id.as_str())?
                    .map(|v| serde_json::from_slice(v.value()))
                    .transpose()?;
                if let Some(row) = removed {
                    doc_chunks.remove(row.chunk.doc_id.as_str(), id.as_str())?;
                }
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Drop everything. The settings row for the dimension goes too, so a
    /// rebuilt index may use a different embedder.
    pub fn clear(&self) -> Result<()> {
        let txn = self.db.begin_write()?;
        txn.delete_table(VECTORS)?;
        txn.delete_table(CHUNK_META)?;
        txn.delete_multimap_table(DOC_CHUNKS)?;
        txn.delete_table(DOCUMENTS)?;
        txn.delete_table(SETTINGS)?;
        txn.commit()?;
        Self::init_tables(&self.db)
    }

    pub fn put_documents(&self, docs: &[DocumentSummary]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(DOCUMENTS)?;
            for doc in docs {
                table.insert(doc.doc_id.as_str(), serde_json::to_vec(doc)?.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn delete_documents(&self, doc_ids: &[String]) -> Result<()> {
        if doc_ids.is_empty() {
            return Ok(());
        }
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(DOCUMENTS)?;
            for id in doc_ids {
                table.remove(id.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    pub fn document(&self, doc_id: &str) -> Result<Option<DocumentSummary>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        match table.get(doc_id)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    pub fn documents(&self) -> Result<Vec<DocumentSummary>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_, v) = entry?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    pub fn chunk(&self, chunk_id: &str) -> Result<Option<IndexedChunk>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNK_META)?;
        match table.get(chunk_id)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// Load committed chunks by ID. Unknown IDs are absent from the map.
    pub fn chunks(&self, chunk_ids: &[String]) -> Result<HashMap<String, Chunk>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNK_META)?;
        let mut result = HashMap::with_capacity(chunk_ids.len());
        for id in chunk_ids {
            if let Some(v) = table.get(id.as_str())? {
                let row: IndexedChunk = serde_json::from_slice(v.value())?;
                result.insert(id.clone(), row.chunk);
            }
        }
        Ok(result)
    }

    /// Committed chunks of one document, in chunk-ID order.
    pub fn chunks_for_doc(&self, doc_id: &str) -> Result<Vec<Chunk>> {
        let txn = self.db.begin_read()?;
        let lists = txn.open_multimap_table(DOC_CHUNKS)?;
        let meta = txn.open_table(CHUNK_META)?;
        let mut result = Vec::new();
        for id in lists.get(doc_id)? {
            let id = id?;
            if let Some(v) = meta.get(id.value())? {
                let row: IndexedChunk = serde_json::from_slice(v.value())?;
                result.push(row.chunk);
            }
        }
        Ok(result)
    }

    /// IDs of every chunk with a metadata row.
    pub fn chunk_ids(&self) -> Result<HashSet<String>> {
        self.keys(CHUNK_META)
    }

    /// IDs of every chunk with a stored vector.
    pub fn vector_ids(&self) -> Result<HashSet<String>> {
        self.keys(VECTORS)
    }

    fn keys(&self, def: TableDefinition<'static, &'static str, &'static [u8]>) -> Result<HashSet<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(def)?;
        let mut result = HashSet::new();
        for entry in table.iter()? {
            let (k, _) = entry?;
            result.insert(k.value().to_string());
        }
        Ok(result)
    }

    /// Every stored vector, joined with its chunk's document ID. Vectors
    /// without a metadata row are not returned.
    pub fn vectors(&self) -> Result<Vec<(String, String, Vec<f32>)>> {
        let txn = self.db.begin_read()?;
        let vectors = txn.open_table(VECTORS)?;
        let lists = txn.open_multimap_table(DOC_CHUNKS)?;

        let mut doc_of: HashMap<String, String> = HashMap::new();
        for entry in lists.iter()? {
            let (doc, ids) = entry?;
            for id in ids {
                doc_of.insert(id?.value().to_string(), doc.value().to_string());
            }
        }

        let mut result = Vec::new();
        for entry in vectors.iter()? {
            let (k, v) = entry?;
            if let Some(doc_id) = doc_of.get(k.value()) {
                result.push((
                    k.value().to_string(),
                    doc_id.clone(),
                    decode_vector(v.value()),
                ));
            }
        }
        Ok(result)
    }

    pub fn vector(&self, chunk_id: &str) -> Result<Option<Vec<f32>>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        Ok(table.get(chunk_id)?.map(|v| decode_vector(v.value())))
    }

    pub fn chunk_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        Ok(txn.open_table(CHUNK_META)?.len()?)
    }

    pub fn vector_count(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        Ok(txn.open_table(VECTORS)?.len()?)
    }

    pub fn dimension(&self) -> Result<Option<usize>> {
        self.setting(DIMENSION_KEY)
    }

    pub fn last_indexed_at(&self) -> Result<Option<u64>> {
        self.setting(LAST_INDEXED_KEY)
    }

    fn setting<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.and_then(|v| v.value().parse().ok()))
    }
}

impl std::fmt::Debug for IndexDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexDb").finish_non_exhaustive()
    }
}

/// Stored bytes are not guaranteed to be 4-byte aligned, so they are
/// copied rather than cast in place.
fn decode_vector(bytes: &[u8]) -> Vec<f32> {
    bytemuck::allocation::pod_collect_to_vec(bytes)
}
