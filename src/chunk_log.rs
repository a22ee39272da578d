//! The canonical chunk log: append-only source of truth for every chunk,
//! plus the registry of indexed documents.
//!
//! The derived index (`index.redb` and the Tantivy directory) can always be
//! rebuilt by replaying this log.

use std::{collections::HashMap, path::Path};

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
};
use serde::{Deserialize, Serialize};

use crate::{chunk::Chunk, error::Result};

const LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("chunk_log");
const REGISTRY: TableDefinition<&str, &[u8]> = TableDefinition::new("documents");

/// One log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogEntry {
    Append { chunk: Chunk },
    Retire { doc_id: String, chunk_ids: Vec<String> },
}

/// Registry row for a source document, keyed by its source path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub source_path: String,
    pub doc_id: String,
    pub checksum: String,
    pub name: String,
    pub file_type: String,
    pub duration_ms: Option<u64>,
    pub chunk_ids: Vec<String>,
    pub indexed_at: u64,
}

pub struct ChunkLog {
    db: Database,
}

impl ChunkLog {
    /// Open or create a chunk log at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use docsift::chunk_log::ChunkLog;
    ///
    /// let log = ChunkLog::open(&tmp.path().join("chunks.redb")).unwrap();
    /// assert!(log.live_chunks().unwrap().is_empty());
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(LOG)?;
        txn.open_table(REGISTRY)?;
        txn.commit()?;

        Ok(Self { db })
    }

    /// Register a document and its chunk set in one transaction.
    ///
    /// A previous chunk set for the same source path is retired first. When
    /// the chunk set is unchanged only the registry row is rewritten, so
    /// re-recording identical content does not grow the log.
    pub fn record_document(
        &self,
        record: &DocumentRecord,
        chunks: &[Chunk],
    ) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut registry = txn.open_table(REGISTRY)?;
            let previous: Option<DocumentRecord> = registry
                .get(record.source_path.as_str())?
                .map(|v| serde_json::from_slice(v.value()))
                .transpose()?;

            let unchanged = previous.as_ref().is_some_and(|p| {
                p.doc_id == record.doc_id && p.chunk_ids == record.chunk_ids
            });

            if !unchanged {
                let mut log = txn.open_table(LOG)?;
                let mut seq = next_seq(&log)?;
                if let Some(previous) = previous {
                    let entry = LogEntry::Retire {
                        doc_id: previous.doc_id,
                        chunk_ids: previous.chunk_ids,
                    };
                    log.insert(seq, serde_json::to_vec(&entry)?.as_slice())?;
                    seq += 1;
                }
                for chunk in chunks {
                    let entry = LogEntry::Append {
                        chunk: chunk.clone(),
                    };
                    log.insert(seq, serde_json::to_vec(&entry)?.as_slice())?;
                    seq += 1;
                }
            }

            registry.insert(
                record.source_path.as_str(),
                serde_json::to_vec(record)?.as_slice(),
            )?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Retire a document's chunks and drop it from the registry.
    pub fn remove_document(
        &self,
        source_path: &str,
    ) -> Result<Option<DocumentRecord>> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut registry = txn.open_table(REGISTRY)?;
            let removed: Option<DocumentRecord> = registry
                .remove(source_path)?
                .map(|v| serde_json::from_slice(v.value()))
                .transpose()?;

            if let Some(record) = &removed {
                let mut log = txn.open_table(LOG)?;
                let seq = next_seq(&log)?;
                let entry = LogEntry::Retire {
                    doc_id: record.doc_id.clone(),
                    chunk_ids: record.chunk_ids.clone(),
                };
                log.insert(seq, serde_json::to_vec(&entry)?.as_slice())?;
            }
            removed
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn document(&self, source_path: &str) -> Result<Option<DocumentRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(REGISTRY)?;
        match table.get(source_path)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value())?)),
            None => Ok(None),
        }
    }

    /// All registered documents, ordered by source path.
    pub fn documents(&self) -> Result<Vec<DocumentRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(REGISTRY)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_, v) = entry?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    /// Every log record in sequence order.
    pub fn entries(&self) -> Result<Vec<(u64, LogEntry)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(LOG)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value(), serde_json::from_slice(v.value())?));
        }
        Ok(result)
    }

    /// Replay the log: chunks appended and not retired since, in the order
    /// they were last appended.
    pub fn live_chunks(&self) -> Result<Vec<Chunk>> {
        Ok(replay(self.entries()?))
    }

    /// Rewrite the log as one append per live chunk, dropping retired
    /// chunks and retire records. Returns the number of records dropped.
    pub fn compact(&self) -> Result<u64> {
        let txn = self.db.begin_write()?;
        let dropped = {
            let mut log = txn.open_table(LOG)?;
            let before = log.len()?;
            let mut entries: Vec<(u64, LogEntry)> = Vec::new();
            for entry in log.iter()? {
                let (k, v) = entry?;
                entries.push((k.value(), serde_json::from_slice(v.value())?));
            }
            let live = replay(entries);

            log.retain(|_, _| false)?;
            for (seq, chunk) in (0u64..).zip(live) {
                let entry = LogEntry::Append { chunk };
                log.insert(seq, serde_json::to_vec(&entry)?.as_slice())?;
            }
            before - log.len()?
        };
        txn.commit()?;
        Ok(dropped)
    }

    /// Number of log records.
    pub fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(LOG)?;
        Ok(table.len()?)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl std::fmt::Debug for ChunkLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkLog").finish_non_exhaustive()
    }
}

fn replay(entries: Vec<(u64, LogEntry)>) -> Vec<Chunk> {
    let mut live: HashMap<String, (u64, Chunk)> = HashMap::new();
    for (seq, entry) in entries {
        match entry {
            LogEntry::Append { chunk } => {
                live.insert(chunk.chunk_id.clone(), (seq, chunk));
            }
            LogEntry::Retire { chunk_ids, .. } => {
                for id in &chunk_ids {
                    live.remove(id);
                }
            }
        }
    }

    let mut chunks: Vec<(u64, Chunk)> = live.into_values().collect();
    chunks.sort_by_key(|(seq, _)| *seq);
    chunks.into_iter().map(|(_, c)| c).collect()
}

fn next_seq(log: &redb::Table<'_, u64, &'static [u8]>) -> Result<u64> {
    Ok(log.last()?.map_or(0, |(k, _)| k.value() + 1))
}

/// Seconds since the Unix epoch.
pub(crate) fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
