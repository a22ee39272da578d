use std::collections::{HashMap, HashSet};

use crate::{
    chunk_log::{ChunkLog, DocumentRecord},
    corpus::DocumentEntry,
    doc_id::DocumentId,
    error::Result,
};

/// Result of comparing a corpus against the document registry.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// Documents that are not registered yet.
    pub new_docs: Vec<DocumentEntry>,
    /// Registered documents whose content changed, with their old record.
    pub changed_docs: Vec<(DocumentEntry, DocumentRecord)>,
    /// Registered documents whose content is unchanged.
    pub unchanged: usize,
    /// Registered documents that are no longer in the corpus.
    pub removed: Vec<DocumentRecord>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.new_docs.is_empty() && self.changed_docs.is_empty() && self.removed.is_empty()
    }
}

/// Compare corpus entries against the registry in the chunk log.
///
/// A document counts as changed when its `doc_id` would differ from the
/// registered one, i.e. when its checksum (or the corpus root) changed.
pub fn diff_corpus(
    log: &ChunkLog,
    corpus_root: &str,
    entries: Vec<DocumentEntry>,
) -> Result<DiffResult> {
    let mut known: HashMap<String, DocumentRecord> = log
        .documents()?
        .into_iter()
        .map(|r| (r.source_path.clone(), r))
        .collect();

    let mut result = DiffResult::default();
    let mut seen = HashSet::new();

    for entry in entries {
        seen.insert(entry.source_path.clone());
        match known.remove(&entry.source_path) {
            None => result.new_docs.push(entry),
            Some(record) => {
                let doc_id = DocumentId::new(corpus_root, &entry.source_path, &entry.checksum);
                if doc_id.as_str() == record.doc_id {
                    result.unchanged += 1;
                } else {
                    result.changed_docs.push((entry, record));
                }
            }
        }
    }

    result.removed = known.into_values().filter(|r| !seen.contains(&r.source_path)).collect();
    result.removed.sort_by(|a, b| a.source_path.cmp(&b.source_path));
    Ok(result)
}
