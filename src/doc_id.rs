use crate::chunk::Modality;

/// Length in hex chars of a document ID.
const DOC_ID_HEX_LEN: usize = 16;

/// Length in hex chars of a chunk ID.
const CHUNK_ID_HEX_LEN: usize = 32;

/// A stable document identifier derived from
/// `(corpus_root, relative_path, checksum)`.
///
/// Any change to the source content changes the checksum and therefore the
/// ID, which is what makes a changed document get a fresh chunk set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(corpus_root: &str, relative_path: &str, checksum: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(corpus_root.as_bytes());
        hasher.update(b"\0");
        hasher.update(relative_path.as_bytes());
        hasher.update(b"\0");
        hasher.update(checksum.as_bytes());
        Self(hex_prefix(&hasher.finalize(), DOC_ID_HEX_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// The short hex string for human display (e.g. "a1b2c3").
    pub fn short(&self) -> &str {
        &self.0[..6]
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.short())
    }
}

/// Deterministic chunk identifier: a pure function of
/// `(doc_id, modality, offset)`.
///
/// # Examples
///
/// ```
/// use docsift::{chunk::Modality, doc_id::chunk_id};
///
/// let a = chunk_id("0123456789abcdef", Modality::Text, 0);
/// let b = chunk_id("0123456789abcdef", Modality::Text, 0);
/// assert_eq!(a, b);
/// assert_eq!(a.len(), 32);
/// ```
pub fn chunk_id(doc_id: &str, modality: Modality, offset: u64) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(doc_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(modality.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(offset.to_string().as_bytes());
    hex_prefix(&hasher.finalize(), CHUNK_ID_HEX_LEN)
}

/// Content checksum over the parts of a converted document, in order.
pub fn content_checksum<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

fn hex_prefix(hash: &blake3::Hash, len: usize) -> String {
    let hex = hash.to_hex();
    hex.as_str()[..len].to_string()
}
