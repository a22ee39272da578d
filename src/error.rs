use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("lexical index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("retrieval timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },
}

/// A document fragment that could not be turned into chunks.
///
/// Always recoverable: the chunker logs it and moves on to the next
/// fragment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkingError {
    #[error("line {line}: unparseable timecode {raw:?}")]
    BadTimecode { line: usize, raw: String },

    #[error("line {line}: segment ends before it starts ({start_ms} > {end_ms})")]
    InvertedRange {
        line: usize,
        start_ms: u64,
        end_ms: u64,
    },

    #[error("line {line}: frame heading without a usable timestamp: {raw:?}")]
    BadFrameHeading { line: usize, raw: String },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Http(String),

    #[error("embedding request timed out")]
    Timeout,

    #[error("embedding provider rejected the request: {0}")]
    Rejected(String),

    #[error("embedding provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("embedding has dimension {got}, expected {expected}")]
    Dimension { expected: usize, got: usize },

    #[error("embedding provider returned a zero vector")]
    ZeroVector,
}

impl EmbeddingError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout)
    }
}

impl From<redb::DatabaseError> for Error {
    fn from(e: redb::DatabaseError) -> Self {
        Self::Redb(e.into())
    }
}
