//! docsift - hybrid semantic and lexical retrieval over converted documents.
//!
//! docsift indexes a corpus of converted files (text, OCR output, audio and
//! video transcripts, video frame captions, image captions) into a vector
//! index and a [Tantivy](https://github.com/quickwit-oss/tantivy) BM25
//! index, and answers natural-language queries with cited fragments fused by
//! Reciprocal Rank Fusion. Video hits are expanded into a chronological
//! audio and screen timeline.
//!
//! # Quick start
//!
//! ```no_run
//! use docsift::{ConfigDb, DataDir, IndexStore, Settings};
//! use docsift::config_db::Overrides;
//! use docsift::ingestion::{self, IngestOptions};
//! use docsift::search::{self, RetrieveRequest};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let config_db = ConfigDb::open(&data_dir.config_db()).unwrap();
//! let settings = Settings::resolve(&config_db, &Overrides::default()).unwrap();
//! let store = IndexStore::open(&data_dir, settings.vector_backend).unwrap();
//! let indexer = settings.indexer().unwrap();
//!
//! ingestion::update(
//!     &store,
//!     &indexer,
//!     std::path::Path::new("/path/to/converted"),
//!     &IngestOptions::default(),
//!     &mut |_, _| {},
//! )
//! .unwrap();
//!
//! let response = search::retrieve(&store, &indexer, &RetrieveRequest::new("quarterly budget"))
//!     .unwrap();
//! for item in &response.items {
//!     println!("[{}] {} ({})", item.rank, item.doc_name, item.locator);
//! }
//! ```

pub mod chunk;
pub mod chunk_log;
pub mod chunking;
pub mod cli;
pub mod config_db;
pub mod corpus;
pub mod data_dir;
pub mod doc_id;
pub mod embedder;
pub mod embedding_index;
pub mod error;
pub mod expansion;
pub mod format;
pub mod fusion;
pub mod incremental;
pub mod index_db;
pub mod ingestion;
pub mod lexical_index;
pub mod mcp;
pub mod router;
pub mod scope;
pub mod search;
pub mod store;
pub mod vector;

pub use chunk::{Chunk, Locator, Modality};
pub use config_db::{ConfigDb, Settings};
pub use data_dir::DataDir;
pub use doc_id::DocumentId;
pub use embedding_index::EmbeddingIndexer;
pub use error::{Error, Result};
pub use store::IndexStore;
