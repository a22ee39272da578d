#![allow(dead_code)]

use std::{
    path::Path,
    sync::{Arc, Mutex, mpsc},
    time::Duration,
};

use docsift::{
    DataDir,
    EmbeddingIndexer,
    IndexStore,
    embedder::{Embedder, RetryPolicy},
    error::EmbeddingError,
    ingestion::{self, IngestOptions, IngestReport},
    search::{self, RetrievalResponse, RetrieveRequest},
    vector::BackendKind,
};

const FILLER: &[&str] = &[
    "lorem", "ipsum", "dolor", "amet", "consectetur", "adipiscing", "elit", "tempor",
    "incididunt", "labore", "magna", "aliqua", "veniam", "nostrud", "ullamco", "laboris",
];

/// Embeds text as a bias term plus one count per concept group. Words in
/// the same group are "synonyms"; words outside every group are invisible
/// to the vector side. The document context header is ignored.
pub struct KeywordEmbedder {
    groups: Vec<Vec<&'static str>>,
}

impl KeywordEmbedder {
    pub fn new(groups: &[&[&'static str]]) -> Self {
        Self {
            groups: groups.iter().map(|g| g.to_vec()).collect(),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let body = text.split_once("\n\n").map_or(text, |(_, body)| body);
        let words: Vec<String> = body
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        let mut v = vec![1.0f32];
        for group in &self.groups {
            let n = words.iter().filter(|w| group.contains(&w.as_str())).count();
            v.push(n as f32);
        }
        v
    }
}

impl Embedder for KeywordEmbedder {
    fn describe(&self) -> String {
        "keyword".to_string()
    }

    fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(inputs.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Rejects every batch that contains `poison`.
pub struct PoisonedEmbedder {
    pub inner: KeywordEmbedder,
    pub poison: &'static str,
}

impl Embedder for PoisonedEmbedder {
    fn describe(&self) -> String {
        "poisoned".to_string()
    }

    fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if inputs.iter().any(|t| t.to_lowercase().contains(self.poison)) {
            return Err(EmbeddingError::Rejected(format!("contains {}", self.poison)));
        }
        self.inner.embed(inputs)
    }
}

/// Holds every query embedding until the test releases it.
pub struct GatedEmbedder {
    inner: KeywordEmbedder,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl GatedEmbedder {
    pub fn new(
        inner: KeywordEmbedder,
        entered: mpsc::Sender<()>,
        release: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            inner,
            entered: Mutex::new(entered),
            release: Mutex::new(release),
        }
    }
}

impl Embedder for GatedEmbedder {
    fn describe(&self) -> String {
        "gated".to_string()
    }

    fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.inner.embed(inputs)
    }

    fn embed_query(
        &self,
        query: &str,
        _timeout: Option<Duration>,
    ) -> Result<Vec<f32>, EmbeddingError> {
        let _ = self.entered.lock().unwrap().send(());
        let _ = self.release.lock().unwrap().recv();
        let mut out = self.inner.embed(&[query.to_string()])?;
        Ok(out.remove(0))
    }
}

pub fn indexer(embedder: impl Embedder + 'static) -> EmbeddingIndexer {
    EmbeddingIndexer::new(
        Arc::new(embedder),
        2,
        4,
        RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
        },
    )
    .unwrap()
}

pub fn open_store(data: &Path, backend: BackendKind) -> IndexStore {
    let dir = DataDir::resolve(Some(data)).unwrap();
    IndexStore::open(&dir, backend).unwrap()
}

pub fn write(root: &Path, rel: &str, text: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, text).unwrap();
}

/// `n_words` words of filler prose in 12-word sentences, starting with
/// `keywords`.
pub fn prose(n_words: usize, keywords: &[&str]) -> String {
    let mut words: Vec<String> = keywords.iter().map(|k| k.to_string()).collect();
    let mut i = 0;
    while words.len() < n_words {
        words.push(FILLER[i % FILLER.len()].to_string());
        i += 1;
    }
    words
        .chunks(12)
        .map(|sentence| {
            let mut s = sentence.join(" ");
            if let Some(first) = s.get_mut(..1) {
                first.make_ascii_uppercase();
            }
            s.push('.');
            s
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn paragraphs(parts: &[String]) -> String {
    let mut doc = parts.join("\n\n");
    doc.push('\n');
    doc
}

pub fn build(store: &IndexStore, indexer: &EmbeddingIndexer, corpus: &Path) -> IngestReport {
    ingestion::build(
        store,
        indexer,
        corpus,
        &IngestOptions::default(),
        false,
        &mut |_: usize, _: usize| {},
    )
    .unwrap()
}

pub fn update(store: &IndexStore, indexer: &EmbeddingIndexer, corpus: &Path) -> IngestReport {
    ingestion::update(
        store,
        indexer,
        corpus,
        &IngestOptions::default(),
        &mut |_: usize, _: usize| {},
    )
    .unwrap()
}

pub fn retrieve(
    store: &IndexStore,
    indexer: &EmbeddingIndexer,
    request: RetrieveRequest,
) -> RetrievalResponse {
    search::retrieve(store, indexer, &request).unwrap()
}

pub fn doc_id_named(store: &IndexStore, name: &str) -> String {
    store
        .index_db()
        .documents()
        .unwrap()
        .into_iter()
        .find(|d| d.name == name)
        .map(|d| d.doc_id)
        .unwrap_or_else(|| panic!("no document named {name}"))
}

pub fn backends() -> Vec<BackendKind> {
    let mut out = vec![BackendKind::Flat];
    if cfg!(feature = "ann") {
        out.push(BackendKind::Hnsw);
    }
    out
}
