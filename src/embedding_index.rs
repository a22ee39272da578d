//! Turning chunks into normalized vectors.
//!
//! Batches are embedded on a dedicated, fixed-size rayon pool so the
//! provider never sees more than `concurrency` requests at once. A batch
//! that still fails after its retries is split into single-chunk requests,
//! so one bad chunk only fails itself.

use std::sync::Arc;

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::{
    chunk::Chunk,
    embedder::{Embedder, RetryPolicy},
    error::{EmbeddingError, Error, Result},
    vector::normalize,
};

pub const DEFAULT_BATCH_SIZE: usize = 16;
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Output of [`EmbeddingIndexer::embed_chunks`].
#[derive(Debug, Default)]
pub struct Embedded {
    /// Chunks with their L2-normalized vectors, in input order.
    pub vectors: Vec<(Chunk, Vec<f32>)>,
    /// Chunks that could not be embedded, for a targeted retry.
    pub failed: Vec<String>,
}

pub struct EmbeddingIndexer {
    embedder: Arc<dyn Embedder>,
    pool: rayon::ThreadPool,
    batch_size: usize,
    retry: RetryPolicy,
}

impl EmbeddingIndexer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        concurrency: usize,
        batch_size: usize,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(concurrency.max(1))
            .thread_name(|i| format!("docsift-embed-{i}"))
            .build()
            .map_err(|e| Error::Config(format!("cannot start embedding pool: {e}")))?;
        Ok(Self {
            embedder,
            pool,
            batch_size: batch_size.max(1),
            retry,
        })
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Embed `chunks`, returning normalized vectors and the ids that failed.
    ///
    /// When `dimension` is `None` the first successful vector fixes it;
    /// vectors of any other length are reported as failures.
    pub fn embed_chunks(&self, chunks: Vec<Chunk>, dimension: Option<usize>) -> Embedded {
        if chunks.is_empty() {
            return Embedded::default();
        }
        debug!(
            chunks = chunks.len(),
            batch_size = self.batch_size,
            embedder = %self.embedder.describe(),
            "embedding chunks"
        );

        let results: Vec<Vec<std::result::Result<Vec<f32>, EmbeddingError>>> =
            self.pool.install(|| {
                chunks
                    .par_chunks(self.batch_size)
                    .map(|batch| self.embed_batch(batch))
                    .collect()
            });

        let mut dimension = dimension;
        let mut out = Embedded::default();
        for (chunk, result) in chunks.into_iter().zip(results.into_iter().flatten()) {
            match result.and_then(|v| check_vector(v, &mut dimension)) {
                Ok(vector) => out.vectors.push((chunk, vector)),
                Err(e) => {
                    warn!(chunk_id = %chunk.chunk_id, doc = %chunk.source.name, error = %e, "chunk not embedded");
                    out.failed.push(chunk.chunk_id);
                }
            }
        }
        out
    }

    fn embed_batch(&self, batch: &[Chunk]) -> Vec<std::result::Result<Vec<f32>, EmbeddingError>> {
        let inputs: Vec<String> = batch.iter().map(Chunk::embedding_input).collect();
        match self.call(&inputs) {
            Ok(vectors) => vectors.into_iter().map(Ok).collect(),
            Err(e) if inputs.len() > 1 => {
                warn!(size = inputs.len(), error = %e, "batch failed, retrying chunks one by one");
                inputs
                    .into_iter()
                    .map(|input| {
                        let mut v = self.call(std::slice::from_ref(&input))?;
                        v.pop().ok_or(EmbeddingError::CountMismatch {
                            expected: 1,
                            got: 0,
                        })
                    })
                    .collect()
            }
            Err(e) => vec![Err(e)],
        }
    }

    fn call(&self, inputs: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        self.retry.run(|| {
            let vectors = self.embedder.embed(inputs)?;
            if vectors.len() != inputs.len() {
                return Err(EmbeddingError::CountMismatch {
                    expected: inputs.len(),
                    got: vectors.len(),
                });
            }
            Ok(vectors)
        })
    }

    /// Embed and normalize a query vector within the given time budget.
    pub fn embed_query(
        &self,
        query: &str,
        timeout: Option<std::time::Duration>,
        dimension: Option<usize>,
    ) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let mut dimension = dimension;
        let vector = self.embedder.embed_query(query, timeout)?;
        check_vector(vector, &mut dimension)
    }
}

impl std::fmt::Debug for EmbeddingIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingIndexer")
            .field("embedder", &self.embedder.describe())
            .field("threads", &self.pool.current_num_threads())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

fn check_vector(
    mut vector: Vec<f32>,
    dimension: &mut Option<usize>,
) -> std::result::Result<Vec<f32>, EmbeddingError> {
    match *dimension {
        Some(expected) if expected != vector.len() => {
            return Err(EmbeddingError::Dimension {
                expected,
                got: vector.len(),
            });
        }
        Some(_) => {}
        None => *dimension = Some(vector.len()),
    }
    if !normalize(&mut vector) {
        return Err(EmbeddingError::ZeroVector);
    }
    Ok(vector)
}
