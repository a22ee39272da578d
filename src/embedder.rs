//! Embedding providers.
//!
//! Embedding is an external call that turns text into a fixed-length vector.
//! [`HttpEmbedder`] talks to an OpenAI-compatible `/embeddings` endpoint;
//! [`HashingEmbedder`] is a deterministic, offline feature-hashing embedder
//! for tests and air-gapped use.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{EmbeddingError, Error, Result};

pub const DEFAULT_EMBED_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";
pub const DEFAULT_HASHING_DIMENSION: usize = 384;
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(250);

/// Something that turns text into vectors.
///
/// Implementations are called from a worker pool, so they must be
/// thread-safe. Returned vectors need not be normalized.
pub trait Embedder: Send + Sync {
    /// Human-readable identity, e.g. `http:nomic-embed-text`.
    fn describe(&self) -> String;

    /// Embed a batch of inputs, one vector per input, in order.
    fn embed(&self, inputs: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embed a search query within an optional time budget.
    fn embed_query(
        &self,
        query: &str,
        timeout: Option<Duration>,
    ) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let _ = timeout;
        let mut out = self.embed(&[query.to_string()])?;
        out.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            got: 0,
        })
    }
}

/// Which provider to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderKind {
    #[default]
    Http,
    Hashing,
}

impl std::str::FromStr for EmbedderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "http" => Ok(Self::Http),
            "hashing" => Ok(Self::Hashing),
            other => Err(Error::Config(format!(
                "unknown embedder {other:?} (expected \"http\" or \"hashing\")"
            ))),
        }
    }
}

impl std::fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Http => "http",
            Self::Hashing => "hashing",
        })
    }
}

/// Settings needed to construct an embedder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedderConfig {
    pub kind: EmbedderKind,
    pub url: String,
    pub model: String,
    pub api_key: Option<String>,
    /// Output dimension of the hashing embedder.
    pub dimension: usize,
    pub request_timeout: Duration,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            kind: EmbedderKind::default(),
            url: DEFAULT_EMBED_URL.to_string(),
            model: DEFAULT_EMBED_MODEL.to_string(),
            api_key: None,
            dimension: DEFAULT_HASHING_DIMENSION,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl EmbedderConfig {
    pub fn build(&self) -> Result<Arc<dyn Embedder>> {
        match self.kind {
            EmbedderKind::Http => Ok(Arc::new(HttpEmbedder::new(
                &self.url,
                &self.model,
                self.api_key.clone(),
                self.request_timeout,
            )?)),
            EmbedderKind::Hashing => Ok(Arc::new(HashingEmbedder::new(self.dimension))),
        }
    }
}

/// Client for an OpenAI-compatible embeddings endpoint.
pub struct HttpEmbedder {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(
        base_url: &str,
        model: &str,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
            request_timeout,
        })
    }

    fn request(
        &self,
        inputs: &[String],
        timeout: Duration,
    ) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = EmbeddingRequest {
            input: inputs,
            model: &self.model,
        };
        let mut request = self.client.post(&self.endpoint).timeout(timeout).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(map_reqwest)?;
        let status = response.status();
        let text = response.text().map_err(map_reqwest)?;

        if !status.is_success() {
            let message = format!("status {status}: {}", truncate(&text, 200));
            // Rate limits and server errors are worth another try.
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(EmbeddingError::Http(message))
            } else {
                Err(EmbeddingError::Rejected(message))
            };
        }

        let mut parsed: EmbeddingResponse = serde_json::from_str(&text)
            .map_err(|e| EmbeddingError::Rejected(format!("malformed response: {e}")))?;
        if parsed.data.len() != inputs.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: inputs.len(),
                got: parsed.data.len(),
            });
        }
        parsed.data.sort_by_key(|d| d.index.unwrap_or(usize::MAX));
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

impl Embedder for HttpEmbedder {
    fn describe(&self) -> String {
        format!("http:{}", self.model)
    }

    fn embed(&self, inputs: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        debug!(count = inputs.len(), endpoint = %self.endpoint, "embedding batch");
        self.request(inputs, self.request_timeout)
    }

    fn embed_query(
        &self,
        query: &str,
        timeout: Option<Duration>,
    ) -> std::result::Result<Vec<f32>, EmbeddingError> {
        let budget = timeout.map_or(self.request_timeout, |t| t.min(self.request_timeout));
        if budget.is_zero() {
            return Err(EmbeddingError::Timeout);
        }
        let mut out = self.request(&[query.to_string()], budget)?;
        out.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            got: 0,
        })
    }
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

fn map_reqwest(e: reqwest::Error) -> EmbeddingError {
    if e.is_timeout() {
        EmbeddingError::Timeout
    } else {
        EmbeddingError::Http(e.to_string())
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Deterministic feature-hashing embedder.
///
/// Lowercased word unigrams and bigrams are hashed into signed buckets.
/// Texts sharing vocabulary land close together, which is enough for
/// offline use and for exercising the retrieval pipeline in tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        for word in &words {
            self.add_feature(&mut v, word.as_bytes(), 1.0);
        }
        for pair in words.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.add_feature(&mut v, bigram.as_bytes(), 0.5);
        }

        if v.iter().all(|x| *x == 0.0) {
            v[0] = 1.0;
        }
        v
    }

    fn add_feature(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let hash = blake3::hash(feature);
        let bytes = hash.as_bytes();
        let bucket = u64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]);
        let idx = (bucket % self.dimension as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        v[idx] += sign * weight;
    }
}

impl Embedder for HashingEmbedder {
    fn describe(&self) -> String {
        format!("hashing:{}", self.dimension)
    }

    fn embed(&self, inputs: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(inputs.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Retry schedule for embedding calls: exponential backoff from
/// `base_delay`, doubling after each failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }

    /// Run `f` until it succeeds, fails permanently, or runs out of
    /// attempts.
    pub fn run<T>(
        &self,
        mut f: impl FnMut() -> std::result::Result<T, EmbeddingError>,
    ) -> std::result::Result<T, EmbeddingError> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match f() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.delay(attempt);
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "embedding failed, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::vector::{dot, normalize};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        }
    }

    #[test]
    fn hashing_is_deterministic() {
        let e = HashingEmbedder::new(64);
        let a = e.embed(&["Hello world".to_string()]).unwrap();
        let b = e.embed(&["hello, WORLD".to_string()]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[test]
    fn hashing_shared_vocabulary_is_closer() {
        let e = HashingEmbedder::new(256);
        let mut v = e
            .embed(&[
                "quarterly revenue growth".to_string(),
                "revenue growth in the quarter".to_string(),
                "kernel scheduler latency".to_string(),
            ])
            .unwrap();
        for x in &mut v {
            normalize(x);
        }
        assert!(dot(&v[0], &v[1]) > dot(&v[0], &v[2]));
    }

    #[test]
    fn hashing_never_returns_zero() {
        let e = HashingEmbedder::new(8);
        let v = e.embed_query("!!!", None).unwrap();
        assert!(v.iter().any(|x| *x != 0.0));
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay(0), Duration::from_millis(250));
        assert_eq!(p.delay(1), Duration::from_millis(500));
        assert_eq!(p.delay(2), Duration::from_millis(1000));
    }

    #[test]
    fn retries_transient_errors() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3).run(|| {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(EmbeddingError::Timeout)
            } else {
                Ok(7)
            }
        });
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: std::result::Result<(), _> = fast_policy(2).run(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EmbeddingError::Http("503".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: std::result::Result<(), _> = fast_policy(5).run(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EmbeddingError::Rejected("400".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unreachable_endpoint_is_transient() {
        let e = HttpEmbedder::new(
            "http://127.0.0.1:1",
            "m",
            None,
            Duration::from_millis(500),
        )
        .unwrap();
        let err = e.embed(&["x".to_string()]).unwrap_err();
        assert!(err.is_transient(), "{err:?}");
    }

    #[test]
    fn kind_parses() {
        assert_eq!("hashing".parse::<EmbedderKind>().unwrap(), EmbedderKind::Hashing);
        assert!("onnx".parse::<EmbedderKind>().is_err());
    }
}
