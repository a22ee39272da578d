use std::path::{Path, PathBuf};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};

use crate::{
    embedder::{
        DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, EmbedderConfig, EmbedderKind, RetryPolicy,
    },
    embedding_index::{DEFAULT_BATCH_SIZE, DEFAULT_CONCURRENCY, EmbeddingIndexer},
    error::{Error, Result},
    vector::BackendKind,
};

const SETTINGS: TableDefinition<&str, &str> = TableDefinition::new("settings");

pub const EMBED_URL_ENV: &str = "DOCSIFT_EMBED_URL";
pub const EMBED_MODEL_ENV: &str = "DOCSIFT_EMBED_MODEL";
pub const EMBED_API_KEY_ENV: &str = "DOCSIFT_EMBED_API_KEY";
pub const EMBEDDER_ENV: &str = "DOCSIFT_EMBEDDER";

/// A persisted setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    CorpusRoot,
    Embedder,
    EmbedUrl,
    EmbedModel,
    EmbedDimension,
    EmbedBatchSize,
    EmbedConcurrency,
    EmbedMaxAttempts,
    VectorBackend,
}

impl Setting {
    pub const ALL: [Setting; 9] = [
        Setting::CorpusRoot,
        Setting::Embedder,
        Setting::EmbedUrl,
        Setting::EmbedModel,
        Setting::EmbedDimension,
        Setting::EmbedBatchSize,
        Setting::EmbedConcurrency,
        Setting::EmbedMaxAttempts,
        Setting::VectorBackend,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Setting::CorpusRoot => "corpus_root",
            Setting::Embedder => "embedder",
            Setting::EmbedUrl => "embed_url",
            Setting::EmbedModel => "embed_model",
            Setting::EmbedDimension => "embed_dimension",
            Setting::EmbedBatchSize => "embed_batch_size",
            Setting::EmbedConcurrency => "embed_concurrency",
            Setting::EmbedMaxAttempts => "embed_max_attempts",
            Setting::VectorBackend => "vector_backend",
        }
    }

    /// Reject values that would fail later, at resolution time.
    pub fn validate(self, value: &str) -> Result<()> {
        match self {
            Setting::CorpusRoot | Setting::EmbedUrl | Setting::EmbedModel => {
                if value.trim().is_empty() {
                    return Err(Error::Config(format!("{} cannot be empty", self.key())));
                }
            }
            Setting::Embedder => {
                value.parse::<EmbedderKind>()?;
            }
            Setting::VectorBackend => {
                value.parse::<BackendKind>()?;
            }
            Setting::EmbedDimension
            | Setting::EmbedBatchSize
            | Setting::EmbedConcurrency
            | Setting::EmbedMaxAttempts => {
                parse_count(self, value)?;
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for Setting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Setting::ALL
            .into_iter()
            .find(|k| k.key() == s)
            .ok_or_else(|| Error::NotFound {
                kind: "setting",
                name: s.to_string(),
            })
    }
}

fn parse_count(setting: Setting, value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Error::Config(format!(
            "{} must be a positive integer, got {value:?}",
            setting.key()
        ))),
    }
}

pub struct ConfigDb {
    db: Database,
}

impl ConfigDb {
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        let txn = db.begin_write()?;
        txn.open_table(SETTINGS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(SETTINGS)?;
            table.insert(key, value)?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        Ok(table.get(key)?.map(|v| v.value().to_string()))
    }

    pub fn remove_setting(&self, key: &str) -> Result<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(SETTINGS)?;
            table.remove(key)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    pub fn list_settings(&self) -> Result<Vec<(String, String)>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(SETTINGS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            result.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(result)
    }

    pub fn set(&self, setting: Setting, value: &str) -> Result<()> {
        setting.validate(value)?;
        self.set_setting(setting.key(), value.trim())
    }

    pub fn get(&self, setting: Setting) -> Result<Option<String>> {
        self.get_setting(setting.key())
    }
}

impl std::fmt::Debug for ConfigDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDb").finish_non_exhaustive()
    }
}

/// Values given on the command line. They win over everything else.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub corpus_root: Option<PathBuf>,
    pub embedder: Option<EmbedderKind>,
    pub embed_url: Option<String>,
    pub embed_model: Option<String>,
    pub vector_backend: Option<BackendKind>,
}

/// Effective configuration: command line, then environment, then the
/// settings table, then built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub corpus_root: Option<PathBuf>,
    pub embedder: EmbedderConfig,
    pub batch_size: usize,
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub vector_backend: BackendKind,
}

impl Settings {
    pub fn resolve(db: &ConfigDb, overrides: &Overrides) -> Result<Self> {
        Self::resolve_with(db, overrides, |name| std::env::var(name).ok())
    }

    /// [`Settings::resolve`] with an explicit environment lookup.
    pub fn resolve_with(
        db: &ConfigDb,
        overrides: &Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let env = |name: &str| env(name).filter(|v| !v.trim().is_empty());
        let count = |setting: Setting, default: usize| -> Result<usize> {
            db.get(setting)?
                .map_or(Ok(default), |v| parse_count(setting, &v))
        };

        let kind = match overrides.embedder {
            Some(kind) => kind,
            None => match env(EMBEDDER_ENV).or(db.get(Setting::Embedder)?) {
                Some(v) => v.parse()?,
                None => EmbedderKind::default(),
            },
        };

        let defaults = EmbedderConfig::default();
        let embedder = EmbedderConfig {
            kind,
            url: overrides
                .embed_url
                .clone()
                .or_else(|| env(EMBED_URL_ENV))
                .or(db.get(Setting::EmbedUrl)?)
                .unwrap_or(defaults.url),
            model: overrides
                .embed_model
                .clone()
                .or_else(|| env(EMBED_MODEL_ENV))
                .or(db.get(Setting::EmbedModel)?)
                .unwrap_or(defaults.model),
            api_key: env(EMBED_API_KEY_ENV),
            dimension: count(Setting::EmbedDimension, defaults.dimension)?,
            request_timeout: defaults.request_timeout,
        };

        let vector_backend = match overrides.vector_backend {
            Some(b) => b,
            None => match db.get(Setting::VectorBackend)? {
                Some(v) => v.parse()?,
                None => BackendKind::default(),
            },
        };

        Ok(Self {
            corpus_root: overrides
                .corpus_root
                .clone()
                .or(db.get(Setting::CorpusRoot)?.map(PathBuf::from)),
            embedder,
            batch_size: count(Setting::EmbedBatchSize, DEFAULT_BATCH_SIZE)?,
            concurrency: count(Setting::EmbedConcurrency, DEFAULT_CONCURRENCY)?,
            retry: RetryPolicy {
                max_attempts: count(Setting::EmbedMaxAttempts, DEFAULT_MAX_ATTEMPTS as usize)?
                    as u32,
                base_delay: DEFAULT_BASE_DELAY,
            },
            vector_backend,
        })
    }

    pub fn indexer(&self) -> Result<EmbeddingIndexer> {
        EmbeddingIndexer::new(
            self.embedder.build()?,
            self.concurrency,
            self.batch_size,
            self.retry,
        )
    }

    pub fn require_corpus_root(&self) -> Result<&Path> {
        self.corpus_root.as_deref().ok_or_else(|| {
            Error::Config(
                "no corpus root; pass --corpus or run `docsift config set corpus_root <dir>`"
                    .to_string(),
            )
        })
    }
}
