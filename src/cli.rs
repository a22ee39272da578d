use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

use crate::{
    config_db::Overrides,
    embedder::EmbedderKind,
    router::Filters,
    search::{DEFAULT_TOP_K, Mode, RetrieveRequest},
    vector::BackendKind,
};

#[derive(Debug, Parser)]
#[command(
    name = "docsift",
    about = "Hybrid semantic and lexical search over converted documents and videos"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Root of the converted corpus (overrides the stored corpus_root)
    #[arg(long, global = true)]
    pub corpus: Option<PathBuf>,

    /// Embedding provider: http or hashing
    #[arg(long, global = true)]
    pub embedder: Option<EmbedderKind>,

    /// Vector backend: flat or hnsw
    #[arg(long, global = true)]
    pub backend: Option<BackendKind>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            corpus_root: self.corpus.clone(),
            embedder: self.embedder,
            embed_url: None,
            embed_model: None,
            vector_backend: self.backend,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chunk the whole corpus and index everything not yet indexed
    Build(BuildArgs),
    /// Index new and changed documents, drop removed ones, resume
    Update,
    /// Search the index
    Search(SearchArgs),
    /// Show index statistics and consistency
    Stats(StatsArgs),
    /// Fix chunks missing from one of the indexes
    Repair,
    /// Drop the derived index and regenerate it from the chunk log
    RebuildIndex,
    /// Manage persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

#[derive(Debug, Parser)]
pub struct BuildArgs {
    /// Drop the derived index before building
    #[arg(long)]
    pub clean: bool,
}

// -- Search --

#[derive(Debug, Parser)]
pub struct SearchArgs {
    /// The search query
    pub query: String,

    /// Number of results to return
    #[arg(short = 'n', long, default_value_t = DEFAULT_TOP_K)]
    pub count: usize,

    /// Only documents of this file type (e.g. pdf, mp4)
    #[arg(long)]
    pub file_type: Option<String>,

    /// Only documents whose name contains this text
    #[arg(long)]
    pub doc_name: Option<String>,

    /// Only these document IDs (repeatable)
    #[arg(long = "doc-id")]
    pub doc_ids: Vec<String>,

    /// Wider candidate pools, no per-document cap
    #[arg(long)]
    pub exhaustive: bool,

    /// Give up after this many milliseconds
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Output results as JSON
    #[arg(long)]
    pub json: bool,
}

impl SearchArgs {
    pub fn request(&self) -> RetrieveRequest {
        RetrieveRequest {
            query: self.query.clone(),
            filters: Filters {
                file_type: self.file_type.clone(),
                doc_name: self.doc_name.clone(),
                doc_ids: (!self.doc_ids.is_empty()).then(|| self.doc_ids.clone()),
            },
            top_k: self.count,
            mode: if self.exhaustive {
                Mode::Exhaustive
            } else {
                Mode::Normal
            },
            timeout: self.timeout_ms.map(std::time::Duration::from_millis),
        }
    }
}

// -- Stats --

#[derive(Debug, Parser)]
pub struct StatsArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Config --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting in config.redb
    Set {
        /// Setting key (e.g. corpus_root, embed_url)
        key: String,
        value: String,
    },
    /// Clear a stored setting (revert to default)
    Unset { key: String },
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(self.shell, &mut cmd, "docsift", &mut std::io::stdout());
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_search_defaults() {
        let cli = Cli::parse_from(["docsift", "search", "hello"]);
        match cli.command {
            Command::Search(args) => {
                let req = args.request();
                assert_eq!(req.query, "hello");
                assert_eq!(req.top_k, 10);
                assert_eq!(req.mode, Mode::Normal);
                assert!(req.filters.is_empty());
                assert_eq!(req.timeout, None);
                assert!(!args.json);
            }
            _ => panic!("expected search command"),
        }
    }

    #[test]
    fn parse_search_filters() {
        let cli = Cli::parse_from([
            "docsift",
            "search",
            "budget",
            "--file-type",
            "pdf",
            "--doc-id",
            "a",
            "--doc-id",
            "b",
            "--exhaustive",
            "--timeout-ms",
            "500",
            "-n",
            "3",
        ]);
        let Command::Search(args) = cli.command else {
            panic!("expected search command");
        };
        let req = args.request();
        assert_eq!(req.filters.file_type.as_deref(), Some("pdf"));
        assert_eq!(req.filters.doc_ids, Some(vec!["a".into(), "b".into()]));
        assert_eq!(req.mode, Mode::Exhaustive);
        assert_eq!(req.timeout, Some(std::time::Duration::from_millis(500)));
        assert_eq!(req.top_k, 3);
    }

    #[test]
    fn parse_global_overrides() {
        let cli = Cli::parse_from([
            "docsift",
            "--corpus",
            "/corpus",
            "--embedder",
            "hashing",
            "--backend",
            "flat",
            "build",
            "--clean",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.corpus_root, Some(PathBuf::from("/corpus")));
        assert_eq!(overrides.embedder, Some(EmbedderKind::Hashing));
        assert_eq!(overrides.vector_backend, Some(BackendKind::Flat));
        assert!(matches!(cli.command, Command::Build(BuildArgs { clean: true })));
    }

    #[test]
    fn rebuild_index_is_kebab_case() {
        let cli = Cli::parse_from(["docsift", "rebuild-index"]);
        assert!(matches!(cli.command, Command::RebuildIndex));
    }
}
