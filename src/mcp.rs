use std::{sync::Arc, time::Duration};

use rmcp::{
    ServerHandler,
    ServiceExt,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult,
        Content,
        Implementation,
        ServerCapabilities,
        ServerInfo,
    },
    tool,
    tool_handler,
    tool_router,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    config_db::Settings,
    data_dir::DataDir,
    embedding_index::EmbeddingIndexer,
    error,
    format,
    router::Filters,
    search::{self, DEFAULT_TOP_K, Mode, RetrieveRequest},
    store::IndexStore,
};

/// Upper bound on a single tool call.
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

struct DocsiftState {
    store: IndexStore,
    indexer: EmbeddingIndexer,
}

#[derive(Clone)]
pub struct DocsiftMcpServer {
    state: Arc<DocsiftState>,
    tool_router: ToolRouter<Self>,
}

impl DocsiftMcpServer {
    fn new(state: DocsiftState) -> Self {
        Self {
            state: Arc::new(state),
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router(router = tool_router)]
impl DocsiftMcpServer {
    /// Hybrid retrieval over the indexed corpus.
    #[tool(
        name = "docsift_retrieve",
        description = "Search converted documents, transcripts and video frames. Returns cited fragments; video hits come with the surrounding audio and screen timeline. Use fileType, docName or docIds to restrict the search, exhaustive for checklist-style questions."
    )]
    pub async fn docsift_retrieve(
        &self,
        params: Parameters<RetrieveParams>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        let request = params.0.into_request();
        let state = Arc::clone(&self.state);

        let response = tokio::task::spawn_blocking(move || {
            search::retrieve(&state.store, &state.indexer, &request)
        })
        .await
        .map_err(|e| mcp_error("retrieval task failed", e))?
        .map_err(|e| mcp_error("retrieval failed", e))?;

        let text = format::render_text(&response);
        let structured = serde_json::to_value(&response)
            .map_err(|e| mcp_error("failed to serialize retrieval results", e))?;

        let mut result = CallToolResult::success(vec![Content::text(text)]);
        result.structured_content = Some(structured);
        Ok(result)
    }

    /// Index size and consistency.
    #[tool(
        name = "docsift_stats",
        description = "Report how many documents, chunks, vectors and lexical rows are indexed, and whether the indexes agree."
    )]
    pub async fn docsift_stats(&self) -> Result<CallToolResult, rmcp::ErrorData> {
        let state = Arc::clone(&self.state);
        let stats = tokio::task::spawn_blocking(move || state.store.stats())
            .await
            .map_err(|e| mcp_error("stats task failed", e))?
            .map_err(|e| mcp_error("stats failed", e))?;

        let summary = format!(
            "{} documents, {} chunks, {} vectors, {} lexical rows ({})",
            stats.documents,
            stats.chunks,
            stats.vectors,
            stats.lexical_rows,
            if stats.consistency.is_consistent() {
                "consistent"
            } else {
                "needs repair"
            }
        );
        let structured = serde_json::to_value(&stats)
            .map_err(|e| mcp_error("failed to serialize stats", e))?;

        let mut result = CallToolResult::success(vec![Content::text(summary)]);
        result.structured_content = Some(structured);
        Ok(result)
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for DocsiftMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build())
            .with_server_info(
                Implementation::new("docsift", env!("CARGO_PKG_VERSION"))
                    .with_title("docsift MCP"),
            )
            .with_instructions(
                "Use docsift_retrieve to find evidence in the user's documents \
                 and recordings. Cite the document name and locator of every \
                 fragment you use.",
            )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveParams {
    /// Natural-language query.
    pub query: String,
    /// Maximum number of fragments (default: 10).
    pub limit: Option<usize>,
    /// Only documents of this file type, e.g. "pdf" or "mp4".
    pub file_type: Option<String>,
    /// Only documents whose name contains this text.
    pub doc_name: Option<String>,
    /// Only these document IDs. An empty list matches nothing.
    pub doc_ids: Option<Vec<String>>,
    /// Wider search with no per-document cap (default: false).
    pub exhaustive: Option<bool>,
    /// Time budget in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl RetrieveParams {
    fn into_request(self) -> RetrieveRequest {
        RetrieveRequest {
            query: self.query,
            filters: Filters {
                file_type: self.file_type,
                doc_name: self.doc_name,
                doc_ids: self.doc_ids,
            },
            top_k: self.limit.unwrap_or(DEFAULT_TOP_K),
            mode: if self.exhaustive.unwrap_or(false) {
                Mode::Exhaustive
            } else {
                Mode::Normal
            },
            timeout: Some(
                self.timeout_ms
                    .map_or(DEFAULT_TOOL_TIMEOUT, Duration::from_millis),
            ),
        }
    }
}

fn mcp_error(message: &str, error: impl std::fmt::Display) -> rmcp::ErrorData {
    rmcp::ErrorData::internal_error(
        message.to_string(),
        Some(json!({ "error": error.to_string() })),
    )
}

pub fn run_mcp(data_dir: &DataDir, settings: &Settings) -> error::Result<()> {
    let state = DocsiftState {
        store: IndexStore::open(data_dir, settings.vector_backend)?,
        indexer: settings.indexer()?,
    };
    let server = DocsiftMcpServer::new(state);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            error::Error::Config(format!("failed to start tokio runtime: {e}"))
        })?;

    runtime.block_on(async move {
        let transport = rmcp::transport::stdio();
        let running = server.serve(transport).await.map_err(|e| {
            error::Error::Config(format!(
                "MCP server initialization failed: {e}"
            ))
        })?;
        running.waiting().await.map_err(|e| {
            error::Error::Config(format!("MCP server error: {e}"))
        })?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        embedder::{HashingEmbedder, RetryPolicy},
        ingestion::{self, IngestOptions},
        vector::BackendKind,
    };

    fn server(corpus: &std::path::Path, data: &std::path::Path) -> DocsiftMcpServer {
        let dir = DataDir::resolve(Some(data)).unwrap();
        let store = IndexStore::open(&dir, BackendKind::Flat).unwrap();
        let indexer = EmbeddingIndexer::new(
            Arc::new(HashingEmbedder::new(64)),
            1,
            8,
            RetryPolicy::default(),
        )
        .unwrap();
        ingestion::build(
            &store,
            &indexer,
            corpus,
            &IngestOptions::default(),
            false,
            &mut |_: usize, _: usize| {},
        )
        .unwrap();
        DocsiftMcpServer::new(DocsiftState { store, indexer })
    }

    fn params(query: &str) -> RetrieveParams {
        RetrieveParams {
            query: query.to_string(),
            limit: Some(5),
            file_type: None,
            doc_name: None,
            doc_ids: None,
            exhaustive: None,
            timeout_ms: None,
        }
    }

    fn text_of(result: &CallToolResult) -> String {
        result
            .content
            .first()
            .and_then(|c| c.as_text())
            .map(|t| t.text.clone())
            .unwrap_or_default()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn retrieve_tool_returns_cited_fragments() {
        let corpus = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(
            corpus.path().join("rust.pdf.md"),
            "# Ownership\n\nOwnership keeps memory safe without a garbage collector.\n",
        )
        .unwrap();
        let server = server(corpus.path(), data.path());

        let result = server
            .docsift_retrieve(Parameters(params("ownership memory")))
            .await
            .unwrap();

        let structured = result.structured_content.clone().expect("structured");
        assert_eq!(structured["status"], "ok");
        let items = structured["items"].as_array().expect("items array");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["doc_name"], "rust.pdf");
        assert_eq!(items[0]["file_type"], "pdf");

        let text = text_of(&result);
        assert!(text.starts_with("[1] rust.pdf"));
        assert!(text.contains("> Ownership keeps memory safe"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn filters_can_empty_the_scope() {
        let corpus = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(corpus.path().join("notes.md"), "Plain notes about rockets.\n").unwrap();
        let server = server(corpus.path(), data.path());

        let mut p = params("rockets");
        p.file_type = Some("mp4".into());
        let result = server.docsift_retrieve(Parameters(p)).await.unwrap();

        let structured = result.structured_content.clone().expect("structured");
        assert_eq!(structured["status"], "no_results");
        assert!(text_of(&result).contains("No results for \"rockets\""));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stats_tool_reports_counts() {
        let corpus = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(corpus.path().join("notes.md"), "Plain notes about rockets.\n").unwrap();
        let server = server(corpus.path(), data.path());

        let result = server.docsift_stats().await.unwrap();
        let structured = result.structured_content.clone().expect("structured");
        assert_eq!(structured["documents"], 1);
        assert!(text_of(&result).contains("consistent"));
    }
}
