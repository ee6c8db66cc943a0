use std::future::Future;
use std::sync::{Arc, Mutex};

use rmcp::schemars;
use rmcp::{
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::*,
    tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError, ServerHandler, ServiceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use repograph::config::DEFAULT_TOP_K;
use repograph::{GraphNode, RetrievalConfig, RetrievalError, SymbolGraph};

use crate::commands::{self, Paths, Retriever};

const MAX_TOP_K: usize = 50;

// ── Parameter types ──

#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryParams {
    /// Natural-language description of the code you are looking for
    pub query: String,
    /// Maximum results to return (default 10, max 50)
    pub top_k: Option<usize>,
    /// Weight of vector similarity (default 0.7)
    pub alpha: Option<f64>,
    /// Weight of graph proximity (default 0.3)
    pub beta: Option<f64>,
    /// Expand at most this many graph neighbours per vector hit
    pub max_neighbors: Option<usize>,
    /// Include embedded text and line spans (default true)
    pub hydrate: Option<bool>,
}

impl QueryParams {
    fn top_k(&self) -> usize {
        self.top_k.unwrap_or(DEFAULT_TOP_K).min(MAX_TOP_K)
    }

    fn config(&self) -> RetrievalConfig {
        let defaults = RetrievalConfig::default();
        defaults
            .with_weights(
                self.alpha.unwrap_or(defaults.alpha),
                self.beta.unwrap_or(defaults.beta),
            )
            .with_max_neighbors(self.max_neighbors)
            .with_hydration(self.hydrate.unwrap_or(true))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NodeParams {
    /// Node id: a symbol id (e.g. "Session.send"), a file path or a module name
    pub id: String,
}

// ── Response wrappers ──

#[derive(Debug, Serialize)]
struct NodeEntry<'g> {
    node: &'g GraphNode,
    neighbors: usize,
}

fn mcp_err(msg: impl std::fmt::Display) -> McpError {
    McpError::internal_error(msg.to_string(), None)
}

fn retrieval_err(e: RetrievalError) -> McpError {
    match e {
        RetrievalError::EmptyQuery | RetrievalError::InvalidConfig(_) => {
            McpError::invalid_params(e.to_string(), None)
        }
        RetrievalError::BackendUnavailable { .. } => mcp_err(e),
    }
}

fn json_result<T: Serialize>(data: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| mcp_err(format!("serialization failed: {e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

fn unknown_node(id: &str) -> McpError {
    McpError::invalid_params(
        format!("no node '{id}' in the graph. Use repograph_query to discover symbol ids."),
        None,
    )
}

// ── MCP Server ──

#[derive(Clone)]
pub struct RepographServer {
    tool_router: ToolRouter<Self>,
    /// Graph loaded once at server start; read-only from then on.
    graph: Arc<SymbolGraph>,
    paths: Arc<Paths>,
    /// Opened on the first query; loading the model takes a while.
    retriever: Arc<Mutex<Option<Arc<Retriever>>>>,
}

impl RepographServer {
    fn retriever(&self) -> Result<Arc<Retriever>, McpError> {
        let mut slot = self
            .retriever
            .lock()
            .map_err(|_| mcp_err("retriever lock poisoned"))?;
        if let Some(r) = slot.as_ref() {
            return Ok(Arc::clone(r));
        }
        let opened = commands::open_retriever(
            Arc::clone(&self.graph),
            &self.paths.store,
            RetrievalConfig::default(),
        )
        .map_err(|e| mcp_err(format!("{e:#}")))?;
        let opened = Arc::new(opened);
        *slot = Some(Arc::clone(&opened));
        Ok(opened)
    }
}

#[tool_router]
impl RepographServer {
    pub fn new(paths: Paths) -> anyhow::Result<Self> {
        let graph = commands::load_graph(&paths.graph)?;
        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "graph loaded"
        );
        Ok(Self {
            tool_router: Self::tool_router(),
            graph: Arc::new(graph),
            paths: Arc::new(paths),
            retriever: Arc::new(Mutex::new(None)),
        })
    }

    /// Hybrid search: nearest symbols by embedding, plus their graph neighbours.
    #[tool(
        description = "Find code relevant to a natural-language query. Returns symbols ranked by a fused score of embedding similarity and graph proximity. Each hit has provenance 'vector' (direct semantic match) or 'graph' (a direct neighbour of a vector hit, named in 'via')."
    )]
    async fn repograph_query(
        &self,
        Parameters(params): Parameters<QueryParams>,
    ) -> Result<CallToolResult, McpError> {
        let server = self.clone();

        tokio::task::spawn_blocking(move || {
            let top_k = params.top_k();
            let config = params.config();
            debug!(query = %params.query, top_k, "query");

            let retriever = server.retriever()?;
            let hits = retriever
                .query_with(&params.query, top_k, &config)
                .map_err(retrieval_err)?;
            json_result(&hits)
        })
        .await
        .map_err(|e| mcp_err(format!("task join failed: {e}")))?
    }

    /// Direct neighbours of a node in either edge direction.
    #[tool(
        description = "List the direct neighbours of a node (symbol, file or module) across CONTAINS, IMPORTS and INHERITS edges, in either direction. Neighbours without a node (unresolved base classes) have node = null."
    )]
    async fn repograph_neighbors(
        &self,
        Parameters(params): Parameters<NodeParams>,
    ) -> Result<CallToolResult, McpError> {
        debug!(id = %params.id, "neighbors");
        if !self.graph.contains(&params.id) {
            return Err(unknown_node(&params.id));
        }
        json_result(&commands::neighbor_nodes(&self.graph, &params.id))
    }

    /// Look up a single node.
    #[tool(description = "Look up a node by id: its kind, declaring file and neighbour count.")]
    async fn repograph_node(
        &self,
        Parameters(params): Parameters<NodeParams>,
    ) -> Result<CallToolResult, McpError> {
        debug!(id = %params.id, "node");
        let node = self
            .graph
            .node(&params.id)
            .ok_or_else(|| unknown_node(&params.id))?;
        json_result(&NodeEntry {
            node,
            neighbors: self.graph.neighbors(&params.id).len(),
        })
    }

    /// Graph and vector store statistics.
    #[tool(
        description = "Graph statistics: node and edge counts by kind, dangling edges, stored vectors and whether they match the loaded graph."
    )]
    async fn repograph_stats(&self) -> Result<CallToolResult, McpError> {
        let server = self.clone();

        tokio::task::spawn_blocking(move || {
            debug!("stats");
            let stats = commands::collect_stats(&server.graph, &server.paths.store)
                .map_err(|e| mcp_err(format!("stats failed: {e:#}")))?;
            json_result(&stats)
        })
        .await
        .map_err(|e| mcp_err(format!("task join failed: {e}")))?
    }
}

#[tool_handler]
impl ServerHandler for RepographServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "repograph".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
            instructions: Some(
                "repograph answers questions about a codebase from a symbol graph \
                 (classes, methods, functions, files, modules; CONTAINS, IMPORTS, INHERITS \
                 edges) and an embedding index over the symbols.\n\n\
                 Workflow:\n\
                 1. Use repograph_query with a natural-language description to find candidate symbols.\n\
                 2. Use repograph_neighbors on a hit to see its container, members, imports and bases.\n\
                 3. Use repograph_node to check a specific id.\n\
                 4. If results look stale, check repograph_stats: index_fresh=false means \
                 `repograph embed` must be re-run."
                    .into(),
            ),
        }
    }
}

/// Start the MCP server over stdio.
pub async fn run_server(paths: Paths) -> anyhow::Result<()> {
    info!("starting repograph MCP server v{}", env!("CARGO_PKG_VERSION"));
    let server = RepographServer::new(paths)?;
    let service = server.serve(stdio()).await?;
    service.waiting().await?;
    info!("repograph MCP server stopped");
    Ok(())
}
