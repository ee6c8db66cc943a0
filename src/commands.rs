use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::info;

use repograph::graph::GraphStats;
use repograph::rag::embeddings::EmbeddingEngine;
use repograph::rag::indexer::{build_chunks, index_chunks, is_up_to_date, RagIndexResult};
use repograph::rag::setup::download_model;
use repograph::rag::store::{VectorStore, META_GRAPH_FINGERPRINT};
use repograph::records::load_records;
use repograph::retriever::check_index_freshness;
use repograph::{
    BuildReport, GraphNode, HybridRetriever, RetrievalConfig, SymbolGraph, SymbolGraphBuilder,
    SymbolRecord,
};

/// Where the graph document and the vector store live.
#[derive(Debug, Clone)]
pub struct Paths {
    pub graph: String,
    pub store: String,
}

pub type Retriever = HybridRetriever<EmbeddingEngine, VectorStore>;

pub fn load_graph(path: &str) -> Result<SymbolGraph> {
    SymbolGraph::load(path)
        .with_context(|| format!("Failed to load graph {path}. Run 'repograph build' first."))
}

fn open_store(path: &str) -> Result<VectorStore> {
    VectorStore::open(path).with_context(|| format!("Failed to open vector store {path}"))
}

/// Records that passed validation. Rejected ones were already logged.
fn load_valid_records(path: &str) -> Result<Vec<SymbolRecord>> {
    let records = load_records(path).with_context(|| format!("Failed to load records {path}"))?;
    Ok(records.into_iter().filter_map(Result::ok).collect())
}

/// Print `data` as pretty JSON if `json` is true, otherwise call `human_fmt`.
fn output<T: Serialize>(data: &T, json: bool, human_fmt: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(data)?);
    } else {
        human_fmt(data);
    }
    Ok(())
}

/// Load records, build the graph and write it. Shared with the watch loop.
pub fn rebuild_graph(records: &str, graph_path: &str, workers: usize) -> Result<BuildReport> {
    let loaded = load_records(records).with_context(|| format!("Failed to load records {records}"))?;
    let builder = SymbolGraphBuilder::new();
    let outcome = if workers > 1 {
        builder.build_sharded(loaded, workers)
    } else {
        builder.build_checked(loaded)
    };
    outcome
        .graph
        .save(graph_path)
        .with_context(|| format!("Failed to write graph {graph_path}"))?;
    Ok(outcome.report)
}

/// Build the symbol graph from parser records.
pub fn cmd_build(records: &str, output_path: &str, workers: usize, json: bool) -> Result<()> {
    let report = rebuild_graph(records, output_path, workers)?;

    output(&report, json, |r| {
        println!(
            "Built graph from {} records ({} skipped) -> {output_path}",
            r.records_built, r.records_skipped
        );
        println!(
            "  {} nodes, {} contains, {} imports, {} inherits edges",
            r.nodes, r.contains_edges, r.imports_edges, r.inherits_edges
        );
        if r.id_collisions > 0 || r.dangling_edges > 0 {
            println!(
                "  {} id collisions, {} dangling edges",
                r.id_collisions, r.dangling_edges
            );
        }
        for (reason, count) in &r.skip_reasons {
            println!("  skipped {count}: {reason}");
        }
    })
}

#[derive(Debug, Serialize)]
pub struct EmbedSummary {
    #[serde(flatten)]
    pub result: RagIndexResult,
    /// The store already matched the graph and its symbol text; nothing was embedded.
    pub up_to_date: bool,
}

/// Embed the current graph into the store. Shared with the watch loop.
pub fn embed_graph(
    paths: &Paths,
    records: Option<&str>,
    source_root: Option<&str>,
    force: bool,
) -> Result<EmbedSummary> {
    let graph = load_graph(&paths.graph)?;
    let store = open_store(&paths.store)?;

    let records = match records {
        Some(path) => load_valid_records(path)?,
        None => Vec::new(),
    };
    let (chunks, too_short) = build_chunks(&graph, &records, source_root.map(Path::new));

    // Docstrings, spans and code are not in the graph, so compare the chunks too.
    if !force && is_up_to_date(&graph, &chunks, &store)? {
        info!("vector store already matches the graph and its symbol text");
        return Ok(EmbedSummary {
            result: RagIndexResult::default(),
            up_to_date: true,
        });
    }

    info!("Loading embedding model...");
    let engine = EmbeddingEngine::new()
        .context("Failed to load embedding model. Run 'repograph setup' to download it.")?;

    let result = index_chunks(&graph, &chunks, too_short, &engine, &store)
        .context("Failed to write embeddings")?;
    Ok(EmbedSummary {
        result,
        up_to_date: false,
    })
}

pub fn cmd_embed(
    paths: &Paths,
    records: Option<&str>,
    source_root: Option<&str>,
    force: bool,
    json: bool,
) -> Result<()> {
    let summary = embed_graph(paths, records, source_root, force)?;

    output(&summary, json, |s| {
        if s.up_to_date {
            println!("Vector store is up to date (use --force to re-embed)");
            return;
        }
        println!(
            "Embedded {} of {} symbols ({} skipped)",
            s.result.symbols_embedded, s.result.total_symbols, s.result.symbols_skipped
        );
    })
}

/// Open the store and the model around a loaded graph, ready to query.
pub fn open_retriever(
    graph: Arc<SymbolGraph>,
    store_path: &str,
    config: RetrievalConfig,
) -> Result<Retriever> {
    let store = open_store(store_path)?;
    if store.count()? == 0 {
        bail!("Vector store is empty. Run 'repograph embed' first.");
    }
    check_index_freshness(
        &graph,
        store.get_metadata(META_GRAPH_FINGERPRINT)?.as_deref(),
    );

    let engine = EmbeddingEngine::new()
        .context("Failed to load embedding model. Run 'repograph setup' to download it.")?;
    Ok(HybridRetriever::new(graph, engine, store, config)?)
}

/// Hybrid search over the graph and the vector store.
pub fn cmd_query(
    paths: &Paths,
    text: &str,
    top_k: usize,
    config: RetrievalConfig,
    json: bool,
) -> Result<()> {
    let graph = Arc::new(load_graph(&paths.graph)?);
    let retriever = open_retriever(graph, &paths.store, config)?;
    let hits = retriever.query(text, top_k)?;

    output(&hits, json, |hits| {
        if hits.is_empty() {
            println!("No results for '{text}'");
            return;
        }
        for hit in hits {
            let kind = hit.kind.map(|k| k.as_str()).unwrap_or("?");
            let file = hit.file.as_deref().unwrap_or("");
            print!(
                "{score:.3}  {prov:<6}  {kind:<8}  {id}  {file}",
                score = hit.score,
                prov = hit.provenance.as_str(),
                id = hit.id,
            );
            if let Some(span) = hit.location {
                print!(":{}-{}", span.start_line, span.end_line);
            }
            match &hit.via {
                Some(via) => println!("  (via {via})"),
                None => println!(),
            }
            if let Some(text) = &hit.text {
                for line in text.lines() {
                    println!("    {line}");
                }
            }
        }
    })
}

/// Neighbour nodes of an id, with their kind and file when known.
pub fn neighbor_nodes<'g>(graph: &'g SymbolGraph, id: &str) -> Vec<NeighborEntry<'g>> {
    graph
        .neighbors(id)
        .iter()
        .map(|n| NeighborEntry {
            id: n,
            node: graph.node(n),
        })
        .collect()
}

#[derive(Debug, Serialize)]
pub struct NeighborEntry<'g> {
    pub id: &'g str,
    /// `None` for dangling endpoints such as unresolved base classes.
    pub node: Option<&'g GraphNode>,
}

pub fn cmd_neighbors(paths: &Paths, id: &str, json: bool) -> Result<()> {
    let graph = load_graph(&paths.graph)?;
    if !graph.contains(id) {
        bail!("No node '{id}' in {}", paths.graph);
    }
    let entries = neighbor_nodes(&graph, id);

    output(&entries, json, |entries| {
        if entries.is_empty() {
            println!("'{id}' has no neighbours");
            return;
        }
        for e in entries {
            match e.node {
                Some(node) => println!("{:<8}  {}  {}", node.kind.as_str(), e.id, node.file),
                None => println!("{:<8}  {}", "?", e.id),
            }
        }
    })
}

#[derive(Debug, Serialize)]
pub struct StatsOutput {
    pub graph: GraphStats,
    /// Stored vectors; `None` when no store exists yet.
    pub vectors: Option<u32>,
    /// Whether the store was embedded from this graph.
    pub index_fresh: Option<bool>,
}

/// Graph statistics plus the state of the store, without creating one.
pub fn collect_stats(graph: &SymbolGraph, store_path: &str) -> Result<StatsOutput> {
    let (vectors, index_fresh) = if Path::new(store_path).exists() {
        let store = open_store(store_path)?;
        let stored = store.get_metadata(META_GRAPH_FINGERPRINT)?;
        (
            Some(store.count()?),
            Some(stored.as_deref() == Some(graph.fingerprint().as_str())),
        )
    } else {
        (None, None)
    };
    Ok(StatsOutput {
        graph: graph.stats(),
        vectors,
        index_fresh,
    })
}

pub fn cmd_stats(paths: &Paths, json: bool) -> Result<()> {
    let graph = load_graph(&paths.graph)?;
    let stats = collect_stats(&graph, &paths.store)?;

    output(&stats, json, |stats| {
        let g = &stats.graph;
        println!("Nodes:    {}", g.num_nodes);
        println!("Edges:    {} ({} dangling)", g.num_edges, g.num_dangling);
        if !g.node_kinds.is_empty() {
            println!("Nodes by kind:");
            for (kind, count) in &g.node_kinds {
                println!("  {kind}: {count}");
            }
        }
        if !g.edge_kinds.is_empty() {
            println!("Edges by kind:");
            for (kind, count) in &g.edge_kinds {
                println!("  {kind}: {count}");
            }
        }
        match (stats.vectors, stats.index_fresh) {
            (Some(n), Some(true)) => println!("Vectors:  {n}"),
            (Some(n), _) => println!("Vectors:  {n} (stale, re-run 'repograph embed')"),
            (None, _) => println!("Vectors:  none (run 'repograph embed')"),
        }
    })
}

pub fn cmd_setup(json: bool) -> Result<()> {
    let result = download_model()?;

    output(&result, json, |r| {
        println!("Model {} ({} dims) ready in {}", r.model, r.dimension, r.model_dir);
    })
}
