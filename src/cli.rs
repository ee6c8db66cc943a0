use clap::{Parser, Subcommand};

use repograph::config::{DEFAULT_ALPHA, DEFAULT_BETA, DEFAULT_TOP_K, GRAPH_FILE, STORE_FILE};

#[derive(Debug, Parser)]
#[command(name = "repograph")]
#[command(about = "Build a symbol graph of your codebase. Query it by meaning and by structure.")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Graph document to read or write
    #[arg(long, global = true, default_value = GRAPH_FILE)]
    pub graph: String,

    /// Vector store database
    #[arg(long, global = true, default_value = STORE_FILE)]
    pub store: String,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build the symbol graph from parser records
    Build {
        /// JSON records file, or a directory of JSON shards
        records: String,

        /// Where to write the graph document (defaults to --graph)
        #[arg(short, long)]
        output: Option<String>,

        /// Build shards on this many threads
        #[arg(long, default_value = "1")]
        workers: usize,
    },

    /// Embed every symbol of the graph into the vector store
    Embed {
        /// Records the graph was built from (adds docstrings and line spans)
        #[arg(long)]
        records: Option<String>,

        /// Source checkout to read code bodies from
        #[arg(long)]
        source_root: Option<String>,

        /// Re-embed even when the store already matches the graph
        #[arg(long)]
        force: bool,
    },

    /// Hybrid search: vector similarity fused with graph neighbours
    Query {
        /// Natural-language query
        text: String,

        /// Maximum results to return
        #[arg(long, default_value_t = DEFAULT_TOP_K)]
        top_k: usize,

        /// Weight of the vector similarity
        #[arg(long, default_value_t = DEFAULT_ALPHA)]
        alpha: f64,

        /// Weight of the graph proximity
        #[arg(long, default_value_t = DEFAULT_BETA)]
        beta: f64,

        /// Expand at most this many neighbours per vector hit
        #[arg(long)]
        max_neighbors: Option<usize>,

        /// Include the embedded text and line span of each hit
        #[arg(long)]
        hydrate: bool,
    },

    /// Direct neighbours of a node, in either edge direction
    Neighbors {
        /// Node id (symbol id, file path or module name)
        id: String,
    },

    /// Graph and vector store statistics
    Stats,

    /// Download the embedding model
    Setup,

    /// Rebuild the graph whenever the records change
    Watch {
        /// JSON records file, or a directory of JSON shards
        records: String,

        /// Build shards on this many threads
        #[arg(long, default_value = "1")]
        workers: usize,

        /// Re-embed after each rebuild, once changes settle
        #[arg(long)]
        embed: bool,

        /// Source checkout to read code bodies from when embedding
        #[arg(long)]
        source_root: Option<String>,

        /// Seconds of quiet after a rebuild before embedding
        #[arg(long, default_value = "30")]
        embed_delay: u64,
    },

    /// Start MCP server over stdio
    Serve,
}
