mod cli;
mod commands;
mod mcp;
mod watch;

use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Command};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let is_long_running = matches!(cli.command, Command::Serve | Command::Watch { .. });
    let default_level = if is_long_running { "info" } else { "warn" };

    // Tracing goes to stderr for all commands.
    // - CLI mode: only warnings (skipped records, stale index) show by default
    // - serve/watch: info-level lifecycle events, per-request detail with RUST_LOG=debug
    // Stdout stays clean for CLI output and MCP protocol.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let paths = commands::Paths {
        graph: cli.graph.clone(),
        store: cli.store.clone(),
    };

    match cli.command {
        Command::Build {
            records,
            output,
            workers,
        } => {
            let out = output.unwrap_or_else(|| paths.graph.clone());
            commands::cmd_build(&records, &out, workers, cli.json)
        }
        Command::Embed {
            records,
            source_root,
            force,
        } => commands::cmd_embed(
            &paths,
            records.as_deref(),
            source_root.as_deref(),
            force,
            cli.json,
        ),
        Command::Query {
            text,
            top_k,
            alpha,
            beta,
            max_neighbors,
            hydrate,
        } => {
            let config = repograph::RetrievalConfig::default()
                .with_weights(alpha, beta)
                .with_max_neighbors(max_neighbors)
                .with_hydration(hydrate);
            commands::cmd_query(&paths, &text, top_k, config, cli.json)
        }
        Command::Neighbors { id } => commands::cmd_neighbors(&paths, &id, cli.json),
        Command::Stats => commands::cmd_stats(&paths, cli.json),
        Command::Setup => commands::cmd_setup(cli.json),
        Command::Watch {
            records,
            workers,
            embed,
            source_root,
            embed_delay,
        } => {
            let mut config = watch::WatchConfig::new(records.into(), paths);
            config.workers = workers;
            config.embed = embed;
            config.source_root = source_root.map(Into::into);
            config.embed_delay = Duration::from_secs(embed_delay);
            watch::run_watch(config)
        }
        Command::Serve => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(mcp::run_server(paths))
        }
    }
}
