use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use tracing::{debug, info, warn};

use crate::commands::{self, Paths};

/// Configuration for the watch loop.
pub struct WatchConfig {
    /// Records file or directory of record shards to watch.
    pub records: PathBuf,
    pub paths: Paths,
    pub workers: usize,
    /// Debounce window for filesystem events.
    pub debounce: Duration,
    /// Whether to re-embed after rebuilding.
    pub embed: bool,
    pub source_root: Option<PathBuf>,
    /// Quiet period after the last rebuild before embedding (only when `embed` is true).
    pub embed_delay: Duration,
}

impl WatchConfig {
    pub fn new(records: PathBuf, paths: Paths) -> Self {
        Self {
            records,
            paths,
            workers: 1,
            debounce: Duration::from_secs(2),
            embed: false,
            source_root: None,
            embed_delay: Duration::from_secs(30),
        }
    }
}

/// What the watcher listens to for a given records path.
#[derive(Debug, Clone, PartialEq)]
enum Target {
    /// A single records file; its parent directory is watched.
    File(PathBuf),
    /// A directory of `*.json` shards, watched recursively.
    Dir(PathBuf),
}

impl Target {
    fn resolve(records: &Path) -> Result<Self> {
        let path = records
            .canonicalize()
            .with_context(|| format!("cannot resolve records path {}", records.display()))?;
        Ok(if path.is_dir() {
            Self::Dir(path)
        } else {
            Self::File(path)
        })
    }

    fn watch_root(&self) -> (&Path, notify::RecursiveMode) {
        match self {
            Self::File(file) => (
                file.parent().unwrap_or(Path::new("/")),
                notify::RecursiveMode::NonRecursive,
            ),
            Self::Dir(dir) => (dir, notify::RecursiveMode::Recursive),
        }
    }

    /// Whether a change at `path` can alter the loaded record set.
    ///
    /// For a directory: `*.json` files with no hidden path component below
    /// the root, so the graph written into `.repograph/` never retriggers.
    fn is_relevant(&self, path: &Path, graph_out: &Path) -> bool {
        if path == graph_out {
            return false;
        }
        match self {
            Self::File(file) => path == file,
            Self::Dir(dir) => {
                let Ok(relative) = path.strip_prefix(dir) else {
                    return false;
                };
                let hidden = relative
                    .components()
                    .any(|c| c.as_os_str().to_string_lossy().starts_with('.'));
                !hidden && path.extension().is_some_and(|ext| ext == "json")
            }
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

/// Run the watch loop in the foreground until Ctrl+C.
///
/// Used by `repograph watch`.
pub fn run_watch(config: WatchConfig) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(&shutdown);
    watch_loop(config, &shutdown)
}

/// Install a Ctrl+C handler that sets the shutdown flag.
fn install_ctrlc_handler(flag: &Arc<AtomicBool>) {
    let flag = Arc::clone(flag);
    let _ = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    });
}

fn rebuild(config: &WatchConfig, records: &str) -> bool {
    match commands::rebuild_graph(records, &config.paths.graph, config.workers) {
        Ok(r) => {
            info!(
                records = r.records_built,
                skipped = r.records_skipped,
                nodes = r.nodes,
                dangling = r.dangling_edges,
                "graph rebuilt"
            );
            true
        }
        Err(e) => {
            warn!(error = %format!("{e:#}"), "rebuild failed, keeping previous graph");
            false
        }
    }
}

fn embed(config: &WatchConfig, records: &str) {
    let source_root = config.source_root.as_deref().and_then(Path::to_str);
    match commands::embed_graph(&config.paths, Some(records), source_root, false) {
        Ok(s) => info!(
            embedded = s.result.symbols_embedded,
            skipped = s.result.symbols_skipped,
            up_to_date = s.up_to_date,
            "embedding complete"
        ),
        Err(e) => warn!(error = %format!("{e:#}"), "embedding failed"),
    }
}

/// Core watch loop. Runs until `shutdown` is set.
///
/// Every relevant change triggers a full rebuild from the complete record
/// set; there is no incremental update of the graph.
fn watch_loop(config: WatchConfig, shutdown: &AtomicBool) -> Result<()> {
    let target = Target::resolve(&config.records)?;
    let records = config.records.to_string_lossy().into_owned();
    let graph_out = absolute(Path::new(&config.paths.graph));

    info!(
        records = %config.records.display(),
        graph = %config.paths.graph,
        debounce_ms = config.debounce.as_millis(),
        embed = config.embed,
        embed_delay_s = config.embed_delay.as_secs(),
        "starting watch"
    );

    // Initial build so the graph matches the records before any change.
    let mut embed_pending = rebuild(&config, &records) && config.embed;
    let mut last_build: Option<Instant> = embed_pending.then(Instant::now);

    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer =
        new_debouncer(config.debounce, tx).context("failed to create file watcher")?;
    let (root, mode) = target.watch_root();
    debouncer
        .watcher()
        .watch(root, mode)
        .context("failed to start watching records")?;

    info!("watching for changes (Ctrl+C to stop)");

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        let poll_timeout = if embed_pending {
            Duration::from_millis(500)
        } else {
            Duration::from_secs(1)
        };

        match rx.recv_timeout(poll_timeout) {
            Ok(Ok(events)) => {
                let relevant = events.iter().any(|event| {
                    event.kind == DebouncedEventKind::Any
                        && target.is_relevant(&event.path, &graph_out)
                });
                if relevant {
                    debug!(count = events.len(), "record changes received, rebuilding");
                    if rebuild(&config, &records) && config.embed {
                        embed_pending = true;
                        last_build = Some(Instant::now());
                    }
                }
            }
            Ok(Err(error)) => {
                warn!(error = %error, "file watcher error");
            }
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                let settled = last_build.is_some_and(|t| t.elapsed() >= config.embed_delay);
                if embed_pending && settled {
                    info!("changes settled, embedding");
                    embed(&config, &records);
                    embed_pending = false;
                    last_build = None;
                }
            }
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                warn!("file watcher channel disconnected");
                break;
            }
        }
    }

    if embed_pending {
        info!("embedding pending graph before shutdown");
        embed(&config, &records);
    }

    info!("watch stopped");
    Ok(())
}
