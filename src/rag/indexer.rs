use std::collections::HashMap;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::store::{StoredVector, VectorStore, META_CONTENT_FINGERPRINT, META_GRAPH_FINGERPRINT};
use super::{Embedder, HitPayload};
use crate::error::StoreError;
use crate::graph::SymbolGraph;
use crate::types::{GraphNode, LineSpan, NodeKind, SymbolRecord};

/// Result of an embedding run.
#[derive(Debug, Default, Clone, PartialEq, serde::Serialize)]
pub struct RagIndexResult {
    pub symbols_embedded: u32,
    pub symbols_skipped: u32,
    pub total_symbols: u32,
}

/// Maximum number of texts sent to the embedder in one call.
const CHUNK_SIZE: usize = 256;

/// Code bodies shorter than this carry too little signal to embed.
pub const MIN_CODE_CHARS: usize = 30;

/// Embedding text and payload for one symbol node.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolChunk {
    pub id: String,
    pub payload: HitPayload,
}

/// Build the embedding text for a symbol.
///
/// Header line, then the docstring and the code body when present, separated
/// by blank lines.
pub fn chunk_text(
    kind: NodeKind,
    id: &str,
    file: &str,
    docstring: Option<&str>,
    code: Option<&str>,
) -> String {
    let mut parts = vec![format!("{} {id} defined in {file}", capitalized(kind))];
    if let Some(doc) = docstring.map(str::trim).filter(|d| !d.is_empty()) {
        parts.push(format!("Docstring:\n{doc}"));
    }
    if let Some(code) = code.filter(|c| !c.trim().is_empty()) {
        parts.push(format!("Code:\n{code}"));
    }
    parts.join("\n\n")
}

fn capitalized(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Function => "Function",
        NodeKind::Method => "Method",
        NodeKind::Class => "Class",
        NodeKind::File => "File",
        NodeKind::Module => "Module",
    }
}

/// Source lines per file, read lazily from a checkout.
struct SourceCache<'a> {
    root: &'a Path,
    files: HashMap<String, Option<Vec<String>>>,
}

impl<'a> SourceCache<'a> {
    fn new(root: &'a Path) -> Self {
        Self {
            root,
            files: HashMap::new(),
        }
    }

    /// Lines `start..=end` (1-based) of `file`, or `None` when the file is
    /// unreadable or the span is empty.
    fn span(&mut self, file: &str, start: u32, end: u32) -> Option<String> {
        if start == 0 || end < start {
            return None;
        }
        let root = self.root;
        let lines = self
            .files
            .entry(file.to_string())
            .or_insert_with(|| match std::fs::read_to_string(root.join(file)) {
                Ok(text) => Some(text.lines().map(str::to_string).collect()),
                Err(e) => {
                    warn!(file = %file, error = %e, "source file unreadable, embedding without code");
                    None
                }
            })
            .as_ref()?;

        let from = (start as usize - 1).min(lines.len());
        let to = (end as usize).min(lines.len());
        Some(lines[from..to].join("\n"))
    }
}

/// Chunks for every class, method and function node of the graph, in node
/// order. Returns the chunks and the number of symbols skipped for a too
/// short code body.
///
/// Docstrings and line spans come from the record the node was built from:
/// the first one with the node's id, file and kind. Records that lost an id
/// collision are never used. Code is only read when `source_root` is given.
pub fn build_chunks(
    graph: &SymbolGraph,
    records: &[SymbolRecord],
    source_root: Option<&Path>,
) -> (Vec<SymbolChunk>, u32) {
    let mut by_id: HashMap<&str, Vec<&SymbolRecord>> = HashMap::with_capacity(records.len());
    for rec in records {
        by_id.entry(rec.symbol_id.as_str()).or_default().push(rec);
    }
    let mut source = source_root.map(SourceCache::new);

    let mut chunks = Vec::new();
    let mut skipped = 0u32;
    for node in graph.nodes().iter().filter(|n| n.kind.is_symbol()) {
        let rec = by_id.get(node.id.as_str()).and_then(|recs| {
            recs.iter()
                .find(|r| r.file == node.file && NodeKind::from(r.kind) == node.kind)
                .copied()
        });
        let location = rec
            .filter(|r| r.start_line > 0)
            .map(|r| LineSpan {
                start_line: r.start_line,
                end_line: r.end_line.max(r.start_line),
            });

        let code = match (source.as_mut(), location) {
            (Some(cache), Some(span)) => cache.span(&node.file, span.start_line, span.end_line),
            _ => None,
        };
        if let Some(code) = &code {
            if code.trim().chars().count() < MIN_CODE_CHARS {
                debug!(id = %node.id, "code body too short, skipping");
                skipped += 1;
                continue;
            }
        }

        chunks.push(chunk(node, rec, location, code.as_deref()));
    }
    (chunks, skipped)
}

fn chunk(
    node: &GraphNode,
    rec: Option<&SymbolRecord>,
    location: Option<LineSpan>,
    code: Option<&str>,
) -> SymbolChunk {
    let docstring = rec.and_then(|r| r.docstring.as_deref());
    SymbolChunk {
        id: node.id.clone(),
        payload: HitPayload {
            kind: node.kind,
            file: node.file.clone(),
            location,
            text: chunk_text(node.kind, &node.id, &node.file, docstring, code),
        },
    }
}

/// SHA-256 over every chunk's id and payload (text, kind, file, span).
///
/// Covers what the graph fingerprint does not: docstrings, line spans and
/// code bodies all end up in the payload.
pub fn content_fingerprint(chunks: &[SymbolChunk]) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk.id.as_bytes());
        hasher.update([0]);
        // Serializing owned strings and enums cannot fail.
        hasher.update(serde_json::to_vec(&chunk.payload).unwrap_or_default());
        hasher.update([0]);
    }
    format!("{:x}", hasher.finalize())
}

/// Whether `store` already holds exactly these chunks for this graph.
pub fn is_up_to_date(
    graph: &SymbolGraph,
    chunks: &[SymbolChunk],
    store: &VectorStore,
) -> Result<bool, StoreError> {
    if store.count()? == 0 {
        return Ok(false);
    }
    let graph_matches =
        store.get_metadata(META_GRAPH_FINGERPRINT)?.as_deref() == Some(graph.fingerprint().as_str());
    let content_matches = store.get_metadata(META_CONTENT_FINGERPRINT)?.as_deref()
        == Some(content_fingerprint(chunks).as_str());
    Ok(graph_matches && content_matches)
}

/// Embed a batch of chunks, falling back to one text at a time when the
/// batch call fails so a single bad input only loses itself.
fn embed_chunks(
    embedder: &dyn Embedder,
    chunks: &[SymbolChunk],
    result: &mut RagIndexResult,
) -> Vec<StoredVector> {
    let texts: Vec<&str> = chunks.iter().map(|c| c.payload.text.as_str()).collect();
    let batch = match embedder.embed_batch(&texts) {
        Ok(vectors) if vectors.len() == chunks.len() => Some(vectors),
        Ok(vectors) => {
            warn!(
                expected = chunks.len(),
                got = vectors.len(),
                "batch embedding returned the wrong count, falling back to sequential"
            );
            None
        }
        Err(e) => {
            warn!(error = %e, "batch embedding failed, falling back to sequential");
            None
        }
    };

    let stored = |c: &SymbolChunk, vector: Vec<f32>| StoredVector {
        id: c.id.clone(),
        payload: c.payload.clone(),
        vector,
    };

    if let Some(vectors) = batch {
        result.symbols_embedded += chunks.len() as u32;
        return chunks.iter().zip(vectors).map(|(c, v)| stored(c, v)).collect();
    }

    let mut out = Vec::with_capacity(chunks.len());
    for c in chunks {
        match embedder.embed(&c.payload.text) {
            Ok(vector) => {
                result.symbols_embedded += 1;
                out.push(stored(c, vector));
            }
            Err(e) => {
                warn!(symbol = %c.id, error = %e, "embedding failed, skipping");
                result.symbols_skipped += 1;
            }
        }
    }
    out
}

/// Embed every symbol node of `graph` into `store`.
///
/// The store is cleared first; each run is a full rebuild. The graph
/// fingerprint is recorded so a later session can detect a stale index.
pub fn index_embeddings(
    graph: &SymbolGraph,
    records: &[SymbolRecord],
    source_root: Option<&Path>,
    embedder: &dyn Embedder,
    store: &VectorStore,
) -> Result<RagIndexResult, StoreError> {
    let (chunks, too_short) = build_chunks(graph, records, source_root);
    index_chunks(graph, &chunks, too_short, embedder, store)
}

/// [`index_embeddings`] over chunks already built with [`build_chunks`].
/// `too_short` is the skip count `build_chunks` returned with them.
pub fn index_chunks(
    graph: &SymbolGraph,
    chunks: &[SymbolChunk],
    too_short: u32,
    embedder: &dyn Embedder,
    store: &VectorStore,
) -> Result<RagIndexResult, StoreError> {
    let mut result = RagIndexResult {
        symbols_skipped: too_short,
        total_symbols: chunks.len() as u32 + too_short,
        ..Default::default()
    };

    store.clear()?;
    info!(symbols = chunks.len(), "embedding symbols");

    let total = chunks.len();
    let mut processed = 0usize;
    for batch in chunks.chunks(CHUNK_SIZE) {
        let vectors = embed_chunks(embedder, batch, &mut result);
        store.insert(&vectors)?;
        processed += batch.len();
        if processed % 1024 < CHUNK_SIZE {
            info!("  {processed}/{total} symbols embedded");
        }
    }

    store.set_metadata(META_GRAPH_FINGERPRINT, &graph.fingerprint())?;
    if result.symbols_embedded as usize == chunks.len() {
        store.set_metadata(META_CONTENT_FINGERPRINT, &content_fingerprint(chunks))?;
    } else {
        warn!("some symbols failed to embed; the next run will embed again");
    }
    info!(
        embedded = result.symbols_embedded,
        skipped = result.symbols_skipped,
        "embedding done"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::SymbolGraphBuilder;
    use crate::error::BackendError;
    use crate::types::SymbolKind;

    /// Embeds text length and vowel count; fails on texts containing "boom".
    struct LengthEmbedder;

    impl Embedder for LengthEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
            if text.contains("boom") {
                return Err("refusing to embed".into());
            }
            let vowels = text.chars().filter(|c| "aeiou".contains(*c)).count();
            Ok(vec![text.len() as f32, vowels as f32 + 1.0])
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, BackendError> {
            texts.iter().map(|t| self.embed(t)).collect()
        }
    }

    fn records() -> Vec<SymbolRecord> {
        vec![
            SymbolRecord::new("Session", SymbolKind::Class, "sessions.py", 1, 6)
                .with_docstring(Some("A requests session.".into())),
            SymbolRecord::new("Session.send", SymbolKind::Method, "sessions.py", 3, 5)
                .with_parent(Some("Session")),
            SymbolRecord::new("noop", SymbolKind::Function, "sessions.py", 8, 8),
        ]
    }

    const SOURCE: &str = "class Session:\n    \"\"\"A requests session.\"\"\"\n    def send(self, request):\n        adapter = self.get_adapter(request.url)\n        return adapter.send(request)\n\n\ndef noop(): pass\n";

    #[test]
    fn test_chunk_text_layout() {
        let text = chunk_text(
            NodeKind::Method,
            "Session.send",
            "sessions.py",
            Some("Send a request."),
            Some("def send(self): ..."),
        );
        assert_eq!(
            text,
            "Method Session.send defined in sessions.py\n\nDocstring:\nSend a request.\n\nCode:\ndef send(self): ..."
        );
    }

    #[test]
    fn test_chunk_text_header_only() {
        let text = chunk_text(NodeKind::Function, "get", "api.py", Some("  "), None);
        assert_eq!(text, "Function get defined in api.py");
    }

    #[test]
    fn test_build_chunks_without_source() {
        let graph = SymbolGraphBuilder::new().build(records()).graph;
        let (chunks, skipped) = build_chunks(&graph, &records(), None);

        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["Session", "Session.send", "noop"]);
        assert_eq!(skipped, 0);
        assert!(chunks[0].payload.text.contains("Docstring:\nA requests session."));
        assert!(!chunks[0].payload.text.contains("Code:"));
        assert_eq!(
            chunks[1].payload.location,
            Some(LineSpan {
                start_line: 3,
                end_line: 5
            })
        );
    }

    #[test]
    fn test_build_chunks_reads_code_and_skips_short_bodies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sessions.py"), SOURCE).unwrap();

        let graph = SymbolGraphBuilder::new().build(records()).graph;
        let (chunks, skipped) = build_chunks(&graph, &records(), Some(dir.path()));

        let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["Session", "Session.send"]);
        assert_eq!(skipped, 1);
        assert!(chunks[1]
            .payload
            .text
            .ends_with("Code:\n    def send(self, request):\n        adapter = self.get_adapter(request.url)\n        return adapter.send(request)"));
    }

    #[test]
    fn test_missing_source_file_still_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let graph = SymbolGraphBuilder::new().build(records()).graph;
        let (chunks, skipped) = build_chunks(&graph, &records(), Some(dir.path()));
        assert_eq!(chunks.len(), 3);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn test_index_embeddings_fills_store() {
        let graph = SymbolGraphBuilder::new().build(records()).graph;
        let store = VectorStore::open_memory().unwrap();

        let result = index_embeddings(&graph, &records(), None, &LengthEmbedder, &store).unwrap();
        assert_eq!(result.symbols_embedded, 3);
        assert_eq!(result.total_symbols, 3);
        assert_eq!(store.count().unwrap(), 3);
        assert_eq!(
            store.get_metadata(META_GRAPH_FINGERPRINT).unwrap(),
            Some(graph.fingerprint())
        );
        let (chunks, _) = build_chunks(&graph, &records(), None);
        assert_eq!(
            store.get_metadata(META_CONTENT_FINGERPRINT).unwrap(),
            Some(content_fingerprint(&chunks))
        );
    }

    #[test]
    fn test_collision_text_comes_from_winning_record() {
        let recs = vec![
            SymbolRecord::new("dup", SymbolKind::Function, "b.py", 1, 2)
                .with_docstring(Some("from B".into())),
            SymbolRecord::new("dup", SymbolKind::Function, "a.py", 10, 12)
                .with_docstring(Some("from A".into())),
        ];

        // Sharded: a.py sorts first and wins, although b.py came first.
        let sharded = SymbolGraphBuilder::new()
            .build_sharded(recs.iter().cloned().map(Ok), 2)
            .graph;
        let (chunks, _) = build_chunks(&sharded, &recs, None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].payload.text,
            "Function dup defined in a.py\n\nDocstring:\nfrom A"
        );
        assert_eq!(chunks[0].payload.location.map(|l| l.start_line), Some(10));

        // Sequential: input order, b.py wins.
        let sequential = SymbolGraphBuilder::new().build(recs.clone()).graph;
        let (chunks, _) = build_chunks(&sequential, &recs, None);
        assert_eq!(
            chunks[0].payload.text,
            "Function dup defined in b.py\n\nDocstring:\nfrom B"
        );
        assert_eq!(chunks[0].payload.location.map(|l| l.start_line), Some(1));
    }

    fn one_record(doc: &str, start: u32, end: u32) -> Vec<SymbolRecord> {
        vec![SymbolRecord::new("f", SymbolKind::Function, "a.py", start, end)
            .with_docstring(Some(doc.into()))]
    }

    #[test]
    fn test_content_fingerprint_follows_docstring_and_span() {
        let old = one_record("old", 1, 2);
        let new_doc = one_record("new", 1, 2);
        let new_span = one_record("old", 10, 40);

        let graph = SymbolGraphBuilder::new().build(old.clone()).graph;
        // The graph alone cannot tell these apart.
        assert_eq!(
            graph.fingerprint(),
            SymbolGraphBuilder::new().build(new_doc.clone()).graph.fingerprint()
        );
        assert_eq!(
            graph.fingerprint(),
            SymbolGraphBuilder::new().build(new_span.clone()).graph.fingerprint()
        );

        let fp = |recs: &[SymbolRecord]| content_fingerprint(&build_chunks(&graph, recs, None).0);
        assert_eq!(fp(&old), fp(&one_record("old", 1, 2)));
        assert_ne!(fp(&old), fp(&new_doc));
        assert_ne!(fp(&old), fp(&new_span));
    }

    #[test]
    fn test_record_only_change_makes_store_stale() {
        let old = one_record("old", 1, 2);
        let graph = SymbolGraphBuilder::new().build(old.clone()).graph;
        let store = VectorStore::open_memory().unwrap();

        let (chunks, _) = build_chunks(&graph, &old, None);
        assert!(!is_up_to_date(&graph, &chunks, &store).unwrap());
        index_chunks(&graph, &chunks, 0, &LengthEmbedder, &store).unwrap();
        assert!(is_up_to_date(&graph, &chunks, &store).unwrap());

        let (changed, _) = build_chunks(&graph, &one_record("new", 1, 2), None);
        assert!(!is_up_to_date(&graph, &changed, &store).unwrap());
        let (moved, _) = build_chunks(&graph, &one_record("old", 10, 40), None);
        assert!(!is_up_to_date(&graph, &moved, &store).unwrap());

        index_chunks(&graph, &changed, 0, &LengthEmbedder, &store).unwrap();
        assert!(is_up_to_date(&graph, &changed, &store).unwrap());
        assert!(store.get_payload("f").unwrap().unwrap().text.ends_with("new"));
    }

    #[test]
    fn test_failed_batch_falls_back_per_symbol() {
        let recs = vec![
            SymbolRecord::new("ok", SymbolKind::Function, "a.py", 1, 2),
            SymbolRecord::new("boom", SymbolKind::Function, "a.py", 3, 4),
        ];
        let graph = SymbolGraphBuilder::new().build(recs.clone()).graph;
        let store = VectorStore::open_memory().unwrap();

        let result = index_embeddings(&graph, &recs, None, &LengthEmbedder, &store).unwrap();
        assert_eq!(result.symbols_embedded, 1);
        assert_eq!(result.symbols_skipped, 1);
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.get_payload("ok").unwrap().is_some());

        // A partial run is never reported as up to date.
        let (chunks, _) = build_chunks(&graph, &recs, None);
        assert!(!is_up_to_date(&graph, &chunks, &store).unwrap());
    }

    #[test]
    fn test_reindex_replaces_previous_vectors() {
        let store = VectorStore::open_memory().unwrap();
        let graph = SymbolGraphBuilder::new().build(records()).graph;
        index_embeddings(&graph, &records(), None, &LengthEmbedder, &store).unwrap();

        let smaller = vec![SymbolRecord::new("only", SymbolKind::Function, "b.py", 1, 2)];
        let graph = SymbolGraphBuilder::new().build(smaller.clone()).graph;
        index_embeddings(&graph, &smaller, None, &LengthEmbedder, &store).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert!(store.get_payload("Session").unwrap().is_none());
    }
}
