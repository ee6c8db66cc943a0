use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::GraphWarning;
use crate::graph::SymbolGraph;
use crate::records::RecordResult;
use crate::types::{EdgeKind, GraphEdge, GraphNode, NodeKind, SymbolKind, SymbolRecord};

/// Counters surfaced by a build. Nothing in here is fatal.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct BuildReport {
    pub records_seen: u32,
    pub records_built: u32,
    pub records_skipped: u32,
    /// Skip counts keyed by [`crate::error::RecordError::reason`].
    pub skip_reasons: Vec<(String, u32)>,
    pub nodes: u32,
    pub contains_edges: u32,
    pub imports_edges: u32,
    pub inherits_edges: u32,
    /// Records whose symbol id was already taken by a node of another kind
    /// or file. Repeats of an identical record are not counted.
    pub id_collisions: u32,
    /// Edges with an endpoint that has no node (e.g. unresolved base classes).
    pub dangling_edges: u32,
}

impl BuildReport {
    fn skip(&mut self, reason: &str) {
        self.records_skipped += 1;
        match self.skip_reasons.iter_mut().find(|(r, _)| r == reason) {
            Some((_, n)) => *n += 1,
            None => self.skip_reasons.push((reason.to_string(), 1)),
        }
    }

    fn absorb(&mut self, other: &BuildReport) {
        self.records_seen += other.records_seen;
        self.records_built += other.records_built;
        for (reason, n) in &other.skip_reasons {
            for _ in 0..*n {
                self.skip(reason);
            }
        }
        self.contains_edges += other.contains_edges;
        self.imports_edges += other.imports_edges;
        self.inherits_edges += other.inherits_edges;
        self.id_collisions += other.id_collisions;
    }
}

/// A finished graph and the counters from building it.
#[derive(Debug)]
pub struct BuildOutcome {
    pub graph: SymbolGraph,
    pub report: BuildReport,
    pub warnings: Vec<GraphWarning>,
}

/// Folds symbol records into a [`SymbolGraph`].
///
/// For every record: a symbol node, a file node for the declaring file, and
/// one CONTAINS edge from the parent symbol (or the file when there is no
/// parent). Then IMPORTS edges from the file to every imported module, one per
/// record and module, and INHERITS edges from each class to its bases verbatim.
/// First insert of a node id wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct SymbolGraphBuilder;

impl SymbolGraphBuilder {
    pub fn new() -> Self {
        Self
    }

    /// Build from already-validated records.
    pub fn build(&self, records: impl IntoIterator<Item = SymbolRecord>) -> BuildOutcome {
        self.build_checked(records.into_iter().map(Ok))
    }

    /// Build from loader output; rejected records are skipped and counted.
    pub fn build_checked(&self, records: impl IntoIterator<Item = RecordResult>) -> BuildOutcome {
        let mut report = BuildReport::default();
        let accepted = accept(records, &mut report);

        let mut graph = SymbolGraph::new();
        fold_records(&mut graph, &accepted, &mut report);
        finish(graph, report)
    }

    /// Build with records sharded by declaring file across `workers` threads.
    ///
    /// Shards are merged in file-path order, so the result does not depend on
    /// the worker count or on thread scheduling. Node and edge order differ
    /// from [`build_checked`](Self::build_checked), which keeps input order.
    pub fn build_sharded(
        &self,
        records: impl IntoIterator<Item = RecordResult>,
        workers: usize,
    ) -> BuildOutcome {
        let mut report = BuildReport::default();
        let accepted = accept(records, &mut report);

        let mut shards: BTreeMap<String, Vec<SymbolRecord>> = BTreeMap::new();
        for rec in accepted {
            shards.entry(rec.file.clone()).or_default().push(rec);
        }
        let shards: Vec<Vec<SymbolRecord>> = shards.into_values().collect();

        let workers = workers.max(1);
        let per_worker = ((shards.len() + workers - 1) / workers).max(1);
        debug!(shards = shards.len(), workers, "building sharded graph");

        let partials: Vec<(SymbolGraph, BuildReport)> = std::thread::scope(|scope| {
            let handles: Vec<_> = shards
                .chunks(per_worker)
                .map(|chunk| {
                    scope.spawn(move || {
                        chunk
                            .iter()
                            .map(|shard| {
                                let mut graph = SymbolGraph::new();
                                let mut partial = BuildReport::default();
                                fold_records(&mut graph, shard, &mut partial);
                                (graph, partial)
                            })
                            .collect::<Vec<_>>()
                    })
                })
                .collect();

            handles
                .into_iter()
                .flat_map(|h| match h.join() {
                    Ok(parts) => parts,
                    Err(panic) => std::panic::resume_unwind(panic),
                })
                .collect()
        });

        let mut graph = SymbolGraph::new();
        for (partial, partial_report) in partials {
            report.absorb(&partial_report);
            let doc = partial.to_serializable();
            for node in doc.nodes {
                if !node.kind.is_symbol() {
                    graph.add_node(node);
                    continue;
                }
                let id = node.id.clone();
                if insert_symbol(&mut graph, node) {
                    debug!(id = %id, "symbol id collision across shards");
                    report.id_collisions += 1;
                }
            }
            for edge in doc.edges {
                graph.add_edge(edge);
            }
        }
        finish(graph, report)
    }
}

/// Split loader output into accepted records, counting rejects. Records
/// that parsed but carry an empty id or file are rejected here too.
fn accept(records: impl IntoIterator<Item = RecordResult>, report: &mut BuildReport) -> Vec<SymbolRecord> {
    let mut accepted = Vec::new();
    for rec in records {
        report.records_seen += 1;
        match rec {
            Ok(rec) if rec.symbol_id.is_empty() || rec.file.is_empty() => {
                report.skip("missing_field");
            }
            Ok(rec) => accepted.push(rec),
            Err(e) => report.skip(e.reason()),
        }
    }
    accepted
}

/// Insert a symbol node unless its id is taken. Returns true when the id
/// was already held by a node of another kind or file; an identical node
/// is a repeated record, not a collision.
fn insert_symbol(graph: &mut SymbolGraph, node: GraphNode) -> bool {
    match graph.node(&node.id) {
        None => {
            graph.add_node(node);
            false
        }
        Some(existing) => existing.kind != node.kind || existing.file != node.file,
    }
}

/// The three passes: containment, imports, inheritance.
fn fold_records(graph: &mut SymbolGraph, records: &[SymbolRecord], report: &mut BuildReport) {
    for rec in records {
        let node = GraphNode::new(
            rec.symbol_id.as_str(),
            NodeKind::from(rec.kind),
            rec.file.as_str(),
        );
        if insert_symbol(graph, node) {
            debug!(id = %rec.symbol_id, file = %rec.file, "symbol id already taken, keeping first");
            report.id_collisions += 1;
        }
        graph.add_node(GraphNode::file(&rec.file));

        let container = rec.parent.as_deref().unwrap_or(&rec.file);
        graph.add_edge(GraphEdge::new(EdgeKind::Contains, container, rec.symbol_id.as_str()));
        report.contains_edges += 1;
        report.records_built += 1;
    }

    for rec in records {
        for module in rec.imports.iter().filter(|m| !m.is_empty()) {
            graph.add_node(GraphNode::module(module));
            graph.add_edge(GraphEdge::new(EdgeKind::Imports, rec.file.as_str(), module.as_str()));
            report.imports_edges += 1;
        }
    }

    for rec in records.iter().filter(|r| r.kind == SymbolKind::Class) {
        for base in rec.bases.iter().filter(|b| !b.is_empty()) {
            graph.add_edge(GraphEdge::new(
                EdgeKind::Inherits,
                rec.symbol_id.as_str(),
                base.as_str(),
            ));
            report.inherits_edges += 1;
        }
    }
}

fn finish(graph: SymbolGraph, mut report: BuildReport) -> BuildOutcome {
    report.nodes = graph.node_count() as u32;
    let warnings: Vec<GraphWarning> = graph
        .dangling_edges()
        .map(|edge| GraphWarning::DanglingEdge {
            kind: edge.kind,
            from: edge.source.clone(),
            to: edge.target.clone(),
        })
        .collect();
    for warning in &warnings {
        debug!(%warning, "dangling edge");
    }
    report.dangling_edges = warnings.len() as u32;

    if report.records_skipped > 0 {
        warn!(skipped = report.records_skipped, "malformed records skipped");
    }
    if report.dangling_edges > 0 {
        warn!(
            count = report.dangling_edges,
            "edges reference ids with no node (kept as-is)"
        );
    }
    info!(
        records = report.records_built,
        nodes = report.nodes,
        edges = graph.edge_count(),
        collisions = report.id_collisions,
        "symbol graph built"
    );

    BuildOutcome {
        graph,
        report,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecordError;

    fn sample_records() -> Vec<SymbolRecord> {
        vec![
            SymbolRecord::new("Session", SymbolKind::Class, "requests/sessions.py", 10, 200)
                .with_imports(["os", "requests.adapters"])
                .with_bases(["SessionRedirectMixin"]),
            SymbolRecord::new("Session.request", SymbolKind::Method, "requests/sessions.py", 50, 90)
                .with_parent(Some("Session"))
                .with_imports(["os", "requests.adapters"]),
            SymbolRecord::new("get", SymbolKind::Function, "requests/api.py", 1, 20)
                .with_imports(["requests.sessions"]),
        ]
    }

    fn has_edge(graph: &SymbolGraph, kind: EdgeKind, source: &str, target: &str) -> bool {
        graph
            .edges()
            .iter()
            .any(|e| e.kind == kind && e.source == source && e.target == target)
    }

    #[test]
    fn test_contains_from_parent_or_file() {
        let out = SymbolGraphBuilder::new().build(sample_records());
        let g = &out.graph;

        assert!(has_edge(g, EdgeKind::Contains, "Session", "Session.request"));
        assert!(has_edge(g, EdgeKind::Contains, "requests/sessions.py", "Session"));
        assert!(has_edge(g, EdgeKind::Contains, "requests/api.py", "get"));
        assert!(!has_edge(g, EdgeKind::Contains, "requests/sessions.py", "Session.request"));
        assert_eq!(out.report.contains_edges, 3);
    }

    #[test]
    fn test_file_nodes_created_once() {
        let out = SymbolGraphBuilder::new().build(sample_records());
        let files: Vec<&str> = out
            .graph
            .nodes()
            .iter()
            .filter(|n| n.kind == NodeKind::File)
            .map(|n| n.id.as_str())
            .collect();
        assert_eq!(files, vec!["requests/sessions.py", "requests/api.py"]);
        assert_eq!(out.report.id_collisions, 0);
    }

    #[test]
    fn test_imports_edges_are_not_deduplicated() {
        let out = SymbolGraphBuilder::new().build(sample_records());
        let os_edges = out
            .graph
            .edges_of_kind(EdgeKind::Imports)
            .filter(|e| e.source == "requests/sessions.py" && e.target == "os")
            .count();
        assert_eq!(os_edges, 2);
        assert_eq!(out.report.imports_edges, 5);

        let module = out.graph.node("os").unwrap();
        assert_eq!(module.kind, NodeKind::Module);
        assert_eq!(module.file, "");
    }

    #[test]
    fn test_dangling_base_is_kept() {
        let records = vec![SymbolRecord::new("Child", SymbolKind::Class, "a.py", 1, 5)
            .with_bases(["BaseNotInGraph"])];
        let out = SymbolGraphBuilder::new().build(records);

        assert!(has_edge(&out.graph, EdgeKind::Inherits, "Child", "BaseNotInGraph"));
        assert!(out.graph.node("BaseNotInGraph").is_none());
        assert!(out.graph.neighbors("BaseNotInGraph").is_empty());
        assert_eq!(out.report.dangling_edges, 1);
        assert_eq!(
            out.warnings,
            vec![GraphWarning::DanglingEdge {
                kind: EdgeKind::Inherits,
                from: "Child".into(),
                to: "BaseNotInGraph".into(),
            }]
        );
    }

    #[test]
    fn test_bases_ignored_for_non_classes() {
        let records = vec![SymbolRecord::new("f", SymbolKind::Function, "a.py", 1, 5)
            .with_bases(["Base"])];
        let out = SymbolGraphBuilder::new().build(records);
        assert_eq!(out.graph.edges_of_kind(EdgeKind::Inherits).count(), 0);
    }

    #[test]
    fn test_same_name_in_two_files_first_wins() {
        let records = vec![
            SymbolRecord::new("Config", SymbolKind::Class, "app/config.py", 1, 10),
            SymbolRecord::new("Config", SymbolKind::Function, "tests/config.py", 1, 3),
        ];
        let out = SymbolGraphBuilder::new().build(records);

        let node = out.graph.node("Config").unwrap();
        assert_eq!(node.kind, NodeKind::Class);
        assert_eq!(node.file, "app/config.py");
        assert_eq!(out.report.id_collisions, 1);
        // Both containment edges are still emitted.
        assert!(has_edge(&out.graph, EdgeKind::Contains, "app/config.py", "Config"));
        assert!(has_edge(&out.graph, EdgeKind::Contains, "tests/config.py", "Config"));
    }

    #[test]
    fn test_repeated_record_is_not_a_collision() {
        let rec = SymbolRecord::new("Config", SymbolKind::Class, "app/config.py", 1, 10);
        let out = SymbolGraphBuilder::new().build(vec![rec.clone(), rec.clone()]);

        assert_eq!(out.report.id_collisions, 0);
        assert_eq!(out.report.records_built, 2);
        assert_eq!(out.graph.node_count(), 2);

        let sharded = SymbolGraphBuilder::new().build_sharded(vec![Ok(rec.clone()), Ok(rec)], 2);
        assert_eq!(sharded.report.id_collisions, 0);
    }

    #[test]
    fn test_same_id_and_file_with_other_kind_is_a_collision() {
        let records = vec![
            SymbolRecord::new("Config", SymbolKind::Class, "app/config.py", 1, 10),
            SymbolRecord::new("Config", SymbolKind::Function, "app/config.py", 12, 14),
        ];
        let out = SymbolGraphBuilder::new().build(records);
        assert_eq!(out.report.id_collisions, 1);
        assert_eq!(out.graph.node("Config").unwrap().kind, NodeKind::Class);
    }

    #[test]
    fn test_bad_records_are_skipped_and_counted() {
        let input: Vec<RecordResult> = vec![
            Ok(SymbolRecord::new("ok", SymbolKind::Function, "a.py", 1, 2)),
            Err(RecordError::MissingField("symbol_id")),
            Err(RecordError::UnknownKind("enum".into())),
            Ok(SymbolRecord::new("", SymbolKind::Function, "a.py", 1, 2)),
        ];
        let out = SymbolGraphBuilder::new().build_checked(input);

        assert_eq!(out.report.records_seen, 4);
        assert_eq!(out.report.records_built, 1);
        assert_eq!(out.report.records_skipped, 3);
        assert!(out
            .report
            .skip_reasons
            .contains(&("missing_field".to_string(), 2)));
        assert!(out.graph.contains("ok"));
    }

    #[test]
    fn test_sharded_build_is_independent_of_workers() {
        let mut records = sample_records();
        records.push(
            SymbolRecord::new("Session", SymbolKind::Function, "requests/zzz.py", 1, 2),
        );
        let as_results = || records.iter().cloned().map(Ok).collect::<Vec<RecordResult>>();

        let one = SymbolGraphBuilder::new().build_sharded(as_results(), 1);
        let four = SymbolGraphBuilder::new().build_sharded(as_results(), 4);
        assert_eq!(one.graph.to_serializable(), four.graph.to_serializable());
        assert_eq!(one.report, four.report);
        assert_eq!(one.report.id_collisions, 1);

        // Same content as the sequential build, possibly in a different order.
        let seq = SymbolGraphBuilder::new().build(records.clone());
        let mut seq_nodes: Vec<_> = seq.graph.nodes().iter().map(|n| n.id.clone()).collect();
        let mut shard_nodes: Vec<_> = one.graph.nodes().iter().map(|n| n.id.clone()).collect();
        seq_nodes.sort();
        shard_nodes.sort();
        assert_eq!(seq_nodes, shard_nodes);
        assert_eq!(seq.graph.edge_count(), one.graph.edge_count());
    }

    #[test]
    fn test_sharded_first_writer_follows_path_order() {
        // "b.py" comes first in input, but "a.py" sorts first.
        let input = vec![
            Ok(SymbolRecord::new("dup", SymbolKind::Function, "b.py", 1, 2)),
            Ok(SymbolRecord::new("dup", SymbolKind::Class, "a.py", 1, 2)),
        ];
        let out = SymbolGraphBuilder::new().build_sharded(input, 2);
        assert_eq!(out.graph.node("dup").unwrap().file, "a.py");
    }

    #[test]
    fn test_empty_input() {
        let out = SymbolGraphBuilder::new().build(Vec::new());
        assert_eq!(out.graph.node_count(), 0);
        assert_eq!(out.report, BuildReport::default());
    }
}
