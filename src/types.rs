use serde::{Deserialize, Serialize};

/// A function, method or class declaration handed to the graph builder.
///
/// Records come from an external parser; see [`crate::records`] for how they
/// are loaded and validated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolRecord {
    pub symbol_id: String,
    pub name: Option<String>,
    pub kind: SymbolKind,
    pub file: String,
    pub start_line: u32,
    pub end_line: u32,
    pub parent: Option<String>,
    pub docstring: Option<String>,
    /// Module names imported by the declaring file, in source order.
    pub imports: Vec<String>,
    /// Base-class identifiers, verbatim. Only meaningful for classes.
    pub bases: Vec<String>,
}

impl SymbolRecord {
    /// Create a record with no parent, docstring, imports or bases.
    /// Use the builder-style setters to fill those in.
    pub fn new(
        symbol_id: impl Into<String>,
        kind: SymbolKind,
        file: &str,
        start_line: u32,
        end_line: u32,
    ) -> Self {
        Self {
            symbol_id: symbol_id.into(),
            name: None,
            kind,
            file: file.to_string(),
            start_line,
            end_line,
            parent: None,
            docstring: None,
            imports: Vec::new(),
            bases: Vec::new(),
        }
    }

    /// Set the parent symbol ID. Empty strings count as no parent.
    pub fn with_parent(mut self, parent: Option<&str>) -> Self {
        self.parent = parent.filter(|p| !p.is_empty()).map(str::to_string);
        self
    }

    /// Set the docstring.
    pub fn with_docstring(mut self, docstring: Option<String>) -> Self {
        self.docstring = docstring;
        self
    }

    /// Set the imports of the declaring file.
    pub fn with_imports<I, S>(mut self, imports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.imports = imports.into_iter().map(Into::into).collect();
        self
    }

    /// Set the base classes.
    pub fn with_bases<I, S>(mut self, bases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bases = bases.into_iter().map(Into::into).collect();
        self
    }

    /// Display name: the explicit `name` when present, else the last dotted
    /// segment of the symbol ID.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => self
                .symbol_id
                .rsplit('.')
                .next()
                .unwrap_or(&self.symbol_id),
        }
    }
}

/// Kinds a parsed symbol record may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Method,
    Class,
}

impl SymbolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
        }
    }
}

impl std::str::FromStr for SymbolKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "function" => Ok(Self::Function),
            "method" => Ok(Self::Method),
            "class" => Ok(Self::Class),
            _ => Err(format!("unknown symbol kind: '{s}'")),
        }
    }
}

impl std::fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category tag of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Function,
    Method,
    Class,
    File,
    Module,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::File => "file",
            Self::Module => "module",
        }
    }

    /// Whether nodes of this kind are code symbols (and so get embedded).
    pub fn is_symbol(&self) -> bool {
        matches!(self, Self::Function | Self::Method | Self::Class)
    }
}

impl From<SymbolKind> for NodeKind {
    fn from(kind: SymbolKind) -> Self {
        match kind {
            SymbolKind::Function => Self::Function,
            SymbolKind::Method => Self::Method,
            SymbolKind::Class => Self::Class,
        }
    }
}

impl std::str::FromStr for NodeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "function" => Ok(Self::Function),
            "method" => Ok(Self::Method),
            "class" => Ok(Self::Class),
            "file" => Ok(Self::File),
            "module" => Ok(Self::Module),
            _ => Err(format!("unknown node kind: '{s}'")),
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Relationship between two graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    Contains,
    Imports,
    Inherits,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "CONTAINS",
            Self::Imports => "IMPORTS",
            Self::Inherits => "INHERITS",
        }
    }
}

impl std::str::FromStr for EdgeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "CONTAINS" => Ok(Self::Contains),
            "IMPORTS" => Ok(Self::Imports),
            "INHERITS" => Ok(Self::Inherits),
            _ => Err(format!("unknown edge kind: '{s}'")),
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node of the symbol graph. Serialized exactly as the persisted document
/// expects: `{id, type, file}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Declaring file; empty for module nodes.
    pub file: String,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, kind: NodeKind, file: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
            file: file.into(),
        }
    }

    pub fn file(path: &str) -> Self {
        Self::new(path, NodeKind::File, path)
    }

    pub fn module(name: &str) -> Self {
        Self::new(name, NodeKind::Module, "")
    }
}

/// A directed, typed edge. Serialized as `{type, source, target}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphEdge {
    #[serde(rename = "type")]
    pub kind: EdgeKind,
    pub source: String,
    pub target: String,
}

impl GraphEdge {
    pub fn new(kind: EdgeKind, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Where a retrieval hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Returned directly by the vector-search provider.
    Vector,
    /// Reached by one-hop expansion from a vector hit.
    Graph,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Graph => "graph",
        }
    }
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source location of a hydrated hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpan {
    pub start_line: u32,
    pub end_line: u32,
}

/// One ranked result of a hybrid query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalHit {
    pub id: String,
    /// `None` when the id has no node in the graph and the store had no payload.
    pub kind: Option<NodeKind>,
    pub file: Option<String>,
    pub score: f64,
    pub provenance: Provenance,
    /// Raw vector similarity (vector hits only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    /// The vector hit this candidate was expanded from (graph hits only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<LineSpan>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_serializes_with_type_field() {
        let node = GraphNode::new("Foo", NodeKind::Class, "a.py");
        let json = serde_json::to_string(&node).unwrap();
        assert_eq!(json, r#"{"id":"Foo","type":"class","file":"a.py"}"#);
    }

    #[test]
    fn edge_kind_uses_upper_case_tags() {
        let edge = GraphEdge::new(EdgeKind::Inherits, "Foo", "Base");
        let json = serde_json::to_string(&edge).unwrap();
        assert_eq!(json, r#"{"type":"INHERITS","source":"Foo","target":"Base"}"#);
        assert_eq!("IMPORTS".parse::<EdgeKind>().unwrap(), EdgeKind::Imports);
        assert!("imports".parse::<EdgeKind>().is_err());
    }

    #[test]
    fn module_nodes_have_empty_file() {
        let node = GraphNode::module("os.path");
        assert_eq!(node.kind, NodeKind::Module);
        assert!(node.file.is_empty());
    }

    #[test]
    fn empty_parent_is_no_parent() {
        let rec = SymbolRecord::new("foo", SymbolKind::Function, "a.py", 1, 2).with_parent(Some(""));
        assert_eq!(rec.parent, None);
    }

    #[test]
    fn display_name_falls_back_to_last_segment() {
        let rec = SymbolRecord::new("Foo.bar", SymbolKind::Method, "a.py", 3, 4);
        assert_eq!(rec.display_name(), "bar");
    }

    #[test]
    fn only_code_kinds_are_symbols() {
        assert!(NodeKind::Class.is_symbol());
        assert!(!NodeKind::File.is_symbol());
        assert!(!NodeKind::Module.is_symbol());
    }
}
