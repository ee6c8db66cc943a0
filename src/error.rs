//! Error types shared by the graph, record, store and retrieval layers.

use std::path::PathBuf;

use crate::types::EdgeKind;

/// Why a single symbol record was rejected. Rejected records are skipped and
/// counted; they never abort a build.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing or empty field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' has the wrong type")]
    WrongType { field: &'static str },

    #[error("unknown symbol kind '{0}'")]
    UnknownKind(String),

    #[error("line span {start}-{end} ends before it starts")]
    InvertedSpan { start: u32, end: u32 },
}

impl RecordError {
    /// Short stable label used as a counter key in build reports.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotAnObject => "not_an_object",
            Self::MissingField(_) => "missing_field",
            Self::WrongType { .. } => "wrong_type",
            Self::UnknownKind(_) => "unknown_kind",
            Self::InvertedSpan { .. } => "inverted_span",
        }
    }
}

/// Failures loading or saving record files and graph documents.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The document is not valid JSON or does not match the schema
    /// (unknown field, unknown node/edge type, missing field).
    #[error("invalid graph document: {0}")]
    Schema(#[from] serde_json::Error),

    #[error("duplicate node id '{0}' in graph document")]
    DuplicateNode(String),

    #[error("empty {0} id in graph document")]
    EmptyId(&'static str),

    #[error("records file {path} is not a JSON array")]
    NotAnArray { path: PathBuf },
}

impl GraphError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Non-fatal inconsistencies found in a finished graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphWarning {
    /// An edge endpoint has no node, typically an unresolved base class.
    #[error("{kind} edge {from} -> {to} references an id with no node")]
    DanglingEdge {
        kind: EdgeKind,
        from: String,
        to: String,
    },
}

/// Which collaborator a backend error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Embedding,
    VectorSearch,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Embedding => f.write_str("embedding provider"),
            Self::VectorSearch => f.write_str("vector search"),
        }
    }
}

/// Error returned by [`crate::rag::Embedder`] and [`crate::rag::VectorIndex`]
/// implementations.
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures of a hybrid query.
#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("query text is empty")]
    EmptyQuery,

    #[error("invalid retrieval config: {0}")]
    InvalidConfig(String),

    /// A collaborator could not be reached or failed. Never mapped to an
    /// empty result.
    #[error("{backend} unavailable: {source}")]
    BackendUnavailable {
        backend: Backend,
        #[source]
        source: BackendError,
    },
}

impl RetrievalError {
    pub(crate) fn unavailable(backend: Backend, source: BackendError) -> Self {
        Self::BackendUnavailable { backend, source }
    }

    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }
}

/// Failures of the sqlite-vec vector store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("embedding has {got} dimensions, store expects {expected}")]
    Dimension { expected: usize, got: usize },
}
