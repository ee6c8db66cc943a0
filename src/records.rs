//! Loading symbol records produced by an external parser.
//!
//! Input is either a single JSON file holding an array of record objects, or
//! a directory of such files (one shard per source file, typically). Each
//! array element is validated on its own: a malformed element becomes an
//! `Err(RecordError)` entry so the builder can skip and count it, while an
//! unreadable file or invalid JSON aborts the load.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{GraphError, RecordError};
use crate::types::{SymbolKind, SymbolRecord};

pub type RecordResult = Result<SymbolRecord, RecordError>;

/// Load records from a JSON file or a directory of `*.json` shards.
///
/// Shards are read in path order so builds are reproducible.
pub fn load_records(path: impl AsRef<Path>) -> Result<Vec<RecordResult>, GraphError> {
    let path = path.as_ref();
    if !path.is_dir() {
        return load_records_file(path);
    }

    let mut out = Vec::new();
    let walker = WalkDir::new(path)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "directory walk error");
                continue;
            }
        };
        if !entry.file_type().is_file() || !is_json(entry.path()) {
            continue;
        }
        let shard = load_records_file(entry.path())?;
        debug!(file = %entry.path().display(), records = shard.len(), "loaded record shard");
        out.extend(shard);
    }

    Ok(out)
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

fn load_records_file(path: &Path) -> Result<Vec<RecordResult>, GraphError> {
    let text = std::fs::read_to_string(path).map_err(|e| GraphError::io(path, e))?;
    let value: Value = serde_json::from_str(&text)?;
    let Value::Array(items) = value else {
        return Err(GraphError::NotAnArray {
            path: path.to_path_buf(),
        });
    };

    Ok(items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            parse_record(item).map_err(|e| {
                warn!(file = %path.display(), index = i, error = %e, "skipping malformed record");
                e
            })
        })
        .collect())
}

/// Validate one record object.
///
/// Required: non-empty `symbol_id`, a known `type` and a non-empty `file`.
/// A line span with both ends set must not end before it starts.
/// Everything else is optional; `null` is treated as absent and an empty
/// `parent` means "declared at file scope".
pub fn parse_record(value: &Value) -> RecordResult {
    let obj = value.as_object().ok_or(RecordError::NotAnObject)?;

    let symbol_id = required_str(obj, "symbol_id")?;
    let kind_str = required_str(obj, "type")?;
    let kind: SymbolKind = kind_str
        .parse()
        .map_err(|_| RecordError::UnknownKind(kind_str.to_string()))?;
    let file = required_str(obj, "file")?;

    // 0 means "not given"; only a span with both ends set can be inverted.
    let start = optional_line(obj, "start_line")?;
    let end = optional_line(obj, "end_line")?;
    if start > 0 && end > 0 && end < start {
        return Err(RecordError::InvertedSpan { start, end });
    }

    let mut record = SymbolRecord::new(symbol_id, kind, file, start, end)
    .with_parent(optional_str(obj, "parent")?)
    .with_docstring(optional_str(obj, "docstring")?.map(str::to_string))
    .with_imports(string_list(obj, "imports")?)
    .with_bases(string_list(obj, "bases")?);
    record.name = optional_str(obj, "name")?.map(str::to_string);

    Ok(record)
}

fn required_str<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, RecordError> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(Value::String(_)) | Some(Value::Null) | None => Err(RecordError::MissingField(field)),
        Some(_) => Err(RecordError::WrongType { field }),
    }
}

fn optional_str<'a>(
    obj: &'a Map<String, Value>,
    field: &'static str,
) -> Result<Option<&'a str>, RecordError> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(RecordError::WrongType { field }),
    }
}

fn optional_line(obj: &Map<String, Value>, field: &'static str) -> Result<u32, RecordError> {
    match obj.get(field) {
        Some(Value::Null) | None => Ok(0),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .ok_or(RecordError::WrongType { field }),
    }
}

fn string_list<'a>(
    obj: &'a Map<String, Value>,
    field: &'static str,
) -> Result<Vec<&'a str>, RecordError> {
    match obj.get(field) {
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().ok_or(RecordError::WrongType { field }))
            .collect(),
        Some(_) => Err(RecordError::WrongType { field }),
    }
}
