use std::path::Path;
use std::sync::{Mutex, MutexGuard, Once};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::embeddings::embedding_to_bytes;
use super::{HitPayload, VectorHit, VectorIndex};
use crate::error::{BackendError, StoreError};
use crate::types::LineSpan;

/// Default store filename, next to the graph document.
pub const STORE_FILE: &str = ".repograph/vectors.db";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS symbol_payloads (
    id INTEGER PRIMARY KEY,
    symbol_id TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,
    file TEXT NOT NULL,
    start_line INTEGER,
    end_line INTEGER,
    text TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT
);
"#;

/// Metadata key holding the fingerprint of the graph the vectors belong to.
pub const META_GRAPH_FINGERPRINT: &str = "graph_fingerprint";
/// Metadata key holding the fingerprint of the embedded texts and payloads.
pub const META_CONTENT_FINGERPRINT: &str = "content_fingerprint";
const META_DIMENSION: &str = "dimension";

static SQLITE_VEC: Once = Once::new();

/// Register sqlite-vec for every connection opened by this process.
fn register_sqlite_vec() {
    SQLITE_VEC.call_once(|| {
        // SAFETY: sqlite3_vec_init has the signature sqlite3_auto_extension
        // expects; registration happens once, before any connection is opened.
        unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        }
    });
}

/// Symbol vectors and payloads in SQLite, searched with sqlite-vec KNN.
///
/// Payload rows and vector rows share a rowid. Vectors live in a `vec0`
/// virtual table with cosine distance, created on first insert once the
/// dimension is known.
pub struct VectorStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for VectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStore").finish_non_exhaustive()
    }
}

/// A vector ready to be stored.
#[derive(Debug, Clone)]
pub struct StoredVector {
    pub id: String,
    pub payload: HitPayload,
    pub vector: Vec<f32>,
}

impl VectorStore {
    /// Open or create the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        register_sqlite_vec();
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA temp_store=MEMORY;",
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for tests and benchmarks).
    #[doc(hidden)]
    pub fn open_memory() -> Result<Self, StoreError> {
        register_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave SQLite half-written
        // (statements are atomic), so a poisoned lock is still usable.
        self.conn.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    // ── Metadata ──

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(get_metadata(&self.conn(), key)?)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn().execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    /// Vector dimension of the stored embeddings, if any were written.
    pub fn dimension(&self) -> Result<Option<usize>, StoreError> {
        Ok(self
            .get_metadata(META_DIMENSION)?
            .and_then(|d| d.parse().ok()))
    }

    // ── Writes ──

    /// Drop every vector, payload and metadata entry. The vector table is
    /// recreated on the next insert, so a rebuild may change the dimension.
    pub fn clear(&self) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute_batch(
            "DROP TABLE IF EXISTS symbol_vectors;
             DELETE FROM symbol_payloads;
             DELETE FROM metadata;",
        )?;
        Ok(())
    }

    /// Insert vectors and payloads in one transaction. Ids already present
    /// are replaced.
    pub fn insert(&self, entries: &[StoredVector]) -> Result<(), StoreError> {
        let Some(first) = entries.first() else {
            return Ok(());
        };
        let mut conn = self.conn();
        let dim = ensure_vector_table(&conn, first.vector.len())?;

        let tx = conn.transaction()?;
        {
            let mut old_stmt =
                tx.prepare_cached("SELECT id FROM symbol_payloads WHERE symbol_id = ?1")?;
            let mut del_vec_stmt =
                tx.prepare_cached("DELETE FROM symbol_vectors WHERE rowid = ?1")?;
            let mut del_payload_stmt =
                tx.prepare_cached("DELETE FROM symbol_payloads WHERE id = ?1")?;
            let mut payload_stmt = tx.prepare_cached(
                "INSERT INTO symbol_payloads (symbol_id, kind, file, start_line, end_line, text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            let mut vec_stmt =
                tx.prepare_cached("INSERT INTO symbol_vectors (rowid, embedding) VALUES (?1, ?2)")?;

            for entry in entries {
                if entry.vector.len() != dim {
                    return Err(StoreError::Dimension {
                        expected: dim,
                        got: entry.vector.len(),
                    });
                }
                let old: Option<i64> = old_stmt
                    .query_row(params![entry.id], |row| row.get(0))
                    .optional()?;
                if let Some(old) = old {
                    del_vec_stmt.execute(params![old])?;
                    del_payload_stmt.execute(params![old])?;
                }

                let p = &entry.payload;
                payload_stmt.execute(params![
                    entry.id,
                    p.kind.as_str(),
                    p.file,
                    p.location.map(|l| l.start_line),
                    p.location.map(|l| l.end_line),
                    p.text,
                ])?;
                let rowid = tx.last_insert_rowid();
                vec_stmt.execute(params![rowid, embedding_to_bytes(&entry.vector)])?;
            }
        }
        tx.commit()?;
        debug!(count = entries.len(), "stored vectors");
        Ok(())
    }

    // ── Reads ──

    pub fn count(&self) -> Result<u32, StoreError> {
        Ok(self
            .conn()
            .query_row("SELECT COUNT(*) FROM symbol_payloads", [], |row| row.get(0))?)
    }

    /// K nearest payload rows by cosine distance, closest first, ties by
    /// insertion order.
    pub fn nearest(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>, StoreError> {
        let conn = self.conn();
        let Some(dim) = stored_dimension(&conn)? else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }
        if vector.len() != dim {
            return Err(StoreError::Dimension {
                expected: dim,
                got: vector.len(),
            });
        }

        let mut stmt = conn.prepare_cached(
            "WITH knn AS (
                 SELECT rowid, distance FROM symbol_vectors
                 WHERE embedding MATCH ?1 AND k = ?2
             )
             SELECT p.symbol_id, p.kind, p.file, p.start_line, p.end_line, p.text, knn.distance
             FROM knn JOIN symbol_payloads p ON p.id = knn.rowid
             ORDER BY knn.distance, p.id",
        )?;
        let rows = stmt
            .query_map(params![embedding_to_bytes(vector), k as i64], |row| {
                let distance: f64 = row.get(6)?;
                Ok(VectorHit {
                    id: row.get(0)?,
                    similarity: 1.0 - distance,
                    payload: row_to_payload(row)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn get_payload(&self, id: &str) -> Result<Option<HitPayload>, StoreError> {
        let conn = self.conn();
        let payload = conn
            .query_row(
                "SELECT symbol_id, kind, file, start_line, end_line, text
                 FROM symbol_payloads WHERE symbol_id = ?1",
                params![id],
                row_to_payload,
            )
            .optional()?;
        Ok(payload.flatten())
    }
}

impl VectorIndex for VectorStore {
    fn search(&self, vector: &[f32], k: usize) -> Result<Vec<VectorHit>, BackendError> {
        Ok(self.nearest(vector, k)?)
    }

    fn payload(&self, id: &str) -> Result<Option<HitPayload>, BackendError> {
        Ok(self.get_payload(id)?)
    }
}

fn get_metadata(conn: &Connection, key: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM metadata WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

fn stored_dimension(conn: &Connection) -> rusqlite::Result<Option<usize>> {
    Ok(get_metadata(conn, META_DIMENSION)?.and_then(|d| d.parse().ok()))
}

/// Create the vec0 table for `dim` if needed; returns the dimension in use.
fn ensure_vector_table(conn: &Connection, dim: usize) -> Result<usize, StoreError> {
    if let Some(existing) = stored_dimension(conn)? {
        return Ok(existing);
    }
    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS symbol_vectors
         USING vec0(embedding float[{dim}] distance_metric=cosine);"
    ))?;
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![META_DIMENSION, dim.to_string()],
    )?;
    Ok(dim)
}

/// Columns 1..=5 are kind, file, start_line, end_line, text. Rows with an
/// unknown kind yield no payload instead of failing the query.
fn row_to_payload(row: &rusqlite::Row<'_>) -> rusqlite::Result<Option<HitPayload>> {
    let kind_str: String = row.get(1)?;
    let Ok(kind) = kind_str.parse() else {
        return Ok(None);
    };
    let start: Option<u32> = row.get(3)?;
    let end: Option<u32> = row.get(4)?;
    Ok(Some(HitPayload {
        kind,
        file: row.get(2)?,
        location: start.zip(end).map(|(start_line, end_line)| LineSpan {
            start_line,
            end_line,
        }),
        text: row.get(5)?,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeKind;

    fn entry(id: &str, vector: Vec<f32>) -> StoredVector {
        StoredVector {
            id: id.to_string(),
            payload: HitPayload {
                kind: NodeKind::Function,
                file: "a.py".to_string(),
                location: Some(LineSpan {
                    start_line: 1,
                    end_line: 4,
                }),
                text: format!("Function {id} defined in a.py"),
            },
            vector,
        }
    }

    #[test]
    fn test_open_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".repograph").join("vectors.db");
        let store = VectorStore::open(&path).unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_open_reports_unusable_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "plain file").unwrap();

        match VectorStore::open(blocker.join("vectors.db")) {
            Err(StoreError::Io { path, .. }) => assert_eq!(path, blocker),
            other => panic!("expected an I/O error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_store_returns_no_hits() {
        let store = VectorStore::open_memory().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.nearest(&[1.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_nearest_orders_by_cosine() {
        let store = VectorStore::open_memory().unwrap();
        store
            .insert(&[
                entry("east", vec![1.0, 0.0, 0.0]),
                entry("north", vec![0.0, 1.0, 0.0]),
                entry("north_east", vec![0.7, 0.7, 0.0]),
            ])
            .unwrap();

        let hits = store.nearest(&[1.0, 0.1, 0.0], 2).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["east", "north_east"]);
        assert!(hits[0].similarity > hits[1].similarity);
        assert!(hits[0].similarity <= 1.0 + 1e-6);
        assert_eq!(hits[0].payload.as_ref().unwrap().file, "a.py");
    }

    #[test]
    fn test_reinsert_replaces_vector() {
        let store = VectorStore::open_memory().unwrap();
        store.insert(&[entry("f", vec![1.0, 0.0])]).unwrap();
        store.insert(&[entry("f", vec![0.0, 1.0])]).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let hits = store.nearest(&[0.0, 1.0], 1).unwrap();
        assert_eq!(hits[0].id, "f");
        assert!(hits[0].similarity > 0.99);
    }

    #[test]
    fn test_dimension_mismatch_is_an_error() {
        let store = VectorStore::open_memory().unwrap();
        store.insert(&[entry("f", vec![1.0, 0.0])]).unwrap();
        assert!(matches!(
            store.insert(&[entry("g", vec![1.0, 0.0, 0.0])]),
            Err(StoreError::Dimension { expected: 2, got: 3 })
        ));
        assert!(store.nearest(&[1.0, 0.0, 0.0], 1).is_err());
    }

    #[test]
    fn test_clear_allows_new_dimension() {
        let store = VectorStore::open_memory().unwrap();
        store.insert(&[entry("f", vec![1.0, 0.0])]).unwrap();
        store.set_metadata(META_CONTENT_FINGERPRINT, "abc").unwrap();
        store.clear().unwrap();
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.dimension().unwrap(), None);
        assert_eq!(store.get_metadata(META_CONTENT_FINGERPRINT).unwrap(), None);

        store.insert(&[entry("g", vec![1.0, 0.0, 0.0])]).unwrap();
        assert_eq!(store.dimension().unwrap(), Some(3));
    }

    #[test]
    fn test_payload_lookup_and_metadata() {
        let store = VectorStore::open_memory().unwrap();
        store.insert(&[entry("f", vec![1.0, 0.0])]).unwrap();

        let payload = store.get_payload("f").unwrap().unwrap();
        assert_eq!(payload.location.unwrap().end_line, 4);
        assert!(store.get_payload("missing").unwrap().is_none());

        store.set_metadata(META_GRAPH_FINGERPRINT, "abc").unwrap();
        assert_eq!(
            store.get_metadata(META_GRAPH_FINGERPRINT).unwrap().as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn test_zero_k_returns_nothing() {
        let store = VectorStore::open_memory().unwrap();
        store.insert(&[entry("f", vec![1.0, 0.0])]).unwrap();
        assert!(store.nearest(&[1.0, 0.0], 0).unwrap().is_empty());
    }
}
