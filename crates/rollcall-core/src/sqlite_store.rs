//! `face_embeddings` table: one row per student, embedding as a JSON float array.

use crate::store::{admit, EmbeddingStore, Snapshot, StoreError};
use crate::types::{Embedding, StudentId};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS face_embeddings (
    student_id TEXT PRIMARY KEY,
    embedding  TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
";

struct SqliteInner {
    conn: Connection,
    dimension: Option<usize>,
}

/// SQLite-backed store. All access goes through one connection under a mutex.
pub struct SqliteStore {
    inner: Mutex<SqliteInner>,
}

impl SqliteStore {
    /// Open or create the store at the provided sqlite path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = Self::with_connection(Connection::open(path)?)?;
        tracing::info!(path = %path.display(), dimension = ?store.dimension(), "opened embedding database");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA_SQL)?;

        let mut dimension = None;
        {
            let mut stmt = conn.prepare("SELECT student_id, embedding FROM face_embeddings")?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let (id, embedding) = decode_row(row)?;
                match dimension {
                    None => dimension = Some(embedding.dim()),
                    Some(dim) if dim != embedding.dim() => {
                        return Err(StoreError::Corrupt {
                            location: format!("face_embeddings[{id}]"),
                            reason: format!(
                                "{}-dim vector in a store of {dim}-dim vectors",
                                embedding.dim()
                            ),
                        });
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(Self {
            inner: Mutex::new(SqliteInner { conn, dimension }),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SqliteInner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn decode_row(row: &rusqlite::Row<'_>) -> Result<(StudentId, Embedding), StoreError> {
    let id: String = row.get(0)?;
    let raw: String = row.get(1)?;
    let embedding = decode_embedding(&id, &raw)?;
    Ok((StudentId::new(id), embedding))
}

fn decode_embedding(id: &str, raw: &str) -> Result<Embedding, StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        location: format!("face_embeddings[{id}]"),
        reason,
    };
    let embedding: Embedding = serde_json::from_str(raw).map_err(|e| corrupt(e.to_string()))?;
    embedding.validate().map_err(|e| corrupt(e.to_string()))?;
    Ok(embedding)
}

impl EmbeddingStore for SqliteStore {
    fn put(&self, id: &StudentId, embedding: &Embedding) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        admit(embedding, inner.dimension)?;

        let raw = serde_json::to_string(embedding)?;
        let now = chrono::Utc::now().to_rfc3339();
        inner.conn.execute(
            "INSERT INTO face_embeddings (student_id, embedding, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(student_id) DO UPDATE SET
                embedding = excluded.embedding,
                updated_at = excluded.updated_at",
            params![id.as_str(), raw, now],
        )?;
        inner.dimension = Some(embedding.dim());
        tracing::debug!(student = %id, "embedding upserted");
        Ok(())
    }

    fn get(&self, id: &StudentId) -> Result<Embedding, StoreError> {
        let inner = self.lock()?;
        let raw: Option<String> = inner
            .conn
            .query_row(
                "SELECT embedding FROM face_embeddings WHERE student_id = ?1",
                params![id.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => decode_embedding(id.as_str(), &raw),
            None => Err(StoreError::NotFound(id.clone())),
        }
    }

    fn all(&self) -> Result<Snapshot, StoreError> {
        let inner = self.lock()?;
        let mut stmt = inner
            .conn
            .prepare("SELECT student_id, embedding FROM face_embeddings ORDER BY student_id")?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(decode_row(row)?);
        }
        Ok(Snapshot::new(entries))
    }

    fn delete(&self, id: &StudentId) -> Result<(), StoreError> {
        let inner = self.lock()?;
        inner.conn.execute(
            "DELETE FROM face_embeddings WHERE student_id = ?1",
            params![id.as_str()],
        )?;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.conn.execute("DELETE FROM face_embeddings", [])?;
        inner.dimension = None;
        Ok(())
    }

    fn dimension(&self) -> Option<usize> {
        self.inner.lock().ok().and_then(|inner| inner.dimension)
    }

    fn len(&self) -> Result<usize, StoreError> {
        let inner = self.lock()?;
        let count: i64 =
            inner
                .conn
                .query_row("SELECT COUNT(*) FROM face_embeddings", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
