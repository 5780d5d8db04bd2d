//! facegate-store: SQLite persistence for the identity embedding store.
//!
//! One row per identity in `biometric_data`. The embedding is stored as the
//! UTF-8 JSON array of its components inside a BLOB column.

use facegate_core::store::{EmbeddingBackend, StoreError};
use facegate_core::types::{Embedding, IdentityRecord};
use rusqlite::{params, Connection};
use std::path::Path;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS biometric_data (
    identity      TEXT PRIMARY KEY NOT NULL,
    face_encoding BLOB NOT NULL,
    updated_at    TEXT NOT NULL
);
";

/// [`EmbeddingBackend`] over a single SQLite connection.
pub struct SqliteBackend {
    conn: Connection,
}

impl SqliteBackend {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::backend("open", e))?;
        }
        let conn = Connection::open(path).map_err(|e| StoreError::backend("open", e))?;
        tracing::info!(path = %path.display(), "opened face database");
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(|e| StoreError::backend("open", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| StoreError::backend("migrate", e))?;
        Ok(Self { conn })
    }
}

impl EmbeddingBackend for SqliteBackend {
    fn load_all(&mut self) -> Result<Vec<IdentityRecord>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT identity, face_encoding, updated_at FROM biometric_data ORDER BY identity")
            .map_err(|e| StoreError::backend("load", e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Vec<u8>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| StoreError::backend("load", e))?;

        let mut records = Vec::new();
        for row in rows {
            let (identity, blob, updated_at) = row.map_err(|e| StoreError::backend("load", e))?;
            match serde_json::from_slice::<Vec<f32>>(&blob) {
                Ok(values) => records.push(IdentityRecord {
                    identity,
                    embedding: Embedding::new(values),
                    updated_at,
                }),
                Err(err) => {
                    tracing::warn!(identity = %identity, error = %err, "skipping undecodable face encoding");
                }
            }
        }
        Ok(records)
    }

    fn upsert(&mut self, record: &IdentityRecord) -> Result<(), StoreError> {
        let blob = serde_json::to_vec(&record.embedding.values)
            .map_err(|e| StoreError::backend("upsert", e))?;
        self.conn
            .execute(
                "INSERT INTO biometric_data (identity, face_encoding, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(identity) DO UPDATE SET
                     face_encoding = excluded.face_encoding,
                     updated_at = excluded.updated_at",
                params![record.identity, blob, record.updated_at],
            )
            .map_err(|e| StoreError::backend("upsert", e))?;
        Ok(())
    }

    fn remove(&mut self, identity: &str) -> Result<bool, StoreError> {
        let affected = self
            .conn
            .execute("DELETE FROM biometric_data WHERE identity = ?1", params![identity])
            .map_err(|e| StoreError::backend("remove", e))?;
        Ok(affected > 0)
    }
}
