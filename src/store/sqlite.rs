//! SQLite-backed document store.
//!
//! Documents live in a single `documents` table with an integer commit
//! version per key. The connection is shared behind an async mutex; each
//! commit runs inside one SQL transaction so version validation and the
//! write batch are atomic.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tokio::sync::Mutex;

use super::{Backend, StoreError, VersionedDoc};

pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|err| StoreError::PermissionDenied(err.to_string()))?;
        }
        let conn = Connection::open(path).map_err(map_sqlite_err)?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(map_sqlite_err)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                key     TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                body    TEXT NOT NULL
            )",
        )
        .map_err(map_sqlite_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn map_sqlite_err(err: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(code, _) = &err {
        match code.code {
            rusqlite::ErrorCode::ReadOnly
            | rusqlite::ErrorCode::CannotOpen
            | rusqlite::ErrorCode::PermissionDenied => {
                return StoreError::PermissionDenied(err.to_string());
            }
            _ => {}
        }
    }
    StoreError::Unavailable(err.to_string())
}

fn row_to_doc(key: &str, version: i64, body: &str) -> Result<VersionedDoc, StoreError> {
    let body: Value = serde_json::from_str(body).map_err(|source| StoreError::Corrupt {
        key: key.to_string(),
        source,
    })?;
    Ok(VersionedDoc {
        key: key.to_string(),
        version: version as u64,
        body,
    })
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<VersionedDoc>, StoreError> {
        let conn = self.conn.lock().await;
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT version, body FROM documents WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(map_sqlite_err)?;
        match row {
            Some((version, body)) => Ok(Some(row_to_doc(key, version, &body)?)),
            None => Ok(None),
        }
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<VersionedDoc>, StoreError> {
        let conn = self.conn.lock().await;
        // Document keys are ASCII, so U+FFFF bounds the prefix range.
        let upper = format!("{prefix}\u{ffff}");
        let mut stmt = conn
            .prepare(
                "SELECT key, version, body FROM documents \
                 WHERE key >= ?1 AND key < ?2 ORDER BY key ASC",
            )
            .map_err(map_sqlite_err)?;
        let rows = stmt
            .query_map(params![prefix, upper], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(map_sqlite_err)?;
        let mut docs = Vec::new();
        for row in rows {
            let (key, version, body) = row.map_err(map_sqlite_err)?;
            docs.push(row_to_doc(&key, version, &body)?);
        }
        Ok(docs)
    }

    async fn create_all(&self, entries: Vec<(String, Value)>) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(map_sqlite_err)?;
        if let Some((anchor, _)) = entries.first() {
            let exists: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM documents WHERE key = ?1",
                    params![anchor],
                    |row| row.get(0),
                )
                .optional()
                .map_err(map_sqlite_err)?;
            if exists.is_some() {
                return Err(StoreError::AlreadyExists);
            }
        }
        for (key, body) in &entries {
            let body = serde_json::to_string(body)?;
            tx.execute(
                "INSERT OR REPLACE INTO documents (key, version, body) VALUES (?1, 1, ?2)",
                params![key, body],
            )
            .map_err(map_sqlite_err)?;
        }
        tx.commit().map_err(map_sqlite_err)
    }

    async fn commit(
        &self,
        reads: Vec<(String, u64)>,
        writes: Vec<(String, Value)>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction().map_err(map_sqlite_err)?;
        for (key, read_version) in &reads {
            let current: Option<i64> = tx
                .query_row(
                    "SELECT version FROM documents WHERE key = ?1",
                    params![key],
                    |row| row.get(0),
                )
                .optional()
                .map_err(map_sqlite_err)?;
            if current.unwrap_or(0) as u64 != *read_version {
                return Err(StoreError::Conflict);
            }
        }
        for (key, body) in &writes {
            let body = serde_json::to_string(body)?;
            tx.execute(
                "INSERT INTO documents (key, version, body) VALUES (?1, 1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET version = version + 1, body = excluded.body",
                params![key, body],
            )
            .map_err(map_sqlite_err)?;
        }
        tx.commit().map_err(map_sqlite_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_temp() -> (SqliteBackend, TempDir) {
        let dir = TempDir::new().unwrap();
        let backend = SqliteBackend::open(&dir.path().join("store.db")).unwrap();
        (backend, dir)
    }

    #[tokio::test]
    async fn documents_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.db");
        {
            let backend = SqliteBackend::open(&path).unwrap();
            backend
                .create_all(vec![("plans/p".to_string(), json!({"total_specs": 2}))])
                .await
                .unwrap();
        }
        let backend = SqliteBackend::open(&path).unwrap();
        let doc = backend.get("plans/p").await.unwrap().unwrap();
        assert_eq!(doc.body["total_specs"], 2);
        assert_eq!(doc.version, 1);
    }

    #[tokio::test]
    async fn conditional_create_detects_existing_plan() {
        let (backend, _dir) = open_temp();
        backend
            .create_all(vec![("plans/p".to_string(), json!(1))])
            .await
            .unwrap();
        let err = backend
            .create_all(vec![("plans/p".to_string(), json!(2))])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists));
    }

    #[tokio::test]
    async fn commit_validates_versions_and_bumps_them() {
        let (backend, _dir) = open_temp();
        backend
            .create_all(vec![("k".to_string(), json!(1))])
            .await
            .unwrap();

        backend
            .commit(vec![("k".to_string(), 1)], vec![("k".to_string(), json!(2))])
            .await
            .unwrap();
        assert_eq!(backend.get("k").await.unwrap().unwrap().version, 2);

        let err = backend
            .commit(vec![("k".to_string(), 1)], vec![("k".to_string(), json!(3))])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn list_prefix_scopes_to_one_plan() {
        let (backend, _dir) = open_temp();
        backend
            .create_all(vec![
                ("plans/a/specs/0000".to_string(), json!(0)),
                ("plans/a/specs/0001".to_string(), json!(1)),
                ("plans/ab/specs/0000".to_string(), json!(9)),
            ])
            .await
            .unwrap();
        let docs = backend.list_prefix("plans/a/specs/").await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].key, "plans/a/specs/0000");
        assert_eq!(docs[1].key, "plans/a/specs/0001");
    }
}
