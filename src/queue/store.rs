use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::types::{NewMutation, QueuedMutation};
use super::QueueStore;
use crate::net::Method;

/// Schema for the mutation queue, applied on every open.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS mutations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body TEXT NOT NULL,
    enqueued_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_mutations_enqueued_at ON mutations(enqueued_at);
"#;

/// SQLite-backed mutation queue.
///
/// Holds only the database path. Each operation opens a connection, creates
/// the table if needed, runs in its own transaction and closes again.
#[derive(Debug, Clone)]
pub struct SqliteQueue {
  path: PathBuf,
}

impl SqliteQueue {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create queue directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open queue database at {}: {}", path.display(), e))?;

    conn
      .execute_batch(QUEUE_SCHEMA)
      .map_err(|e| eyre!("Failed to create mutation queue: {}", e))?;

    Ok(conn)
  }

  /// Run `op` against a fresh connection on the blocking pool.
  async fn with_connection<T, F>(&self, op: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
  {
    let path = self.path.clone();
    tokio::task::spawn_blocking(move || {
      let mut conn = Self::connect(&path)?;
      op(&mut conn)
    })
    .await
    .map_err(|e| eyre!("Queue task panicked: {}", e))?
  }
}

#[async_trait]
impl QueueStore for SqliteQueue {
  async fn enqueue(&self, mutation: NewMutation) -> Result<i64> {
    self
      .with_connection(move |conn| {
        let headers = serde_json::to_string(&mutation.headers)
          .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

        let tx = conn
          .transaction()
          .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
        tx.execute(
          "INSERT INTO mutations (url, method, headers, body, enqueued_at)
           VALUES (?, ?, ?, ?, ?)",
          params![
            mutation.url,
            mutation.method.as_str(),
            headers,
            mutation.body,
            mutation.enqueued_at
          ],
        )
        .map_err(|e| eyre!("Failed to enqueue mutation for {}: {}", mutation.url, e))?;
        let id = tx.last_insert_rowid();
        tx.commit()
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

        debug!(id, url = %mutation.url, method = %mutation.method, "Mutation enqueued");
        Ok(id)
      })
      .await
  }

  async fn list_all(&self) -> Result<Vec<QueuedMutation>> {
    self
      .with_connection(|conn| {
        let mut stmt = conn
          .prepare(
            "SELECT id, url, method, headers, body, enqueued_at FROM mutations
             ORDER BY enqueued_at, id",
          )
          .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

        let rows = stmt
          .query_map([], |row| {
            Ok((
              row.get::<_, i64>(0)?,
              row.get::<_, String>(1)?,
              row.get::<_, String>(2)?,
              row.get::<_, String>(3)?,
              row.get::<_, String>(4)?,
              row.get::<_, i64>(5)?,
            ))
          })
          .map_err(|e| eyre!("Failed to list mutations: {}", e))?
          .collect::<rusqlite::Result<Vec<_>>>()
          .map_err(|e| eyre!("Failed to read mutation: {}", e))?;

        rows
          .into_iter()
          .map(|(id, url, method, headers, body, enqueued_at)| -> Result<QueuedMutation> {
            let method: Method = method.parse()?;
            let headers: Vec<(String, String)> = serde_json::from_str(&headers)
              .map_err(|e| eyre!("Failed to deserialize headers of mutation {}: {}", id, e))?;
            Ok(QueuedMutation {
              id,
              url,
              method,
              headers,
              body,
              enqueued_at,
            })
          })
          .collect()
      })
      .await
  }

  async fn remove(&self, id: i64) -> Result<()> {
    self
      .with_connection(move |conn| {
        conn
          .execute("DELETE FROM mutations WHERE id = ?", params![id])
          .map_err(|e| eyre!("Failed to remove mutation {}: {}", id, e))?;
        Ok(())
      })
      .await
  }
}
