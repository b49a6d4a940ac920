use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};

/// Platform primitive for "run this later, possibly after a restart".
#[async_trait]
pub trait SyncScheduler: Send + Sync {
  /// Register a deferred sync under `tag`. Registering an already pending
  /// tag is a no-op.
  async fn register(&self, tag: &str) -> Result<()>;
}

const SCHEDULER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS sync_registrations (
    tag TEXT PRIMARY KEY,
    registered_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

/// Scheduler that persists pending tags next to the mutation queue.
///
/// Pending registrations are fired by whoever next calls [`take_pending`],
/// typically the CLI `sync` command.
///
/// [`take_pending`]: SqliteScheduler::take_pending
#[derive(Debug, Clone)]
pub struct SqliteScheduler {
  path: PathBuf,
}

impl SqliteScheduler {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  fn connect(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create scheduler directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open scheduler database at {}: {}", path.display(), e))?;
    conn
      .execute_batch(SCHEDULER_SCHEMA)
      .map_err(|e| eyre!("Failed to create sync registrations: {}", e))?;

    Ok(conn)
  }

  /// Remove and return every pending tag, oldest first.
  pub async fn take_pending(&self) -> Result<Vec<String>> {
    let path = self.path.clone();
    tokio::task::spawn_blocking(move || {
      let mut conn = Self::connect(&path)?;
      let tx = conn
        .transaction()
        .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

      let tags = {
        let mut stmt = tx
          .prepare("SELECT tag FROM sync_registrations ORDER BY registered_at, tag")
          .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
        let tags = stmt
          .query_map([], |row| row.get(0))
          .map_err(|e| eyre!("Failed to list sync registrations: {}", e))?
          .collect::<rusqlite::Result<Vec<String>>>()
          .map_err(|e| eyre!("Failed to read sync registration: {}", e))?;
        tags
      };

      tx.execute("DELETE FROM sync_registrations", [])
        .map_err(|e| eyre!("Failed to clear sync registrations: {}", e))?;
      tx.commit()
        .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

      Ok(tags)
    })
    .await
    .map_err(|e| eyre!("Scheduler task panicked: {}", e))?
  }
}

#[async_trait]
impl SyncScheduler for SqliteScheduler {
  async fn register(&self, tag: &str) -> Result<()> {
    let path = self.path.clone();
    let tag = tag.to_string();
    tokio::task::spawn_blocking(move || {
      let conn = Self::connect(&path)?;
      conn
        .execute(
          "INSERT OR IGNORE INTO sync_registrations (tag) VALUES (?)",
          params![tag],
        )
        .map_err(|e| eyre!("Failed to register sync {}: {}", tag, e))?;
      Ok(())
    })
    .await
    .map_err(|e| eyre!("Scheduler task panicked: {}", e))?
  }
}
