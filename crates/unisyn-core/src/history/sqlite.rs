use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use super::{
    budget_window, derived_prefix, HistoryEntry, HistoryStore, MonotonicClock, Role,
    StoredMessage, DEFAULT_SHARED_LIMIT,
};
use crate::error::StoreError;
use crate::tokens::TokenCounter;

/// Durable history store backed by a single SQLite table.
///
/// Queries run on the blocking pool so a slow disk never stalls sibling
/// fan-out tasks.
pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
    clock: Arc<MonotonicClock>,
    counter: Arc<dyn TokenCounter>,
    shared_limit: usize,
}

impl SqliteHistoryStore {
    /// Open or create the history database.
    pub fn open(db_path: &Path, counter: Arc<dyn TokenCounter>) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Unavailable(format!(
                    "failed to create '{}': {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn, counter)
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory(counter: Arc<dyn TokenCounter>) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, counter)
    }

    fn with_connection(conn: Connection, counter: Arc<dyn TokenCounter>) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                partition TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                model_label TEXT,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_partition ON messages(partition, timestamp);
            CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp);",
        )?;

        // Keep timestamps increasing across restarts.
        let last: Option<i64> = conn
            .query_row("SELECT MAX(timestamp) FROM messages", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .optional()?
            .flatten();

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            clock: Arc::new(MonotonicClock::starting_after(last.unwrap_or(0))),
            counter,
            shared_limit: DEFAULT_SHARED_LIMIT,
        })
    }

    pub fn with_shared_limit(mut self, limit: usize) -> Self {
        self.shared_limit = limit;
        self
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = lock_conn(&conn)?;
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Unavailable(format!("history task failed: {e}")))?
    }
}

fn lock_conn(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock()
        .map_err(|e| StoreError::Unavailable(format!("lock poisoned: {e}")))
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, Option<String>, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn into_stored(
    rows: Vec<(String, String, Option<String>, i64)>,
) -> Result<Vec<StoredMessage>, StoreError> {
    rows.into_iter()
        .map(|(role, content, model_label, timestamp)| {
            Ok(StoredMessage {
                role: Role::parse(&role)?,
                content,
                model_label,
                timestamp,
            })
        })
        .collect()
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(
        &self,
        partition: &str,
        role: Role,
        content: &str,
        model_label: Option<&str>,
    ) -> Result<(), StoreError> {
        let partition = partition.to_string();
        let content = content.to_string();
        let model_label = model_label.map(String::from);
        let clock = self.clock.clone();
        self.with_conn(move |conn| {
            // Stamped while holding the connection so rows are inserted in timestamp order.
            let timestamp = clock.next();
            conn.execute(
                "INSERT INTO messages (partition, role, content, model_label, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![partition, role.as_str(), content, model_label, timestamp],
            )?;
            Ok(())
        })
        .await
    }

    async fn read(
        &self,
        partition: &str,
        message_limit: usize,
        token_budget: u64,
    ) -> Result<Vec<HistoryEntry>, StoreError> {
        let partition = partition.to_string();
        let limit = message_limit.min(i64::MAX as usize) as i64;
        let newest_first = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT role, content, model_label, timestamp
                     FROM messages
                     WHERE partition = ?1
                     ORDER BY timestamp DESC, id DESC
                     LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![partition, limit], row_to_message)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                into_stored(rows)
            })
            .await?;

        Ok(budget_window(
            newest_first.iter(),
            message_limit,
            token_budget,
            self.counter.as_ref(),
        ))
    }

    async fn read_by_prefix(&self, session_id: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        // substr() rather than LIKE: '_' is a LIKE wildcard and is our separator.
        let prefix = derived_prefix(session_id);
        let limit = self.shared_limit.min(i64::MAX as usize) as i64;
        let merged = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT role, content, model_label, timestamp
                     FROM messages
                     WHERE substr(partition, 1, length(?1)) = ?1
                     ORDER BY timestamp ASC, id ASC
                     LIMIT ?2",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![prefix, limit], row_to_message)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                into_stored(rows)
            })
            .await?;
        Ok(merged.iter().map(StoredMessage::to_entry).collect())
    }

    async fn clear(&self, session_id: &str) -> Result<(), StoreError> {
        let partition = session_id.to_string();
        let removed = self
            .with_conn(move |conn| {
                Ok(conn.execute("DELETE FROM messages WHERE partition = ?1", [&partition])?)
            })
            .await?;
        debug!("Cleared {removed} messages from partition '{session_id}'");
        Ok(())
    }

    async fn clear_by_prefix(&self, session_id: &str) -> Result<usize, StoreError> {
        let prefix = derived_prefix(session_id);
        self.with_conn(move |conn| {
            Ok(conn.execute(
                "DELETE FROM messages WHERE substr(partition, 1, length(?1)) = ?1",
                [&prefix],
            )?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::model_partition;
    use crate::tokens::CharEstimateCounter;

    fn store() -> SqliteHistoryStore {
        SqliteHistoryStore::open_in_memory(Arc::new(CharEstimateCounter)).unwrap()
    }

    #[tokio::test]
    async fn test_new_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("nested").join("history.sqlite");
        let s = SqliteHistoryStore::open(&db_path, Arc::new(CharEstimateCounter)).unwrap();
        assert!(db_path.exists());

        let conn = lock_conn(&s.conn).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name = 'messages'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_append_then_read_roundtrip() {
        let s = store();
        s.append("s1", Role::User, "Hello 🦀", None).await.unwrap();
        s.append("s1_a", Role::Assistant, "Hi!", Some("Model A"))
            .await
            .unwrap();

        let user = s.read("s1", 50, 4000).await.unwrap();
        assert_eq!(user.len(), 1);
        assert_eq!(user[0].role, Role::User);
        assert_eq!(user[0].content, "Hello 🦀");

        let private = s.read("s1_a", 50, 4000).await.unwrap();
        assert_eq!(private[0].role, Role::Assistant);
        assert_eq!(private[0].model_label.as_deref(), Some("Model A"));
    }

    #[tokio::test]
    async fn test_read_limit_and_budget() {
        let s = SqliteHistoryStore::open_in_memory(Arc::new(|t: &str| t.len() as u64)).unwrap();
        for c in ["aaaaaaaa", "bbb", "cc", "d"] {
            s.append("s1", Role::User, c, None).await.unwrap();
        }
        // Budget 6: d(1) + cc(2) + bbb(3) = 6 fits, aaaaaaaa does not
        let h = s.read("s1", 50, 6).await.unwrap();
        let contents: Vec<_> = h.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["bbb", "cc", "d"]);

        let h = s.read("s1", 2, 100).await.unwrap();
        let contents: Vec<_> = h.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["cc", "d"]);
    }

    #[tokio::test]
    async fn test_prefix_is_literal_not_wildcard() {
        let s = store();
        s.append(&model_partition("s1", "a"), Role::Assistant, "mine", Some("A"))
            .await
            .unwrap();
        // With LIKE 's1_%', 's1x...' would match because '_' is a wildcard.
        s.append("s1xa", Role::Assistant, "not mine", Some("A"))
            .await
            .unwrap();

        let merged = s.read_by_prefix("s1").await.unwrap();
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content, "mine");

        assert_eq!(s.clear_by_prefix("s1").await.unwrap(), 1);
        assert_eq!(s.read("s1xa", 50, 4000).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_read_by_prefix_orders_by_timestamp() {
        let s = store();
        s.append("s1_b", Role::Assistant, "b1", Some("B")).await.unwrap();
        s.append("s1_a", Role::Assistant, "a1", Some("A")).await.unwrap();
        s.append("s1_b", Role::Assistant, "b2", Some("B")).await.unwrap();
        let merged = s.read_by_prefix("s1").await.unwrap();
        let contents: Vec<_> = merged.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["b1", "a1", "b2"]);
    }

    #[tokio::test]
    async fn test_clear_exact_partition_only() {
        let s = store();
        s.append("s1", Role::User, "q", None).await.unwrap();
        s.append("s1_a", Role::Assistant, "r", Some("A")).await.unwrap();
        s.clear("s1").await.unwrap();
        assert!(s.read("s1", 50, 4000).await.unwrap().is_empty());
        assert_eq!(s.read("s1_a", 50, 4000).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reopen_keeps_history_and_clock() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("history.sqlite");
        {
            let s = SqliteHistoryStore::open(&db_path, Arc::new(CharEstimateCounter)).unwrap();
            s.append("s1", Role::User, "first", None).await.unwrap();
        }
        let s = SqliteHistoryStore::open(&db_path, Arc::new(CharEstimateCounter)).unwrap();
        s.append("s1", Role::User, "second", None).await.unwrap();
        let h = s.read("s1", 50, 4000).await.unwrap();
        let contents: Vec<_> = h.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
    }
}
