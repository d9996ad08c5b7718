use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use rusqlite::Connection;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use super::TaskSource;
use crate::models::UserTask;

/// SQLite-backed task assignments.
///
/// Lookups from the pipeline run on tokio's blocking pool. The CLI-facing
/// `assign` and `unassign` stay synchronous.
pub struct SqliteTaskStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTaskStore {
    /// Open or create the task table in the given database.
    /// Use `":memory:"` for tests.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path).context("failed to open task database")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS user_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                user_id TEXT NOT NULL,
                task_type TEXT NOT NULL,
                UNIQUE (user_id, task_type)
            )",
        )
        .context("failed to create user_tasks table")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        lock(&self.conn)
    }

    /// Assign a check to a user. Assigning the same type twice is a no-op.
    pub fn assign(&self, user_id: Uuid, task_type: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO user_tasks (user_id, task_type) VALUES (?1, ?2)",
            [user_id.to_string().as_str(), task_type],
        )?;
        Ok(())
    }

    /// Remove a check from a user. Returns how many rows went away.
    pub fn unassign(&self, user_id: Uuid, task_type: &str) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM user_tasks WHERE user_id = ?1 AND task_type = ?2",
            [user_id.to_string().as_str(), task_type],
        )?;
        Ok(removed)
    }

    fn load(conn: &Mutex<Connection>, user_id: Uuid) -> Result<Vec<UserTask>> {
        let conn = lock(conn)?;
        let mut stmt =
            conn.prepare("SELECT task_type FROM user_tasks WHERE user_id = ?1 ORDER BY id ASC")?;
        let tasks = stmt
            .query_map([user_id.to_string()], |row| row.get::<_, String>(0))?
            .map(|kind| kind.map(|kind| UserTask::new(user_id, kind)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tasks)
    }
}

#[async_trait]
impl TaskSource for SqliteTaskStore {
    async fn user_tasks(&self, user_id: Uuid) -> Result<Vec<UserTask>> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || Self::load(&conn, user_id))
            .await
            .context("task lookup did not complete")?
            .with_context(|| format!("failed to load tasks for user {user_id}"))
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| anyhow!("task store lock poisoned"))
}
