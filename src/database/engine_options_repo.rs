// Task engine-options repository for EchoNote Core
// Runtime-only engine knobs per task, kept next to the task rows so restart
// recovery and garbage collection stay transactional with task state

use anyhow::{Context, Result};
use rusqlite::params;
use serde_json::{Map, Value};

use super::DatabaseManager;

impl DatabaseManager {
    pub fn set_task_engine_options(&self, task_id: &str, options: &Map<String, Value>) -> Result<()> {
        let serialized =
            serde_json::to_string(options).context("Failed to serialize engine options")?;
        self.with_connection(|conn| {
            conn.execute(
                "INSERT INTO task_engine_options (task_id, options) VALUES (?1, ?2)
                 ON CONFLICT(task_id) DO UPDATE SET options = excluded.options",
                params![task_id, serialized],
            )
            .context("Failed to save engine options")?;
            Ok(())
        })
    }

    pub fn get_task_engine_options(&self, task_id: &str) -> Result<Option<Map<String, Value>>> {
        self.with_connection(|conn| {
            let result = conn.query_row(
                "SELECT options FROM task_engine_options WHERE task_id = ?1",
                params![task_id],
                |row| row.get::<_, String>(0),
            );
            match result {
                Ok(raw) => Ok(serde_json::from_str::<Value>(&raw)
                    .ok()
                    .and_then(|v| v.as_object().cloned())),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e).context("Failed to get engine options"),
            }
        })
    }

    pub fn delete_task_engine_options(&self, task_id: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM task_engine_options WHERE task_id = ?1",
                params![task_id],
            )
            .context("Failed to delete engine options")?;
            Ok(())
        })
    }

    /// Drop option rows whose task no longer exists. Returns removed count.
    pub fn prune_orphan_engine_options(&self) -> Result<usize> {
        self.with_connection(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM task_engine_options
                     WHERE task_id NOT IN (SELECT id FROM transcription_tasks)",
                    [],
                )
                .context("Failed to prune orphan engine options")?;
            Ok(removed)
        })
    }
}
