// Transcription tasks repository for EchoNote Core
// CRUD and restart-recovery operations for transcription_tasks

use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};

use super::models::{TaskStatus, TranscriptionTask};
use super::{fmt_dt, fmt_opt_dt, parse_dt, parse_opt_dt, DatabaseManager};

impl DatabaseManager {
    /// Insert or fully replace a task row.
    pub fn save_task(&self, task: &TranscriptionTask) -> Result<()> {
        self.with_connection(|conn| save_task_impl(conn, task))
    }

    pub fn get_task(&self, id: &str) -> Result<Option<TranscriptionTask>> {
        self.with_connection(|conn| get_task_impl(conn, id))
    }

    /// All tasks, newest first, optionally filtered by status.
    pub fn get_all_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<TranscriptionTask>> {
        self.with_connection(|conn| get_all_tasks_impl(conn, status))
    }

    /// Tasks in `pending` or `processing`, oldest first, for restart requeue.
    pub fn get_resumable_tasks(&self) -> Result<Vec<TranscriptionTask>> {
        self.with_connection(get_resumable_tasks_impl)
    }

    /// Demote every `processing` row to `pending` with cleared progress.
    /// Returns the number of rows reset.
    pub fn reset_stale_processing_tasks(&self) -> Result<usize> {
        self.with_connection(|conn| {
            let count = conn
                .execute(
                    "UPDATE transcription_tasks
                     SET status = 'pending', progress = 0, started_at = NULL
                     WHERE status = 'processing'",
                    [],
                )
                .context("Failed to reset stale processing tasks")?;
            Ok(count)
        })
    }

    /// Fast-path progress write used by the engine progress callback.
    pub fn update_task_progress(&self, id: &str, progress: f64) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "UPDATE transcription_tasks SET progress = ?1 WHERE id = ?2",
                params![progress, id],
            )
            .context("Failed to update task progress")?;
            Ok(())
        })
    }

    pub fn delete_task_row(&self, id: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM transcription_tasks WHERE id = ?1", params![id])
                .context("Failed to delete task")?;
            Ok(())
        })
    }

    pub fn count_tasks_with_status(&self, status: TaskStatus) -> Result<i64> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM transcription_tasks WHERE status = ?1",
                params![status.as_str()],
                |row| row.get(0),
            )
            .context("Failed to count tasks")
        })
    }
}

fn save_task_impl(conn: &Connection, task: &TranscriptionTask) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO transcription_tasks (
            id, file_path, file_name, file_size, audio_duration, status, progress,
            language, engine, output_format, output_path, error_message,
            created_at, started_at, completed_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        ON CONFLICT(id) DO UPDATE SET
            audio_duration = excluded.audio_duration,
            status = excluded.status,
            progress = excluded.progress,
            language = excluded.language,
            output_format = excluded.output_format,
            output_path = excluded.output_path,
            error_message = excluded.error_message,
            started_at = excluded.started_at,
            completed_at = excluded.completed_at
        "#,
        params![
            task.id,
            task.file_path,
            task.file_name,
            task.file_size as i64,
            task.audio_duration,
            task.status.as_str(),
            task.progress,
            task.language,
            task.engine,
            task.output_format,
            task.output_path,
            task.error_message,
            fmt_dt(&task.created_at),
            fmt_opt_dt(&task.started_at),
            fmt_opt_dt(&task.completed_at),
        ],
    )
    .context("Failed to save task")?;
    Ok(())
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<TranscriptionTask> {
    let status_raw: String = row.get(5)?;
    let created_raw: String = row.get(12)?;
    Ok(TranscriptionTask {
        id: row.get(0)?,
        file_path: row.get(1)?,
        file_name: row.get(2)?,
        file_size: row.get::<_, i64>(3)?.max(0) as u64,
        audio_duration: row.get(4)?,
        status: TaskStatus::parse(&status_raw).unwrap_or(TaskStatus::Failed),
        progress: row.get(6)?,
        language: row.get(7)?,
        engine: row.get(8)?,
        output_format: row.get(9)?,
        output_path: row.get(10)?,
        error_message: row.get(11)?,
        created_at: parse_dt(&created_raw).unwrap_or_else(chrono::Local::now),
        started_at: parse_opt_dt(row.get(13)?),
        completed_at: parse_opt_dt(row.get(14)?),
    })
}

const TASK_COLUMNS: &str = "id, file_path, file_name, file_size, audio_duration, status, progress, \
     language, engine, output_format, output_path, error_message, \
     created_at, started_at, completed_at";

fn get_task_impl(conn: &Connection, id: &str) -> Result<Option<TranscriptionTask>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM transcription_tasks WHERE id = ?1"
        ))
        .context("Failed to prepare get_task query")?;

    let result = stmt.query_row(params![id], row_to_task);
    match result {
        Ok(task) => Ok(Some(task)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("Failed to get task"),
    }
}

fn get_all_tasks_impl(
    conn: &Connection,
    status: Option<TaskStatus>,
) -> Result<Vec<TranscriptionTask>> {
    let mut results = Vec::new();

    match status {
        Some(status) => {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM transcription_tasks
                     WHERE status = ?1 ORDER BY created_at DESC"
                ))
                .context("Failed to prepare task list query")?;
            let rows = stmt
                .query_map(params![status.as_str()], row_to_task)
                .context("Failed to query tasks")?;
            for row in rows {
                results.push(row.context("Failed to read task row")?);
            }
        }
        None => {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {TASK_COLUMNS} FROM transcription_tasks ORDER BY created_at DESC"
                ))
                .context("Failed to prepare task list query")?;
            let rows = stmt
                .query_map([], row_to_task)
                .context("Failed to query tasks")?;
            for row in rows {
                results.push(row.context("Failed to read task row")?);
            }
        }
    }

    Ok(results)
}

fn get_resumable_tasks_impl(conn: &Connection) -> Result<Vec<TranscriptionTask>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM transcription_tasks
             WHERE status IN ('pending', 'processing')
             ORDER BY created_at ASC"
        ))
        .context("Failed to prepare resumable task query")?;

    let rows = stmt
        .query_map([], row_to_task)
        .context("Failed to query resumable tasks")?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row.context("Failed to read task row")?);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_db() -> (tempfile::TempDir, DatabaseManager) {
        let dir = tempdir().unwrap();
        let db = DatabaseManager::new(dir.path().join("test.db"), None).unwrap();
        (dir, db)
    }

    fn sample_task(name: &str) -> TranscriptionTask {
        TranscriptionTask::new(
            format!("/tmp/{name}"),
            name.to_string(),
            1024,
            "faster_whisper".to_string(),
        )
    }

    #[test]
    fn test_save_and_get_task() {
        let (_dir, db) = create_test_db();
        let task = sample_task("a.wav");
        db.save_task(&task).unwrap();

        let loaded = db.get_task(&task.id).unwrap().unwrap();
        assert_eq!(loaded.file_name, "a.wav");
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.file_size, 1024);
    }

    #[test]
    fn test_update_via_save() {
        let (_dir, db) = create_test_db();
        let mut task = sample_task("b.wav");
        db.save_task(&task).unwrap();

        task.status = TaskStatus::Completed;
        task.progress = 100.0;
        task.audio_duration = Some(12.5);
        db.save_task(&task).unwrap();

        let loaded = db.get_task(&task.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert_eq!(loaded.progress, 100.0);
        assert_eq!(loaded.audio_duration, Some(12.5));
    }

    #[test]
    fn test_reset_stale_processing() {
        let (_dir, db) = create_test_db();
        let mut stuck = sample_task("stuck.wav");
        stuck.status = TaskStatus::Processing;
        stuck.progress = 55.0;
        stuck.started_at = Some(chrono::Local::now());
        db.save_task(&stuck).unwrap();

        let pending = sample_task("waiting.wav");
        db.save_task(&pending).unwrap();

        let reset = db.reset_stale_processing_tasks().unwrap();
        assert_eq!(reset, 1);

        let loaded = db.get_task(&stuck.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.progress, 0.0);
        assert!(loaded.started_at.is_none());
    }

    #[test]
    fn test_resumable_order_is_oldest_first() {
        let (_dir, db) = create_test_db();
        let mut first = sample_task("first.wav");
        first.created_at = chrono::Local::now() - chrono::Duration::minutes(10);
        db.save_task(&first).unwrap();

        let second = sample_task("second.wav");
        db.save_task(&second).unwrap();

        let mut done = sample_task("done.wav");
        done.status = TaskStatus::Completed;
        db.save_task(&done).unwrap();

        let resumable = db.get_resumable_tasks().unwrap();
        assert_eq!(resumable.len(), 2);
        assert_eq!(resumable[0].id, first.id);
        assert_eq!(resumable[1].id, second.id);
    }

    #[test]
    fn test_status_filter_and_count() {
        let (_dir, db) = create_test_db();
        let mut failed = sample_task("f.wav");
        failed.status = TaskStatus::Failed;
        db.save_task(&failed).unwrap();
        db.save_task(&sample_task("p.wav")).unwrap();

        let only_failed = db.get_all_tasks(Some(TaskStatus::Failed)).unwrap();
        assert_eq!(only_failed.len(), 1);
        assert_eq!(db.count_tasks_with_status(TaskStatus::Pending).unwrap(), 1);
    }

    #[test]
    fn test_delete_task_row() {
        let (_dir, db) = create_test_db();
        let task = sample_task("gone.wav");
        db.save_task(&task).unwrap();
        db.delete_task_row(&task.id).unwrap();
        assert!(db.get_task(&task.id).unwrap().is_none());
    }
}
