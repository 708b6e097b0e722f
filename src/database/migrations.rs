// Database migrations for EchoNote Core
// Creates and updates the schema; version is tracked in app_settings

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Current schema version
const SCHEMA_VERSION: i64 = 1;

/// Run all necessary migrations to bring the database up to date.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Get the current schema version, or 0 when the settings table is missing.
pub fn get_schema_version(conn: &Connection) -> Result<i64> {
    let table_exists: bool = conn
        .query_row(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='app_settings'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(false);

    if !table_exists {
        return Ok(0);
    }

    let version: i64 = conn
        .query_row(
            "SELECT value FROM app_settings WHERE key = 'schema_version'",
            [],
            |row| {
                row.get::<_, String>(0)
                    .map(|v| v.parse::<i64>().unwrap_or(0))
            },
        )
        .unwrap_or(0);

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO app_settings (key, value, updated_at)
         VALUES ('schema_version', ?1, datetime('now'))",
        [version.to_string()],
    )
    .context("Failed to record schema version")?;
    Ok(())
}

/// Initial schema creation (version 1)
fn migrate_v1(conn: &Connection) -> Result<()> {
    log::info!("Running database migration v1");

    conn.execute_batch(
        r#"
        -- Application settings and schema version tracking
        CREATE TABLE IF NOT EXISTS app_settings (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Batch transcription tasks
        CREATE TABLE IF NOT EXISTS transcription_tasks (
            id TEXT PRIMARY KEY NOT NULL,
            file_path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            audio_duration REAL,
            status TEXT NOT NULL DEFAULT 'pending',
            progress REAL NOT NULL DEFAULT 0,
            language TEXT,
            engine TEXT NOT NULL,
            output_format TEXT NOT NULL DEFAULT 'txt',
            output_path TEXT,
            error_message TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_transcription_tasks_status
        ON transcription_tasks(status);

        CREATE INDEX IF NOT EXISTS idx_transcription_tasks_created
        ON transcription_tasks(created_at);

        -- Engine-only options per task. No foreign key: rows may outlive a
        -- crashed run and are garbage-collected on startup instead.
        CREATE TABLE IF NOT EXISTS task_engine_options (
            task_id TEXT PRIMARY KEY NOT NULL,
            options TEXT NOT NULL
        );

        -- Locally stored calendar events
        CREATE TABLE IF NOT EXISTS calendar_events (
            id TEXT PRIMARY KEY NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            event_type TEXT NOT NULL DEFAULT 'meeting',
            source TEXT NOT NULL DEFAULT 'local',
            start_time TEXT NOT NULL,
            end_time TEXT,
            attendees TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_calendar_events_start
        ON calendar_events(start_time);

        -- Artifacts bound to events; one attachment per kind per event
        CREATE TABLE IF NOT EXISTS event_attachments (
            id TEXT PRIMARY KEY NOT NULL,
            event_id TEXT NOT NULL,
            attachment_type TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_size INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (event_id, attachment_type)
        );

        CREATE INDEX IF NOT EXISTS idx_event_attachments_event
        ON event_attachments(event_id);

        -- Per-event auto-task configuration
        CREATE TABLE IF NOT EXISTS auto_task_configs (
            event_id TEXT PRIMARY KEY NOT NULL,
            enable_transcription INTEGER NOT NULL DEFAULT 0,
            enable_recording INTEGER NOT NULL DEFAULT 0,
            transcription_language TEXT,
            enable_translation INTEGER NOT NULL DEFAULT 0,
            translation_target_language TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        "#,
    )
    .context("Failed to apply schema v1")?;

    set_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_attachment_uniqueness_per_kind() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO event_attachments (id, event_id, attachment_type, file_path)
             VALUES ('a1', 'e1', 'recording', '/tmp/a.wav')",
            [],
        )
        .unwrap();

        let duplicate = conn.execute(
            "INSERT INTO event_attachments (id, event_id, attachment_type, file_path)
             VALUES ('a2', 'e1', 'recording', '/tmp/b.wav')",
            [],
        );
        assert!(duplicate.is_err());
    }
}
