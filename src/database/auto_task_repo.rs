// Auto-task configuration repository for EchoNote Core

use std::collections::HashMap;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, Row};

use super::models::AutoTaskConfig;
use super::DatabaseManager;

impl DatabaseManager {
    pub fn set_auto_task_config(&self, config: &AutoTaskConfig) -> Result<()> {
        self.with_connection(|conn| set_auto_task_config_impl(conn, config))
    }

    pub fn get_auto_task_config(&self, event_id: &str) -> Result<Option<AutoTaskConfig>> {
        self.with_connection(|conn| get_auto_task_config_impl(conn, event_id))
    }

    /// Batch-load configs for many events in one query. Events without a row
    /// are absent from the map.
    pub fn get_auto_task_configs(
        &self,
        event_ids: &[String],
    ) -> Result<HashMap<String, AutoTaskConfig>> {
        self.with_connection(|conn| get_auto_task_configs_impl(conn, event_ids))
    }

    pub fn delete_auto_task_config(&self, event_id: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute(
                "DELETE FROM auto_task_configs WHERE event_id = ?1",
                params![event_id],
            )
            .context("Failed to delete auto-task config")?;
            Ok(())
        })
    }
}

fn set_auto_task_config_impl(conn: &Connection, config: &AutoTaskConfig) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO auto_task_configs (
            event_id, enable_transcription, enable_recording,
            transcription_language, enable_translation, translation_target_language, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, datetime('now'))
        ON CONFLICT(event_id) DO UPDATE SET
            enable_transcription = excluded.enable_transcription,
            enable_recording = excluded.enable_recording,
            transcription_language = excluded.transcription_language,
            enable_translation = excluded.enable_translation,
            translation_target_language = excluded.translation_target_language,
            updated_at = datetime('now')
        "#,
        params![
            config.event_id,
            config.enable_transcription as i32,
            config.enable_recording as i32,
            config.transcription_language,
            config.enable_translation as i32,
            config.translation_target_language,
        ],
    )
    .context("Failed to save auto-task config")?;
    Ok(())
}

fn row_to_config(row: &Row<'_>) -> rusqlite::Result<AutoTaskConfig> {
    Ok(AutoTaskConfig {
        event_id: row.get(0)?,
        enable_transcription: row.get::<_, i32>(1)? != 0,
        enable_recording: row.get::<_, i32>(2)? != 0,
        transcription_language: row.get(3)?,
        enable_translation: row.get::<_, i32>(4)? != 0,
        translation_target_language: row.get(5)?,
    })
}

const CONFIG_COLUMNS: &str = "event_id, enable_transcription, enable_recording, \
     transcription_language, enable_translation, translation_target_language";

fn get_auto_task_config_impl(conn: &Connection, event_id: &str) -> Result<Option<AutoTaskConfig>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {CONFIG_COLUMNS} FROM auto_task_configs WHERE event_id = ?1"
        ))
        .context("Failed to prepare auto-task query")?;

    match stmt.query_row(params![event_id], row_to_config) {
        Ok(config) => Ok(Some(config)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("Failed to get auto-task config"),
    }
}

fn get_auto_task_configs_impl(
    conn: &Connection,
    event_ids: &[String],
) -> Result<HashMap<String, AutoTaskConfig>> {
    let mut map = HashMap::new();
    if event_ids.is_empty() {
        return Ok(map);
    }

    let placeholders: Vec<String> = (1..=event_ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT {CONFIG_COLUMNS} FROM auto_task_configs WHERE event_id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn
        .prepare(&sql)
        .context("Failed to prepare auto-task batch query")?;
    let params_refs: Vec<&dyn rusqlite::ToSql> =
        event_ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();

    let rows = stmt
        .query_map(params_refs.as_slice(), row_to_config)
        .context("Failed to query auto-task configs")?;

    for row in rows {
        let config = row.context("Failed to read auto-task row")?;
        map.insert(config.event_id.clone(), config);
    }
    Ok(map)
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

    #[test]
    fn test_set_get_update() {
        let (_dir, db) = create_test_db();

        let mut config = AutoTaskConfig {
            event_id: "e1".to_string(),
            enable_transcription: true,
            enable_recording: true,
            transcription_language: Some("en".to_string()),
            enable_translation: false,
            translation_target_language: None,
        };
        db.set_auto_task_config(&config).unwrap();

        let loaded = db.get_auto_task_config("e1").unwrap().unwrap();
        assert!(loaded.enable_transcription && loaded.enable_recording);

        config.enable_recording = false;
        db.set_auto_task_config(&config).unwrap();
        let loaded = db.get_auto_task_config("e1").unwrap().unwrap();
        assert!(!loaded.enable_recording);
    }

    #[test]
    fn test_batch_load_skips_missing() {
        let (_dir, db) = create_test_db();
        db.set_auto_task_config(&AutoTaskConfig {
            event_id: "e1".to_string(),
            enable_recording: true,
            ..Default::default()
        })
        .unwrap();

        let map = db
            .get_auto_task_configs(&["e1".to_string(), "e2".to_string()])
            .unwrap();
        assert!(map.contains_key("e1"));
        assert!(!map.contains_key("e2"));
    }

    #[test]
    fn test_missing_config_is_none() {
        let (_dir, db) = create_test_db();
        assert!(db.get_auto_task_config("nope").unwrap().is_none());
    }
}
