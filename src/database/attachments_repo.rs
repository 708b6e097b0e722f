// Event attachments repository for EchoNote Core
// One attachment per kind per event; the latest write wins

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Local;
use rusqlite::{params, Connection, Row};

use super::models::{AttachmentKind, EventAttachment};
use super::{fmt_dt, parse_dt, DatabaseManager};

impl DatabaseManager {
    /// Insert or replace the attachment of this kind for the event.
    pub fn upsert_attachment(&self, attachment: &EventAttachment) -> Result<()> {
        self.with_connection(|conn| upsert_attachment_impl(conn, attachment))
    }

    pub fn get_attachments_for_event(&self, event_id: &str) -> Result<Vec<EventAttachment>> {
        Ok(self
            .get_attachments_for_events(&[event_id.to_string()])?
            .remove(event_id)
            .unwrap_or_default())
    }

    /// Batch-load attachments for many events in one query.
    pub fn get_attachments_for_events(
        &self,
        event_ids: &[String],
    ) -> Result<HashMap<String, Vec<EventAttachment>>> {
        self.with_connection(|conn| get_attachments_for_events_impl(conn, event_ids))
    }

    pub fn delete_attachment(&self, id: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM event_attachments WHERE id = ?1", params![id])
                .context("Failed to delete attachment")?;
            Ok(())
        })
    }

    /// Event ids that carry a textual attachment, most recent first.
    pub fn get_events_with_transcripts(&self, limit: usize) -> Result<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT DISTINCT event_id FROM event_attachments
                     WHERE attachment_type IN ('transcript', 'translation')
                     ORDER BY created_at DESC LIMIT ?1",
                )
                .context("Failed to prepare transcript events query")?;
            let rows = stmt
                .query_map(params![limit as i64], |row| row.get::<_, String>(0))
                .context("Failed to query transcript events")?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row.context("Failed to read event id")?);
            }
            Ok(ids)
        })
    }
}

fn upsert_attachment_impl(conn: &Connection, attachment: &EventAttachment) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO event_attachments (id, event_id, attachment_type, file_path, file_size, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(event_id, attachment_type) DO UPDATE SET
            id = excluded.id,
            file_path = excluded.file_path,
            file_size = excluded.file_size,
            created_at = excluded.created_at
        "#,
        params![
            attachment.id,
            attachment.event_id,
            attachment.kind.as_str(),
            attachment.file_path,
            attachment.file_size as i64,
            fmt_dt(&attachment.created_at),
        ],
    )
    .context("Failed to upsert attachment")?;
    Ok(())
}

fn row_to_attachment(row: &Row<'_>) -> rusqlite::Result<Option<EventAttachment>> {
    let kind_raw: String = row.get(2)?;
    let created_raw: String = row.get(5)?;
    let kind = match AttachmentKind::parse(&kind_raw) {
        Some(kind) => kind,
        None => return Ok(None),
    };
    Ok(Some(EventAttachment {
        id: row.get(0)?,
        event_id: row.get(1)?,
        kind,
        file_path: row.get(3)?,
        file_size: row.get::<_, i64>(4)?.max(0) as u64,
        created_at: parse_dt(&created_raw).unwrap_or_else(Local::now),
    }))
}

fn get_attachments_for_events_impl(
    conn: &Connection,
    event_ids: &[String],
) -> Result<HashMap<String, Vec<EventAttachment>>> {
    let mut map: HashMap<String, Vec<EventAttachment>> = HashMap::new();
    if event_ids.is_empty() {
        return Ok(map);
    }

    let placeholders: Vec<String> = (1..=event_ids.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "SELECT id, event_id, attachment_type, file_path, file_size, created_at
         FROM event_attachments WHERE event_id IN ({})",
        placeholders.join(", ")
    );

    let mut stmt = conn
        .prepare(&sql)
        .context("Failed to prepare attachments query")?;
    let params_refs: Vec<&dyn rusqlite::ToSql> =
        event_ids.iter().map(|id| id as &dyn rusqlite::ToSql).collect();

    let rows = stmt
        .query_map(params_refs.as_slice(), row_to_attachment)
        .context("Failed to query attachments")?;

    for row in rows {
        if let Some(attachment) = row.context("Failed to read attachment row")? {
            map.entry(attachment.event_id.clone())
                .or_default()
                .push(attachment);
        }
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
    fn test_latest_attachment_wins_per_kind() {
        let (_dir, db) = create_test_db();

        db.upsert_attachment(&EventAttachment::new(
            "e1".to_string(),
            AttachmentKind::Recording,
            "/tmp/old.wav".to_string(),
            10,
        ))
        .unwrap();
        db.upsert_attachment(&EventAttachment::new(
            "e1".to_string(),
            AttachmentKind::Recording,
            "/tmp/new.wav".to_string(),
            20,
        ))
        .unwrap();

        let attachments = db.get_attachments_for_event("e1").unwrap();
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].file_path, "/tmp/new.wav");
        assert_eq!(attachments[0].file_size, 20);
    }

    #[test]
    fn test_batch_load_groups_by_event() {
        let (_dir, db) = create_test_db();

        for (event, kind, path) in [
            ("e1", AttachmentKind::Recording, "/tmp/e1.wav"),
            ("e1", AttachmentKind::Transcript, "/tmp/e1.txt"),
            ("e2", AttachmentKind::Transcript, "/tmp/e2.txt"),
        ] {
            db.upsert_attachment(&EventAttachment::new(
                event.to_string(),
                kind,
                path.to_string(),
                1,
            ))
            .unwrap();
        }

        let map = db
            .get_attachments_for_events(&["e1".to_string(), "e2".to_string(), "e3".to_string()])
            .unwrap();
        assert_eq!(map.get("e1").map(Vec::len), Some(2));
        assert_eq!(map.get("e2").map(Vec::len), Some(1));
        assert!(map.get("e3").is_none());
    }

    #[test]
    fn test_events_with_transcripts() {
        let (_dir, db) = create_test_db();
        db.upsert_attachment(&EventAttachment::new(
            "e1".to_string(),
            AttachmentKind::Recording,
            "/tmp/r.wav".to_string(),
            1,
        ))
        .unwrap();
        db.upsert_attachment(&EventAttachment::new(
            "e2".to_string(),
            AttachmentKind::Transcript,
            "/tmp/t.txt".to_string(),
            1,
        ))
        .unwrap();

        let ids = db.get_events_with_transcripts(10).unwrap();
        assert_eq!(ids, vec!["e2".to_string()]);
    }
}
