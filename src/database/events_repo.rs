// Calendar events repository for EchoNote Core
// CRUD and keyword search over locally stored events

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use rusqlite::{params, Connection, Row};

use super::models::CalendarEvent;
use super::{fmt_dt, fmt_opt_dt, parse_dt, parse_opt_dt, DatabaseManager};

impl DatabaseManager {
    pub fn save_event(&self, event: &CalendarEvent) -> Result<()> {
        self.with_connection(|conn| save_event_impl(conn, event))
    }

    pub fn get_event(&self, id: &str) -> Result<Option<CalendarEvent>> {
        self.with_connection(|conn| get_event_impl(conn, id))
    }

    /// Events overlapping `[start, end]`, ordered by start time.
    pub fn get_events_in_range(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> Result<Vec<CalendarEvent>> {
        self.with_connection(|conn| get_events_in_range_impl(conn, start, end))
    }

    /// LIKE search over title and description.
    pub fn search_events_by_keyword(
        &self,
        keyword: &str,
        event_type: Option<&str>,
        source: Option<&str>,
    ) -> Result<Vec<CalendarEvent>> {
        self.with_connection(|conn| search_events_impl(conn, keyword, event_type, source))
    }

    /// Earliest start and latest end across stored events.
    pub fn get_event_time_bounds(
        &self,
        event_type: Option<&str>,
        source: Option<&str>,
    ) -> Result<Option<(DateTime<Local>, DateTime<Local>)>> {
        self.with_connection(|conn| get_time_bounds_impl(conn, event_type, source))
    }

    pub fn delete_event(&self, id: &str) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("DELETE FROM calendar_events WHERE id = ?1", params![id])
                .context("Failed to delete event")?;
            Ok(())
        })
    }
}

const EVENT_COLUMNS: &str =
    "id, title, description, event_type, source, start_time, end_time, attendees";

fn save_event_impl(conn: &Connection, event: &CalendarEvent) -> Result<()> {
    let attendees =
        serde_json::to_string(&event.attendees).context("Failed to serialize attendees")?;

    conn.execute(
        r#"
        INSERT INTO calendar_events (
            id, title, description, event_type, source, start_time, end_time, attendees
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(id) DO UPDATE SET
            title = excluded.title,
            description = excluded.description,
            event_type = excluded.event_type,
            source = excluded.source,
            start_time = excluded.start_time,
            end_time = excluded.end_time,
            attendees = excluded.attendees,
            updated_at = datetime('now')
        "#,
        params![
            event.id,
            event.title,
            event.description,
            event.event_type,
            event.source,
            fmt_dt(&event.start_time),
            fmt_opt_dt(&event.end_time),
            attendees,
        ],
    )
    .context("Failed to save event")?;
    Ok(())
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<CalendarEvent> {
    let start_raw: String = row.get(5)?;
    let attendees_raw: String = row.get(7)?;
    Ok(CalendarEvent {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        event_type: row.get(3)?,
        source: row.get(4)?,
        start_time: parse_dt(&start_raw).unwrap_or_else(Local::now),
        end_time: parse_opt_dt(row.get(6)?),
        attendees: serde_json::from_str(&attendees_raw).unwrap_or_default(),
    })
}

fn get_event_impl(conn: &Connection, id: &str) -> Result<Option<CalendarEvent>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM calendar_events WHERE id = ?1"
        ))
        .context("Failed to prepare get_event query")?;

    match stmt.query_row(params![id], row_to_event) {
        Ok(event) => Ok(Some(event)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("Failed to get event"),
    }
}

fn get_events_in_range_impl(
    conn: &Connection,
    start: DateTime<Local>,
    end: DateTime<Local>,
) -> Result<Vec<CalendarEvent>> {
    // Overlap filter: an event matches when its window intersects the range.
    // Events without an end time use their start as the end.
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM calendar_events
             WHERE COALESCE(end_time, start_time) >= ?1 AND start_time <= ?2
             ORDER BY start_time ASC"
        ))
        .context("Failed to prepare range query")?;

    let rows = stmt
        .query_map(params![fmt_dt(&start), fmt_dt(&end)], row_to_event)
        .context("Failed to query events in range")?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row.context("Failed to read event row")?);
    }
    Ok(results)
}

fn search_events_impl(
    conn: &Connection,
    keyword: &str,
    event_type: Option<&str>,
    source: Option<&str>,
) -> Result<Vec<CalendarEvent>> {
    let pattern = format!("%{keyword}%");
    let mut sql = format!(
        "SELECT {EVENT_COLUMNS} FROM calendar_events
         WHERE (title LIKE ?1 OR COALESCE(description, '') LIKE ?1)"
    );

    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(pattern)];
    if let Some(event_type) = event_type {
        params_vec.push(Box::new(event_type.to_string()));
        sql.push_str(&format!(" AND event_type = ?{}", params_vec.len()));
    }
    if let Some(source) = source {
        params_vec.push(Box::new(source.to_string()));
        sql.push_str(&format!(" AND source = ?{}", params_vec.len()));
    }
    sql.push_str(" ORDER BY start_time DESC");

    let mut stmt = conn.prepare(&sql).context("Failed to prepare search query")?;
    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();

    let rows = stmt
        .query_map(params_refs.as_slice(), row_to_event)
        .context("Failed to search events")?;

    let mut results = Vec::new();
    for row in rows {
        results.push(row.context("Failed to read event row")?);
    }
    Ok(results)
}

fn get_time_bounds_impl(
    conn: &Connection,
    event_type: Option<&str>,
    source: Option<&str>,
) -> Result<Option<(DateTime<Local>, DateTime<Local>)>> {
    let mut sql = "SELECT MIN(start_time), MAX(COALESCE(end_time, start_time))
         FROM calendar_events WHERE 1=1"
        .to_string();

    let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    if let Some(event_type) = event_type {
        params_vec.push(Box::new(event_type.to_string()));
        sql.push_str(&format!(" AND event_type = ?{}", params_vec.len()));
    }
    if let Some(source) = source {
        params_vec.push(Box::new(source.to_string()));
        sql.push_str(&format!(" AND source = ?{}", params_vec.len()));
    }

    let params_refs: Vec<&dyn rusqlite::ToSql> = params_vec.iter().map(|b| b.as_ref()).collect();
    let bounds: (Option<String>, Option<String>) = conn
        .query_row(&sql, params_refs.as_slice(), |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .context("Failed to query event time bounds")?;

    match bounds {
        (Some(min_raw), Some(max_raw)) => {
            let min = parse_dt(&min_raw);
            let max = parse_dt(&max_raw);
            Ok(min.zip(max))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    fn create_test_db() -> (tempfile::TempDir, DatabaseManager) {
        let dir = tempdir().unwrap();
        let db = DatabaseManager::new(dir.path().join("test.db"), None).unwrap();
        (dir, db)
    }

    #[test]
    fn test_save_and_get_event() {
        let (_dir, db) = create_test_db();
        let start = Local::now();
        let mut event = CalendarEvent::new("Design review".to_string(), start, None);
        event.attendees = vec!["alice@example.com".to_string()];
        db.save_event(&event).unwrap();

        let loaded = db.get_event(&event.id).unwrap().unwrap();
        assert_eq!(loaded.title, "Design review");
        assert_eq!(loaded.attendees, vec!["alice@example.com".to_string()]);
    }

    #[test]
    fn test_overlap_query_catches_spanning_event() {
        let (_dir, db) = create_test_db();
        let now = Local::now();

        // Event spans the start of the query range.
        let event = CalendarEvent::new(
            "overnight".to_string(),
            now - Duration::hours(2),
            Some(now + Duration::hours(1)),
        );
        db.save_event(&event).unwrap();

        let found = db
            .get_events_in_range(now, now + Duration::hours(4))
            .unwrap();
        assert_eq!(found.len(), 1);

        // Fully before the range: excluded.
        let early = db
            .get_events_in_range(now + Duration::hours(2), now + Duration::hours(4))
            .unwrap();
        assert!(early.is_empty());
    }

    #[test]
    fn test_keyword_search_title_and_description() {
        let (_dir, db) = create_test_db();
        let now = Local::now();

        let mut a = CalendarEvent::new("Quarterly planning".to_string(), now, None);
        a.description = Some("budget review".to_string());
        db.save_event(&a).unwrap();
        db.save_event(&CalendarEvent::new("Standup".to_string(), now, None))
            .unwrap();

        assert_eq!(db.search_events_by_keyword("planning", None, None).unwrap().len(), 1);
        assert_eq!(db.search_events_by_keyword("budget", None, None).unwrap().len(), 1);
        assert_eq!(db.search_events_by_keyword("retro", None, None).unwrap().len(), 0);
    }

    #[test]
    fn test_time_bounds() {
        let (_dir, db) = create_test_db();
        assert!(db.get_event_time_bounds(None, None).unwrap().is_none());

        let now = Local::now();
        db.save_event(&CalendarEvent::new(
            "first".to_string(),
            now - Duration::days(3),
            Some(now - Duration::days(3) + Duration::hours(1)),
        ))
        .unwrap();
        db.save_event(&CalendarEvent::new(
            "last".to_string(),
            now,
            Some(now + Duration::hours(2)),
        ))
        .unwrap();

        let (min, max) = db.get_event_time_bounds(None, None).unwrap().unwrap();
        assert!(min < max);
        assert!((max - now).num_hours() >= 1);
    }
}
