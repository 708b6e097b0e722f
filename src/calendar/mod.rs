// Calendar store for EchoNote Core
// Local DB-backed events plus the seam external adapters plug into

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Local};

use crate::database::models::CalendarEvent;
use crate::database::DatabaseManager;

/// Filters shared by calendar and timeline queries.
#[derive(Debug, Clone, Default)]
pub struct EventFilters {
    pub event_type: Option<String>,
    pub source: Option<String>,
}

/// External calendar adapter seam (Google/Outlook sync lives outside the
/// core). Reads are assumed consistent within a single call.
pub trait CalendarSource: Send + Sync {
    fn source_name(&self) -> &str;

    fn get_events(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
        filters: &EventFilters,
    ) -> Result<Vec<CalendarEvent>>;

    fn get_event(&self, id: &str) -> Result<Option<CalendarEvent>>;
}

/// Merges the local store with registered external sources.
pub struct CalendarStore {
    db: Arc<DatabaseManager>,
    sources: Vec<Arc<dyn CalendarSource>>,
}

impl CalendarStore {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        log::info!("Calendar store initialized");
        Self {
            db,
            sources: Vec::new(),
        }
    }

    pub fn register_source(&mut self, source: Arc<dyn CalendarSource>) {
        log::info!("Registered calendar source: {}", source.source_name());
        self.sources.push(source);
    }

    pub fn create_event(&self, event: &CalendarEvent) -> Result<()> {
        self.db.save_event(event)
    }

    pub fn update_event(&self, event: &CalendarEvent) -> Result<()> {
        self.db.save_event(event)
    }

    pub fn delete_event(&self, id: &str) -> Result<()> {
        self.db.delete_event(id)
    }

    /// Events overlapping `[start, end]` across local and external sources.
    /// Ids are unique per source; on a collision the local copy wins.
    pub fn get_events(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
        filters: &EventFilters,
    ) -> Result<Vec<CalendarEvent>> {
        let mut merged: HashMap<String, CalendarEvent> = HashMap::new();

        for source in &self.sources {
            match source.get_events(start, end, filters) {
                Ok(events) => {
                    for event in events {
                        merged.insert(event.id.clone(), event);
                    }
                }
                Err(e) => log::warn!(
                    "Calendar source {} failed, continuing without it: {:#}",
                    source.source_name(),
                    e
                ),
            }
        }

        for event in self.db.get_events_in_range(start, end)? {
            if matches_filters(&event, filters) {
                merged.insert(event.id.clone(), event);
            }
        }

        let mut events: Vec<CalendarEvent> = merged.into_values().collect();
        events.sort_by_key(|e| e.start_time);
        Ok(events)
    }

    pub fn get_event(&self, id: &str) -> Result<Option<CalendarEvent>> {
        if let Some(event) = self.db.get_event(id)? {
            return Ok(Some(event));
        }
        for source in &self.sources {
            match source.get_event(id) {
                Ok(Some(event)) => return Ok(Some(event)),
                Ok(None) => {}
                Err(e) => log::warn!(
                    "Calendar source {} lookup failed: {:#}",
                    source.source_name(),
                    e
                ),
            }
        }
        Ok(None)
    }

    pub fn search(
        &self,
        keyword: &str,
        filters: &EventFilters,
    ) -> Result<Vec<CalendarEvent>> {
        self.db.search_events_by_keyword(
            keyword,
            filters.event_type.as_deref(),
            filters.source.as_deref(),
        )
    }

    pub fn get_time_bounds(
        &self,
        filters: &EventFilters,
    ) -> Result<Option<(DateTime<Local>, DateTime<Local>)>> {
        self.db
            .get_event_time_bounds(filters.event_type.as_deref(), filters.source.as_deref())
    }
}

fn matches_filters(event: &CalendarEvent, filters: &EventFilters) -> bool {
    if let Some(event_type) = &filters.event_type {
        if &event.event_type != event_type {
            return false;
        }
    }
    if let Some(source) = &filters.source {
        if &event.source != source {
            return false;
        }
    }
    true
}
