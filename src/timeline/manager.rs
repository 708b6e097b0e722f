// Timeline manager for EchoNote Core
// Past/future event window with artifacts, auto-task configs, and search

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::calendar::{CalendarStore, EventFilters};
use crate::constants::{
    MAX_TRANSCRIPT_CANDIDATES, SEARCH_CONTEXT_CHARS_AFTER, SEARCH_CONTEXT_CHARS_BEFORE,
    TRANSCRIPT_CANDIDATE_WINDOW_DAYS,
};
use crate::database::models::{AttachmentKind, AutoTaskConfig, CalendarEvent, EventAttachment};
use crate::database::DatabaseManager;

/// Filters accepted by timeline queries and search.
#[derive(Debug, Clone, Default)]
pub struct TimelineFilters {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub attendees: Option<Vec<String>>,
    pub event_type: Option<String>,
    pub source: Option<String>,
}

/// Artifact projection for one event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventArtifacts {
    pub recording: Option<String>,
    pub transcript: Option<String>,
    pub translation: Option<String>,
    pub attachments: Vec<EventAttachment>,
}

#[derive(Debug, Clone)]
pub struct PastEventEntry {
    pub event: CalendarEvent,
    pub artifacts: EventArtifacts,
}

#[derive(Debug, Clone)]
pub struct FutureEventEntry {
    pub event: CalendarEvent,
    pub auto_tasks: AutoTaskConfig,
}

#[derive(Debug, Clone)]
pub struct TimelinePage {
    pub current_time: NaiveDateTime,
    pub past_events: Vec<PastEventEntry>,
    pub future_events: Vec<FutureEventEntry>,
    pub total_count: usize,
    pub future_total_count: usize,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub event: CalendarEvent,
    pub artifacts: EventArtifacts,
    pub match_snippet: Option<String>,
    pub auto_tasks: Option<AutoTaskConfig>,
}

/// Manages timeline view data and auto-task configurations.
pub struct TimelineManager {
    calendar: Arc<CalendarStore>,
    db: Arc<DatabaseManager>,
}

impl TimelineManager {
    pub fn new(calendar: Arc<CalendarStore>, db: Arc<DatabaseManager>) -> Self {
        log::info!("Timeline manager initialized");
        Self { calendar, db }
    }

    pub fn calendar(&self) -> &Arc<CalendarStore> {
        &self.calendar
    }

    /// Timeline window around `center`. Past events are newest-first and
    /// paginated; future events are returned in full on page 0 only, sorted
    /// farthest-first so the soonest event renders next to the now-marker.
    pub fn get_timeline_events(
        &self,
        center: DateTime<Local>,
        past_days: f64,
        future_days: f64,
        page: usize,
        page_size: usize,
        filters: &TimelineFilters,
    ) -> Result<TimelinePage> {
        let center_naive = center.naive_local();
        let start = center - days_duration(past_days);
        let end = center + days_duration(future_days);

        let calendar_filters = EventFilters {
            event_type: filters.event_type.clone(),
            source: filters.source.clone(),
        };

        let all_events = self.calendar.get_events(start, end, &calendar_filters)?;
        let filtered: Vec<CalendarEvent> = all_events
            .into_iter()
            .filter(|event| event_matches_filters(event, filters))
            .collect();

        let mut past_items: Vec<CalendarEvent> = Vec::new();
        let mut future_items: Vec<CalendarEvent> = Vec::new();
        for event in filtered {
            if event.start_time.naive_local() < center_naive {
                past_items.push(event);
            } else {
                future_items.push(event);
            }
        }

        past_items.sort_by(|a, b| b.start_time.cmp(&a.start_time));

        let total_past = past_items.len();
        let page_size = page_size.max(1);
        let start_idx = page * page_size;
        let end_idx = (start_idx + page_size).min(total_past);
        let page_items: Vec<CalendarEvent> = if start_idx < total_past {
            past_items[start_idx..end_idx].to_vec()
        } else {
            Vec::new()
        };

        let page_ids: Vec<String> = page_items.iter().map(|e| e.id.clone()).collect();
        let attachments_map = self.db.get_attachments_for_events(&page_ids)?;

        let past_events = page_items
            .into_iter()
            .map(|event| {
                let artifacts = build_artifacts(
                    attachments_map.get(&event.id).cloned().unwrap_or_default(),
                );
                PastEventEntry { event, artifacts }
            })
            .collect();

        let future_ids: Vec<String> = future_items.iter().map(|e| e.id.clone()).collect();
        let auto_task_map = self.db.get_auto_task_configs(&future_ids)?;

        let mut future_events: Vec<FutureEventEntry> = future_items
            .into_iter()
            .map(|event| {
                let auto_tasks = auto_task_map
                    .get(&event.id)
                    .cloned()
                    .unwrap_or_else(|| AutoTaskConfig::disabled(&event.id));
                FutureEventEntry { event, auto_tasks }
            })
            .collect();
        future_events.sort_by(|a, b| b.event.start_time.cmp(&a.event.start_time));

        let future_total = future_events.len();
        if page != 0 {
            future_events.clear();
        }

        Ok(TimelinePage {
            current_time: center_naive,
            past_events,
            future_events,
            total_count: total_past,
            future_total_count: future_total,
            page,
            page_size,
            has_more: end_idx < total_past,
        })
    }

    /// Store the auto-task configuration for an event.
    pub fn set_auto_task(&self, event_id: &str, config: AutoTaskConfig) -> Result<()> {
        if self.calendar.get_event(event_id)?.is_none() {
            anyhow::bail!("Event not found: {event_id}");
        }

        let config = AutoTaskConfig {
            event_id: event_id.to_string(),
            ..config
        };
        self.db.set_auto_task_config(&config)?;
        log::info!("Saved auto-task config for event: {}", event_id);
        Ok(())
    }

    pub fn get_auto_task(&self, event_id: &str) -> Result<Option<AutoTaskConfig>> {
        self.db.get_auto_task_config(event_id)
    }

    pub fn default_auto_task_config(&self, event_id: &str) -> AutoTaskConfig {
        AutoTaskConfig::disabled(event_id)
    }

    pub fn get_event_artifacts(&self, event_id: &str) -> Result<EventArtifacts> {
        let attachments = self.db.get_attachments_for_event(event_id)?;
        Ok(build_artifacts(attachments))
    }

    /// Keyword search over titles, descriptions, and (bounded) transcript
    /// files; results ordered newest-first by event start.
    pub fn search_events(
        &self,
        query: &str,
        filters: &TimelineFilters,
        include_future_auto_tasks: bool,
    ) -> Result<Vec<SearchHit>> {
        let calendar_filters = EventFilters {
            event_type: filters.event_type.clone(),
            source: filters.source.clone(),
        };

        let mut events: Vec<CalendarEvent> = self
            .calendar
            .search(query, &calendar_filters)?
            .into_iter()
            .filter(|event| event_matches_filters(event, filters))
            .collect();
        let mut event_ids: HashSet<String> = events.iter().map(|e| e.id.clone()).collect();

        let mut attachments_map = self
            .db
            .get_attachments_for_events(&event_ids.iter().cloned().collect::<Vec<_>>())?;

        // Expand with events whose transcript/translation text matches.
        let query_lower = query.to_lowercase();
        if !query.is_empty() {
            let (candidate_start, candidate_end) = self.transcript_candidate_range(filters)?;
            let candidates = self
                .calendar
                .get_events(candidate_start, candidate_end, &calendar_filters)?;

            let mut additional: Vec<CalendarEvent> = Vec::new();
            for candidate in candidates {
                if event_ids.contains(&candidate.id) {
                    continue;
                }
                if !event_matches_filters(&candidate, filters) {
                    continue;
                }
                additional.push(candidate);
                if additional.len() >= MAX_TRANSCRIPT_CANDIDATES {
                    break;
                }
            }

            if !additional.is_empty() {
                let additional_ids: Vec<String> =
                    additional.iter().map(|e| e.id.clone()).collect();
                let extra_map = self.db.get_attachments_for_events(&additional_ids)?;

                for candidate in additional {
                    let attachments = extra_map.get(&candidate.id).cloned().unwrap_or_default();
                    if attachments_contain_query(&attachments, &query_lower) {
                        event_ids.insert(candidate.id.clone());
                        attachments_map.insert(candidate.id.clone(), attachments);
                        events.push(candidate);
                    }
                }
            }
        }

        let now_naive = Local::now().naive_local();
        let future_ids: Vec<String> = if include_future_auto_tasks {
            events
                .iter()
                .filter(|e| e.start_time.naive_local() >= now_naive)
                .map(|e| e.id.clone())
                .collect()
        } else {
            Vec::new()
        };
        let auto_task_map = self.db.get_auto_task_configs(&future_ids)?;

        let mut results: Vec<SearchHit> = events
            .into_iter()
            .map(|event| {
                let attachments = attachments_map.get(&event.id).cloned().unwrap_or_default();
                let snippet = search_snippet(&event, query, &attachments);
                let auto_tasks = if include_future_auto_tasks
                    && event.start_time.naive_local() >= now_naive
                {
                    Some(
                        auto_task_map
                            .get(&event.id)
                            .cloned()
                            .unwrap_or_else(|| AutoTaskConfig::disabled(&event.id)),
                    )
                } else {
                    None
                };
                SearchHit {
                    artifacts: build_artifacts(attachments),
                    match_snippet: snippet,
                    auto_tasks,
                    event,
                }
            })
            .collect();

        results.sort_by(|a, b| b.event.start_time.cmp(&a.event.start_time));

        log::debug!("Search found {} events for query: {}", results.len(), query);
        Ok(results)
    }

    /// Bounded time range scanned for transcript matches when the query has
    /// no (or a partial) date filter.
    fn transcript_candidate_range(
        &self,
        filters: &TimelineFilters,
    ) -> Result<(DateTime<Local>, DateTime<Local>)> {
        let window = Duration::days(TRANSCRIPT_CANDIDATE_WINDOW_DAYS);
        let (start_bound, end_bound) = filter_bounds(filters);

        let range = match (filters.start_date.is_some(), filters.end_date.is_some()) {
            (true, true) => (start_bound, end_bound),
            (true, false) => (start_bound, start_bound + window),
            (false, true) => (end_bound - window, end_bound),
            (false, false) => {
                let calendar_filters = EventFilters {
                    event_type: filters.event_type.clone(),
                    source: filters.source.clone(),
                };
                match self.calendar.get_time_bounds(&calendar_filters)? {
                    Some(bounds) => bounds,
                    None => (start_bound, end_bound),
                }
            }
        };

        let (mut start, mut end) = range;
        if end < start {
            std::mem::swap(&mut start, &mut end);
        }
        Ok((start, end))
    }
}

fn days_duration(days: f64) -> Duration {
    Duration::seconds((days * 86_400.0) as i64)
}

/// Local day bounds for the filter's date range; unbounded sides fall back
/// to a very wide window.
fn filter_bounds(filters: &TimelineFilters) -> (DateTime<Local>, DateTime<Local>) {
    let start = filters
        .start_date
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|naive| naive.and_local_timezone(Local).single())
        .unwrap_or_else(|| Local::now() - Duration::days(365 * 50));
    let end = filters
        .end_date
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .and_then(|naive| naive.and_local_timezone(Local).single())
        .unwrap_or_else(|| Local::now() + Duration::days(365 * 50));
    (start, end)
}

/// Overlap-based filter: an event matches a date range when its
/// `[start, end]` window intersects it, so a meeting spanning midnight
/// appears in both days.
fn event_matches_filters(event: &CalendarEvent, filters: &TimelineFilters) -> bool {
    if filters.start_date.is_some() || filters.end_date.is_some() {
        let (range_start, range_end) = filter_bounds(filters);
        let (event_start, event_end) = event.window();
        if event_end < range_start.naive_local() || event_start > range_end.naive_local() {
            return false;
        }
    }

    if let Some(attendees_filter) = &filters.attendees {
        if !attendees_filter.is_empty()
            && !event
                .attendees
                .iter()
                .any(|a| attendees_filter.contains(a))
        {
            return false;
        }
    }

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

fn build_artifacts(attachments: Vec<EventAttachment>) -> EventArtifacts {
    let mut artifacts = EventArtifacts {
        attachments: attachments.clone(),
        ..Default::default()
    };
    for attachment in attachments {
        match attachment.kind {
            AttachmentKind::Recording => artifacts.recording = Some(attachment.file_path),
            AttachmentKind::Transcript => artifacts.transcript = Some(attachment.file_path),
            AttachmentKind::Translation => artifacts.translation = Some(attachment.file_path),
        }
    }
    artifacts
}

/// Read a textual attachment, failing soft: a missing or undecodable file
/// yields a fallback message instead of aborting the query.
fn read_attachment_text(attachment: &EventAttachment) -> (Option<String>, Option<String>) {
    if !attachment.kind.is_textual() {
        return (None, None);
    }

    match std::fs::read(&attachment.file_path) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(content) => (Some(content), None),
            Err(_) => {
                log::error!(
                    "Failed to decode {} for event {}: {}",
                    attachment.kind.as_str(),
                    attachment.event_id,
                    attachment.file_path
                );
                (
                    None,
                    Some("Transcript unavailable (cannot read transcript)".to_string()),
                )
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::warn!(
                "{} file not found for event {}: {}",
                attachment.kind.as_str(),
                attachment.event_id,
                attachment.file_path
            );
            (
                None,
                Some("Transcript unavailable (file missing)".to_string()),
            )
        }
        Err(e) => {
            log::warn!(
                "Failed to read {} {} for event {}: {}",
                attachment.kind.as_str(),
                attachment.file_path,
                attachment.event_id,
                e
            );
            (None, Some("Transcript unavailable".to_string()))
        }
    }
}

fn attachments_contain_query(attachments: &[EventAttachment], query_lower: &str) -> bool {
    for attachment in attachments {
        if !attachment.kind.is_textual() {
            continue;
        }
        let (content, _) = read_attachment_text(attachment);
        if let Some(content) = content {
            if content.to_lowercase().contains(query_lower) {
                return true;
            }
        }
    }
    false
}

/// Snippet from the first hit in title, description, then transcript text,
/// with surrounding context and a role-label prefix.
fn search_snippet(
    event: &CalendarEvent,
    query: &str,
    attachments: &[EventAttachment],
) -> Option<String> {
    if query.is_empty() {
        return None;
    }
    let query_lower = query.to_lowercase();

    if event.title.to_lowercase().contains(&query_lower) {
        return Some(format!("Title: ...{}...", event.title));
    }

    if let Some(description) = &event.description {
        if let Some(snippet) = extract_context(description, &query_lower) {
            return Some(format!("Description: ...{snippet}..."));
        }
    }

    let mut fallback: Option<String> = None;
    for attachment in attachments {
        if !attachment.kind.is_textual() {
            continue;
        }

        let (content, attachment_fallback) = read_attachment_text(attachment);
        if fallback.is_none() {
            fallback = attachment_fallback;
        }

        let content = match content {
            Some(content) => content,
            None => continue,
        };

        if let Some(snippet) = extract_context(&content, &query_lower) {
            let prefix = match attachment.kind {
                AttachmentKind::Translation => "Translation",
                _ => "Transcript",
            };
            return Some(format!("{prefix}: ...{snippet}..."));
        }
    }

    fallback
}

fn extract_context(text: &str, query_lower: &str) -> Option<String> {
    let text_lower = text.to_lowercase();
    let pos = text_lower.find(query_lower)?;

    // Offsets come from the lowercased copy; snap them onto char boundaries
    // of the original before slicing.
    let start = snap_to_boundary(text, pos.saturating_sub(SEARCH_CONTEXT_CHARS_BEFORE));
    let end = snap_to_boundary(
        text,
        (pos + query_lower.len() + SEARCH_CONTEXT_CHARS_AFTER).min(text.len()),
    );
    Some(text[start..end].to_string())
}

fn snap_to_boundary(text: &str, mut idx: usize) -> usize {
    idx = idx.min(text.len());
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
