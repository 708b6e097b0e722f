// Database layer for EchoNote Core
// Connection management, migrations, models, and per-entity repositories

mod attachments_repo;
mod auto_task_repo;
mod engine_options_repo;
mod events_repo;
mod manager;
mod migrations;
pub mod models;
mod tasks_repo;

pub use manager::DatabaseManager;

use chrono::{DateTime, Local};

pub(crate) fn fmt_dt(dt: &DateTime<Local>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn fmt_opt_dt(dt: &Option<DateTime<Local>>) -> Option<String> {
    dt.as_ref().map(fmt_dt)
}

pub(crate) fn parse_dt(raw: &str) -> Option<DateTime<Local>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Local))
}

pub(crate) fn parse_opt_dt(raw: Option<String>) -> Option<DateTime<Local>> {
    raw.as_deref().and_then(parse_dt)
}
