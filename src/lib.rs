// EchoNote Core
// Capture-and-processing engine: transcription task queue, auto-task
// scheduler, realtime recording pipeline, and encrypted persistence.
// The GUI, cloud calendar adapters, and concrete speech/translation
// backends are external collaborators behind the seams exported here.

pub mod app;
pub mod audio;
pub mod calendar;
pub mod config;
pub mod constants;
pub mod database;
pub mod engines;
pub mod error;
pub mod events;
pub mod logging;
pub mod monitor;
pub mod notify;
pub mod queue;
pub mod realtime;
pub mod security;
pub mod storage;
pub mod timeline;
pub mod transcription;

use std::path::PathBuf;

use anyhow::{Context, Result};

pub use app::{CoreBuilder, EchoNoteCore};
pub use error::{CoreError, CoreResult};

/// Root directory for all persisted application state (`~/.echonote`).
pub fn default_app_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not resolve home directory")?;
    Ok(home.join(constants::APP_DIR_NAME))
}
