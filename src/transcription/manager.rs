// Transcription manager for EchoNote Core
// Owns the task queue and engine handle; drives task lifecycle from
// submission through export, with crash-safe restart recovery

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Local;
use serde_json::{json, Map, Value};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::constants::AUDIO_VIDEO_FORMATS;
use crate::database::models::{TaskStatus, TranscriptionTask};
use crate::database::DatabaseManager;
use crate::engines::{EngineLoader, SpeechEngine, TranscriptionResult, ENGINE_OPTION_KEYS};
use crate::error::{CoreError, CoreResult};
use crate::events::{EventBus, EventType};
use crate::queue::{TaskJob, TaskQueue};
use crate::storage::atomic_write_bytes;

use super::formats::FormatConverter;

const TRANSCRIPTS_SUBDIR: &str = "transcripts";
const EXPORT_FALLBACK_SUBDIR: &str = "exports";
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Options accepted at task submission.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    pub language: Option<String>,
    pub output_format: Option<String>,
    pub output_path: Option<String>,
    /// Engine-only knobs; unrecognized keys are dropped.
    pub engine_options: Map<String, Value>,
}

struct ManagerInner {
    db: Arc<DatabaseManager>,
    engine: Arc<EngineLoader<dyn SpeechEngine>>,
    engine_name: String,
    converter: FormatConverter,
    queue: TaskQueue,
    events: EventBus,
    app_dir: PathBuf,
    default_output_format: String,
}

/// Manages transcription tasks and coordinates speech engine processing.
pub struct TranscriptionManager {
    inner: Arc<ManagerInner>,
    runtime: Mutex<Option<Runtime>>,
}

impl TranscriptionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DatabaseManager>,
        engine: Arc<EngineLoader<dyn SpeechEngine>>,
        engine_name: String,
        events: EventBus,
        app_dir: PathBuf,
        max_concurrent: usize,
        max_retries: u32,
        retry_delay: Duration,
        default_output_format: String,
    ) -> Self {
        let queue = TaskQueue::new(max_concurrent, max_retries, retry_delay);

        log::info!(
            "Transcription manager initialized with engine: {}",
            engine_name
        );

        Self {
            inner: Arc::new(ManagerInner {
                db,
                engine,
                engine_name,
                converter: FormatConverter::new(),
                queue,
                events,
                app_dir,
                default_output_format,
            }),
            runtime: Mutex::new(None),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Add a transcription task for a single file.
    pub fn add_task(&self, file_path: &Path, options: TaskOptions) -> CoreResult<String> {
        let file_path = file_path
            .canonicalize()
            .map_err(|_| CoreError::not_found(format!("File not found: {}", file_path.display())))?;

        let extension = file_path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if !AUDIO_VIDEO_FORMATS.contains(&extension.as_str()) {
            return Err(CoreError::validation(format!(
                "Unsupported file format: .{extension}. Supported formats: {}",
                AUDIO_VIDEO_FORMATS.join(", ")
            )));
        }

        let file_size = file_path.metadata().map(|m| m.len()).unwrap_or(0);
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unknown".to_string());

        let mut task = TranscriptionTask::new(
            file_path.to_string_lossy().into_owned(),
            file_name,
            file_size,
            self.inner.engine_name.clone(),
        );
        task.language = options.language.clone();
        task.output_format = options
            .output_format
            .clone()
            .unwrap_or_else(|| self.inner.default_output_format.clone());
        task.output_path = options.output_path.clone();

        self.inner.db.save_task(&task)?;

        // Persist engine-only options next to the task row.
        let engine_options: Map<String, Value> = options
            .engine_options
            .into_iter()
            .filter(|(key, _)| ENGINE_OPTION_KEYS.contains(&key.as_str()))
            .collect();
        if !engine_options.is_empty() {
            self.inner
                .db
                .set_task_engine_options(&task.id, &engine_options)?;
        }

        self.enqueue(&task.id)?;

        self.inner
            .events
            .emit(EventType::TaskAdded, task.to_event_payload());

        log::info!("Added transcription task: {} for file {}", task.id, task.file_name);
        Ok(task.id)
    }

    /// Recursively add tasks for every supported file in a folder.
    pub fn add_tasks_from_folder(
        &self,
        folder: &Path,
        options: TaskOptions,
    ) -> CoreResult<Vec<String>> {
        if !folder.is_dir() {
            return Err(CoreError::validation(format!(
                "Not a directory: {}",
                folder.display()
            )));
        }

        let mut task_ids = Vec::new();
        let mut stack = vec![folder.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    log::warn!("Failed to read directory {:?}: {}", dir, e);
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let supported = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| AUDIO_VIDEO_FORMATS.contains(&e.to_lowercase().as_str()))
                    .unwrap_or(false);
                if supported {
                    match self.add_task(&path, options.clone()) {
                        Ok(id) => task_ids.push(id),
                        Err(e) => log::error!("Failed to add task for {:?}: {}", path, e),
                    }
                }
            }
        }

        log::info!(
            "Added {} transcription tasks from folder {:?}",
            task_ids.len(),
            folder
        );
        Ok(task_ids)
    }

    /// Start processing on a dedicated worker runtime, recovering tasks
    /// persisted by a previous run first.
    pub fn start_processing(&self) -> CoreResult<()> {
        let mut runtime_guard = self.runtime.lock().unwrap_or_else(|e| e.into_inner());
        if runtime_guard.is_some() {
            log::warn!("Transcription processing already running");
            return Ok(());
        }

        // Restart recovery: demote stuck rows, drop orphan options, requeue.
        let reset = self.inner.db.reset_stale_processing_tasks()?;
        if reset > 0 {
            log::info!("Reset {} tasks stuck in processing state", reset);
        }
        let pruned = self.inner.db.prune_orphan_engine_options()?;
        if pruned > 0 {
            log::info!("Pruned {} orphan engine option entries", pruned);
        }

        let resumable = self.inner.db.get_resumable_tasks()?;
        for task in &resumable {
            self.inner.queue.remove_entry(&task.id);
            self.enqueue(&task.id)?;
        }
        if !resumable.is_empty() {
            log::info!("Queued {} persisted tasks for background processing", resumable.len());
        }

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("transcription-worker")
            .enable_all()
            .build()
            .map_err(|e| CoreError::fatal(format!("failed to build worker runtime: {e}")))?;

        let queue = self.inner.queue.clone();
        runtime.block_on(async move {
            queue.start();
        });

        *runtime_guard = Some(runtime);
        log::info!("Started transcription task processing");
        Ok(())
    }

    /// Stop processing: cancel in-flight tokens, drain with a bounded wait,
    /// then tear down the worker runtime.
    pub fn stop_processing(&self) {
        let runtime = {
            let mut guard = self.runtime.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };

        let runtime = match runtime {
            Some(runtime) => runtime,
            None => return,
        };

        let queue = self.inner.queue.clone();
        runtime.block_on(async move {
            queue.stop().await;
        });
        runtime.shutdown_timeout(STOP_TIMEOUT);

        log::info!("Stopped transcription task processing");
    }

    pub fn is_running(&self) -> bool {
        self.runtime
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Pause admission of new tasks; in-flight tasks continue.
    pub fn pause_processing(&self) {
        if !self.is_running() {
            log::warn!("Cannot pause: processing not running");
            return;
        }
        self.inner.queue.pause();
        self.inner.events.emit(EventType::ProcessingPaused, json!({}));
    }

    pub fn resume_processing(&self) {
        if !self.is_running() {
            log::warn!("Cannot resume: processing not running");
            return;
        }
        self.inner.queue.resume();
        self.inner.events.emit(EventType::ProcessingResumed, json!({}));
    }

    pub fn is_paused(&self) -> bool {
        self.is_running() && self.inner.queue.is_paused()
    }

    /// Signal the task's cooperative token. Returns whether the task was
    /// reachable.
    pub fn cancel_task(&self, task_id: &str) -> CoreResult<bool> {
        let reachable = self.inner.queue.cancel(task_id);
        if !reachable {
            return Ok(false);
        }

        // A task cancelled before its worker ran never reaches the worker's
        // cancellation handler, so finalize the row here; the worker path is
        // idempotent with this.
        if let Some(mut task) = self.inner.db.get_task(task_id)? {
            if !task.status.is_terminal() {
                task.status = TaskStatus::Cancelled;
                self.inner.db.save_task(&task)?;
                self.inner.db.delete_task_engine_options(task_id)?;
                self.inner
                    .events
                    .emit(EventType::TaskUpdated, task.to_event_payload());
                self.inner
                    .events
                    .emit(EventType::TaskCancelled, json!({"id": task_id}));
            }
        }
        Ok(true)
    }

    /// Reset a failed task to pending and requeue it.
    pub fn retry_task(&self, task_id: &str) -> CoreResult<bool> {
        let mut task = match self.inner.db.get_task(task_id)? {
            Some(task) => task,
            None => {
                log::warn!("Cannot retry task {}: not found", task_id);
                return Ok(false);
            }
        };

        if task.status != TaskStatus::Failed {
            log::warn!(
                "Cannot retry task {}: status is {}, not failed",
                task_id,
                task.status.as_str()
            );
            return Ok(false);
        }

        task.status = TaskStatus::Pending;
        task.progress = 0.0;
        task.error_message = None;
        task.started_at = None;
        task.completed_at = None;
        self.inner.db.save_task(&task)?;

        self.inner.queue.remove_entry(task_id);
        self.enqueue(task_id)?;
        self.inner
            .events
            .emit(EventType::TaskUpdated, task.to_event_payload());

        log::info!("Task {} queued for retry", task_id);
        Ok(true)
    }

    /// Delete a task and its artifacts. Processing tasks must be cancelled
    /// first; deleting them here would race the in-flight worker.
    pub fn delete_task(&self, task_id: &str) -> CoreResult<bool> {
        let task = match self.inner.db.get_task(task_id)? {
            Some(task) => task,
            None => return Ok(false),
        };

        if task.status == TaskStatus::Processing {
            log::warn!(
                "Refusing to delete processing task {}; cancel it first",
                task_id
            );
            return Ok(false);
        }

        self.inner.queue.remove_entry(task_id);
        self.inner.db.delete_task_engine_options(task_id)?;

        let artifact = self.internal_artifact_path(task_id);
        if artifact.exists() {
            if let Err(e) = std::fs::remove_file(&artifact) {
                log::warn!("Failed to delete artifact for task {}: {}", task_id, e);
            }
        }

        self.inner.db.delete_task_row(task_id)?;
        self.inner
            .events
            .emit(EventType::TaskDeleted, json!({"id": task_id}));

        log::info!("Deleted task {}", task_id);
        Ok(true)
    }

    pub fn get_task_status(&self, task_id: &str) -> CoreResult<Option<TranscriptionTask>> {
        Ok(self.inner.db.get_task(task_id)?)
    }

    pub fn get_all_tasks(&self, status: Option<TaskStatus>) -> CoreResult<Vec<TranscriptionTask>> {
        Ok(self.inner.db.get_all_tasks(status)?)
    }

    /// Number of tasks currently processing: live queue state when running,
    /// otherwise the persisted count.
    pub fn get_active_task_count(&self) -> usize {
        if self.is_running() {
            self.inner.queue.processing_count()
        } else {
            self.inner
                .db
                .count_tasks_with_status(TaskStatus::Processing)
                .unwrap_or(0)
                .max(0) as usize
        }
    }

    pub fn has_running_tasks(&self) -> bool {
        self.get_active_task_count() > 0
    }

    /// Cancel everything outstanding and stop the worker runtime.
    pub fn stop_all_tasks(&self) {
        match self.inner.db.get_resumable_tasks() {
            Ok(tasks) => {
                for task in tasks {
                    if let Err(e) = self.cancel_task(&task.id) {
                        log::error!("Error cancelling task {}: {}", task.id, e);
                    }
                }
            }
            Err(e) => log::error!("Failed to enumerate tasks to stop: {:#}", e),
        }
        self.stop_processing();
        log::info!("All transcription tasks stopped");
    }

    /// Swap the admission semaphore capacity (1..=5).
    pub fn update_max_concurrent(&self, max_concurrent: usize) -> CoreResult<()> {
        self.inner.queue.update_max_concurrent(max_concurrent)
    }

    /// Rebuild the speech engine after credential/settings changes.
    pub fn reload_engine(&self) -> CoreResult<()> {
        log::info!("Reloading speech engine with updated configuration");
        self.inner.engine.reload().map(|_| ())
    }

    /// Structured content of a completed task's internal artifact.
    pub fn get_task_content(&self, task_id: &str) -> CoreResult<TranscriptionResult> {
        let artifact = self.internal_artifact_path(task_id);
        if !artifact.exists() {
            if self.inner.db.get_task(task_id)?.is_none() {
                return Err(CoreError::not_found(format!("Task {task_id} not found")));
            }
            return Err(CoreError::not_found(format!(
                "Content file for task {task_id} not found"
            )));
        }

        let raw = std::fs::read_to_string(&artifact)?;
        serde_json::from_str(&raw)
            .map_err(|e| CoreError::integrity(format!("invalid task content: {e}")))
    }

    /// Export a completed task's result to `output_path` in `format`.
    pub fn export_result(
        &self,
        task_id: &str,
        format: &str,
        output_path: &Path,
    ) -> CoreResult<PathBuf> {
        let task = self
            .inner
            .db
            .get_task(task_id)?
            .ok_or_else(|| CoreError::not_found(format!("Task {task_id} not found")))?;

        if task.status != TaskStatus::Completed {
            return Err(CoreError::validation(format!(
                "Task {task_id} is not completed (status: {})",
                task.status.as_str()
            )));
        }

        let content = self.get_task_content(task_id)?;
        let formatted = self.inner.converter.convert(&content, format)?;

        atomic_write_bytes(output_path, formatted.as_bytes())
            .map_err(|e| CoreError::Fatal(format!("Failed to write export file: {e:#}")))?;

        log::info!(
            "Exported task {} to {} at {:?}",
            task_id,
            format.to_uppercase(),
            output_path
        );
        Ok(output_path.to_path_buf())
    }

    fn enqueue(&self, task_id: &str) -> CoreResult<CancellationToken> {
        let job = make_job(self.inner.clone(), task_id.to_string());
        self.inner.queue.add(task_id, job)
    }

    fn internal_artifact_path(&self, task_id: &str) -> PathBuf {
        self.inner
            .app_dir
            .join(TRANSCRIPTS_SUBDIR)
            .join(format!("{task_id}.json"))
    }
}

/// Build the queue job for one task. The job finalizes the task row on every
/// outcome and never panics the worker pool.
fn make_job(inner: Arc<ManagerInner>, task_id: String) -> TaskJob {
    Arc::new(move |token: CancellationToken| {
        let inner = inner.clone();
        let task_id = task_id.clone();
        Box::pin(async move {
            let result = process_task(&inner, &task_id, &token).await;
            match &result {
                Err(CoreError::Cancelled) => finalize_cancelled(&inner, &task_id),
                Err(err) => finalize_failed(&inner, &task_id, err),
                Ok(()) => {}
            }
            result
        })
    })
}

async fn process_task(
    inner: &Arc<ManagerInner>,
    task_id: &str,
    token: &CancellationToken,
) -> CoreResult<()> {
    ensure_not_cancelled(token, task_id, "before loading task from database")?;

    let mut task = inner
        .db
        .get_task(task_id)?
        .ok_or_else(|| CoreError::not_found(format!("Task {task_id} not found in database")))?;

    ensure_not_cancelled(token, task_id, "after loading task from database")?;

    task.status = TaskStatus::Processing;
    task.started_at = Some(Local::now());
    task.progress = 0.0;
    task.error_message = None;
    inner.db.save_task(&task)?;
    emit_progress(inner, task_id, 0.0);

    log::info!("Processing task {}: {}", task_id, task.file_name);

    let engine = inner.engine.get()?;
    let engine_options = inner
        .db
        .get_task_engine_options(task_id)?
        .unwrap_or_default()
        .into_iter()
        .collect();

    // Progress writes go straight to the task row; no object round-trip.
    let progress_inner = inner.clone();
    let progress_task_id = task_id.to_string();
    let progress_cb = Arc::new(move |progress: f64| {
        if let Err(e) = progress_inner
            .db
            .update_task_progress(&progress_task_id, progress)
        {
            log::error!(
                "Error updating progress for task {}: {:#}",
                progress_task_id,
                e
            );
        }
        emit_progress(&progress_inner, &progress_task_id, progress);
    });

    ensure_not_cancelled(token, task_id, "before starting transcription")?;

    let result = engine
        .transcribe_file(
            Path::new(&task.file_path),
            task.language.as_deref(),
            &engine_options,
            Some(progress_cb),
        )
        .await?;

    ensure_not_cancelled(token, task_id, "after completing transcription")?;

    // Persist the structured artifact before flipping status.
    ensure_not_cancelled(token, task_id, "before saving results")?;
    let artifact_path = inner
        .app_dir
        .join(TRANSCRIPTS_SUBDIR)
        .join(format!("{task_id}.json"));
    let serialized = serde_json::to_vec_pretty(&result)
        .map_err(|e| CoreError::fatal(format!("failed to serialize result: {e}")))?;
    atomic_write_bytes(&artifact_path, &serialized)
        .map_err(|e| CoreError::Fatal(format!("failed to save result: {e:#}")))?;

    ensure_not_cancelled(token, task_id, "before marking task as completed")?;

    // A cancellation that landed directly on the row wins over completion;
    // terminal states never transition backwards.
    if let Some(current) = inner.db.get_task(task_id)? {
        if current.status.is_terminal() {
            return Err(CoreError::Cancelled);
        }
    }

    if let Some(duration) = result.duration {
        task.audio_duration = Some(duration);
    }
    task.status = TaskStatus::Completed;
    task.completed_at = Some(Local::now());
    task.progress = 100.0;
    inner.db.save_task(&task)?;

    inner
        .events
        .emit(EventType::TaskUpdated, task.to_event_payload());
    inner
        .events
        .emit(EventType::TaskCompleted, json!({"id": task_id}));

    auto_export(inner, &mut task, &result);

    inner.db.delete_task_engine_options(task_id)?;
    Ok(())
}

/// Auto-export into the requested format. Export failures retry once into
/// the fallback directory and never fail the task.
fn auto_export(inner: &Arc<ManagerInner>, task: &mut TranscriptionTask, result: &TranscriptionResult) {
    let format = if task.output_format.is_empty() {
        inner.default_output_format.clone()
    } else {
        task.output_format.clone()
    };

    let source = PathBuf::from(&task.file_path);
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());

    let output_path = match &task.output_path {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = source
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(format!("{stem}.{format}"));
            task.output_path = Some(default_path.to_string_lossy().into_owned());
            if let Err(e) = inner.db.save_task(task) {
                log::error!("Failed to persist default output path: {:#}", e);
            }
            default_path
        }
    };
    if let Err(e) = write_export(inner, result, &format, &output_path) {
        log::error!("Failed to auto-export task {}: {}", task.id, e);

        let fallback = inner
            .app_dir
            .join(EXPORT_FALLBACK_SUBDIR)
            .join(format!("{stem}.{format}"));
        match write_export(inner, result, &format, &fallback) {
            Ok(()) => {
                log::warn!("Task {} exported using fallback output path: {:?}", task.id, fallback);
                task.output_path = Some(fallback.to_string_lossy().into_owned());
                if let Err(e) = inner.db.save_task(task) {
                    log::error!("Failed to persist fallback output path: {:#}", e);
                }
            }
            Err(fallback_error) => {
                log::error!(
                    "Fallback export failed for task {}: {}",
                    task.id,
                    fallback_error
                );
            }
        }
    }
}

fn write_export(
    inner: &Arc<ManagerInner>,
    result: &TranscriptionResult,
    format: &str,
    path: &Path,
) -> CoreResult<()> {
    let formatted = inner.converter.convert(result, format)?;
    atomic_write_bytes(path, formatted.as_bytes())
        .map_err(|e| CoreError::Fatal(format!("export write failed: {e:#}")))
}

fn finalize_cancelled(inner: &Arc<ManagerInner>, task_id: &str) {
    log::info!("Task {} cancelled", task_id);
    match inner.db.get_task(task_id) {
        Ok(Some(mut task)) => {
            if !task.status.is_terminal() {
                task.status = TaskStatus::Cancelled;
                if let Err(e) = inner.db.save_task(&task) {
                    log::error!("Failed to persist cancellation for {}: {:#}", task_id, e);
                }
                inner
                    .events
                    .emit(EventType::TaskUpdated, task.to_event_payload());
                inner
                    .events
                    .emit(EventType::TaskCancelled, json!({"id": task_id}));
            }
        }
        Ok(None) => {}
        Err(e) => log::error!("Failed to load task {} for cancellation: {:#}", task_id, e),
    }
    if let Err(e) = inner.db.delete_task_engine_options(task_id) {
        log::error!("Failed to prune engine options for {}: {:#}", task_id, e);
    }
}

fn finalize_failed(inner: &Arc<ManagerInner>, task_id: &str, err: &CoreError) {
    log::error!("Error processing task {}: {}", task_id, err);
    match inner.db.get_task(task_id) {
        Ok(Some(mut task)) => {
            if task.status == TaskStatus::Cancelled {
                // A direct cancellation landed first; keep it.
                return;
            }
            task.status = TaskStatus::Failed;
            task.error_message = Some(err.to_string());
            if let Err(e) = inner.db.save_task(&task) {
                log::error!("Failed to persist failure for {}: {:#}", task_id, e);
            }
            inner
                .events
                .emit(EventType::TaskUpdated, task.to_event_payload());
            inner.events.emit(
                EventType::TaskFailed,
                json!({"id": task_id, "error": err.to_string()}),
            );
        }
        Ok(None) => {}
        Err(e) => log::error!("Failed to load task {} for failure handling: {:#}", task_id, e),
    }
}

fn ensure_not_cancelled(token: &CancellationToken, task_id: &str, stage: &str) -> CoreResult<()> {
    if token.is_cancelled() {
        log::info!("Cancellation detected for task {} {}", task_id, stage);
        return Err(CoreError::Cancelled);
    }
    Ok(())
}

fn emit_progress(inner: &Arc<ManagerInner>, task_id: &str, progress: f64) {
    inner.events.emit(
        EventType::TaskUpdated,
        json!({"id": task_id, "progress": progress, "status": "processing"}),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::testing::StubSpeechEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        app_dir: PathBuf,
        manager: TranscriptionManager,
        events: EventBus,
    }

    fn fixture_with_engine(engine: Arc<StubSpeechEngine>) -> Fixture {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempdir().unwrap();
        let app_dir = dir.path().join("echonote");
        std::fs::create_dir_all(&app_dir).unwrap();

        let db = Arc::new(DatabaseManager::new(app_dir.join("data.db"), None).unwrap());
        let events = EventBus::new();

        let engine_obj: Arc<dyn SpeechEngine> = engine;
        let loader: Arc<EngineLoader<dyn SpeechEngine>> = Arc::new(EngineLoader::new(move || {
            Ok(engine_obj.clone())
        }));

        let manager = TranscriptionManager::new(
            db,
            loader,
            "stub".to_string(),
            events.clone(),
            app_dir.clone(),
            2,
            0,
            Duration::from_millis(10),
            "txt".to_string(),
        );

        Fixture {
            _dir: dir,
            app_dir,
            manager,
            events,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_engine(Arc::new(StubSpeechEngine::single_segment("hi", 2.0)))
    }

    fn write_sample_wav(dir: &Path, name: &str) -> PathBuf {
        // Contents are irrelevant; the stub engine never reads them.
        let path = dir.join(name);
        std::fs::write(&path, b"RIFF....WAVEfmt ").unwrap();
        path
    }

    fn wait_until<F: Fn() -> bool>(cond: F) {
        for _ in 0..600 {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_submit_complete_export_flow() {
        let fx = fixture();
        let media = write_sample_wav(fx.app_dir.parent().unwrap(), "sample.wav");

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let statuses_clone = statuses.clone();
        fx.events.subscribe(move |event_type, payload| {
            if event_type == EventType::TaskUpdated {
                if let Some(status) = payload["status"].as_str() {
                    statuses_clone.lock().unwrap().push(status.to_string());
                }
            }
        });

        let task_id = fx
            .manager
            .add_task(&media, TaskOptions::default())
            .unwrap();

        let before_start = fx.manager.get_task_status(&task_id).unwrap().unwrap();
        assert_eq!(before_start.status, TaskStatus::Pending);

        fx.manager.start_processing().unwrap();
        wait_until(|| {
            fx.manager
                .get_task_status(&task_id)
                .unwrap()
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        });

        let task = fx.manager.get_task_status(&task_id).unwrap().unwrap();
        assert_eq!(task.progress, 100.0);
        assert_eq!(task.audio_duration, Some(2.0));
        assert!(task.started_at.is_some() && task.completed_at.is_some());

        // Artifact JSON exists and the auto-export landed next to the source.
        assert!(fx
            .app_dir
            .join(TRANSCRIPTS_SUBDIR)
            .join(format!("{task_id}.json"))
            .exists());
        let export = media.with_extension("txt");
        assert!(export.exists());
        assert_eq!(std::fs::read_to_string(export).unwrap(), "hi\n");

        // Engine options sidecar removed after completion.
        assert!(fx
            .manager
            .inner
            .db
            .get_task_engine_options(&task_id)
            .unwrap()
            .is_none());

        // Status stream observed by listeners stays in order.
        let statuses = statuses.lock().unwrap();
        assert_eq!(statuses.first().map(String::as_str), Some("processing"));
        assert_eq!(statuses.last().map(String::as_str), Some("completed"));

        fx.manager.stop_processing();
    }

    #[test]
    fn test_add_task_validation() {
        let fx = fixture();

        let missing = fx
            .manager
            .add_task(Path::new("/nonexistent/file.wav"), TaskOptions::default());
        assert!(matches!(missing, Err(CoreError::NotFound(_))));

        let unsupported = fx.app_dir.join("notes.txt");
        std::fs::write(&unsupported, b"text").unwrap();
        let result = fx.manager.add_task(&unsupported, TaskOptions::default());
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_cancel_mid_flight_leaves_no_artifact() {
        let blocker = CancellationToken::new();
        let mut engine = StubSpeechEngine::single_segment("never", 1.0);
        engine.block_until_cancelled = Some(blocker.clone());
        let fx = fixture_with_engine(Arc::new(engine));

        let media = write_sample_wav(fx.app_dir.parent().unwrap(), "long.wav");
        let mut options = TaskOptions::default();
        options
            .engine_options
            .insert("beam_size".to_string(), json!(5));
        let task_id = fx.manager.add_task(&media, options).unwrap();
        assert!(fx
            .manager
            .inner
            .db
            .get_task_engine_options(&task_id)
            .unwrap()
            .is_some());

        fx.manager.start_processing().unwrap();
        wait_until(|| {
            fx.manager
                .get_task_status(&task_id)
                .unwrap()
                .map(|t| t.status == TaskStatus::Processing)
                .unwrap_or(false)
        });

        assert!(fx.manager.cancel_task(&task_id).unwrap());
        // Unblock the stub so the worker observes the cancellation.
        blocker.cancel();
        wait_until(|| {
            fx.manager
                .get_task_status(&task_id)
                .unwrap()
                .map(|t| t.status == TaskStatus::Cancelled)
                .unwrap_or(false)
        });

        assert!(!fx
            .app_dir
            .join(TRANSCRIPTS_SUBDIR)
            .join(format!("{task_id}.json"))
            .exists());
        assert!(fx
            .manager
            .inner
            .db
            .get_task_engine_options(&task_id)
            .unwrap()
            .is_none());

        fx.manager.stop_processing();
    }

    #[test]
    fn test_restart_recovery_requeues_and_resets() {
        let fx = fixture();
        let media = write_sample_wav(fx.app_dir.parent().unwrap(), "recover.wav");

        // Simulate rows left behind by a crashed run.
        let mut stuck = TranscriptionTask::new(
            media.to_string_lossy().into_owned(),
            "recover.wav".to_string(),
            16,
            "stub".to_string(),
        );
        stuck.status = TaskStatus::Processing;
        stuck.progress = 40.0;
        stuck.started_at = Some(Local::now());
        fx.manager.inner.db.save_task(&stuck).unwrap();

        let mut pending = TranscriptionTask::new(
            media.to_string_lossy().into_owned(),
            "recover.wav".to_string(),
            16,
            "stub".to_string(),
        );
        pending.created_at = Local::now() + chrono::Duration::seconds(1);
        fx.manager.inner.db.save_task(&pending).unwrap();

        // Sidecar options for an unknown task id must be purged.
        fx.manager
            .inner
            .db
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO task_engine_options (task_id, options) VALUES ('ghost', '{}')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        fx.manager.start_processing().unwrap();

        wait_until(|| {
            let a = fx.manager.get_task_status(&stuck.id).unwrap().unwrap();
            let b = fx.manager.get_task_status(&pending.id).unwrap().unwrap();
            a.status == TaskStatus::Completed && b.status == TaskStatus::Completed
        });

        assert!(fx
            .manager
            .inner
            .db
            .get_task_engine_options("ghost")
            .unwrap()
            .is_none());

        fx.manager.stop_processing();
    }

    #[test]
    fn test_export_failure_falls_back_and_task_stays_completed() {
        let fx = fixture();
        let media = write_sample_wav(fx.app_dir.parent().unwrap(), "fallback.wav");

        // Output path routed through a regular file: directory creation
        // fails, forcing the exports/ fallback.
        let blocked = fx.app_dir.parent().unwrap().join("blocked");
        std::fs::write(&blocked, b"not a dir").unwrap();
        let options = TaskOptions {
            output_path: Some(
                blocked
                    .join("out.txt")
                    .to_string_lossy()
                    .into_owned(),
            ),
            ..Default::default()
        };
        let task_id = fx.manager.add_task(&media, options).unwrap();

        fx.manager.start_processing().unwrap();
        wait_until(|| {
            fx.manager
                .get_task_status(&task_id)
                .unwrap()
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        });

        let fallback = fx
            .app_dir
            .join(EXPORT_FALLBACK_SUBDIR)
            .join("fallback.txt");
        assert!(fallback.exists());
        assert_eq!(std::fs::read_to_string(&fallback).unwrap(), "hi\n");

        // Export failure never fails the task, and the row now points at
        // the fallback artifact.
        let task = fx.manager.get_task_status(&task_id).unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(
            task.output_path.as_deref(),
            fallback.to_str()
        );

        fx.manager.stop_processing();
    }

    #[test]
    fn test_export_requires_completed() {
        let fx = fixture();
        let media = write_sample_wav(fx.app_dir.parent().unwrap(), "pending.wav");
        let task_id = fx
            .manager
            .add_task(&media, TaskOptions::default())
            .unwrap();

        let result =
            fx.manager
                .export_result(&task_id, "txt", &fx.app_dir.join("out.txt"));
        assert!(matches!(result, Err(CoreError::Validation(_))));
    }

    #[test]
    fn test_retry_failed_task() {
        let engine = StubSpeechEngine::single_segment("recovered", 1.0);
        engine.fail_times.store(1, Ordering::SeqCst);
        let fx = fixture_with_engine(Arc::new(engine));

        let media = write_sample_wav(fx.app_dir.parent().unwrap(), "flaky.wav");
        let task_id = fx
            .manager
            .add_task(&media, TaskOptions::default())
            .unwrap();

        // max_retries is 0 in the fixture, so the transient error fails the task.
        fx.manager.start_processing().unwrap();
        wait_until(|| {
            fx.manager
                .get_task_status(&task_id)
                .unwrap()
                .map(|t| t.status == TaskStatus::Failed)
                .unwrap_or(false)
        });

        let failed = fx.manager.get_task_status(&task_id).unwrap().unwrap();
        assert!(failed.error_message.is_some());

        assert!(fx.manager.retry_task(&task_id).unwrap());
        wait_until(|| {
            fx.manager
                .get_task_status(&task_id)
                .unwrap()
                .map(|t| t.status == TaskStatus::Completed)
                .unwrap_or(false)
        });

        fx.manager.stop_processing();
    }

    #[test]
    fn test_delete_task_refuses_processing() {
        let blocker = CancellationToken::new();
        let mut engine = StubSpeechEngine::single_segment("x", 1.0);
        engine.block_until_cancelled = Some(blocker.clone());
        let fx = fixture_with_engine(Arc::new(engine));

        let media = write_sample_wav(fx.app_dir.parent().unwrap(), "busy.wav");
        let task_id = fx
            .manager
            .add_task(&media, TaskOptions::default())
            .unwrap();
        fx.manager.start_processing().unwrap();
        wait_until(|| {
            fx.manager
                .get_task_status(&task_id)
                .unwrap()
                .map(|t| t.status == TaskStatus::Processing)
                .unwrap_or(false)
        });

        assert!(!fx.manager.delete_task(&task_id).unwrap());

        fx.manager.cancel_task(&task_id).unwrap();
        blocker.cancel();
        wait_until(|| {
            fx.manager
                .get_task_status(&task_id)
                .unwrap()
                .map(|t| t.status.is_terminal())
                .unwrap_or(false)
        });
        assert!(fx.manager.delete_task(&task_id).unwrap());
        assert!(fx.manager.get_task_status(&task_id).unwrap().is_none());

        fx.manager.stop_processing();
    }

    #[test]
    fn test_folder_submission_recurses() {
        let fx = fixture();
        let root = fx.app_dir.parent().unwrap().join("media");
        std::fs::create_dir_all(root.join("nested")).unwrap();
        write_sample_wav(&root, "a.wav");
        write_sample_wav(&root.join("nested"), "b.mp3");
        std::fs::write(root.join("skip.txt"), b"no").unwrap();

        let ids = fx
            .manager
            .add_tasks_from_folder(&root, TaskOptions::default())
            .unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn test_pause_resume_events() {
        let fx = fixture();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        fx.events.subscribe(move |event_type, _| match event_type {
            EventType::ProcessingPaused => {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }
            EventType::ProcessingResumed => {
                seen_clone.fetch_add(10, Ordering::SeqCst);
            }
            _ => {}
        });

        fx.manager.start_processing().unwrap();
        fx.manager.pause_processing();
        assert!(fx.manager.is_paused());
        fx.manager.resume_processing();
        assert!(!fx.manager.is_paused());
        assert_eq!(seen.load(Ordering::SeqCst), 11);
        fx.manager.stop_processing();
    }
}
