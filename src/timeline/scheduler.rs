// Auto-task scheduler for EchoNote Core
// Polls the timeline once a minute, sends reminders, starts recordings when
// events begin, and stops them after the grace period with user confirmation

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam::channel::{bounded, unbounded, Receiver, Sender};

use chrono::{DateTime, Duration as ChronoDuration, Local};
use serde_json::Value;

use crate::constants::{
    DEFAULT_AUTO_STOP_GRACE_MINUTES, DEFAULT_REMINDER_MINUTES, MIN_FUTURE_WINDOW_MINUTES,
    MIN_REMINDER_WINDOW_MINUTES, REMINDER_FUTURE_WINDOW_OFFSET_MINUTES,
    STALE_RECORDING_MAX_AGE_SECS, STOP_CONFIRMATION_DELAY_MAX_MINUTES,
    STOP_PROMPT_TIMEOUT_SECS, TRANSLATION_ENGINE_NONE,
};
use crate::config::SettingsManager;
use crate::database::models::{AttachmentKind, AutoTaskConfig, CalendarEvent, EventAttachment};
use crate::database::DatabaseManager;
use crate::events::EventType;
use crate::notify::SharedNotifier;
use crate::realtime::{RecorderControl, RecordingArtifacts, RecordingOptions};

use super::manager::{TimelineFilters, TimelineManager};

const TICK_INTERVAL: Duration = Duration::from_secs(60);
const START_WINDOW_SECS: i64 = 60;
const START_CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_RECORDING_TIMEOUT: Duration = Duration::from_secs(10);
const RUNTIME_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const CLEANUP_PAST_WINDOW_DAYS: f64 = 0.0833; // ~2 hours
const TIMELINE_QUERY_PAGE_SIZE: usize = 500;

/// Time source; swapped for a manual clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

/// The user's answer to the stop-confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    Stop,
    Delay { minutes: i64 },
}

/// UI-thread bridge: the scheduler submits a prompt and waits (bounded) for
/// the reply. `None` means the UI is unavailable or timed out; the scheduler
/// then falls back to the default delay.
pub trait StopPromptHandler: Send + Sync {
    fn prompt(&self, event: &CalendarEvent, default_delay_minutes: i64) -> Option<StopDecision>;
}

/// Prompt submitted through the channel bridge.
pub struct PromptRequest {
    pub event: CalendarEvent,
    pub default_delay_minutes: i64,
    pub reply: Sender<StopDecision>,
}

/// Submit-and-wait channel bridge. The UI layer drains `PromptRequest`s on
/// its own thread and replies through the embedded sender.
pub struct ChannelPromptBridge {
    tx: Sender<PromptRequest>,
    timeout: Duration,
}

impl ChannelPromptBridge {
    pub fn new() -> (Self, Receiver<PromptRequest>) {
        let (tx, rx) = unbounded();
        (
            Self {
                tx,
                timeout: Duration::from_secs(STOP_PROMPT_TIMEOUT_SECS),
            },
            rx,
        )
    }
}

impl StopPromptHandler for ChannelPromptBridge {
    fn prompt(&self, event: &CalendarEvent, default_delay_minutes: i64) -> Option<StopDecision> {
        let (reply_tx, reply_rx) = bounded(1);
        let request = PromptRequest {
            event: event.clone(),
            default_delay_minutes,
            reply: reply_tx,
        };
        if self.tx.send(request).is_err() {
            return None;
        }
        reply_rx.recv_timeout(self.timeout).ok()
    }
}

struct ActiveRecording {
    event: CalendarEvent,
    started_at: DateTime<Local>,
    runtime: tokio::runtime::Runtime,
}

struct PendingStop {
    next_prompt_at: DateTime<Local>,
}

struct SchedulerInner {
    timeline: Arc<TimelineManager>,
    recorder: Arc<dyn RecorderControl>,
    db: Arc<DatabaseManager>,
    notifier: SharedNotifier,
    prompt: Arc<dyn StopPromptHandler>,
    settings: Arc<SettingsManager>,
    clock: Arc<dyn Clock>,

    reminder_minutes: AtomicI64,
    auto_stop_grace_minutes: AtomicI64,
    stop_confirmation_delay_minutes: AtomicI64,

    notified_events: Mutex<HashSet<String>>,
    started_events: Mutex<HashSet<String>>,
    active_recordings: Mutex<HashMap<String, ActiveRecording>>,
    pending_stop_confirmations: Mutex<HashMap<String, PendingStop>>,

    running: AtomicBool,
    wake: Mutex<Option<Sender<()>>>,
}

/// Automatic task scheduler for calendar events.
///
/// Errors inside a tick are logged and never stop the poller.
pub struct AutoTaskScheduler {
    inner: Arc<SchedulerInner>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl AutoTaskScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        timeline: Arc<TimelineManager>,
        recorder: Arc<dyn RecorderControl>,
        db: Arc<DatabaseManager>,
        notifier: SharedNotifier,
        prompt: Arc<dyn StopPromptHandler>,
        settings: Arc<SettingsManager>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let timeline_prefs = settings.get_timeline_preferences();
        let reminder = coerce_minutes(timeline_prefs.reminder_minutes, DEFAULT_REMINDER_MINUTES);
        let grace = coerce_minutes(
            timeline_prefs.auto_stop_grace_minutes,
            DEFAULT_AUTO_STOP_GRACE_MINUTES,
        );
        let stop_delay = coerce_stop_delay(timeline_prefs.stop_confirmation_delay_minutes);

        log::info!(
            "Auto-task scheduler initialized (reminder: {} min, auto-stop grace: {} min, stop confirmation delay: {} min)",
            reminder,
            grace,
            stop_delay
        );

        Self {
            inner: Arc::new(SchedulerInner {
                timeline,
                recorder,
                db,
                notifier,
                prompt,
                settings,
                clock,
                reminder_minutes: AtomicI64::new(reminder),
                auto_stop_grace_minutes: AtomicI64::new(grace),
                stop_confirmation_delay_minutes: AtomicI64::new(stop_delay),
                notified_events: Mutex::new(HashSet::new()),
                started_events: Mutex::new(HashSet::new()),
                active_recordings: Mutex::new(HashMap::new()),
                pending_stop_confirmations: Mutex::new(HashMap::new()),
                running: AtomicBool::new(false),
                wake: Mutex::new(None),
            }),
            thread: Mutex::new(None),
        }
    }

    /// Start the poller: one immediate pass, then once per minute.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            log::warn!("Scheduler is already running");
            return;
        }

        let (wake_tx, wake_rx) = unbounded::<()>();
        *self.inner.wake.lock().unwrap_or_else(|e| e.into_inner()) = Some(wake_tx);

        let inner = self.inner.clone();
        let handle = std::thread::Builder::new()
            .name("auto-task-scheduler".to_string())
            .spawn(move || {
                // Immediate pass so events about to start are not delayed by
                // the first interval.
                inner.tick();
                loop {
                    match wake_rx.recv_timeout(TICK_INTERVAL) {
                        Ok(()) | Err(crossbeam::channel::RecvTimeoutError::Timeout) => {}
                        Err(crossbeam::channel::RecvTimeoutError::Disconnected) => break,
                    }
                    if !inner.running.load(Ordering::SeqCst) {
                        break;
                    }
                    inner.tick();
                }
                log::debug!("Scheduler thread exited");
            })
            .expect("failed to spawn scheduler thread");

        *self.thread.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        log::info!("Auto-task scheduler started");
    }

    /// Stop the poller and clean up active recordings.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            log::warn!("Scheduler is not running");
            return;
        }

        if let Some(wake) = self
            .inner
            .wake
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            let _ = wake.send(());
        }
        if let Some(handle) = self.thread.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }

        let active_events: Vec<CalendarEvent> = {
            let active = self
                .inner
                .active_recordings
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            active.values().map(|r| r.event.clone()).collect()
        };
        if !active_events.is_empty() {
            log::info!("Stopping {} active recording(s)", active_events.len());
            for event in active_events {
                self.inner.stop_auto_tasks(&event);
            }
        }
        self.inner
            .pending_stop_confirmations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();

        log::info!("Auto-task scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Run one scheduling pass now (also used by tests to drive the clock).
    pub fn tick_once(&self) {
        self.inner.tick();
    }

    /// React to a configuration change; wire this into the settings bus.
    pub fn handle_setting_changed(&self, key: &str, value: &Value) {
        match key {
            "timeline.reminder_minutes" => {
                if let Some(minutes) = value.as_i64() {
                    let minutes = minutes.max(0);
                    let previous = self.inner.reminder_minutes.swap(minutes, Ordering::SeqCst);
                    if previous != minutes {
                        // The new window may re-notify events.
                        self.inner
                            .notified_events
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .clear();
                        log::info!("Reminder minutes updated to {} via settings change", minutes);
                    }
                }
            }
            "timeline.auto_stop_grace_minutes" => {
                if let Some(minutes) = value.as_i64() {
                    self.inner
                        .auto_stop_grace_minutes
                        .store(minutes.max(0), Ordering::SeqCst);
                    log::info!("Auto-stop grace minutes updated to {}", minutes.max(0));
                }
            }
            "timeline.stop_confirmation_delay_minutes" => {
                if let Some(minutes) = value.as_i64() {
                    self.inner
                        .stop_confirmation_delay_minutes
                        .store(coerce_stop_delay(minutes), Ordering::SeqCst);
                    log::info!("Stop confirmation delay updated to {}", coerce_stop_delay(minutes));
                }
            }
            "timeline.auto_start_enabled" => {
                if let Some(enabled) = value.as_bool() {
                    if enabled && !self.is_running() {
                        log::info!("Enabling auto task scheduler via settings change");
                        self.start();
                    } else if !enabled && self.is_running() {
                        log::info!("Disabling auto task scheduler via settings change");
                        self.stop();
                    }
                }
            }
            _ => {}
        }
    }

    /// Subscribe to `setting_changed` on the shared event bus.
    pub fn subscribe_to_settings(self: &Arc<Self>, bus: &crate::events::EventBus) {
        let scheduler = Arc::downgrade(self);
        bus.subscribe(move |event_type, payload| {
            if event_type != EventType::SettingChanged {
                return;
            }
            if let Some(scheduler) = scheduler.upgrade() {
                if let Some(key) = payload["key"].as_str() {
                    scheduler.handle_setting_changed(key, &payload["value"]);
                }
            }
        });
    }

    #[cfg(test)]
    fn state_snapshot(&self) -> (HashSet<String>, HashSet<String>, Vec<String>, Vec<String>) {
        let notified = self
            .inner
            .notified_events
            .lock()
            .unwrap()
            .clone();
        let started = self.inner.started_events.lock().unwrap().clone();
        let active: Vec<String> = self
            .inner
            .active_recordings
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        let pending: Vec<String> = self
            .inner
            .pending_stop_confirmations
            .lock()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        (notified, started, active, pending)
    }
}

impl Drop for AutoTaskScheduler {
    fn drop(&mut self) {
        if self.inner.running.load(Ordering::SeqCst) {
            self.stop();
        }
    }
}

impl SchedulerInner {
    fn reminder_minutes(&self) -> i64 {
        self.reminder_minutes.load(Ordering::SeqCst)
    }

    fn past_window_minutes(&self) -> i64 {
        self.reminder_minutes().max(MIN_REMINDER_WINDOW_MINUTES)
    }

    fn future_window_minutes(&self) -> i64 {
        (self.reminder_minutes() + REMINDER_FUTURE_WINDOW_OFFSET_MINUTES)
            .max(MIN_FUTURE_WINDOW_MINUTES)
    }

    fn auto_start_recovery_window_secs(&self) -> i64 {
        (self.reminder_minutes().max(0) * 60).max(60)
    }

    /// One scheduling pass. Serialized by the poller thread.
    fn tick(&self) {
        let now = self.clock.now();

        let result = self.check_upcoming_events(now);
        if let Err(e) = result {
            log::error!("Error checking upcoming events: {:#}", e);
        }

        self.check_active_recordings_for_stop(now);
        self.cleanup_tracking_state(now);
    }

    fn check_upcoming_events(&self, now: DateTime<Local>) -> anyhow::Result<()> {
        let past_days = self.past_window_minutes() as f64 / 1440.0;
        let future_days = self.future_window_minutes() as f64 / 1440.0;

        let page = self.timeline.get_timeline_events(
            now,
            past_days,
            future_days,
            0,
            TIMELINE_QUERY_PAGE_SIZE,
            &TimelineFilters::default(),
        )?;

        let now_naive = now.naive_local();

        for entry in &page.future_events {
            let event = &entry.event;
            let auto_tasks = &entry.auto_tasks;

            if !auto_tasks.any_enabled() {
                continue;
            }

            let until_start = (event.start_time.naive_local() - now_naive).num_seconds();
            let reminder_secs = self.reminder_minutes() * 60;

            if reminder_secs > 0 && until_start > 0 && until_start <= reminder_secs {
                let already = self
                    .notified_events
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .contains(&event.id);
                if !already {
                    self.send_reminder(event, auto_tasks);
                    self.notified_events
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(event.id.clone());
                }
            }

            if (0..=START_WINDOW_SECS).contains(&until_start) {
                let already = self
                    .started_events
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .contains(&event.id);
                if !already && self.start_auto_tasks(event, auto_tasks) {
                    self.started_events
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(event.id.clone());
                }
            }
        }

        // Recovery: polling drift or app startup can miss the start window;
        // events still in progress get a late start within the window.
        for entry in &page.past_events {
            let event = &entry.event;

            {
                let active = self
                    .active_recordings
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                if active.contains_key(&event.id) {
                    continue;
                }
            }
            {
                let started = self
                    .started_events
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                if started.contains(&event.id) {
                    continue;
                }
            }

            let (event_start, event_end) = event.window();
            if event_start <= now_naive && now_naive < event_end {
                let since_start = (now_naive - event_start).num_seconds();
                if (0..=self.auto_start_recovery_window_secs()).contains(&since_start) {
                    let auto_tasks = self
                        .timeline
                        .get_auto_task(&event.id)
                        .ok()
                        .flatten()
                        .unwrap_or_else(|| AutoTaskConfig::disabled(&event.id));
                    if auto_tasks.any_enabled() && self.start_auto_tasks(event, &auto_tasks) {
                        self.started_events
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .insert(event.id.clone());
                    }
                }
            }
        }

        Ok(())
    }

    /// Stop active recordings once event end + grace has elapsed, honoring
    /// any pending user deferral.
    fn check_active_recordings_for_stop(&self, now: DateTime<Local>) {
        let active_ids: Vec<String> = {
            let active = self
                .active_recordings
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            active.keys().cloned().collect()
        };

        let now_naive = now.naive_local();

        for event_id in active_ids {
            // Refresh the event so calendar edits move the deadline.
            let event = {
                let mut active = self
                    .active_recordings
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                let recording = match active.get_mut(&event_id) {
                    Some(recording) => recording,
                    None => continue,
                };
                if let Ok(Some(latest)) = self.timeline.calendar().get_event(&event_id) {
                    recording.event = latest;
                }
                recording.event.clone()
            };

            let (_, event_end) = event.window();
            let grace_secs = self.auto_stop_grace_minutes.load(Ordering::SeqCst) * 60;
            let stop_deadline = event_end + ChronoDuration::seconds(grace_secs);

            if now_naive < stop_deadline {
                self.pending_stop_confirmations
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&event_id);
                continue;
            }

            let deferred = {
                let pending = self
                    .pending_stop_confirmations
                    .lock()
                    .unwrap_or_else(|e| e.into_inner());
                pending
                    .get(&event_id)
                    .map(|p| now_naive < p.next_prompt_at.naive_local())
                    .unwrap_or(false)
            };
            if deferred {
                continue;
            }

            let default_delay = self.stop_confirmation_delay_minutes.load(Ordering::SeqCst);
            let decision = self
                .prompt
                .prompt(&event, default_delay)
                .unwrap_or(StopDecision::Delay {
                    minutes: default_delay,
                });

            match decision {
                StopDecision::Stop => {
                    self.pending_stop_confirmations
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .remove(&event_id);
                    self.stop_auto_tasks(&event);
                }
                StopDecision::Delay { minutes } => {
                    let minutes = coerce_stop_delay(minutes);
                    let next_prompt_at = now + ChronoDuration::minutes(minutes);
                    self.pending_stop_confirmations
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(event_id.clone(), PendingStop { next_prompt_at });
                    self.notifier.send_info(
                        "EchoNote auto-stop deferred",
                        &format!(
                            "Recording for \"{}\" continues; next check at {}",
                            event.title,
                            next_prompt_at.format("%H:%M")
                        ),
                    );
                }
            }
        }
    }

    fn cleanup_tracking_state(&self, now: DateTime<Local>) {
        // Drop notified/started ids that left the recent past window.
        let recent_ids: HashSet<String> = match self.timeline.get_timeline_events(
            now,
            CLEANUP_PAST_WINDOW_DAYS,
            self.future_window_minutes() as f64 / 1440.0,
            0,
            TIMELINE_QUERY_PAGE_SIZE,
            &TimelineFilters::default(),
        ) {
            Ok(page) => page
                .past_events
                .iter()
                .map(|e| e.event.id.clone())
                .chain(page.future_events.iter().map(|e| e.event.id.clone()))
                .collect(),
            Err(e) => {
                log::error!("Error cleaning up tracking sets: {:#}", e);
                return;
            }
        };

        {
            let mut notified = self
                .notified_events
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            notified.retain(|id| recent_ids.contains(id));
        }
        {
            let active = self
                .active_recordings
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let mut started = self
                .started_events
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            // Keep ids with live recordings; their stop path clears them.
            started.retain(|id| recent_ids.contains(id) || active.contains_key(id));
        }

        // Safety valve: force-stop recordings that outlived any meeting.
        let stale_events: Vec<CalendarEvent> = {
            let active = self
                .active_recordings
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            active
                .values()
                .filter(|recording| {
                    (now - recording.started_at).num_seconds() > STALE_RECORDING_MAX_AGE_SECS
                })
                .map(|recording| recording.event.clone())
                .collect()
        };
        for event in stale_events {
            log::warn!(
                "Found stale recording for event {}, forcing stop",
                event.id
            );
            self.stop_auto_tasks(&event);
        }

        // Pending confirmations whose recording is gone are meaningless.
        {
            let active = self
                .active_recordings
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let mut pending = self
                .pending_stop_confirmations
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            pending.retain(|id, _| active.contains_key(id));
        }
    }

    fn send_reminder(&self, event: &CalendarEvent, auto_tasks: &AutoTaskConfig) {
        let mut tasks = Vec::new();
        if auto_tasks.enable_transcription {
            tasks.push("transcription");
        }
        if auto_tasks.enable_recording {
            tasks.push("recording");
        }
        let task_list = if tasks.is_empty() {
            "none".to_string()
        } else {
            tasks.join(", ")
        };

        self.notifier.send_info(
            "EchoNote event reminder",
            &format!(
                "\"{}\" starts at {}. Scheduled tasks: {}",
                event.title,
                event.start_time.format("%H:%M"),
                task_list
            ),
        );
        log::info!("Reminder notification sent for event: {} - {}", event.id, event.title);
    }

    /// Derive session options by overlaying event flags onto the global
    /// realtime preferences.
    fn build_recording_options(
        &self,
        event: &CalendarEvent,
        auto_tasks: &AutoTaskConfig,
    ) -> RecordingOptions {
        let prefs = self.settings.get_realtime_preferences();

        let save_recording = auto_tasks.enable_recording || prefs.auto_save;
        let enable_transcription = auto_tasks.enable_transcription || prefs.save_transcript;
        let translation_globally_enabled = prefs.translation_engine != TRANSLATION_ENGINE_NONE;
        let enable_translation = enable_transcription
            && auto_tasks.enable_translation
            && translation_globally_enabled
            && self.recorder.translation_available();

        RecordingOptions {
            event_id: Some(event.id.clone()),
            event_title: Some(event.title.clone()),
            language: auto_tasks.transcription_language.clone(),
            enable_transcription,
            enable_translation,
            translation_source_lang: prefs.translation_source_lang.clone(),
            translation_target_lang: auto_tasks
                .translation_target_language
                .clone()
                .unwrap_or_else(|| prefs.translation_target_lang.clone()),
            recording_format: prefs.recording_format.clone(),
            save_recording,
            save_transcript: prefs.save_transcript && enable_transcription,
            vad_threshold: prefs.vad_threshold,
            silence_duration_ms: prefs.silence_duration_ms,
            min_audio_duration: prefs.min_audio_duration,
            gain: prefs.default_gain,
            input_source: Some(prefs.default_input_source.clone()),
        }
    }

    /// Start the recording session for an event on a dedicated runtime.
    /// Returns whether the session is live.
    fn start_auto_tasks(&self, event: &CalendarEvent, auto_tasks: &AutoTaskConfig) -> bool {
        log::info!("Starting auto tasks for event: {} - {}", event.id, event.title);

        if self.recorder.is_recording() {
            log::warn!(
                "Cannot start auto tasks for event {}: recorder is already active",
                event.id
            );
            self.notifier.send_warning(
                "EchoNote recorder busy",
                &format!(
                    "Cannot auto-record \"{}\": another recording is active",
                    event.title
                ),
            );
            return false;
        }

        let options = self.build_recording_options(event, auto_tasks);

        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(format!("recording-{}", event.id))
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                log::error!("Failed to build recording runtime for {}: {}", event.id, e);
                self.notifier.send_error(
                    "EchoNote auto-start failed",
                    &format!("Could not start recording for \"{}\": {}", event.title, e),
                );
                return false;
            }
        };

        let recorder = self.recorder.clone();
        let start_result = runtime.block_on(async {
            tokio::time::timeout(START_CONFIRM_TIMEOUT, recorder.start_recording(options)).await
        });

        let failure: Option<String> = match start_result {
            Ok(Ok(())) if self.recorder.is_recording() => None,
            Ok(Ok(())) => Some("recording did not become active in time".to_string()),
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some("recording start timed out".to_string()),
        };

        if let Some(reason) = failure {
            log::error!("Failed to start auto tasks for event {}: {}", event.id, reason);
            runtime.shutdown_timeout(RUNTIME_TEARDOWN_TIMEOUT);
            self.started_events
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&event.id);
            self.notifier.send_error(
                "EchoNote auto-start failed",
                &format!("Could not start recording for \"{}\": {}", event.title, reason),
            );
            return false;
        }

        self.active_recordings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                event.id.clone(),
                ActiveRecording {
                    event: event.clone(),
                    started_at: self.clock.now(),
                    runtime,
                },
            );

        log::info!("Successfully started auto tasks for event {}", event.id);
        self.notifier.send_success(
            "EchoNote recording started",
            &format!("Auto-recording \"{}\"", event.title),
        );
        true
    }

    /// Stop the recording session for an event, persist its artifacts as
    /// attachments, and tear down the per-event runtime.
    fn stop_auto_tasks(&self, event: &CalendarEvent) {
        let recording = {
            let mut active = self
                .active_recordings
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            active.remove(&event.id)
        };

        let recording = match recording {
            Some(recording) => recording,
            None => {
                log::debug!("No active recording for event {}, skipping stop", event.id);
                return;
            }
        };

        log::info!("Stopping auto tasks for event: {} - {}", event.id, event.title);

        let recorder = self.recorder.clone();
        let stop_result = recording.runtime.block_on(async {
            tokio::time::timeout(STOP_RECORDING_TIMEOUT, recorder.stop_recording()).await
        });

        let artifacts = match stop_result {
            Ok(Ok(artifacts)) => artifacts,
            Ok(Err(e)) => {
                log::error!("Error stopping recording for event {}: {}", event.id, e);
                RecordingArtifacts::default()
            }
            Err(_) => {
                log::error!("Timeout stopping recording for event {}", event.id);
                RecordingArtifacts::default()
            }
        };

        recording.runtime.shutdown_timeout(RUNTIME_TEARDOWN_TIMEOUT);

        if let Err(e) = self.save_event_attachments(&event.id, &artifacts) {
            log::error!("Failed to save attachments for event {}: {:#}", event.id, e);
        }

        // Always clear stale in-memory tracking once a stop was attempted.
        self.started_events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&event.id);
        self.pending_stop_confirmations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&event.id);

        log::info!("Successfully stopped auto tasks for event {}", event.id);
        self.notifier.send_success(
            "EchoNote recording saved",
            &format!(
                "Recording for \"{}\" finished ({:.1}s)",
                event.title, artifacts.duration
            ),
        );
    }

    fn save_event_attachments(
        &self,
        event_id: &str,
        artifacts: &RecordingArtifacts,
    ) -> anyhow::Result<()> {
        let entries = [
            (AttachmentKind::Recording, &artifacts.recording_path),
            (AttachmentKind::Transcript, &artifacts.transcript_path),
            (AttachmentKind::Translation, &artifacts.translation_path),
        ];

        for (kind, path) in entries {
            if let Some(path) = path {
                let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
                self.db.upsert_attachment(&EventAttachment::new(
                    event_id.to_string(),
                    kind,
                    path.to_string_lossy().into_owned(),
                    size,
                ))?;
            }
        }
        Ok(())
    }
}

fn coerce_minutes(value: i64, default: i64) -> i64 {
    if value < 0 {
        default
    } else {
        value
    }
}

fn coerce_stop_delay(value: i64) -> i64 {
    value.clamp(1, STOP_CONFIRMATION_DELAY_MAX_MINUTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::CalendarStore;
    use crate::config::ConfigManager;
    use crate::events::EventBus;
    use crate::notify::testing::RecordingNotifier;
    use crate::notify::NotificationKind;
    use std::collections::VecDeque;
    use tempfile::tempdir;

    struct ManualClock {
        now: Mutex<DateTime<Local>>,
    }

    impl ManualClock {
        fn new(start: DateTime<Local>) -> Self {
            Self {
                now: Mutex::new(start),
            }
        }

        fn set(&self, now: DateTime<Local>) {
            *self.now.lock().unwrap() = now;
        }

        fn advance_secs(&self, secs: i64) {
            let mut guard = self.now.lock().unwrap();
            *guard += ChronoDuration::seconds(secs);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Local> {
            *self.now.lock().unwrap()
        }
    }

    /// Recorder stub mirroring the real recorder's single-instance contract.
    struct StubRecorder {
        recording: AtomicBool,
        artifacts: RecordingArtifacts,
        starts: AtomicI64,
        stops: AtomicI64,
    }

    impl StubRecorder {
        fn new(artifacts: RecordingArtifacts) -> Self {
            Self {
                recording: AtomicBool::new(false),
                artifacts,
                starts: AtomicI64::new(0),
                stops: AtomicI64::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl RecorderControl for StubRecorder {
        fn is_recording(&self) -> bool {
            self.recording.load(Ordering::SeqCst)
        }

        async fn start_recording(&self, _options: RecordingOptions) -> crate::error::CoreResult<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.recording.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop_recording(&self) -> crate::error::CoreResult<RecordingArtifacts> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.recording.store(false, Ordering::SeqCst);
            Ok(self.artifacts.clone())
        }
    }

    /// Prompt handler replaying a scripted sequence of decisions.
    struct ScriptedPrompt {
        decisions: Mutex<VecDeque<Option<StopDecision>>>,
        prompts: AtomicI64,
    }

    impl ScriptedPrompt {
        fn new(decisions: Vec<Option<StopDecision>>) -> Self {
            Self {
                decisions: Mutex::new(decisions.into()),
                prompts: AtomicI64::new(0),
            }
        }
    }

    impl StopPromptHandler for ScriptedPrompt {
        fn prompt(&self, _event: &CalendarEvent, _default: i64) -> Option<StopDecision> {
            self.prompts.fetch_add(1, Ordering::SeqCst);
            self.decisions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Some(StopDecision::Delay { minutes: 5 }))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        db: Arc<DatabaseManager>,
        scheduler: AutoTaskScheduler,
        recorder: Arc<StubRecorder>,
        notifier: Arc<RecordingNotifier>,
        prompt: Arc<ScriptedPrompt>,
        clock: Arc<ManualClock>,
    }

    fn fixture_with(decisions: Vec<Option<StopDecision>>, artifacts: RecordingArtifacts) -> Fixture {
        let dir = tempdir().unwrap();
        let db = Arc::new(DatabaseManager::new(dir.path().join("test.db"), None).unwrap());
        let calendar = Arc::new(CalendarStore::new(db.clone()));
        let timeline = Arc::new(TimelineManager::new(calendar, db.clone()));

        let config = Arc::new(ConfigManager::new(dir.path()).unwrap());
        let settings = Arc::new(SettingsManager::new(config, EventBus::new()));

        let recorder = Arc::new(StubRecorder::new(artifacts));
        let notifier = Arc::new(RecordingNotifier::default());
        let prompt = Arc::new(ScriptedPrompt::new(decisions));
        let clock = Arc::new(ManualClock::new(Local::now()));

        let scheduler = AutoTaskScheduler::new(
            timeline,
            recorder.clone(),
            db.clone(),
            notifier.clone(),
            prompt.clone(),
            settings,
            clock.clone(),
        );

        Fixture {
            _dir: dir,
            db,
            scheduler,
            recorder,
            notifier,
            prompt,
            clock,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(
            vec![],
            RecordingArtifacts {
                duration: 60.0,
                ..Default::default()
            },
        )
    }

    fn schedule_event(
        fx: &Fixture,
        title: &str,
        start_in_secs: i64,
        duration_secs: i64,
    ) -> CalendarEvent {
        let now = fx.clock.now();
        let event = CalendarEvent::new(
            title.to_string(),
            now + ChronoDuration::seconds(start_in_secs),
            Some(now + ChronoDuration::seconds(start_in_secs + duration_secs)),
        );
        fx.db.save_event(&event).unwrap();
        fx.db
            .set_auto_task_config(&AutoTaskConfig {
                event_id: event.id.clone(),
                enable_transcription: true,
                enable_recording: true,
                ..Default::default()
            })
            .unwrap();
        event
    }

    #[test]
    fn test_reminder_then_start_then_deferred_stop_then_stop() {
        let artifacts_dir = tempdir().unwrap();
        let rec_path = artifacts_dir.path().join("r.wav");
        let txt_path = artifacts_dir.path().join("t.txt");
        std::fs::write(&rec_path, b"wav").unwrap();
        std::fs::write(&txt_path, b"transcript").unwrap();

        let fx = fixture_with(
            vec![
                Some(StopDecision::Delay { minutes: 5 }),
                Some(StopDecision::Stop),
            ],
            RecordingArtifacts {
                duration: 60.0,
                recording_path: Some(rec_path),
                transcript_path: Some(txt_path),
                translation_path: None,
            },
        );

        // Event starts in 2 minutes, runs for 1 minute.
        let event = schedule_event(&fx, "standup", 120, 60);

        // T0: inside the 5-minute reminder window, outside the start window.
        fx.scheduler.tick_once();
        let (notified, started, active, _) = fx.scheduler.state_snapshot();
        assert!(notified.contains(&event.id));
        assert!(started.is_empty() && active.is_empty());
        assert_eq!(fx.notifier.count_of(NotificationKind::Info), 1);

        // T0+90s: inside the start window; no duplicate reminder.
        fx.clock.advance_secs(90);
        fx.scheduler.tick_once();
        let (_, started, active, _) = fx.scheduler.state_snapshot();
        assert!(started.contains(&event.id));
        assert_eq!(active, vec![event.id.clone()]);
        assert!(fx.recorder.is_recording());
        assert_eq!(fx.notifier.count_of(NotificationKind::Info), 1);
        assert_eq!(fx.notifier.count_of(NotificationKind::Success), 1);

        // Before end + grace: nothing to confirm.
        fx.clock.advance_secs(60);
        fx.scheduler.tick_once();
        assert_eq!(fx.prompt.prompts.load(Ordering::SeqCst), 0);

        // Past end + grace (5 min default): prompt fires, user defers 5 min.
        fx.clock.advance_secs(6 * 60);
        fx.scheduler.tick_once();
        assert_eq!(fx.prompt.prompts.load(Ordering::SeqCst), 1);
        let (_, _, active, pending) = fx.scheduler.state_snapshot();
        assert_eq!(active, vec![event.id.clone()]);
        assert_eq!(pending, vec![event.id.clone()]);
        // Deferral notification went out.
        assert_eq!(fx.notifier.count_of(NotificationKind::Info), 2);

        // Still deferred: next tick before next_prompt_at asks nothing.
        fx.clock.advance_secs(60);
        fx.scheduler.tick_once();
        assert_eq!(fx.prompt.prompts.load(Ordering::SeqCst), 1);

        // At next_prompt_at the user confirms the stop.
        fx.clock.advance_secs(4 * 60);
        fx.scheduler.tick_once();
        assert_eq!(fx.prompt.prompts.load(Ordering::SeqCst), 2);
        assert!(!fx.recorder.is_recording());
        assert_eq!(fx.recorder.stops.load(Ordering::SeqCst), 1);

        // Attachments persisted for recording + transcript.
        let attachments = fx.db.get_attachments_for_event(&event.id).unwrap();
        let kinds: HashSet<&str> = attachments.iter().map(|a| a.kind.as_str()).collect();
        assert_eq!(kinds, HashSet::from(["recording", "transcript"]));

        // All in-memory tracking for the event is cleared.
        let (_, started, active, pending) = fx.scheduler.state_snapshot();
        assert!(!started.contains(&event.id));
        assert!(active.is_empty());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_consecutive_ticks_are_idempotent() {
        let fx = fixture();
        schedule_event(&fx, "planning", 120, 600);

        fx.scheduler.tick_once();
        let first = fx.scheduler.state_snapshot();
        let reminders = fx.notifier.count_of(NotificationKind::Info);

        fx.scheduler.tick_once();
        let second = fx.scheduler.state_snapshot();
        assert_eq!(first, second);
        assert_eq!(fx.notifier.count_of(NotificationKind::Info), reminders);
        assert_eq!(fx.recorder.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_busy_recorder_refuses_overlapping_start() {
        let fx = fixture();
        fx.recorder.recording.store(true, Ordering::SeqCst);
        let event = schedule_event(&fx, "overlap", 30, 600);

        fx.scheduler.tick_once();
        let (_, started, active, _) = fx.scheduler.state_snapshot();
        assert!(!started.contains(&event.id));
        assert!(active.is_empty());
        assert_eq!(fx.recorder.starts.load(Ordering::SeqCst), 0);
        assert_eq!(fx.notifier.count_of(NotificationKind::Warning), 1);
    }

    #[test]
    fn test_recovery_start_for_event_already_running() {
        let fx = fixture();
        // Started 2 minutes ago, ends in 8 minutes; reminder window (5 min)
        // gives a 300s recovery window.
        let event = schedule_event(&fx, "missed", -120, 600);

        fx.scheduler.tick_once();
        let (_, started, active, _) = fx.scheduler.state_snapshot();
        assert!(started.contains(&event.id));
        assert_eq!(active, vec![event.id]);
        assert_eq!(fx.recorder.starts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_recovery_outside_window() {
        let fx = fixture();
        // Started 10 minutes ago: outside the 5-minute recovery window.
        let event = schedule_event(&fx, "too-late", -600, 3600);

        fx.scheduler.tick_once();
        let (_, started, active, _) = fx.scheduler.state_snapshot();
        assert!(!started.contains(&event.id));
        assert!(active.is_empty());
    }

    #[test]
    fn test_disabled_auto_tasks_ignored() {
        let fx = fixture();
        let now = fx.clock.now();
        let event = CalendarEvent::new(
            "no-auto".to_string(),
            now + ChronoDuration::seconds(30),
            Some(now + ChronoDuration::seconds(630)),
        );
        fx.db.save_event(&event).unwrap();

        fx.scheduler.tick_once();
        let (notified, started, _, _) = fx.scheduler.state_snapshot();
        assert!(notified.is_empty());
        assert!(started.is_empty());
    }

    #[test]
    fn test_prompt_timeout_defaults_to_delay() {
        let fx = fixture_with(
            vec![None],
            RecordingArtifacts {
                duration: 1.0,
                ..Default::default()
            },
        );
        let event = schedule_event(&fx, "quiet-ui", 0, 60);

        fx.scheduler.tick_once();
        let (_, _, active, _) = fx.scheduler.state_snapshot();
        assert_eq!(active, vec![event.id.clone()]);

        // Past end + grace with an unavailable UI: default deferral applies.
        fx.clock.advance_secs(60 + 6 * 60);
        fx.scheduler.tick_once();
        assert!(fx.recorder.is_recording());
        let (_, _, _, pending) = fx.scheduler.state_snapshot();
        assert_eq!(pending, vec![event.id]);
    }

    #[test]
    fn test_safety_valve_force_stops_old_recording() {
        let fx = fixture();
        let event = schedule_event(&fx, "marathon", 0, 10);

        fx.scheduler.tick_once();
        let (_, _, active, _) = fx.scheduler.state_snapshot();
        assert_eq!(active, vec![event.id.clone()]);

        // Pretend more than 4 hours elapsed; prompt never answered Stop.
        fx.clock.advance_secs(STALE_RECORDING_MAX_AGE_SECS + 60);
        fx.scheduler.tick_once();
        assert!(!fx.recorder.is_recording());
        let (_, _, active, pending) = fx.scheduler.state_snapshot();
        assert!(active.is_empty());
        assert!(pending.is_empty());
    }

    #[test]
    fn test_reminder_minutes_change_clears_notified() {
        let fx = fixture();
        schedule_event(&fx, "renotify", 120, 600);

        fx.scheduler.tick_once();
        let (notified, _, _, _) = fx.scheduler.state_snapshot();
        assert_eq!(notified.len(), 1);

        fx.scheduler
            .handle_setting_changed("timeline.reminder_minutes", &serde_json::json!(10));
        let (notified, _, _, _) = fx.scheduler.state_snapshot();
        assert!(notified.is_empty());

        // started_events is deliberately untouched by the window change.
        fx.scheduler
            .handle_setting_changed("timeline.stop_confirmation_delay_minutes", &serde_json::json!(240));
        assert_eq!(
            fx.scheduler
                .inner
                .stop_confirmation_delay_minutes
                .load(Ordering::SeqCst),
            STOP_CONFIRMATION_DELAY_MAX_MINUTES
        );
    }

    #[test]
    fn test_channel_prompt_bridge_round_trip() {
        let (bridge, requests) = ChannelPromptBridge::new();
        let event = CalendarEvent::new("bridged".to_string(), Local::now(), None);

        let ui_thread = std::thread::spawn(move || {
            let request = requests.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(request.default_delay_minutes, 5);
            request.reply.send(StopDecision::Stop).unwrap();
        });

        let decision = bridge.prompt(&event, 5);
        assert_eq!(decision, Some(StopDecision::Stop));
        ui_thread.join().unwrap();
    }
}
