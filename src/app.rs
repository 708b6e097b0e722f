// Application context for EchoNote Core
// Builds and wires the subsystems; the UI shell holds one of these

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::calendar::CalendarStore;
use crate::config::{ConfigManager, SettingsManager};
use crate::database::DatabaseManager;
use crate::engines::{EngineLoader, SpeechEngine, TranslationEngine};
use crate::error::CoreResult;
use crate::events::{EventBus, EventType};
use crate::notify::{LogNotifier, SharedNotifier};
use crate::realtime::{RealtimeRecorder, SourceFactory};
use crate::security::{OAuthManager, SecretsManager, SecurityManager};
use crate::storage::FileManager;
use crate::timeline::{
    AutoTaskScheduler, StopDecision, StopPromptHandler, SystemClock, TimelineManager,
};
use crate::transcription::TranscriptionManager;

type SpeechFactory = Box<dyn Fn() -> CoreResult<Arc<dyn SpeechEngine>> + Send + Sync>;
type TranslationFactory = Box<dyn Fn(&str) -> Option<Arc<dyn TranslationEngine>> + Send + Sync>;

/// Prompt handler used when the UI has not installed one: never blocks and
/// always defers by the default.
struct DeferringPrompt;

impl StopPromptHandler for DeferringPrompt {
    fn prompt(
        &self,
        _event: &crate::database::models::CalendarEvent,
        default_delay_minutes: i64,
    ) -> Option<StopDecision> {
        Some(StopDecision::Delay {
            minutes: default_delay_minutes,
        })
    }
}

/// Builder for [`EchoNoteCore`]. Engine backends, notifications, and the
/// stop-prompt UI are collaborators supplied from outside the core.
pub struct CoreBuilder {
    app_dir: PathBuf,
    storage_dir: Option<PathBuf>,
    speech_factory: SpeechFactory,
    translation_factory: Option<TranslationFactory>,
    notifier: SharedNotifier,
    prompt: Arc<dyn StopPromptHandler>,
    source_factory: Option<SourceFactory>,
}

impl CoreBuilder {
    pub fn new(app_dir: PathBuf, speech_factory: SpeechFactory) -> Self {
        Self {
            app_dir,
            storage_dir: None,
            speech_factory,
            translation_factory: None,
            notifier: Arc::new(LogNotifier),
            prompt: Arc::new(DeferringPrompt),
            source_factory: None,
        }
    }

    pub fn with_storage_dir(mut self, dir: PathBuf) -> Self {
        self.storage_dir = Some(dir);
        self
    }

    /// Factory resolving a translation engine by name ("none" yields `None`).
    pub fn with_translation_factory(mut self, factory: TranslationFactory) -> Self {
        self.translation_factory = Some(factory);
        self
    }

    pub fn with_notifier(mut self, notifier: SharedNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_prompt_handler(mut self, prompt: Arc<dyn StopPromptHandler>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn with_source_factory(mut self, factory: SourceFactory) -> Self {
        self.source_factory = Some(factory);
        self
    }

    pub fn build(self) -> Result<EchoNoteCore> {
        std::fs::create_dir_all(&self.app_dir).context("Failed to create app directory")?;

        let events = EventBus::new();
        let config = Arc::new(ConfigManager::new(&self.app_dir)?);
        let settings = Arc::new(SettingsManager::new(config.clone(), events.clone()));

        let security = Arc::new(SecurityManager::new(&self.app_dir)?);
        let secrets = Arc::new(SecretsManager::new(security.clone(), &self.app_dir)?);
        let oauth = Arc::new(OAuthManager::new(security.clone(), &self.app_dir)?);

        let db_file = settings
            .get("database.path")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "data.db".to_string());
        let encryption_enabled = settings
            .get("database.encryption_enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let db_key = if encryption_enabled {
            Some(security.database_key_hex())
        } else {
            None
        };
        let db = Arc::new(DatabaseManager::new(
            self.app_dir.join(db_file),
            db_key.as_deref(),
        )?);

        let files = Arc::new(FileManager::new(self.storage_dir)?);

        let engine_name = settings
            .get("transcription.default_engine")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "faster_whisper".to_string());
        let speech_factory = self.speech_factory;
        let speech: Arc<EngineLoader<dyn SpeechEngine>> =
            Arc::new(EngineLoader::new(move || speech_factory()));

        let max_concurrent = settings
            .get("transcription.max_concurrent_tasks")
            .and_then(|v| v.as_i64())
            .unwrap_or(2)
            .clamp(1, 5) as usize;
        let max_retries = settings
            .get("transcription.max_retries")
            .and_then(|v| v.as_i64())
            .unwrap_or(3)
            .max(0) as u32;
        let retry_delay = settings
            .get("transcription.retry_delay")
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0)
            .max(0.0);
        let default_output_format = settings
            .get("transcription.default_output_format")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "txt".to_string());

        let transcription = Arc::new(TranscriptionManager::new(
            db.clone(),
            speech.clone(),
            engine_name,
            events.clone(),
            self.app_dir.clone(),
            max_concurrent,
            max_retries,
            Duration::from_secs_f64(retry_delay),
            default_output_format,
        ));

        let source_factory = self
            .source_factory
            .unwrap_or_else(RealtimeRecorder::microphone_factory);
        let recorder = Arc::new(RealtimeRecorder::new(
            speech.clone(),
            files.clone(),
            source_factory,
        ));

        if let Some(translation_factory) = &self.translation_factory {
            let engine_name = settings.get_realtime_preferences().translation_engine;
            recorder.set_translator(translation_factory(&engine_name));
        }

        let calendar = Arc::new(CalendarStore::new(db.clone()));
        let timeline = Arc::new(TimelineManager::new(calendar.clone(), db.clone()));

        let scheduler = Arc::new(AutoTaskScheduler::new(
            timeline.clone(),
            recorder.clone(),
            db.clone(),
            self.notifier.clone(),
            self.prompt.clone(),
            settings.clone(),
            Arc::new(SystemClock),
        ));

        let core = EchoNoteCore {
            app_dir: self.app_dir,
            events,
            config,
            settings,
            security,
            secrets,
            oauth,
            db,
            files,
            speech,
            transcription,
            recorder,
            calendar,
            timeline,
            scheduler,
        };
        core.wire_setting_reactions();
        Ok(core)
    }
}

/// The assembled capture-and-processing engine.
pub struct EchoNoteCore {
    pub app_dir: PathBuf,
    pub events: EventBus,
    pub config: Arc<ConfigManager>,
    pub settings: Arc<SettingsManager>,
    pub security: Arc<SecurityManager>,
    pub secrets: Arc<SecretsManager>,
    pub oauth: Arc<OAuthManager>,
    pub db: Arc<DatabaseManager>,
    pub files: Arc<FileManager>,
    pub speech: Arc<EngineLoader<dyn SpeechEngine>>,
    pub transcription: Arc<TranscriptionManager>,
    pub recorder: Arc<RealtimeRecorder>,
    pub calendar: Arc<CalendarStore>,
    pub timeline: Arc<TimelineManager>,
    pub scheduler: Arc<AutoTaskScheduler>,
}

impl EchoNoteCore {
    fn wire_setting_reactions(&self) {
        self.scheduler.subscribe_to_settings(&self.events);

        let transcription = Arc::downgrade(&self.transcription);
        self.events.subscribe(move |event_type, payload| {
            let manager = match transcription.upgrade() {
                Some(manager) => manager,
                None => return,
            };
            match event_type {
                EventType::SettingChanged => {
                    if payload["key"] == "transcription.max_concurrent_tasks" {
                        if let Some(n) = payload["value"].as_i64() {
                            if let Err(e) = manager.update_max_concurrent(n.max(1) as usize) {
                                log::error!("Failed to apply concurrency change: {}", e);
                            }
                        }
                    }
                }
                EventType::ApiKeysUpdated => {
                    if let Err(e) = manager.reload_engine() {
                        log::error!("Engine reload after credential change failed: {}", e);
                    }
                }
                _ => {}
            }
        });
    }

    /// Bring the background machinery up: task processing always, the
    /// scheduler only when auto-start is enabled.
    pub fn start(&self) -> CoreResult<()> {
        self.transcription.start_processing()?;

        let auto_start = self
            .settings
            .get("timeline.auto_start_enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        if auto_start {
            self.scheduler.start();
        }
        Ok(())
    }

    /// Orderly shutdown: scheduler first (it owns recordings), then the
    /// task queue, then housekeeping.
    pub fn shutdown(&self) {
        if self.scheduler.is_running() {
            self.scheduler.stop();
        }
        self.transcription.stop_all_tasks();
        self.files.cleanup_temp_files(7);
        log::info!("EchoNote core shut down");
    }
}
