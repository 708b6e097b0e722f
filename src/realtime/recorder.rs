// Realtime recorder for EchoNote Core
// Capture -> VAD -> incremental ASR -> optional translation -> artifacts

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Local;
use crossbeam::channel::Receiver;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::audio::{AudioFrameSource, SpeechSegmenter, VadConfig};
use crate::constants::CAPTURE_SAMPLE_RATE;
use crate::engines::{EngineLoader, SpeechEngine, TranslationEngine};
use crate::error::{CoreError, CoreResult};
use crate::storage::{set_file_permissions, FileManager, TRANSCRIPTS_DIR};

const STOP_PIPELINE_TIMEOUT: Duration = Duration::from_secs(10);
const PIPELINE_IDLE_SLEEP: Duration = Duration::from_millis(10);

/// Options for one realtime recording session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingOptions {
    pub event_id: Option<String>,
    pub event_title: Option<String>,
    pub language: Option<String>,
    pub enable_transcription: bool,
    pub enable_translation: bool,
    pub translation_source_lang: String,
    pub translation_target_lang: String,
    pub recording_format: String,
    pub save_recording: bool,
    pub save_transcript: bool,
    pub vad_threshold: f32,
    pub silence_duration_ms: u64,
    pub min_audio_duration: f64,
    pub gain: f32,
    pub input_source: Option<String>,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            event_id: None,
            event_title: None,
            language: None,
            enable_transcription: true,
            enable_translation: false,
            translation_source_lang: "auto".to_string(),
            translation_target_lang: "en".to_string(),
            recording_format: "wav".to_string(),
            save_recording: true,
            save_transcript: true,
            vad_threshold: 0.5,
            silence_duration_ms: 2000,
            min_audio_duration: 3.0,
            gain: 1.0,
            input_source: None,
        }
    }
}

/// Files produced by a finished session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordingArtifacts {
    pub duration: f64,
    pub recording_path: Option<PathBuf>,
    pub transcript_path: Option<PathBuf>,
    pub translation_path: Option<PathBuf>,
}

/// Control surface the auto-task scheduler drives. The recorder is a
/// process-wide single instance; callers must check `is_recording` first.
#[async_trait]
pub trait RecorderControl: Send + Sync {
    fn is_recording(&self) -> bool;

    /// Whether a usable translation engine is currently installed.
    fn translation_available(&self) -> bool {
        false
    }

    async fn start_recording(&self, options: RecordingOptions) -> CoreResult<()>;
    async fn stop_recording(&self) -> CoreResult<RecordingArtifacts>;
}

pub type SourceFactory =
    Box<dyn Fn(&RecordingOptions) -> CoreResult<Box<dyn AudioFrameSource>> + Send + Sync>;

#[derive(Default)]
struct SessionBuffers {
    samples: Vec<f32>,
    transcript_lines: Vec<String>,
    translation_lines: Vec<String>,
}

struct ActiveSession {
    options: RecordingOptions,
    started_mono: Instant,
    started_label: String,
    stop_token: CancellationToken,
    source: Box<dyn AudioFrameSource>,
    buffers: Arc<AsyncMutex<SessionBuffers>>,
    pipeline: tokio::task::JoinHandle<()>,
}

/// VAD-gated streaming transcription session bound to the microphone.
pub struct RealtimeRecorder {
    speech: Arc<EngineLoader<dyn SpeechEngine>>,
    translator: Mutex<Option<Arc<dyn TranslationEngine>>>,
    files: Arc<FileManager>,
    source_factory: SourceFactory,
    recording: AtomicBool,
    session: Mutex<Option<ActiveSession>>,
    last_artifacts: Mutex<Option<RecordingArtifacts>>,
}

impl RealtimeRecorder {
    pub fn new(
        speech: Arc<EngineLoader<dyn SpeechEngine>>,
        files: Arc<FileManager>,
        source_factory: SourceFactory,
    ) -> Self {
        Self {
            speech,
            translator: Mutex::new(None),
            files,
            source_factory,
            recording: AtomicBool::new(false),
            session: Mutex::new(None),
            last_artifacts: Mutex::new(None),
        }
    }

    /// Default factory capturing from the system microphone.
    pub fn microphone_factory() -> SourceFactory {
        Box::new(|options: &RecordingOptions| {
            let device = options
                .input_source
                .as_deref()
                .filter(|name| *name != "default")
                .map(str::to_string);
            Ok(Box::new(crate::audio::AudioCapture::new(device, options.gain))
                as Box<dyn AudioFrameSource>)
        })
    }

    /// Install or clear the translation engine selected by settings.
    pub fn set_translator(&self, translator: Option<Arc<dyn TranslationEngine>>) {
        *self.translator.lock().unwrap_or_else(|e| e.into_inner()) = translator;
    }

    pub fn has_translator(&self) -> bool {
        self.translator
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|t| t.is_available())
            .unwrap_or(false)
    }
}

#[async_trait]
impl RecorderControl for RealtimeRecorder {
    fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    fn translation_available(&self) -> bool {
        self.has_translator()
    }

    async fn start_recording(&self, options: RecordingOptions) -> CoreResult<()> {
        if self
            .recording
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CoreError::validation("a recording session is already active"));
        }

        let result = self.start_session(options).await;
        if result.is_err() {
            self.recording.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn stop_recording(&self) -> CoreResult<RecordingArtifacts> {
        let session = {
            let mut guard = self.session.lock().unwrap_or_else(|e| e.into_inner());
            guard.take()
        };

        let mut session = match session {
            Some(session) => session,
            // Idempotent: a second stop reports the previous artifacts.
            None => {
                return Ok(self
                    .last_artifacts
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone()
                    .unwrap_or_default())
            }
        };

        log::info!("Stopping realtime recording");

        // Release the audio device first; the transcription task may still
        // be mid-flight on the last segment.
        session.stop_token.cancel();
        session.source.stop();

        if tokio::time::timeout(STOP_PIPELINE_TIMEOUT, &mut session.pipeline)
            .await
            .is_err()
        {
            log::warn!("Realtime pipeline did not drain in time, aborting");
            session.pipeline.abort();
        }

        let buffers = {
            let guard = session.buffers.lock().await;
            SessionBuffers {
                samples: guard.samples.clone(),
                transcript_lines: guard.transcript_lines.clone(),
                translation_lines: guard.translation_lines.clone(),
            }
        };

        let duration = session.started_mono.elapsed().as_secs_f64();
        let artifacts = self.write_artifacts(&session, buffers, duration);

        *self
            .last_artifacts
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(artifacts.clone());
        self.recording.store(false, Ordering::SeqCst);

        log::info!(
            "Realtime recording stopped after {:.1}s (transcript: {}, recording: {})",
            duration,
            artifacts.transcript_path.is_some(),
            artifacts.recording_path.is_some()
        );
        Ok(artifacts)
    }
}

impl RealtimeRecorder {
    async fn start_session(&self, options: RecordingOptions) -> CoreResult<()> {
        let mut source = (self.source_factory)(&options)?;
        let frames = source.start()?;

        let stop_token = CancellationToken::new();
        let buffers = Arc::new(AsyncMutex::new(SessionBuffers::default()));

        let engine = if options.enable_transcription {
            Some(self.speech.get()?)
        } else {
            None
        };
        let translator = if options.enable_translation {
            self.translator
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone()
        } else {
            None
        };

        let vad = VadConfig {
            threshold: options.vad_threshold,
            silence_duration_ms: options.silence_duration_ms,
            min_audio_duration: options.min_audio_duration,
            sample_rate: CAPTURE_SAMPLE_RATE,
        };

        let pipeline = tokio::spawn(pipeline_loop(
            frames,
            vad,
            engine,
            translator,
            options.clone(),
            buffers.clone(),
            stop_token.clone(),
        ));

        let started_label = Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let session = ActiveSession {
            options,
            started_mono: Instant::now(),
            started_label,
            stop_token,
            source,
            buffers,
            pipeline,
        };

        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(session);
        log::info!("Realtime recording started");
        Ok(())
    }

    fn write_artifacts(
        &self,
        session: &ActiveSession,
        buffers: SessionBuffers,
        duration: f64,
    ) -> RecordingArtifacts {
        let options = &session.options;
        let base_name = artifact_base_name(options, &session.started_label);

        let mut artifacts = RecordingArtifacts {
            duration,
            ..Default::default()
        };

        if options.save_recording {
            match self.write_wav(&base_name, &buffers.samples) {
                Ok(path) => artifacts.recording_path = Some(path),
                Err(e) => log::error!("Failed to write recording file: {e:#}"),
            }
        }

        if options.save_transcript && !buffers.transcript_lines.is_empty() {
            let content = buffers.transcript_lines.join("\n") + "\n";
            match self.files.save_text_file(
                &content,
                &format!("{base_name}.txt"),
                Some(TRANSCRIPTS_DIR),
                true,
            ) {
                Ok(path) => artifacts.transcript_path = Some(path),
                Err(e) => log::error!("Failed to write transcript file: {e:#}"),
            }
        }

        if !buffers.translation_lines.is_empty() {
            let content = buffers.translation_lines.join("\n") + "\n";
            let filename = format!("{base_name}.{}.txt", options.translation_target_lang);
            match self
                .files
                .save_text_file(&content, &filename, Some(TRANSCRIPTS_DIR), true)
            {
                Ok(path) => artifacts.translation_path = Some(path),
                Err(e) => log::error!("Failed to write translation file: {e:#}"),
            }
        }

        artifacts
    }

    fn write_wav(&self, base_name: &str, samples: &[f32]) -> anyhow::Result<PathBuf> {
        let path = self.files.recordings_dir().join(format!("{base_name}.wav"));

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: CAPTURE_SAMPLE_RATE,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };

        let mut writer = hound::WavWriter::create(&path, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        set_file_permissions(&path);

        log::info!("Saved recording: {:?} ({} samples)", path, samples.len());
        Ok(path)
    }
}

fn artifact_base_name(options: &RecordingOptions, started_label: &str) -> String {
    match options.event_title.as_deref() {
        Some(title) if !title.trim().is_empty() => {
            let sanitized: String = title
                .chars()
                .map(|c| if c.is_alphanumeric() || c == ' ' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                })
                .collect();
            format!("{} {}", sanitized.trim(), started_label)
        }
        _ => format!("Recording {started_label}"),
    }
}

async fn pipeline_loop(
    frames: Receiver<Vec<f32>>,
    vad: VadConfig,
    engine: Option<Arc<dyn SpeechEngine>>,
    translator: Option<Arc<dyn TranslationEngine>>,
    options: RecordingOptions,
    buffers: Arc<AsyncMutex<SessionBuffers>>,
    stop: CancellationToken,
) {
    let mut segmenter = SpeechSegmenter::new(vad);

    loop {
        if stop.is_cancelled() {
            break;
        }

        match frames.try_recv() {
            Ok(frame) => {
                let segment = {
                    let mut guard = buffers.lock().await;
                    guard.samples.extend_from_slice(&frame);
                    segmenter.push_frame(&frame)
                };
                if let Some(segment) = segment {
                    transcribe_segment(&engine, &translator, &options, &buffers, &segment).await;
                }
            }
            Err(crossbeam::channel::TryRecvError::Empty) => {
                tokio::time::sleep(PIPELINE_IDLE_SLEEP).await;
            }
            Err(crossbeam::channel::TryRecvError::Disconnected) => break,
        }
    }

    // Final partial utterance when the session stops mid-speech.
    if let Some(segment) = segmenter.flush() {
        transcribe_segment(&engine, &translator, &options, &buffers, &segment).await;
    }

    log::debug!("Realtime pipeline drained");
}

async fn transcribe_segment(
    engine: &Option<Arc<dyn SpeechEngine>>,
    translator: &Option<Arc<dyn TranslationEngine>>,
    options: &RecordingOptions,
    buffers: &Arc<AsyncMutex<SessionBuffers>>,
    segment: &[f32],
) {
    let engine = match engine {
        Some(engine) => engine,
        None => return,
    };

    let text = match engine
        .transcribe_samples(segment, CAPTURE_SAMPLE_RATE, options.language.as_deref())
        .await
    {
        Ok(text) => text,
        Err(e) => {
            log::warn!("Segment transcription failed: {}", e);
            return;
        }
    };

    let text = text.trim();
    if text.is_empty() {
        return;
    }

    let stamp = Local::now().format("%H:%M:%S");
    {
        let mut guard = buffers.lock().await;
        guard.transcript_lines.push(format!("[{stamp}] {text}"));
    }

    if let Some(translator) = translator {
        match translator
            .translate(
                text,
                &options.translation_source_lang,
                &options.translation_target_lang,
            )
            .await
        {
            Ok(translated) => {
                let mut guard = buffers.lock().await;
                guard
                    .translation_lines
                    .push(format!("[{stamp}] {}", translated.trim()));
            }
            Err(e) => log::warn!("Segment translation failed: {}", e),
        }
    }
}
