// Application-wide constants for EchoNote Core
// Shared across config validation, the scheduler, and the timeline

/// Directory under the user's home holding all app state.
pub const APP_DIR_NAME: &str = ".echonote";

// Transcription
pub const SUPPORTED_TRANSCRIPTION_ENGINES: &[&str] = &["faster_whisper", "google", "azure"];
pub const SUPPORTED_OUTPUT_FORMATS: &[&str] = &["txt", "srt", "md"];
pub const FASTER_WHISPER_MODEL_SIZES: &[&str] =
    &["tiny", "base", "small", "medium", "large-v2", "large-v3"];

/// File extensions accepted for batch transcription (lowercase, no dot).
pub const AUDIO_VIDEO_FORMATS: &[&str] = &[
    "mp3", "wav", "m4a", "flac", "ogg", "opus", "mp4", "avi", "mkv", "mov", "webm", "mpeg", "mpga",
];

// Realtime
pub const SUPPORTED_RECORDING_FORMATS: &[&str] = &["wav", "mp3", "flac"];
pub const SUPPORTED_TRANSLATION_ENGINES: &[&str] = &["none", "google", "opus_mt"];
pub const TRANSLATION_ENGINE_NONE: &str = "none";
pub const DEFAULT_TRANSLATION_TARGET_LANGUAGE: &str = "en";

/// Capture defaults: 16 kHz mono, 512-sample frames (~32 ms).
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;
pub const CAPTURE_CHUNK_SAMPLES: usize = 512;
pub const MAX_CAPTURE_GAIN: f32 = 10.0;

// Timeline / scheduler
pub const TIMELINE_REMINDER_MINUTES_OPTIONS: &[i64] = &[1, 5, 10, 15, 30, 60];
pub const DEFAULT_REMINDER_MINUTES: i64 = 5;
pub const DEFAULT_AUTO_STOP_GRACE_MINUTES: i64 = 5;
pub const DEFAULT_STOP_CONFIRMATION_DELAY_MINUTES: i64 = 5;
pub const STOP_CONFIRMATION_DELAY_MAX_MINUTES: i64 = 120;
pub const MIN_REMINDER_WINDOW_MINUTES: i64 = 60;
pub const REMINDER_FUTURE_WINDOW_OFFSET_MINUTES: i64 = 10;
pub const MIN_FUTURE_WINDOW_MINUTES: i64 = 30;
/// Recordings older than this are force-stopped by the scheduler.
pub const STALE_RECORDING_MAX_AGE_SECS: i64 = 4 * 60 * 60;
/// Bounded wait for the UI stop-confirmation prompt.
pub const STOP_PROMPT_TIMEOUT_SECS: u64 = 180;

// Timeline search
pub const SEARCH_CONTEXT_CHARS_BEFORE: usize = 30;
pub const SEARCH_CONTEXT_CHARS_AFTER: usize = 50;
pub const MAX_TRANSCRIPT_CANDIDATES: usize = 200;
pub const TRANSCRIPT_CANDIDATE_WINDOW_DAYS: i64 = 30;

// Database
pub const DATABASE_BUSY_TIMEOUT_SECS: u64 = 30;

// Task queue
pub const MAX_CONCURRENT_TASKS_LIMIT: usize = 5;
