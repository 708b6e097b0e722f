// Audio subsystem for EchoNote Core
// Capture produces fixed-size PCM frames; the VAD gate segments them

mod capture;
mod vad;

pub use capture::{AudioCapture, AudioFrameSource};
pub use vad::{activity_score, SpeechSegmenter, VadConfig};

#[cfg(test)]
pub use capture::testing;
