// Voice activity gate for EchoNote Core
// Collects voiced frames into utterances closed by a run of silence

use crate::constants::CAPTURE_SAMPLE_RATE;

#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Activity threshold in [0, 1].
    pub threshold: f32,
    /// Silence run that closes an utterance.
    pub silence_duration_ms: u64,
    /// Utterances shorter than this are dropped.
    pub min_audio_duration: f64,
    pub sample_rate: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            silence_duration_ms: 2000,
            min_audio_duration: 3.0,
            sample_rate: CAPTURE_SAMPLE_RATE,
        }
    }
}

/// Normalized short-term activity score for one frame. RMS is scaled so that
/// ordinary speech levels span most of the [0, 1] threshold range.
pub fn activity_score(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let rms = (frame.iter().map(|&x| x * x).sum::<f32>() / frame.len() as f32).sqrt();
    (rms * 10.0).min(1.0)
}

/// Segments a frame stream into utterances.
///
/// A segment opens on the first voiced frame and closes once at least
/// `silence_duration_ms` of consecutive silence follows speech. Segments
/// shorter than `min_audio_duration` are discarded.
pub struct SpeechSegmenter {
    config: VadConfig,
    current: Vec<f32>,
    silence_samples: usize,
    silence_limit_samples: usize,
    in_speech: bool,
}

impl SpeechSegmenter {
    pub fn new(config: VadConfig) -> Self {
        let silence_limit_samples =
            (config.silence_duration_ms as usize * config.sample_rate as usize) / 1000;
        Self {
            config,
            current: Vec::new(),
            silence_samples: 0,
            silence_limit_samples,
            in_speech: false,
        }
    }

    /// Feed one frame; returns a closed utterance when silence ends one.
    pub fn push_frame(&mut self, frame: &[f32]) -> Option<Vec<f32>> {
        let voiced = activity_score(frame) >= self.config.threshold;

        if voiced {
            self.in_speech = true;
            self.silence_samples = 0;
            self.current.extend_from_slice(frame);
            return None;
        }

        if !self.in_speech {
            return None;
        }

        // Trailing silence stays in the utterance so the engine sees the
        // natural decay; the run length decides when to close.
        self.current.extend_from_slice(frame);
        self.silence_samples += frame.len();

        if self.silence_samples >= self.silence_limit_samples {
            return self.close_segment();
        }
        None
    }

    /// Close any open utterance (used when recording stops).
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        if self.in_speech {
            self.close_segment()
        } else {
            None
        }
    }

    fn close_segment(&mut self) -> Option<Vec<f32>> {
        let samples = std::mem::take(&mut self.current);
        self.in_speech = false;
        self.silence_samples = 0;

        let duration = samples.len() as f64 / self.config.sample_rate as f64;
        if duration >= self.config.min_audio_duration {
            log::debug!("Closed speech segment of {:.2}s", duration);
            Some(samples)
        } else {
            log::debug!("Dropped short speech segment of {:.2}s", duration);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn speech_frame() -> Vec<f32> {
        vec![0.2; 512]
    }

    fn silence_frame() -> Vec<f32> {
        vec![0.0; 512]
    }

    fn config() -> VadConfig {
        VadConfig {
            threshold: 0.5,
            silence_duration_ms: 64, // two 512-sample frames at 16 kHz
            min_audio_duration: 0.05,
            sample_rate: 16_000,
        }
    }

    #[test]
    fn test_activity_score_scaling() {
        assert_eq!(activity_score(&silence_frame()), 0.0);
        assert!(activity_score(&speech_frame()) > 0.5);
        assert_eq!(activity_score(&vec![1.0; 512]), 1.0);
        assert_eq!(activity_score(&[]), 0.0);
    }

    #[test]
    fn test_silence_closes_utterance() {
        let mut segmenter = SpeechSegmenter::new(config());

        for _ in 0..4 {
            assert!(segmenter.push_frame(&speech_frame()).is_none());
        }
        assert!(segmenter.push_frame(&silence_frame()).is_none());
        let segment = segmenter.push_frame(&silence_frame());

        let segment = segment.expect("silence run should close the utterance");
        // 4 speech frames + 2 trailing silence frames
        assert_eq!(segment.len(), 6 * 512);
    }

    #[test]
    fn test_short_utterance_dropped() {
        let mut segmenter = SpeechSegmenter::new(VadConfig {
            min_audio_duration: 1.0,
            ..config()
        });

        segmenter.push_frame(&speech_frame());
        segmenter.push_frame(&silence_frame());
        let closed = segmenter.push_frame(&silence_frame());
        assert!(closed.is_none());

        // Segmenter is reusable after the drop.
        for _ in 0..40 {
            segmenter.push_frame(&speech_frame());
        }
        segmenter.push_frame(&silence_frame());
        let segment = segmenter.push_frame(&silence_frame());
        assert!(segment.is_some());
    }

    #[test]
    fn test_leading_silence_ignored() {
        let mut segmenter = SpeechSegmenter::new(config());
        for _ in 0..10 {
            assert!(segmenter.push_frame(&silence_frame()).is_none());
        }
        assert!(segmenter.flush().is_none());
    }

    #[test]
    fn test_flush_returns_open_utterance() {
        let mut segmenter = SpeechSegmenter::new(config());
        for _ in 0..4 {
            segmenter.push_frame(&speech_frame());
        }
        let segment = segmenter.flush().expect("open utterance flushes");
        assert_eq!(segment.len(), 4 * 512);
        assert!(segmenter.flush().is_none());
    }
}
