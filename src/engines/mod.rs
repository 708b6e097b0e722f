// Engine contracts for EchoNote Core
// Speech and translation backends are external collaborators behind traits

mod loader;
mod speech;
mod translation;

pub use loader::EngineLoader;
pub use speech::{
    EngineOptions, ProgressCallback, SpeechEngine, TranscriptSegment, TranscriptionResult,
    ENGINE_OPTION_KEYS,
};
pub use translation::TranslationEngine;

#[cfg(test)]
pub mod testing {
    // Engine stubs shared by manager, recorder, and scheduler tests.

    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    use crate::error::{CoreError, CoreResult};

    use super::*;

    /// Speech engine returning a fixed result, optionally stalling until
    /// cancelled to exercise mid-flight cancellation.
    pub struct StubSpeechEngine {
        pub result: TranscriptionResult,
        pub calls: AtomicUsize,
        pub block_until_cancelled: Option<CancellationToken>,
        pub fail_times: AtomicUsize,
    }

    impl StubSpeechEngine {
        pub fn returning(result: TranscriptionResult) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
                block_until_cancelled: None,
                fail_times: AtomicUsize::new(0),
            }
        }

        pub fn single_segment(text: &str, duration: f64) -> Self {
            Self::returning(TranscriptionResult {
                segments: vec![TranscriptSegment {
                    start: 0.0,
                    end: duration,
                    text: text.to_string(),
                }],
                duration: Some(duration),
                language: Some("en".to_string()),
            })
        }
    }

    #[async_trait]
    impl SpeechEngine for StubSpeechEngine {
        fn name(&self) -> &str {
            "stub"
        }

        async fn transcribe_file(
            &self,
            _path: &Path,
            _language: Option<&str>,
            _options: &EngineOptions,
            progress: Option<ProgressCallback>,
        ) -> CoreResult<TranscriptionResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(token) = &self.block_until_cancelled {
                token.cancelled().await;
                return Err(CoreError::Cancelled);
            }

            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err(CoreError::transient("stub transient failure"));
            }

            if let Some(progress) = progress {
                for pct in [25.0, 50.0, 75.0, 100.0] {
                    progress(pct);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
            }
            Ok(self.result.clone())
        }

        async fn transcribe_samples(
            &self,
            _samples: &[f32],
            _sample_rate: u32,
            _language: Option<&str>,
        ) -> CoreResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.full_text())
        }
    }

    /// Translation engine that wraps text in a marker.
    pub struct StubTranslationEngine;

    #[async_trait]
    impl TranslationEngine for StubTranslationEngine {
        fn name(&self) -> &str {
            "stub-translate"
        }

        async fn translate(
            &self,
            text: &str,
            _source_lang: &str,
            target_lang: &str,
        ) -> CoreResult<String> {
            Ok(format!("[{target_lang}] {text}"))
        }
    }

}
