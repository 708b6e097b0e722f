// Translation engine contract for EchoNote Core

use async_trait::async_trait;

use crate::error::CoreResult;

/// Text translation backend contract.
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    fn name(&self) -> &str;

    fn is_available(&self) -> bool {
        true
    }

    /// Translate `text` from `source_lang` ("auto" allowed) to `target_lang`.
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> CoreResult<String>;
}
