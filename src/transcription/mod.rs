// Batch transcription subsystem for EchoNote Core

mod formats;
mod manager;

pub use formats::FormatConverter;
pub use manager::{TaskOptions, TranscriptionManager};
