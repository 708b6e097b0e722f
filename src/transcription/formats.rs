// Format converter for EchoNote Core
// Renders the internal transcription artifact as txt, srt, or md

use crate::engines::TranscriptionResult;
use crate::error::{CoreError, CoreResult};

/// Renders transcription results into user-facing export formats.
#[derive(Debug, Default)]
pub struct FormatConverter;

impl FormatConverter {
    pub fn new() -> Self {
        Self
    }

    pub fn supported_formats(&self) -> &'static [&'static str] {
        crate::constants::SUPPORTED_OUTPUT_FORMATS
    }

    pub fn convert(&self, result: &TranscriptionResult, format: &str) -> CoreResult<String> {
        match format {
            "txt" => Ok(self.to_txt(result)),
            "srt" => Ok(self.to_srt(result)),
            "md" => Ok(self.to_md(result)),
            other => Err(CoreError::validation(format!(
                "unsupported output format: {other}"
            ))),
        }
    }

    fn to_txt(&self, result: &TranscriptionResult) -> String {
        let mut text = result.full_text();
        if !text.is_empty() {
            text.push('\n');
        }
        text
    }

    fn to_srt(&self, result: &TranscriptionResult) -> String {
        let mut out = String::new();
        for (index, segment) in result.segments.iter().enumerate() {
            out.push_str(&format!(
                "{}\n{} --> {}\n{}\n\n",
                index + 1,
                srt_timestamp(segment.start),
                srt_timestamp(segment.end),
                segment.text.trim()
            ));
        }
        out
    }

    fn to_md(&self, result: &TranscriptionResult) -> String {
        let mut out = String::from("# Transcript\n\n");
        if let Some(language) = &result.language {
            out.push_str(&format!("- Language: {language}\n"));
        }
        if let Some(duration) = result.duration {
            out.push_str(&format!("- Duration: {}\n", clock_timestamp(duration)));
        }
        out.push('\n');
        for segment in &result.segments {
            out.push_str(&format!(
                "**[{}]** {}\n\n",
                clock_timestamp(segment.start),
                segment.text.trim()
            ));
        }
        out
    }
}

/// `HH:MM:SS,mmm` as SRT wants it.
fn srt_timestamp(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let total_millis = (seconds * 1000.0).round() as u64;
    let hours = total_millis / 3_600_000;
    let minutes = (total_millis % 3_600_000) / 60_000;
    let secs = (total_millis % 60_000) / 1000;
    let millis = total_millis % 1000;
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

fn clock_timestamp(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engines::TranscriptSegment;

    fn sample() -> TranscriptionResult {
        TranscriptionResult {
            segments: vec![
                TranscriptSegment {
                    start: 0.0,
                    end: 2.5,
                    text: "hello there".to_string(),
                },
                TranscriptSegment {
                    start: 2.5,
                    end: 61.25,
                    text: "second line".to_string(),
                },
            ],
            duration: Some(61.25),
            language: Some("en".to_string()),
        }
    }

    #[test]
    fn test_txt_is_plain_lines() {
        let converter = FormatConverter::new();
        let txt = converter.convert(&sample(), "txt").unwrap();
        assert_eq!(txt, "hello there\nsecond line\n");
    }

    #[test]
    fn test_srt_numbering_and_timestamps() {
        let converter = FormatConverter::new();
        let srt = converter.convert(&sample(), "srt").unwrap();
        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:02,500\nhello there\n"));
        assert!(srt.contains("2\n00:00:02,500 --> 00:01:01,250\nsecond line\n"));
    }

    #[test]
    fn test_md_has_header_and_metadata() {
        let converter = FormatConverter::new();
        let md = converter.convert(&sample(), "md").unwrap();
        assert!(md.starts_with("# Transcript"));
        assert!(md.contains("- Language: en"));
        assert!(md.contains("- Duration: 00:01:01"));
        assert!(md.contains("**[00:00:00]** hello there"));
    }

    #[test]
    fn test_unknown_format_rejected() {
        let converter = FormatConverter::new();
        let err = converter.convert(&sample(), "pdf").unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn test_empty_result_renders_empty_body() {
        let converter = FormatConverter::new();
        let empty = TranscriptionResult::default();
        assert_eq!(converter.convert(&empty, "txt").unwrap(), "");
        assert_eq!(converter.convert(&empty, "srt").unwrap(), "");
    }
}
