// Logging setup for EchoNote Core
// Rotating file output with sensitive-data redaction on every record

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use log::{LevelFilter, Metadata, Record};
use once_cell::sync::Lazy;
use regex::Regex;

const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;
const MAX_BACKUPS: usize = 5;

static REDACTION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(api[-_]?key|token|password|secret|bearer)\s*[=:]\s*\S+")
        .expect("redaction pattern must compile")
});

/// Redact credential-looking substrings before a record is written.
pub fn redact(message: &str) -> String {
    REDACTION_PATTERN
        .replace_all(message, "$1=[REDACTED]")
        .into_owned()
}

struct RotatingFile {
    path: PathBuf,
    file: File,
    written: u64,
}

impl RotatingFile {
    fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create log directory")?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context("Failed to open log file")?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self { path, file, written })
    }

    fn write_line(&mut self, line: &str) {
        if self.written + line.len() as u64 > MAX_LOG_BYTES {
            if let Err(e) = self.rotate() {
                eprintln!("log rotation failed: {e:#}");
            }
        }
        if self.file.write_all(line.as_bytes()).is_ok() {
            self.written += line.len() as u64;
        }
    }

    fn rotate(&mut self) -> Result<()> {
        // echonote.log.5 is dropped, the rest shift up by one.
        let backup = |n: usize| -> PathBuf {
            let mut p = self.path.clone();
            p.set_extension(format!("log.{n}"));
            p
        };

        let oldest = backup(MAX_BACKUPS);
        if oldest.exists() {
            let _ = fs::remove_file(&oldest);
        }
        for n in (1..MAX_BACKUPS).rev() {
            let from = backup(n);
            if from.exists() {
                let _ = fs::rename(&from, backup(n + 1));
            }
        }
        let _ = fs::rename(&self.path, backup(1));

        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .context("Failed to reopen log file after rotation")?;
        self.written = 0;
        Ok(())
    }
}

struct CoreLogger {
    file: Mutex<RotatingFile>,
    level: LevelFilter,
}

impl log::Log for CoreLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let message = redact(&record.args().to_string());
        let line = format!(
            "{} [{}] {}: {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            message
        );

        eprint!("{line}");
        if let Ok(mut file) = self.file.lock() {
            file.write_line(&line);
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.file.flush();
        }
    }
}

/// Install the global logger writing to `<app_dir>/logs/echonote.log`.
///
/// Safe to call once per process; subsequent calls fail because the `log`
/// facade only accepts one logger.
pub fn init_logging(app_dir: &Path, level: LevelFilter) -> Result<()> {
    let log_path = app_dir.join("logs").join("echonote.log");
    let logger = CoreLogger {
        file: Mutex::new(RotatingFile::open(log_path)?),
        level,
    };

    log::set_boxed_logger(Box::new(logger)).context("Logger already installed")?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_api_keys_and_tokens() {
        let cases = [
            ("api_key=sk-12345 rest", "api_key=[REDACTED] rest"),
            ("API-KEY: abcdef", "API-KEY=[REDACTED]"),
            ("token = xyz", "token=[REDACTED]"),
            ("password: hunter2 tail", "password=[REDACTED] tail"),
            ("Bearer: eyJhbGci", "Bearer=[REDACTED]"),
        ];
        for (input, expected) in cases {
            assert_eq!(redact(input), expected);
        }
    }

    #[test]
    fn test_plain_text_unchanged() {
        let msg = "transcribing sample.wav at 42%";
        assert_eq!(redact(msg), msg);
    }

    #[test]
    fn test_rotation_shifts_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("echonote.log");
        let mut file = RotatingFile::open(path.clone()).unwrap();

        file.write_line("first generation\n");
        file.rotate().unwrap();
        file.write_line("second generation\n");

        let backup = dir.path().join("echonote.log.1");
        assert!(backup.exists());
        let old = fs::read_to_string(&backup).unwrap();
        assert!(old.contains("first generation"));
        let current = fs::read_to_string(&path).unwrap();
        assert!(current.contains("second generation"));
    }
}
