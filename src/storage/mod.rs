// File storage management for EchoNote Core
// Rooted directory layout with owner-only permissions and atomic writes

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{bail, Context, Result};

pub const RECORDINGS_DIR: &str = "Recordings";
pub const TRANSCRIPTS_DIR: &str = "Transcripts";
pub const EXPORTS_DIR: &str = "Exports";
pub const TEMP_DIR: &str = "Temp";

/// Set owner read/write-only permissions on a file. Failures are logged, not
/// fatal, matching how recordings keep flowing on exotic filesystems.
pub fn set_file_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
            log::warn!("Could not set file permissions for {:?}: {}", path, e);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

/// Set owner-only permissions (rwx) on a directory.
pub fn set_directory_permissions(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o700)) {
            log::warn!("Could not set directory permissions for {:?}: {}", path, e);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
}

/// Write bytes via a temp file in the same directory and rename into place,
/// so a crash never leaves a partially written file. The final file ends up
/// with owner-only permissions.
pub fn atomic_write_bytes(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .context("Target path has no parent directory")?;
    fs::create_dir_all(parent).context("Failed to create parent directory")?;

    let tmp_path = parent.join(format!(
        ".{}.tmp-{}",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string()),
        std::process::id()
    ));

    fs::write(&tmp_path, content).context("Failed to write temp file")?;
    set_file_permissions(&tmp_path);

    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e).context("Failed to rename temp file into place");
    }
    Ok(())
}

/// Manages file storage with a rooted layout and secure permissions.
pub struct FileManager {
    base_dir: PathBuf,
    recordings_dir: PathBuf,
}

impl FileManager {
    /// Create a file manager rooted at `base_dir`
    /// (defaults to `~/Documents/EchoNote` when `None`).
    pub fn new(base_dir: Option<PathBuf>) -> Result<Self> {
        let base_dir = match base_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not resolve home directory")?
                .join("Documents")
                .join("EchoNote"),
        };

        let manager = Self {
            recordings_dir: base_dir.join(RECORDINGS_DIR),
            base_dir,
        };
        manager.initialize_directories()?;

        log::info!("File manager initialized: {:?}", manager.base_dir);
        Ok(manager)
    }

    /// Point recordings at a separate directory (user preference).
    pub fn set_recordings_dir(&mut self, dir: PathBuf) -> Result<()> {
        fs::create_dir_all(&dir).context("Failed to create recordings directory")?;
        set_directory_permissions(&dir);
        self.recordings_dir = dir;
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn recordings_dir(&self) -> &Path {
        &self.recordings_dir
    }

    pub fn transcripts_dir(&self) -> PathBuf {
        self.base_dir.join(TRANSCRIPTS_DIR)
    }

    pub fn exports_dir(&self) -> PathBuf {
        self.base_dir.join(EXPORTS_DIR)
    }

    fn initialize_directories(&self) -> Result<()> {
        let directories = [
            self.base_dir.clone(),
            self.recordings_dir.clone(),
            self.base_dir.join(TRANSCRIPTS_DIR),
            self.base_dir.join(EXPORTS_DIR),
            self.base_dir.join(TEMP_DIR),
        ];

        for directory in &directories {
            fs::create_dir_all(directory).context("Failed to create storage directory")?;
            set_directory_permissions(directory);
        }
        Ok(())
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.base_dir.join(candidate)
        }
    }

    /// Save bytes under `subdirectory` (or the base dir). Refuses to clobber
    /// existing files unless `overwrite` is set.
    pub fn save_file(
        &self,
        content: &[u8],
        filename: &str,
        subdirectory: Option<&str>,
        overwrite: bool,
    ) -> Result<PathBuf> {
        let target_dir = match subdirectory {
            Some(sub) => {
                let dir = self.base_dir.join(sub);
                fs::create_dir_all(&dir).context("Failed to create subdirectory")?;
                set_directory_permissions(&dir);
                dir
            }
            None => self.base_dir.clone(),
        };

        let file_path = target_dir.join(filename);
        if file_path.exists() && !overwrite {
            bail!("File already exists: {:?}", file_path);
        }

        atomic_write_bytes(&file_path, content)?;
        log::info!("Saved file: {:?}", file_path);
        Ok(file_path)
    }

    pub fn save_text_file(
        &self,
        content: &str,
        filename: &str,
        subdirectory: Option<&str>,
        overwrite: bool,
    ) -> Result<PathBuf> {
        self.save_file(content.as_bytes(), filename, subdirectory, overwrite)
    }

    pub fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let path = self.resolve(path);
        if !path.exists() {
            bail!("File not found: {:?}", path);
        }
        fs::read(&path).context("Failed to read file")
    }

    pub fn read_text_file(&self, path: &str) -> Result<String> {
        let content = self.read_file(path)?;
        String::from_utf8(content).context("File is not valid UTF-8")
    }

    pub fn delete_file(&self, path: &str) -> Result<()> {
        let path = self.resolve(path);
        if !path.exists() {
            bail!("File not found: {:?}", path);
        }
        fs::remove_file(&path).context("Failed to delete file")?;
        log::info!("Deleted file: {:?}", path);
        Ok(())
    }

    pub fn move_file(&self, source: &str, dest: &str, overwrite: bool) -> Result<PathBuf> {
        let source = self.resolve(source);
        let dest = self.resolve(dest);

        if !source.exists() {
            bail!("Source file not found: {:?}", source);
        }
        if dest.exists() && !overwrite {
            bail!("Destination file already exists: {:?}", dest);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).context("Failed to create destination directory")?;
        }
        fs::rename(&source, &dest).context("Failed to move file")?;
        set_file_permissions(&dest);

        log::info!("Moved file: {:?} -> {:?}", source, dest);
        Ok(dest)
    }

    pub fn copy_file(&self, source: &str, dest: &str, overwrite: bool) -> Result<PathBuf> {
        let source = self.resolve(source);
        let dest = self.resolve(dest);

        if !source.exists() {
            bail!("Source file not found: {:?}", source);
        }
        if dest.exists() && !overwrite {
            bail!("Destination file already exists: {:?}", dest);
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).context("Failed to create destination directory")?;
        }
        fs::copy(&source, &dest).context("Failed to copy file")?;
        set_file_permissions(&dest);

        log::info!("Copied file: {:?} -> {:?}", source, dest);
        Ok(dest)
    }

    pub fn file_exists(&self, path: &str) -> bool {
        let path = self.resolve(path);
        path.exists() && path.is_file()
    }

    pub fn file_size(&self, path: &str) -> Result<u64> {
        let path = self.resolve(path);
        if !path.exists() {
            bail!("File not found: {:?}", path);
        }
        Ok(path.metadata()?.len())
    }

    /// List files in a subdirectory, optionally recursing.
    pub fn list_files(&self, subdirectory: Option<&str>, recursive: bool) -> Vec<PathBuf> {
        let search_dir = match subdirectory {
            Some(sub) => self.base_dir.join(sub),
            None => self.base_dir.clone(),
        };

        let mut results = Vec::new();
        collect_files(&search_dir, recursive, &mut results);
        results
    }

    /// Produce a filename that does not collide inside the target directory,
    /// appending `_N` before the extension when needed.
    pub fn create_unique_filename(
        &self,
        base_name: &str,
        extension: &str,
        subdirectory: Option<&str>,
    ) -> String {
        let extension = extension.trim_start_matches('.');
        let target_dir = match subdirectory {
            Some(sub) => self.base_dir.join(sub),
            None => self.base_dir.clone(),
        };

        let filename = format!("{base_name}.{extension}");
        if !target_dir.join(&filename).exists() {
            return filename;
        }

        let mut counter = 1;
        loop {
            let filename = format!("{base_name}_{counter}.{extension}");
            if !target_dir.join(&filename).exists() {
                return filename;
            }
            counter += 1;
        }
    }

    pub fn temp_path(&self, filename: &str) -> PathBuf {
        self.base_dir.join(TEMP_DIR).join(filename)
    }

    /// Delete temp files older than `older_than_days`. Returns deleted count.
    pub fn cleanup_temp_files(&self, older_than_days: u64) -> usize {
        let temp_dir = self.base_dir.join(TEMP_DIR);
        let cutoff = SystemTime::now()
            .checked_sub(std::time::Duration::from_secs(older_than_days * 24 * 3600));
        let cutoff = match cutoff {
            Some(t) => t,
            None => return 0,
        };

        let entries = match fs::read_dir(&temp_dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut deleted = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            if modified < cutoff {
                match fs::remove_file(&path) {
                    Ok(()) => deleted += 1,
                    Err(e) => log::warn!("Failed to delete temp file {:?}: {}", path, e),
                }
            }
        }

        if deleted > 0 {
            log::info!("Cleaned up {} temp file(s)", deleted);
        }
        deleted
    }
}

fn collect_files(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() {
            out.push(path);
        } else if recursive && path.is_dir() {
            collect_files(&path, recursive, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_manager() -> (tempfile::TempDir, FileManager) {
        let dir = tempdir().unwrap();
        let manager = FileManager::new(Some(dir.path().join("store"))).unwrap();
        (dir, manager)
    }

    #[test]
    fn test_layout_created() {
        let (_dir, fm) = create_manager();
        for sub in [RECORDINGS_DIR, TRANSCRIPTS_DIR, EXPORTS_DIR, TEMP_DIR] {
            assert!(fm.base_dir().join(sub).is_dir(), "missing {sub}");
        }
    }

    #[test]
    fn test_save_and_read_round_trip() {
        let (_dir, fm) = create_manager();
        let path = fm
            .save_text_file("hello transcript", "t.txt", Some(TRANSCRIPTS_DIR), false)
            .unwrap();
        assert!(path.exists());
        let content = fm.read_text_file(path.to_str().unwrap()).unwrap();
        assert_eq!(content, "hello transcript");
    }

    #[test]
    fn test_save_refuses_overwrite_by_default() {
        let (_dir, fm) = create_manager();
        fm.save_text_file("a", "dup.txt", None, false).unwrap();
        assert!(fm.save_text_file("b", "dup.txt", None, false).is_err());
        fm.save_text_file("b", "dup.txt", None, true).unwrap();
        let content = fm.read_text_file("dup.txt").unwrap();
        assert_eq!(content, "b");
    }

    #[cfg(unix)]
    #[test]
    fn test_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let (_dir, fm) = create_manager();
        let path = fm.save_text_file("x", "perm.txt", None, false).unwrap();
        let mode = path.metadata().unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let dir_mode = fm
            .base_dir()
            .join(TEMP_DIR)
            .metadata()
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[test]
    fn test_unique_filename_appends_counter() {
        let (_dir, fm) = create_manager();
        fm.save_text_file("x", "note.txt", None, false).unwrap();
        assert_eq!(fm.create_unique_filename("note", "txt", None), "note_1.txt");
        fm.save_text_file("x", "note_1.txt", None, false).unwrap();
        assert_eq!(fm.create_unique_filename("note", "txt", None), "note_2.txt");
    }

    #[test]
    fn test_move_and_copy() {
        let (_dir, fm) = create_manager();
        let src = fm.save_text_file("data", "src.txt", None, false).unwrap();

        let copied = fm
            .copy_file(src.to_str().unwrap(), "copy.txt", false)
            .unwrap();
        assert!(copied.exists() && src.exists());

        let moved = fm
            .move_file(src.to_str().unwrap(), "moved.txt", false)
            .unwrap();
        assert!(moved.exists() && !src.exists());
    }

    #[test]
    fn test_temp_sweep_only_removes_old_files() {
        let (_dir, fm) = create_manager();
        let keep = fm.temp_path("fresh.tmp");
        fs::write(&keep, b"fresh").unwrap();

        // Zero-day cutoff removes everything modified before "now".
        let stale = fm.temp_path("stale.tmp");
        fs::write(&stale, b"stale").unwrap();
        let old = SystemTime::now() - std::time::Duration::from_secs(9 * 24 * 3600);
        let file = fs::OpenOptions::new().write(true).open(&stale).unwrap();
        file.set_modified(old).unwrap();
        drop(file);

        let deleted = fm.cleanup_temp_files(7);
        assert_eq!(deleted, 1);
        assert!(keep.exists());
        assert!(!stale.exists());
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("cfg.json");
        atomic_write_bytes(&path, b"{\"a\":1}").unwrap();
        atomic_write_bytes(&path, b"{\"a\":2}").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"{\"a\":2}");
    }
}
