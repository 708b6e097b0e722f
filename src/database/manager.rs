// Database manager for EchoNote Core
// Handles the SQLite connection, optional at-rest encryption, and backups

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::constants::DATABASE_BUSY_TIMEOUT_SECS;

use super::migrations;

/// Database manager that owns the SQLite connection.
///
/// An encryption key is applied opportunistically via `PRAGMA key`; when the
/// linked SQLite has no cipher the store stays plaintext and
/// `is_encryption_enabled` reports `false`.
pub struct DatabaseManager {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    encryption_enabled: bool,
}

impl DatabaseManager {
    pub fn new(db_path: PathBuf, encryption_key: Option<&str>) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create database directory")?;
        }

        let conn = Connection::open(&db_path).context("Failed to open database")?;

        conn.busy_timeout(Duration::from_secs(DATABASE_BUSY_TIMEOUT_SECS))
            .context("Failed to set busy timeout")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("Failed to enable foreign keys")?;

        let mut encryption_enabled = false;
        if let Some(key) = encryption_key {
            encryption_enabled = apply_encryption_key(&conn, key);
            if encryption_enabled {
                log::info!("Database encryption enabled");
            } else {
                log::warn!("Database cipher unavailable, continuing unencrypted");
            }
        }

        migrations::run_migrations(&conn).context("Failed to run database migrations")?;

        log::info!("Database initialized at: {:?}", db_path);

        Ok(Self {
            conn: Mutex::new(conn),
            db_path,
            encryption_enabled,
        })
    }

    /// Execute a closure with access to the database connection.
    pub fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Failed to lock database connection: {}", e))?;
        f(&conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn is_encryption_enabled(&self) -> bool {
        self.encryption_enabled
    }

    /// Run a multi-statement script inside a transaction; rolls back on error.
    pub fn execute_script(&self, script: &str) -> Result<()> {
        self.with_connection(|conn| {
            match conn.execute_batch(&format!("BEGIN; {script} COMMIT;")) {
                Ok(()) => Ok(()),
                Err(e) => {
                    let _ = conn.execute_batch("ROLLBACK;");
                    Err(e).context("Script execution failed")
                }
            }
        })
    }

    /// Attempt to re-encrypt the database with a new key. Returns `false`
    /// (and stays on the old key) when the cipher is unavailable.
    pub fn rekey(&mut self, new_key: &str) -> Result<bool> {
        let active = {
            let conn = self
                .conn
                .lock()
                .map_err(|e| anyhow::anyhow!("Failed to lock database connection: {}", e))?;

            if conn.pragma_update(None, "rekey", new_key).is_err() {
                log::warn!("Failed to rekey database (cipher may be unavailable)");
                return Ok(false);
            }

            cipher_active(&conn)
        };

        if active {
            log::info!("Database rekeyed successfully");
        } else {
            log::warn!("PRAGMA rekey executed but no active cipher was confirmed");
        }
        self.encryption_enabled = active;
        Ok(active)
    }

    /// Produce a consistent copy of the database at `backup_path`.
    pub fn backup(&self, backup_path: &Path) -> Result<()> {
        if let Some(parent) = backup_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create backup directory")?;
        }

        self.with_connection(|conn| {
            let mut dest =
                Connection::open(backup_path).context("Failed to open backup database")?;
            let backup =
                rusqlite::backup::Backup::new(conn, &mut dest).context("Failed to start backup")?;
            backup
                .run_to_completion(64, Duration::from_millis(50), None)
                .context("Backup failed")?;
            Ok(())
        })?;

        log::info!("Database backup completed: {:?}", backup_path);
        Ok(())
    }

    /// Reclaim unused space.
    pub fn vacuum(&self) -> Result<()> {
        self.with_connection(|conn| {
            conn.execute("VACUUM", [])
                .context("Failed to vacuum database")?;
            Ok(())
        })
    }

    pub fn schema_version(&self) -> Result<i64> {
        self.with_connection(migrations::get_schema_version)
    }
}

fn apply_encryption_key(conn: &Connection, key: &str) -> bool {
    if conn.pragma_update(None, "key", key).is_err() {
        return false;
    }
    // A cipher-less SQLite accepts the pragma silently, so confirm it took.
    if conn
        .query_row("SELECT count(*) FROM sqlite_master", [], |_| Ok(()))
        .is_err()
    {
        return false;
    }
    cipher_active(conn)
}

fn cipher_active(conn: &Connection) -> bool {
    conn.query_row("PRAGMA cipher_version", [], |row| row.get::<_, String>(0))
        .map(|version| {
            log::debug!("Cipher version: {}", version);
            !version.is_empty()
        })
        .unwrap_or(false)
}
