use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use chrono::Local;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::AppError;

/// Index database kept beside the audio files.
pub const INDEX_FILE: &str = "cache_index.sqlite3";

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub text: String,
    pub filename: String,
    pub engine: String,
    pub created_at: String,
}

/// Persisted text -> audio file index.
///
/// Entries are keyed by text alone. A hit may therefore carry audio rendered
/// by another engine or voice; the dispatcher logs that case.
pub struct AudioCache {
    dir: PathBuf,
    conn: Mutex<Connection>,
}

impl AudioCache {
    pub fn open(dir: &Path) -> Result<Self, AppError> {
        fs::create_dir_all(dir)
            .map_err(|e| AppError::CacheIo(format!("{}: {}", dir.display(), e)))?;

        let conn = Connection::open(dir.join(INDEX_FILE))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                text TEXT NOT NULL,
                filename TEXT NOT NULL,
                engine TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE UNIQUE INDEX IF NOT EXISTS cache_text ON cache (text);",
        )?;

        tracing::info!("Audio cache opened at {}", dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            conn: Mutex::new(conn),
        })
    }

    pub fn path_for(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Find the entry for `text`. Rows whose file has disappeared are
    /// dropped and reported as a miss.
    pub fn lookup(&self, text: &str) -> Result<Option<CacheEntry>, AppError> {
        let conn = self.lock();
        let entry = conn
            .query_row(
                "SELECT text, filename, engine, created_at FROM cache WHERE text = ?1",
                params![text],
                |row| {
                    Ok(CacheEntry {
                        text: row.get(0)?,
                        filename: row.get(1)?,
                        engine: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;

        match entry {
            Some(entry) if !self.path_for(&entry.filename).is_file() => {
                tracing::debug!("Cached file {} is gone; dropping row", entry.filename);
                conn.execute("DELETE FROM cache WHERE text = ?1", params![text])?;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    /// Record `filename` as the rendering of `text`, replacing any previous row.
    pub fn store(&self, text: &str, engine: &str, filename: &str) -> Result<(), AppError> {
        let created_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
        self.lock().execute(
            "INSERT OR REPLACE INTO cache (text, filename, engine, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![text, filename, engine, created_at],
        )?;
        Ok(())
    }

    /// Delete audio files older than `max_age_days` together with their rows.
    /// Per-file failures are logged and skipped.
    pub fn sweep(&self, max_age_days: u64) -> Result<Vec<String>, AppError> {
        let cutoff = SystemTime::now()
            .checked_sub(Duration::from_secs(max_age_days.saturating_mul(SECS_PER_DAY)))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let entries = fs::read_dir(&self.dir)
            .map_err(|e| AppError::CacheIo(format!("{}: {}", self.dir.display(), e)))?;

        let mut removed = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::error!("Cache sweep could not read entry: {}", e);
                    continue;
                }
            };
            let filename = entry.file_name().to_string_lossy().into_owned();
            if filename.starts_with(INDEX_FILE) {
                continue;
            }

            match is_stale(&entry, cutoff) {
                Ok(false) => {}
                Ok(true) => match fs::remove_file(entry.path()) {
                    Ok(()) => {
                        tracing::info!("Removed cache file: {}", filename);
                        removed.push(filename);
                    }
                    Err(e) => tracing::error!("Failed to remove {}: {}", filename, e),
                },
                Err(e) => tracing::error!("Error checking {}: {}", filename, e),
            }
        }

        if !removed.is_empty() {
            let mut conn = self.lock();
            let tx = conn.transaction()?;
            for filename in &removed {
                tx.execute("DELETE FROM cache WHERE filename = ?1", params![filename])?;
            }
            tx.commit()?;
        }

        Ok(removed)
    }

    pub fn len(&self) -> Result<usize, AppError> {
        let count: i64 = self
            .lock()
            .query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Audio cache lock poisoned; recovering");
            poisoned.into_inner()
        })
    }
}

fn is_stale(entry: &fs::DirEntry, cutoff: SystemTime) -> std::io::Result<bool> {
    let metadata = entry.metadata()?;
    Ok(metadata.is_file() && metadata.modified()? < cutoff)
}

/// Name for a new cache file, unique to the millisecond.
pub fn new_filename() -> String {
    format!("{}.wav", Local::now().format("%Y%m%d%H%M%S%3f"))
}
