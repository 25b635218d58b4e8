use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

/// How often the log file size is checked.
pub const LOG_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Install the global subscriber. `RUST_LOG` overrides the `info` default.
/// With a log file, lines are appended to it without ANSI colours; if it
/// cannot be opened, logging falls back to stdout.
pub fn init(log_file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(path) = log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => {
                tracing_subscriber::fmt()
                    .with_env_filter(filter)
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .init();
                return;
            }
            Err(e) => eprintln!(
                "Cannot open LOG_FILE {}: {}; logging to stdout",
                path.display(),
                e
            ),
        }
    }

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Empty `path` when it has grown past `max_bytes`. Returns the size it had
/// when truncated.
pub async fn truncate_if_larger(path: &Path, max_bytes: u64) -> std::io::Result<Option<u64>> {
    let size = tokio::fs::metadata(path).await?.len();
    if size <= max_bytes {
        return Ok(None);
    }

    let file = tokio::fs::OpenOptions::new().write(true).open(path).await?;
    file.set_len(0).await?;
    Ok(Some(size))
}

/// Keep the log file under `max_bytes`, checking every `every`.
pub fn spawn_size_cap(
    path: PathBuf,
    max_bytes: u64,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match truncate_if_larger(&path, max_bytes).await {
                Ok(Some(size)) => tracing::info!(
                    "Log file {} reached {} bytes (limit {}); truncated",
                    path.display(),
                    size,
                    max_bytes
                ),
                Ok(None) => {}
                Err(e) => tracing::warn!("Cannot check log file {}: {}", path.display(), e),
            }
        }
    })
}
