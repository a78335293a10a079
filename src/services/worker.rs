use crate::services::storage::STAGING_SUFFIX;
use std::path::PathBuf;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Removes staging files left behind by uploads that never committed,
/// e.g. after a crash mid-transfer.
pub struct StagingSweeper {
    root: PathBuf,
    max_age: Duration,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl StagingSweeper {
    pub fn new(
        root: PathBuf,
        max_age: Duration,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            root,
            max_age,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Staging sweeper started ({})", self.root.display());

        self.sweep_once().await;

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Staging sweeper shutting down");
                    break;
                }
                _ = sleep(self.interval) => {
                    self.sweep_once().await;
                }
            }
        }
    }

    /// One pass over the root. Returns how many staging files were removed.
    pub async fn sweep_once(&self) -> usize {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Cannot scan {}: {}", self.root.display(), e);
                return 0;
            }
        };

        let mut removed = 0;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !(name.starts_with('.') && name.ends_with(STAGING_SUFFIX)) {
                continue;
            }

            let stale = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified
                    .elapsed()
                    .map(|age| age >= self.max_age)
                    .unwrap_or(false),
                Err(_) => false,
            };
            if !stale {
                continue;
            }

            match tokio::fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Failed to sweep {}: {}", entry.path().display(), e),
            }
        }

        if removed > 0 {
            tracing::info!("🧹 Swept {} stale staging file(s)", removed);
        }
        removed
    }
}
