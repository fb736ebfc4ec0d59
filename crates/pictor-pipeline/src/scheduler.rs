//! Bounded-concurrency execution of pending downloads.
//!
//! Failures are isolated per task: one broken URL is logged and the rest
//! of the batch keeps going. Nothing is retried here: a failed task
//! leaves its file absent, so the next run's existence check picks it up
//! again.

use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use crate::files::FileStore;
use crate::types::DownloadTask;

/// Per-phase accounting reported back to the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadSummary {
    pub total: usize,
    pub downloaded: usize,
    pub failed: usize,
}

/// Run every task with at most `concurrency` in flight.
pub async fn run_all(
    store: &FileStore,
    tasks: Vec<DownloadTask>,
    concurrency: usize,
) -> DownloadSummary {
    let total = tasks.len();
    if total == 0 {
        return DownloadSummary::default();
    }

    let concurrency = concurrency.max(1);
    info!(total, concurrency, "downloading images");

    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{msg} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    progress.set_message("Downloading images");

    let results: Vec<bool> = stream::iter(tasks)
        .map(|task| {
            let store = store.clone();
            let progress = progress.clone();
            async move {
                let ok = match store.download(&task.url, &task.filepath).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(url = %task.url, error = %e, "download failed");
                        false
                    }
                };
                progress.inc(1);
                ok
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    progress.finish_and_clear();

    let downloaded = results.iter().filter(|ok| **ok).count();
    DownloadSummary {
        total,
        downloaded,
        failed: total - downloaded,
    }
}
