use std::sync::Arc;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::indexer::{ContentIndexer, ScanSummary};
use super::loop_worker::{indexing_loop, ScanTriggers};
use super::watcher::ProjectWatcher;

/// Owns the background indexing task and, when enabled, the file watcher
/// feeding it.
pub struct IndexingController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    watcher: Option<ProjectWatcher>,
    trigger: Arc<Notify>,
    summaries: watch::Sender<Option<ScanSummary>>,
}

impl IndexingController {
    pub fn new() -> Self {
        let (summaries, _) = watch::channel(None);
        Self {
            handle: None,
            cancel_token: None,
            watcher: None,
            trigger: Arc::new(Notify::new()),
            summaries,
        }
    }

    pub fn start(&mut self, indexer: ContentIndexer, scan_interval: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("indexing already running");
        }

        let cancel_token = CancellationToken::new();
        let indexer = indexer.with_cancel_token(cancel_token.clone());
        let settings = indexer.settings();

        let mut changed_roots = None;
        if settings.watch_changes {
            let (tx, rx) = mpsc::unbounded_channel();
            match ProjectWatcher::start(settings, tx) {
                Ok(watcher) => {
                    self.watcher = Some(watcher);
                    changed_roots = Some(rx);
                }
                Err(err) => warn!("File watching unavailable, using periodic scans only: {err:#}"),
            }
        }

        let triggers = ScanTriggers {
            manual: self.trigger.clone(),
            changed_roots,
            settle: Duration::from_millis(settings.watch_settle_ms),
        };
        let handle = tokio::spawn(indexing_loop(
            indexer,
            scan_interval,
            triggers,
            self.summaries.clone(),
            cancel_token.clone(),
        ));

        info!("Content indexing started (every {}s)", scan_interval.as_secs());
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    /// Requests a scan now. Requests made during a scan coalesce into one.
    pub fn trigger_scan(&self) {
        self.trigger.notify_one();
    }

    /// Summary of every finished scan, `None` until the first one.
    pub fn subscribe(&self) -> watch::Receiver<Option<ScanSummary>> {
        self.summaries.subscribe()
    }

    pub fn last_summary(&self) -> Option<ScanSummary> {
        self.summaries.borrow().clone()
    }

    pub async fn stop(&mut self) -> Result<()> {
        self.watcher = None;
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("indexing loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for IndexingController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::indexing::source::DiskFileSource;
    use crate::settings::IndexingSettings;
    use std::fs;

    async fn next_summary(rx: &mut watch::Receiver<Option<ScanSummary>>) -> ScanSummary {
        tokio::time::timeout(Duration::from_secs(10), rx.changed())
            .await
            .expect("scan did not finish in time")
            .unwrap();
        rx.borrow_and_update().clone().unwrap()
    }

    #[tokio::test]
    async fn scans_on_start_and_on_trigger() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.rs"), "fn a() {}\n").unwrap();

        let db = Database::in_memory().unwrap();
        let settings = IndexingSettings {
            project_roots: vec![dir.path().to_path_buf()],
            watch_changes: false,
            ..IndexingSettings::default()
        };
        let indexer = ContentIndexer::new(db, Arc::new(DiskFileSource::default()), settings);

        let mut controller = IndexingController::new();
        let mut summaries = controller.subscribe();
        controller
            .start(indexer.clone(), Duration::from_secs(3_600))
            .unwrap();
        assert!(controller
            .start(indexer, Duration::from_secs(3_600))
            .is_err());

        let first = next_summary(&mut summaries).await;
        assert_eq!(first.indexed, 1);

        fs::write(dir.path().join("b.rs"), "fn b() {}\n").unwrap();
        controller.trigger_scan();
        let second = next_summary(&mut summaries).await;
        assert_eq!(second.indexed, 1);
        assert_eq!(second.unchanged, 1);
        assert_eq!(controller.last_summary(), Some(second));

        controller.stop().await.unwrap();
        controller.stop().await.unwrap();
    }
}
