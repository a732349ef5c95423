use std::{collections::BTreeSet, path::PathBuf, sync::Arc};

use chrono::Utc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::indexer::{ContentIndexer, ScanSummary};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info};

/// Where scans come from besides the interval.
pub struct ScanTriggers {
    pub manual: Arc<Notify>,
    /// Roots reported by the file watcher, if one is running.
    pub changed_roots: Option<mpsc::UnboundedReceiver<PathBuf>>,
    /// Quiet time after the last reported change before rescanning.
    pub settle: Duration,
}

/// Scans every root on each interval tick (the first one fires immediately)
/// and whenever a manual scan is requested. Roots reported by the watcher are
/// rescanned once changes stop arriving for `settle`. Runs until cancelled.
pub async fn indexing_loop(
    indexer: ContentIndexer,
    scan_interval: Duration,
    mut triggers: ScanTriggers,
    summaries: watch::Sender<Option<ScanSummary>>,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(scan_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut changed: BTreeSet<PathBuf> = BTreeSet::new();
    let settle_timer = tokio::time::sleep(triggers.settle);
    tokio::pin!(settle_timer);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log_info!("indexing loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                changed.clear();
                run_scan(&indexer, None, &summaries, &cancel_token).await;
            }
            _ = triggers.manual.notified() => {
                log_info!("manual scan requested");
                changed.clear();
                run_scan(&indexer, None, &summaries, &cancel_token).await;
                ticker.reset();
            }
            change = next_change(&mut triggers.changed_roots) => match change {
                Some(root) => {
                    changed.insert(root);
                    settle_timer.as_mut().reset(Instant::now() + triggers.settle);
                }
                None => {
                    log_debug!("file watcher stopped; relying on periodic scans");
                    triggers.changed_roots = None;
                }
            },
            () = &mut settle_timer, if !changed.is_empty() => {
                let roots: Vec<PathBuf> = std::mem::take(&mut changed).into_iter().collect();
                log_info!("rescanning {} changed project(s)", roots.len());
                run_scan(&indexer, Some(&roots), &summaries, &cancel_token).await;
            }
        }
    }
}

async fn next_change(changes: &mut Option<mpsc::UnboundedReceiver<PathBuf>>) -> Option<PathBuf> {
    match changes {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

/// Scans `roots`, or every configured root when `None`.
async fn run_scan(
    indexer: &ContentIndexer,
    roots: Option<&[PathBuf]>,
    summaries: &watch::Sender<Option<ScanSummary>>,
    cancel_token: &CancellationToken,
) {
    let now = Utc::now();
    let result = match roots {
        Some(roots) => indexer.scan_roots(roots, now).await,
        None => indexer.scan_all(now).await,
    };
    match result {
        Ok(summary) => {
            summaries.send_replace(Some(summary));
        }
        Err(_) if cancel_token.is_cancelled() => log_info!("content scan interrupted by shutdown"),
        Err(err) => log_error!("content scan failed: {err:#}"),
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
    async fn reported_changes_rescan_only_their_root() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        let docs = dir.path().join("docs");
        fs::create_dir_all(&app).unwrap();
        fs::create_dir_all(&docs).unwrap();
        fs::write(app.join("main.rs"), "fn main() {}\n").unwrap();
        fs::write(docs.join("guide.md"), "# Guide\n").unwrap();

        let settings = IndexingSettings {
            project_roots: vec![app.clone(), docs],
            ..IndexingSettings::default()
        };
        let db = Database::in_memory().unwrap();
        let indexer = ContentIndexer::new(db, Arc::new(DiskFileSource::default()), settings);

        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let triggers = ScanTriggers {
            manual: Arc::new(Notify::new()),
            changed_roots: Some(change_rx),
            settle: Duration::from_millis(20),
        };
        let (summary_tx, mut summaries) = watch::channel(None);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(indexing_loop(
            indexer,
            Duration::from_secs(3_600),
            triggers,
            summary_tx,
            cancel.clone(),
        ));

        let initial = next_summary(&mut summaries).await;
        assert_eq!(initial.indexed, 2);

        fs::write(app.join("lib.rs"), "pub fn lib() {}\n").unwrap();
        change_tx.send(app.clone()).unwrap();
        change_tx.send(app).unwrap();

        let rescan = next_summary(&mut summaries).await;
        assert_eq!(rescan.files_seen, 2);
        assert_eq!(rescan.indexed, 1);
        assert_eq!(rescan.unchanged, 1);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn loop_survives_watcher_going_away() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "a\n").unwrap();
        let settings = IndexingSettings {
            project_roots: vec![dir.path().to_path_buf()],
            ..IndexingSettings::default()
        };
        let indexer = ContentIndexer::new(
            Database::in_memory().unwrap(),
            Arc::new(DiskFileSource::default()),
            settings,
        );

        let (change_tx, change_rx) = mpsc::unbounded_channel::<PathBuf>();
        drop(change_tx);
        let manual = Arc::new(Notify::new());
        let triggers = ScanTriggers {
            manual: manual.clone(),
            changed_roots: Some(change_rx),
            settle: Duration::from_millis(20),
        };
        let (summary_tx, mut summaries) = watch::channel(None);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(indexing_loop(
            indexer,
            Duration::from_secs(3_600),
            triggers,
            summary_tx,
            cancel.clone(),
        ));

        next_summary(&mut summaries).await;
        manual.notify_one();
        let second = next_summary(&mut summaries).await;
        assert_eq!(second.unchanged, 1);

        cancel.cancel();
        handle.await.unwrap();
    }
}
