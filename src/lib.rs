pub mod analysis;
pub mod db;
pub mod indexing;
pub mod insights;
pub mod settings;
pub mod tracking;
pub mod utils;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use log::{error, info, warn};
use tokio::time::Duration;

use db::Database;
use indexing::{ContentIndexer, DiskFileSource, IndexingController};
use insights::{InsightGenerator, InsightScheduler};
use settings::{database_path, settings_path, SettingsStore};
use tracking::{ActivityObserver, StdinObserver, TrackingController};

/// Everything the agent runs, wired to one data directory.
pub struct Agent {
    pub db: Database,
    pub settings: SettingsStore,
    pub tracking: TrackingController,
    pub indexing: IndexingController,
    insights: InsightScheduler,
}

impl Agent {
    /// Opens the store, recovers sessions left open by a crash and starts
    /// tracking, indexing and insight generation. Fails when the store
    /// cannot be opened.
    pub async fn start(data_dir: &Path, observer: Arc<dyn ActivityObserver>) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let settings = SettingsStore::new(settings_path(data_dir))?;
        let config = settings.get();

        let database = Database::new(database_path(data_dir))?;

        for root in config.indexing.unavailable_roots() {
            warn!("Project root {} is not available; it will be skipped", root.display());
        }

        let tracking = TrackingController::new(database.clone(), observer, &config.tracking);
        let recovered = tracking.recover_orphaned_sessions().await?;
        if recovered > 0 {
            warn!("Closed {recovered} session(s) left open by the previous run");
        }

        let indexer = ContentIndexer::new(
            database.clone(),
            Arc::new(DiskFileSource::new(config.indexing.exclude_globs.clone())),
            config.indexing.clone(),
        );
        let mut indexing = IndexingController::new();
        indexing.start(indexer, Duration::from_secs(config.indexing.scan_interval_secs))?;

        let generator = InsightGenerator::new(
            database.clone(),
            config.insights.clone(),
            config.tracking.analyzer.clone(),
            config.tracking.day_zone,
        );
        let mut insights = InsightScheduler::new();
        insights.start(generator, Duration::from_secs(config.insights.interval_secs))?;

        let snapshot = tracking.start_tracking().await;
        if let Some(reason) = &snapshot.unavailable {
            warn!("Tracking is idle: {reason}");
        }

        Ok(Self {
            db: database,
            settings,
            tracking,
            indexing,
            insights,
        })
    }

    /// Stops tracking (closing the open session) and the background loops.
    /// Every part is stopped even when an earlier one fails.
    pub async fn shutdown(mut self) -> Result<()> {
        let tracking = self.tracking.stop_tracking().await.map(|_| ());
        let indexing = self.indexing.stop().await;
        let insights = self.insights.stop().await;

        let parts = [
            ("tracking", &tracking),
            ("indexing", &indexing),
            ("insights", &insights),
        ];
        for (part, result) in parts {
            if let Err(err) = result {
                error!("Failed to stop {part}: {err:#}");
            }
        }
        tracking.and(indexing).and(insights)
    }
}

/// Entry point of the `worklens` binary: reads foreground events as JSON lines
/// on stdin until Ctrl-C.
pub async fn run() -> Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("worklens starting up...");

    let data_dir = settings::data_dir()?;
    let agent = Agent::start(&data_dir, Arc::new(StdinObserver::new())).await?;
    info!("Data directory: {}", data_dir.display());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down...");

    agent.shutdown().await
}
