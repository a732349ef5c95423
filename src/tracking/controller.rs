use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::{
    sync::{mpsc, watch, Mutex as AsyncMutex},
    task::JoinHandle,
    time,
};
use tokio_util::sync::CancellationToken;

use crate::{
    analysis::{DailyStats, DailyStatsBook, FocusAnalyzer, FocusSignal},
    db::{Activity, AppSession, Database},
    settings::TrackingSettings,
};

use super::{
    observer::{ActivityObserver, ForegroundEvent, UnavailableReason},
    state::{TrackerState, TrackerStatus, Transition},
};

/// What the presentation layer sees.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackerSnapshot {
    pub status: TrackerStatus,
    pub unavailable: Option<UnavailableReason>,
    pub current_session: Option<AppSession>,
    pub current_activity: Option<Activity>,
    pub daily_stats: DailyStats,
    /// Last failed write, cleared by the next successful one.
    pub last_store_error: Option<String>,
}

/// Records applied in memory but not yet acknowledged by the store. They are
/// resent with the next write; session rows are upserted by id.
#[derive(Debug, Clone, Default)]
struct PendingWrites {
    sessions: Vec<AppSession>,
    activities: Vec<Activity>,
}

impl PendingWrites {
    fn record(&mut self, transition: &Transition) {
        if let Some(closed) = &transition.closed {
            self.upsert_session(closed.clone());
        }
        if let Some(opened) = &transition.opened {
            self.upsert_session(opened.clone());
        }
        if let Some(activity) = &transition.activity {
            self.activities.push(activity.clone());
        }
    }

    fn upsert_session(&mut self, session: AppSession) {
        match self.sessions.iter_mut().find(|pending| pending.id == session.id) {
            Some(existing) => *existing = session,
            None => self.sessions.push(session),
        }
    }

    /// Drops what `batch` wrote, keeping anything that changed meanwhile.
    fn acknowledge(&mut self, batch: &PendingWrites) {
        self.sessions.retain(|session| !batch.sessions.contains(session));
        self.activities
            .retain(|activity| !batch.activities.iter().any(|sent| sent.id == activity.id));
    }

    fn is_empty(&self) -> bool {
        self.sessions.is_empty() && self.activities.is_empty()
    }
}

struct Inner {
    tracker: TrackerState,
    analyzer: FocusAnalyzer,
    book: DailyStatsBook,
    pending: PendingWrites,
    last_store_error: Option<String>,
}

impl Inner {
    fn absorb(&mut self, transition: &Transition, signals: &[FocusSignal]) {
        if let Some(closed) = &transition.closed {
            self.book.add_closed_session(closed);
        }
        for signal in signals {
            self.book.apply(signal);
        }
        self.pending.record(transition);
    }

    fn clock(&self) -> DateTime<Utc> {
        self.tracker.last_timestamp.unwrap_or_else(Utc::now)
    }

    fn snapshot(&self, now: DateTime<Utc>) -> TrackerSnapshot {
        TrackerSnapshot {
            status: self.tracker.status,
            unavailable: self.tracker.unavailable.clone(),
            current_session: self.tracker.current_session.clone(),
            current_activity: self.tracker.current_activity.clone(),
            daily_stats: self
                .book
                .snapshot(now, self.tracker.current_session.as_ref()),
            last_store_error: self.last_store_error.clone(),
        }
    }
}

struct Running {
    cancel: CancellationToken,
    pump: JoinHandle<()>,
    ticker: JoinHandle<()>,
}

#[derive(Clone)]
pub struct TrackingController {
    inner: Arc<Mutex<Inner>>,
    db: Database,
    observer: Arc<dyn ActivityObserver>,
    running: Arc<AsyncMutex<Option<Running>>>,
    snapshot_tx: Arc<watch::Sender<TrackerSnapshot>>,
    tick_interval: Duration,
}

impl TrackingController {
    pub fn new(
        db: Database,
        observer: Arc<dyn ActivityObserver>,
        settings: &TrackingSettings,
    ) -> Self {
        let inner = Inner {
            tracker: TrackerState::new(),
            analyzer: FocusAnalyzer::new(settings.analyzer.clone()),
            book: DailyStatsBook::new(settings.day_zone),
            pending: PendingWrites::default(),
            last_store_error: None,
        };
        let (snapshot_tx, _) = watch::channel(inner.snapshot(Utc::now()));

        Self {
            inner: Arc::new(Mutex::new(inner)),
            db,
            observer,
            running: Arc::new(AsyncMutex::new(None)),
            snapshot_tx: Arc::new(snapshot_tx),
            tick_interval: Duration::from_secs(settings.heartbeat_secs.max(1)),
        }
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// Closes sessions a previous run left open. Call once before tracking.
    pub async fn recover_orphaned_sessions(&self) -> Result<usize> {
        let closed = self.db.close_orphaned_sessions().await?;
        {
            let mut inner = self.lock_inner();
            for session in &closed {
                inner.book.add_closed_session(session);
            }
        }
        Ok(closed.len())
    }

    /// Subscribes to the observer. Calling it while tracking is a no-op; an
    /// observer that refuses leaves the tracker idle with a reason.
    pub async fn start_tracking(&self) -> TrackerSnapshot {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return self.snapshot();
        }

        let (sink, events) = mpsc::unbounded_channel();
        if let Err(reason) = self.observer.start(sink) {
            warn!("Activity tracking unavailable: {reason}");
            let now = {
                let mut inner = self.lock_inner();
                inner.tracker.mark_unavailable(reason);
                inner.clock()
            };
            self.publish_at(now);
            return self.snapshot();
        }

        self.lock_inner().tracker.begin();

        let cancel = CancellationToken::new();
        let pump = self.spawn_pump(events, cancel.clone());
        let ticker = self.spawn_ticker(cancel.clone());
        *running = Some(Running {
            cancel,
            pump,
            ticker,
        });

        info!("Activity tracking started");
        self.publish_at(Utc::now());
        self.snapshot()
    }

    pub async fn stop_tracking(&self) -> Result<TrackerSnapshot> {
        self.stop_tracking_at(Utc::now()).await
    }

    /// Unsubscribes, applies queued events, then closes the open session at
    /// `now` and persists it. Calling it while idle is a no-op.
    pub async fn stop_tracking_at(&self, now: DateTime<Utc>) -> Result<TrackerSnapshot> {
        let mut running = self.running.lock().await;
        let Some(active) = running.take() else {
            return Ok(self.snapshot());
        };

        self.observer.stop();
        active.cancel.cancel();
        if let Err(err) = active.pump.await {
            error!("Tracking pump failed to join: {err}");
        }
        if let Err(err) = active.ticker.await {
            error!("Tracking ticker failed to join: {err}");
        }

        let batch = {
            let mut inner = self.lock_inner();
            let closed = inner.tracker.finish(now);
            let signals = inner.analyzer.finish(now);
            let transition = Transition {
                closed,
                ..Transition::default()
            };
            inner.absorb(&transition, &signals);
            inner.pending.clone()
        };

        let result = self.flush(batch).await;
        self.publish_at(now);
        info!("Activity tracking stopped");
        result.map(|_| self.snapshot())
    }

    /// Applies one foreground change. The in-memory transition always
    /// happens; a failed write is returned and retried with the next one.
    pub async fn on_foreground_change(&self, event: ForegroundEvent) -> Result<()> {
        let (batch, now) = {
            let mut inner = self.lock_inner();
            if inner.tracker.status != TrackerStatus::Tracking {
                debug!("Ignoring foreground event while idle: {}", event.bundle_id);
                return Ok(());
            }
            if inner.tracker.is_superseded(&event) {
                debug!("Dropping late foreground event: {}", event.bundle_id);
                return Ok(());
            }

            let transition = inner.tracker.apply(&event);
            let signals = inner.analyzer.observe(&event);
            if transition.is_empty() && signals.is_empty() {
                return Ok(());
            }
            inner.absorb(&transition, &signals);
            (inner.pending.clone(), inner.clock())
        };

        self.publish_at(now);
        self.flush(batch).await
    }

    /// Heartbeat: lets a focus session be detected between events.
    pub fn tick(&self, now: DateTime<Utc>) {
        {
            let mut inner = self.lock_inner();
            if inner.tracker.status != TrackerStatus::Tracking {
                return;
            }
            let signals = inner.analyzer.tick(now);
            for signal in &signals {
                inner.book.apply(signal);
            }
        }
        self.publish_at(now);
    }

    /// Deletes a stored session and its activities. The open session cannot
    /// be deleted.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let is_open = self
            .lock_inner()
            .tracker
            .current_session
            .as_ref()
            .is_some_and(|session| session.id == session_id);
        if is_open {
            bail!("cannot delete the session that is currently being tracked");
        }
        self.db.delete_app_session(session_id).await
    }

    async fn flush(&self, batch: PendingWrites) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let result = self
            .db
            .save_tracking_changes(batch.sessions.clone(), batch.activities.clone())
            .await
            .context("failed to persist tracking changes");

        let (now, error_changed) = {
            let mut inner = self.lock_inner();
            let had_error = inner.last_store_error.is_some();
            match &result {
                Ok(()) => {
                    inner.pending.acknowledge(&batch);
                    inner.last_store_error = None;
                }
                Err(err) => inner.last_store_error = Some(format!("{err:#}")),
            }
            (inner.clock(), had_error || inner.last_store_error.is_some())
        };
        if error_changed {
            self.publish_at(now);
        }
        result
    }

    fn spawn_pump(
        &self,
        mut events: mpsc::UnboundedReceiver<ForegroundEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let controller = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    event = events.recv() => match event {
                        Some(event) => {
                            if let Err(err) = controller.on_foreground_change(event).await {
                                error!("{err:#}");
                            }
                        }
                        None => break,
                    },
                    _ = cancel.cancelled() => break,
                }
            }
        })
    }

    fn spawn_ticker(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let controller = self.clone();
        let tick_interval = self.tick_interval;
        tokio::spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => controller.tick(Utc::now()),
                }
            }
        })
    }

    fn publish_at(&self, now: DateTime<Utc>) {
        let snapshot = self.lock_inner().snapshot(now);
        self.snapshot_tx.send_replace(snapshot);
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
