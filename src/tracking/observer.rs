//! The foreground-window event source.
//!
//! Observing the focused window is platform work outside this crate. Hosts
//! implement [`ActivityObserver`] (or feed a [`ManualObserver`]); the bundled
//! binary uses [`StdinObserver`], which reads one JSON event per line.

use std::{
    fmt,
    io::BufRead,
    sync::{Arc, Mutex},
    thread,
};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Raw foreground change as delivered by the OS observer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForegroundEvent {
    pub bundle_id: String,
    pub app_name: String,
    #[serde(default)]
    pub window_title: Option<String>,
    pub timestamp: DateTime<Utc>,
}

pub type EventSink = mpsc::UnboundedSender<ForegroundEvent>;

/// Why tracking could not start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "kind", content = "detail")]
pub enum UnavailableReason {
    PermissionDenied,
    ObserverUnavailable(String),
}

impl fmt::Display for UnavailableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnavailableReason::PermissionDenied => {
                write!(f, "permission to observe the focused window was denied")
            }
            UnavailableReason::ObserverUnavailable(detail) => {
                write!(f, "activity observer unavailable: {detail}")
            }
        }
    }
}

/// Push-driven source of foreground changes. `start` must return quickly;
/// delivery happens by sending into `sink` from the observer's own context.
pub trait ActivityObserver: Send + Sync {
    fn start(&self, sink: EventSink) -> Result<(), UnavailableReason>;
    fn stop(&self);
}

/// Observer fed by the host application.
#[derive(Default, Clone)]
pub struct ManualObserver {
    sink: Arc<Mutex<Option<EventSink>>>,
    refusal: Arc<Mutex<Option<UnavailableReason>>>,
}

impl ManualObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every later `start` fail with `reason` (or succeed again with `None`).
    pub fn refuse_with(&self, reason: Option<UnavailableReason>) {
        *lock(&self.refusal) = reason;
    }

    /// Delivers an event. Returns false when nobody is subscribed.
    pub fn push(&self, event: ForegroundEvent) -> bool {
        match lock(&self.sink).as_ref() {
            Some(sink) => sink.send(event).is_ok(),
            None => false,
        }
    }
}

impl ActivityObserver for ManualObserver {
    fn start(&self, sink: EventSink) -> Result<(), UnavailableReason> {
        if let Some(reason) = lock(&self.refusal).clone() {
            return Err(reason);
        }
        *lock(&self.sink) = Some(sink);
        Ok(())
    }

    fn stop(&self) {
        *lock(&self.sink) = None;
    }
}

/// Reads newline-delimited JSON [`ForegroundEvent`]s from stdin. The reader
/// thread is spawned once; while stopped, lines are read and dropped.
#[derive(Default)]
pub struct StdinObserver {
    sink: Arc<Mutex<Option<EventSink>>>,
    reader: Mutex<Option<thread::JoinHandle<()>>>,
}

impl StdinObserver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActivityObserver for StdinObserver {
    fn start(&self, sink: EventSink) -> Result<(), UnavailableReason> {
        *lock(&self.sink) = Some(sink);

        let mut reader = lock(&self.reader);
        if reader.is_none() {
            let slot = self.sink.clone();
            let handle = thread::Builder::new()
                .name("worklens-stdin-observer".into())
                .spawn(move || read_events(slot))
                .map_err(|err| UnavailableReason::ObserverUnavailable(err.to_string()))?;
            *reader = Some(handle);
        }
        Ok(())
    }

    fn stop(&self) {
        *lock(&self.sink) = None;
    }
}

fn read_events(slot: Arc<Mutex<Option<EventSink>>>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                warn!("stdin observer read failed: {err}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ForegroundEvent>(&line) {
            Ok(event) => {
                if let Some(sink) = lock(&slot).as_ref() {
                    let _ = sink.send(event);
                }
            }
            Err(err) => warn!("ignoring malformed foreground event: {err}"),
        }
    }
    info!("stdin observer reached end of input");
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_camel_case_event() {
        let event: ForegroundEvent = serde_json::from_str(
            r#"{"bundleId":"com.apple.Safari","appName":"Safari","timestamp":"2024-03-01T09:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(event.bundle_id, "com.apple.Safari");
        assert_eq!(event.window_title, None);
    }

    #[test]
    fn manual_observer_delivers_only_while_started() {
        let observer = ManualObserver::new();
        let event: ForegroundEvent = serde_json::from_str(
            r#"{"bundleId":"a","appName":"A","windowTitle":"t","timestamp":"2024-03-01T09:00:00Z"}"#,
        )
        .unwrap();
        assert!(!observer.push(event.clone()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        observer.start(tx).unwrap();
        assert!(observer.push(event.clone()));
        assert_eq!(rx.try_recv().unwrap(), event);

        observer.stop();
        assert!(!observer.push(event));
    }

    #[test]
    fn refusal_is_reported() {
        let observer = ManualObserver::new();
        observer.refuse_with(Some(UnavailableReason::PermissionDenied));
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(observer.start(tx), Err(UnavailableReason::PermissionDenied));
    }
}
