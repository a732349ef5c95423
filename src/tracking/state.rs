use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{Activity, AppSession};

use super::observer::{ForegroundEvent, UnavailableReason};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum TrackerStatus {
    #[default]
    Idle,
    Tracking,
}

/// Records produced by one foreground event. Closed sessions always precede
/// the opened one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Transition {
    pub closed: Option<AppSession>,
    pub opened: Option<AppSession>,
    pub activity: Option<Activity>,
}

impl Transition {
    pub fn is_empty(&self) -> bool {
        self.closed.is_none() && self.opened.is_none() && self.activity.is_none()
    }
}

/// In-memory view of what is being tracked right now.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerState {
    pub status: TrackerStatus,
    pub unavailable: Option<UnavailableReason>,
    pub current_session: Option<AppSession>,
    pub current_activity: Option<Activity>,
    /// Latest timestamp applied; older events are already superseded.
    #[serde(skip)]
    pub last_timestamp: Option<DateTime<Utc>>,
}

impl TrackerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self) {
        self.status = TrackerStatus::Tracking;
        self.unavailable = None;
    }

    pub fn mark_unavailable(&mut self, reason: UnavailableReason) {
        self.status = TrackerStatus::Idle;
        self.unavailable = Some(reason);
    }

    /// Applies a foreground change. A change of bundle closes the open
    /// session at the event time and opens a new one; a new window title in
    /// the same bundle becomes an activity; anything else is a duplicate.
    /// An event older than the last applied one describes a foreground that
    /// has already been replaced and is dropped.
    pub fn apply(&mut self, event: &ForegroundEvent) -> Transition {
        let mut transition = Transition::default();
        if self.is_superseded(event) {
            return transition;
        }
        let at = event.timestamp;
        self.last_timestamp = Some(at);

        if let Some(session) = self.current_session.as_mut() {
            if session.app_bundle_id == event.bundle_id {
                let current_title = self
                    .current_activity
                    .as_ref()
                    .and_then(|activity| activity.window_title.as_deref());
                if current_title == event.window_title.as_deref() {
                    return transition;
                }
                let activity = Activity::new(session.id.clone(), event.window_title.clone(), at);
                session.activity_ids.push(activity.id.clone());
                self.current_activity = Some(activity.clone());
                transition.activity = Some(activity);
                return transition;
            }
        }

        if let Some(mut closing) = self.current_session.take() {
            closing.close(at);
            transition.closed = Some(closing);
        }

        let mut opened = AppSession::open(event.bundle_id.clone(), event.app_name.clone(), at);
        let activity = event.window_title.as_ref().map(|title| {
            let activity = Activity::new(opened.id.clone(), Some(title.clone()), at);
            opened.activity_ids.push(activity.id.clone());
            activity
        });
        self.current_activity = activity.clone();
        self.current_session = Some(opened.clone());
        transition.opened = Some(opened);
        transition.activity = activity;
        transition
    }

    pub fn is_superseded(&self, event: &ForegroundEvent) -> bool {
        self.last_timestamp.is_some_and(|last| event.timestamp < last)
    }

    /// Stops tracking, closing the open session at `now`.
    pub fn finish(&mut self, now: DateTime<Utc>) -> Option<AppSession> {
        self.status = TrackerStatus::Idle;
        self.current_activity = None;
        self.last_timestamp = None;
        let mut session = self.current_session.take()?;
        session.close(now);
        Some(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn event(bundle: &str, title: Option<&str>, at: DateTime<Utc>) -> ForegroundEvent {
        ForegroundEvent {
            bundle_id: bundle.to_string(),
            app_name: bundle.to_string(),
            window_title: title.map(str::to_string),
            timestamp: at,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn bundle_change_closes_and_opens() {
        let mut state = TrackerState::new();
        state.begin();

        let first = state.apply(&event("safari", Some("Docs"), t0()));
        assert!(first.closed.is_none());
        let safari = first.opened.unwrap();
        assert_eq!(first.activity.unwrap().session_id, safari.id);

        let second = state.apply(&event("chrome", None, t0() + Duration::seconds(5)));
        let closed = second.closed.unwrap();
        assert_eq!(closed.id, safari.id);
        assert_eq!(closed.total_duration_ms, Some(5_000));
        assert!(!closed.is_active);
        assert!(second.opened.unwrap().is_active);
        assert!(second.activity.is_none());
        assert!(state.current_activity.is_none());
    }

    #[test]
    fn title_change_records_activity_and_duplicate_is_ignored() {
        let mut state = TrackerState::new();
        state.begin();
        state.apply(&event("code", Some("main.rs"), t0()));

        let changed = state.apply(&event("code", Some("lib.rs"), t0() + Duration::seconds(1)));
        let activity = changed.activity.unwrap();
        assert!(changed.opened.is_none());
        assert_eq!(activity.window_title.as_deref(), Some("lib.rs"));

        let session = state.current_session.as_ref().unwrap();
        assert_eq!(session.activity_ids.len(), 2);
        assert_eq!(session.activity_ids[1], activity.id);

        let duplicate = state.apply(&event("code", Some("lib.rs"), t0() + Duration::seconds(2)));
        assert!(duplicate.is_empty());
    }

    #[test]
    fn late_event_is_dropped() {
        let mut state = TrackerState::new();
        state.begin();
        state.apply(&event("x", None, t0()));
        // Real order x → b@9s → a@10s, delivered with b last.
        let a = state.apply(&event("a", None, t0() + Duration::seconds(10)));
        let a_session = a.opened.unwrap();

        let late = state.apply(&event("b", Some("late"), t0() + Duration::seconds(9)));
        assert!(late.is_empty());
        let current = state.current_session.as_ref().unwrap();
        assert_eq!(current.id, a_session.id);
        assert!(current.is_active);
        assert_eq!(state.last_timestamp, Some(t0() + Duration::seconds(10)));

        // Same instant is not late.
        let same = state.apply(&event("a", Some("doc"), t0() + Duration::seconds(10)));
        assert!(same.activity.is_some());
    }

    #[test]
    fn finish_closes_open_session() {
        let mut state = TrackerState::new();
        state.begin();
        state.apply(&event("a", None, t0()));

        let closed = state.finish(t0() + Duration::seconds(30)).unwrap();
        assert_eq!(closed.total_duration_ms, Some(30_000));
        assert_eq!(state.status, TrackerStatus::Idle);
        assert!(state.current_session.is_none());
        assert!(state.finish(t0()).is_none());
    }
}
