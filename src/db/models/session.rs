//! Foreground application sessions and the activities recorded inside them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A contiguous period during which one application holds foreground focus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSession {
    pub id: String,
    pub app_bundle_id: String,
    pub app_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Set together with `end_time`; `None` while the session is open.
    pub total_duration_ms: Option<u64>,
    pub is_active: bool,
    /// Activities owned by this session, oldest first.
    pub activity_ids: Vec<String>,
}

impl AppSession {
    pub fn open(
        app_bundle_id: impl Into<String>,
        app_name: impl Into<String>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            app_bundle_id: app_bundle_id.into(),
            app_name: app_name.into(),
            start_time,
            end_time: None,
            total_duration_ms: None,
            is_active: true,
            activity_ids: Vec::new(),
        }
    }

    /// Ends the session. `end_time` is clamped so it never precedes `start_time`.
    pub fn close(&mut self, end_time: DateTime<Utc>) {
        let end_time = end_time.max(self.start_time);
        self.end_time = Some(end_time);
        self.total_duration_ms = Some(duration_ms(self.start_time, end_time));
        self.is_active = false;
    }

    /// Elapsed focus time, measured up to `now` for an open session.
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        match self.total_duration_ms {
            Some(total) => total,
            None => duration_ms(self.start_time, now),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    /// Owning session; the session holds the reverse list in `activity_ids`.
    pub session_id: String,
    pub window_title: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Activity {
    pub fn new(
        session_id: impl Into<String>,
        window_title: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            window_title,
            timestamp,
        }
    }
}

pub fn duration_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn close_sets_exact_duration() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut session = AppSession::open("com.apple.Safari", "Safari", start);
        assert!(session.is_active);
        assert_eq!(session.total_duration_ms, None);

        let end = start + Duration::milliseconds(5_250);
        session.close(end);

        assert!(!session.is_active);
        assert_eq!(session.end_time, Some(end));
        assert_eq!(
            session.total_duration_ms,
            Some((end - start).num_milliseconds() as u64)
        );
    }

    #[test]
    fn close_never_ends_before_start() {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let mut session = AppSession::open("com.apple.Safari", "Safari", start);
        session.close(start - Duration::seconds(3));

        assert_eq!(session.end_time, Some(start));
        assert_eq!(session.total_duration_ms, Some(0));
    }
}
