use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::focus::FocusSignal;
use crate::db::models::session::duration_ms;
use crate::db::AppSession;
use crate::utils::time::{split_by_day, DayZone};

/// Days of aggregates kept in memory.
const RETAINED_DAYS: usize = 7;

/// Aggregates for one calendar day. Not persisted; rebuilt while tracking.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    pub day: NaiveDate,
    pub total_active_ms: u64,
    /// Bundle id → accumulated foreground time in milliseconds.
    pub app_usage: HashMap<String, u64>,
    pub focus_session_count: u32,
    pub context_switch_count: u32,
}

impl DailyStats {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            total_active_ms: 0,
            app_usage: HashMap::new(),
            focus_session_count: 0,
            context_switch_count: 0,
        }
    }

    fn add_usage(&mut self, bundle_id: &str, ms: u64) {
        if ms == 0 {
            return;
        }
        self.total_active_ms = self.total_active_ms.saturating_add(ms);
        let entry = self.app_usage.entry(bundle_id.to_string()).or_insert(0);
        *entry = entry.saturating_add(ms);
    }
}

/// Per-day aggregates fed by closed sessions and analyzer signals.
#[derive(Debug, Clone)]
pub struct DailyStatsBook {
    zone: DayZone,
    days: BTreeMap<NaiveDate, DailyStats>,
}

impl DailyStatsBook {
    pub fn new(zone: DayZone) -> Self {
        Self {
            zone,
            days: BTreeMap::new(),
        }
    }

    /// Adds foreground time, splitting spans that cross midnight.
    pub fn add_usage(&mut self, bundle_id: &str, start: DateTime<Utc>, end: DateTime<Utc>) {
        for (day, piece_start, piece_end) in split_by_day(self.zone, start, end) {
            self.day_mut(day)
                .add_usage(bundle_id, duration_ms(piece_start, piece_end));
        }
        self.prune();
    }

    pub fn add_closed_session(&mut self, session: &AppSession) {
        if let Some(end) = session.end_time {
            self.add_usage(&session.app_bundle_id, session.start_time, end);
        }
    }

    pub fn apply(&mut self, signal: &FocusSignal) {
        match signal {
            FocusSignal::ContextSwitch { at, .. } => {
                let day = self.zone.day_of(*at);
                let stats = self.day_mut(day);
                stats.context_switch_count = stats.context_switch_count.saturating_add(1);
            }
            FocusSignal::SwitchRetracted { at } => {
                let day = self.zone.day_of(*at);
                if let Some(stats) = self.days.get_mut(&day) {
                    stats.context_switch_count = stats.context_switch_count.saturating_sub(1);
                }
            }
            FocusSignal::FocusSessionReached { at, .. } => {
                let day = self.zone.day_of(*at);
                let stats = self.day_mut(day);
                stats.focus_session_count = stats.focus_session_count.saturating_add(1);
            }
        }
        self.prune();
    }

    /// Stats for the day containing `now`, including the part of the open
    /// session that falls on that day.
    pub fn snapshot(&self, now: DateTime<Utc>, open: Option<&AppSession>) -> DailyStats {
        let today = self.zone.day_of(now);
        let mut stats = self
            .days
            .get(&today)
            .cloned()
            .unwrap_or_else(|| DailyStats::new(today));

        if let Some(session) = open.filter(|session| session.is_active) {
            let day_start = self.zone.start_of(today);
            let start = session.start_time.max(day_start);
            if start < now {
                stats.add_usage(&session.app_bundle_id, duration_ms(start, now));
            }
        }

        stats
    }

    pub fn day(&self, day: NaiveDate) -> Option<&DailyStats> {
        self.days.get(&day)
    }

    fn day_mut(&mut self, day: NaiveDate) -> &mut DailyStats {
        self.days.entry(day).or_insert_with(|| DailyStats::new(day))
    }

    fn prune(&mut self) {
        while self.days.len() > RETAINED_DAYS {
            let Some(oldest) = self.days.keys().next().copied() else {
                break;
            };
            self.days.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn utc_book() -> DailyStatsBook {
        DailyStatsBook::new(DayZone::FixedMinutes(0))
    }

    #[test]
    fn session_spanning_midnight_is_split() {
        let mut book = utc_book();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap();
        let mut session = AppSession::open("com.apple.Xcode", "Xcode", start);
        session.close(start + Duration::hours(1));
        book.add_closed_session(&session);

        let first = book.day(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()).unwrap();
        let second = book.day(NaiveDate::from_ymd_opt(2024, 3, 2).unwrap()).unwrap();
        assert_eq!(first.total_active_ms, 30 * 60 * 1_000);
        assert_eq!(second.total_active_ms, 30 * 60 * 1_000);
        assert_eq!(second.app_usage["com.apple.Xcode"], 30 * 60 * 1_000);
    }

    #[test]
    fn snapshot_includes_open_session_from_day_start() {
        let mut book = utc_book();
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 23, 0, 0).unwrap();
        let open = AppSession::open("com.apple.Safari", "Safari", start);
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 0, 10, 0).unwrap();

        book.apply(&FocusSignal::ContextSwitch {
            from: "a".into(),
            to: "com.apple.Safari".into(),
            at: start,
        });

        let stats = book.snapshot(now, Some(&open));
        assert_eq!(stats.day, NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert_eq!(stats.total_active_ms, 10 * 60 * 1_000);
        // The switch happened yesterday; today starts from zero.
        assert_eq!(stats.context_switch_count, 0);
    }

    #[test]
    fn retraction_undoes_a_switch_on_its_own_day() {
        let mut book = utc_book();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
        book.apply(&FocusSignal::ContextSwitch {
            from: "a".into(),
            to: "b".into(),
            at,
        });
        book.apply(&FocusSignal::SwitchRetracted { at });
        book.apply(&FocusSignal::SwitchRetracted { at });

        assert_eq!(book.snapshot(at, None).context_switch_count, 0);
    }

    #[test]
    fn only_recent_days_are_kept() {
        let mut book = utc_book();
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        for offset in 0..10 {
            let start = base + Duration::days(offset);
            book.add_usage("a", start, start + Duration::minutes(1));
        }
        assert!(book.day(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()).is_none());
        assert!(book.day(NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()).is_some());
    }
}
