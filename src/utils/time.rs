//! Calendar-day arithmetic for daily aggregates.

use chrono::{
    DateTime, Duration, FixedOffset, Local, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc,
};
use serde::{Deserialize, Serialize};

/// Time zone in which calendar days are counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DayZone {
    Local,
    /// Fixed offset east of UTC, in minutes.
    FixedMinutes(i32),
}

impl Default for DayZone {
    fn default() -> Self {
        DayZone::Local
    }
}

impl DayZone {
    pub fn offset_at(&self, instant: DateTime<Utc>) -> FixedOffset {
        match self {
            DayZone::Local => Local.offset_from_utc_datetime(&instant.naive_utc()).fix(),
            DayZone::FixedMinutes(minutes) => fixed(*minutes),
        }
    }

    pub fn day_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset_at(instant)).date_naive()
    }

    /// First instant of `day` in this zone.
    pub fn start_of(&self, day: NaiveDate) -> DateTime<Utc> {
        let midnight = day.and_hms_opt(0, 0, 0).unwrap_or(NaiveDateTime::MIN);
        match self {
            DayZone::Local => local_to_utc(midnight),
            DayZone::FixedMinutes(minutes) => (midnight - Duration::minutes(*minutes as i64)).and_utc(),
        }
    }

    /// Boundary that ends the day containing `instant`.
    pub fn next_day_start(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        let day = self.day_of(instant);
        match day.succ_opt() {
            Some(next) => self.start_of(next),
            None => DateTime::<Utc>::MAX_UTC,
        }
    }

    /// `[start, end)` of the day containing `instant`.
    pub fn day_bounds(&self, instant: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let day = self.day_of(instant);
        (self.start_of(day), self.next_day_start(instant))
    }
}

fn fixed(minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(minutes * 60).unwrap_or_else(|| Utc.fix())
}

// Midnight can fall into a DST gap; the first valid instant after it is used.
fn local_to_utc(naive: NaiveDateTime) -> DateTime<Utc> {
    let mut candidate = naive;
    for _ in 0..4 {
        if let Some(resolved) = Local.from_local_datetime(&candidate).earliest() {
            return resolved.with_timezone(&Utc);
        }
        candidate += Duration::minutes(30);
    }
    naive.and_utc()
}

/// Splits `[start, end)` at every day boundary of `zone`.
pub fn split_by_day(
    zone: DayZone,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<(NaiveDate, DateTime<Utc>, DateTime<Utc>)> {
    let mut pieces = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let boundary = zone.next_day_start(cursor).min(end);
        pieces.push((zone.day_of(cursor), cursor, boundary));
        cursor = boundary;
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_zone_day_bounds() {
        let zone = DayZone::FixedMinutes(120);
        // 23:30 UTC is 01:30 the next day at +02:00.
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 23, 30, 0).unwrap();
        assert_eq!(zone.day_of(instant), NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());

        let (start, end) = zone.day_bounds(instant);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 1, 22, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 3, 2, 22, 0, 0).unwrap());
    }

    #[test]
    fn span_across_midnight_is_split_at_boundary() {
        let zone = DayZone::FixedMinutes(0);
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 23, 50, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 3, 2, 0, 20, 0).unwrap();
        let pieces = split_by_day(zone, start, end);

        let midnight = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0], (NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), start, midnight));
        assert_eq!(pieces[1], (NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(), midnight, end));
    }

    #[test]
    fn empty_span_has_no_pieces() {
        let instant = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert!(split_by_day(DayZone::FixedMinutes(0), instant, instant).is_empty());
    }
}
