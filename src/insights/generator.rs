use anyhow::Result;
use chrono::{DateTime, Duration, Timelike, Utc};

use crate::{
    analysis::AnalyzerConfig,
    db::{models::session::duration_ms, AppSession, Database, InsightType, ProductivityInsight},
    utils::time::DayZone,
};

use super::config::InsightConfig;

type Period = (DateTime<Utc>, DateTime<Utc>);

/// Derives insights from stored sessions and index entries.
#[derive(Clone)]
pub struct InsightGenerator {
    db: Database,
    config: InsightConfig,
    analyzer: AnalyzerConfig,
    zone: DayZone,
}

impl InsightGenerator {
    pub fn new(db: Database, config: InsightConfig, analyzer: AnalyzerConfig, zone: DayZone) -> Self {
        Self {
            db,
            config,
            analyzer,
            zone,
        }
    }

    /// Evaluates every rule at `now` and stores the insights that are not
    /// suppressed by an earlier one. Returns what was stored.
    pub async fn generate(&self, now: DateTime<Utc>) -> Result<Vec<ProductivityInsight>> {
        let mut fresh = Vec::new();
        for candidate in self.candidates(now).await? {
            if !self.is_suppressed(&candidate).await? {
                fresh.push(candidate);
            }
        }
        if !fresh.is_empty() {
            self.db.insert_insights(&fresh).await?;
        }
        Ok(fresh)
    }

    async fn candidates(&self, now: DateTime<Utc>) -> Result<Vec<ProductivityInsight>> {
        let today = self.zone.day_bounds(now);
        let sessions = self.db.list_app_sessions_between(today.0, today.1).await?;

        let mut candidates = Vec::new();
        candidates.extend(self.focus_pattern(&sessions, today, now));
        candidates.extend(self.ai_usage(&sessions, today, now));
        candidates.extend(self.recommendation(&sessions, today, now));

        let hour = previous_clock_hour(self.zone, now);
        let hour_sessions = self.db.list_app_sessions_between(hour.0, hour.1).await?;
        let switches = count_switches(&hour_sessions, hour, self.analyzer.min_dwell(), now);
        if switches > self.config.max_switches_per_hour {
            let window_changes = self.db.count_activities_between(hour.0, hour.1).await?;
            candidates.push(ProductivityInsight::new(
                InsightType::ContextSwitchWarning,
                "Frequent context switching",
                format!(
                    "You switched apps {switches} times in the last hour ({window_changes} window changes). \
                     Batching similar work can help you stay in flow."
                ),
                Some(hour),
                now,
            ));
        }

        let yesterday = self.zone.day_bounds(today.0 - Duration::seconds(1));
        let day_before = self.zone.day_bounds(yesterday.0 - Duration::seconds(1));
        let latest = active_ms_within(
            &self.db.list_app_sessions_between(yesterday.0, yesterday.1).await?,
            yesterday,
            now,
        );
        let previous = active_ms_within(
            &self.db.list_app_sessions_between(day_before.0, day_before.1).await?,
            day_before,
            now,
        );
        candidates.extend(self.productivity_trend(previous, latest, yesterday, now));

        let progress = self.db.count_indexed_by_project(today.0, today.1).await?;
        candidates.extend(self.project_progress(&progress, today, now));

        Ok(candidates)
    }

    /// Same type and either a live overlapping insight or one the user already
    /// read or dismissed for exactly this period.
    async fn is_suppressed(&self, candidate: &ProductivityInsight) -> Result<bool> {
        let (Some(start), Some(end)) = (candidate.period_start, candidate.period_end) else {
            return Ok(false);
        };
        let existing = self
            .db
            .find_overlapping_insights(candidate.insight_type, start, end)
            .await?;
        Ok(existing
            .iter()
            .any(|insight| !insight.is_dismissed || insight.covers_same_period(start, end)))
    }

    fn focus_pattern(
        &self,
        sessions: &[AppSession],
        today: Period,
        now: DateTime<Utc>,
    ) -> Option<ProductivityInsight> {
        let count = self.focus_count(sessions, now);
        if count < self.config.min_focus_sessions.max(1) {
            return None;
        }
        Some(ProductivityInsight::new(
            InsightType::FocusPattern,
            "Strong focus today",
            format!(
                "You had {count} focus sessions of {}+ today.",
                format_duration(self.analyzer.focus_threshold())
            ),
            Some(today),
            now,
        ))
    }

    fn focus_count(&self, sessions: &[AppSession], now: DateTime<Utc>) -> u32 {
        focus_length_count(
            sessions,
            self.analyzer.min_dwell(),
            self.analyzer.focus_threshold(),
            now,
        )
    }

    fn ai_usage(
        &self,
        sessions: &[AppSession],
        today: Period,
        now: DateTime<Utc>,
    ) -> Option<ProductivityInsight> {
        if self.config.ai_bundle_ids.is_empty() {
            return None;
        }
        let ai_sessions: Vec<AppSession> = sessions
            .iter()
            .filter(|session| self.config.ai_bundle_ids.contains(&session.app_bundle_id))
            .cloned()
            .collect();
        let ai_ms = active_ms_within(&ai_sessions, today, now);
        let min_ms = self.config.ai_usage_min_minutes.saturating_mul(60_000);
        if ai_ms == 0 || ai_ms < min_ms {
            return None;
        }
        Some(ProductivityInsight::new(
            InsightType::AiUsagePattern,
            "AI assistant usage",
            format!(
                "You spent {} in AI assistants today.",
                format_duration(Duration::milliseconds(ai_ms as i64))
            ),
            Some(today),
            now,
        ))
    }

    fn recommendation(
        &self,
        sessions: &[AppSession],
        today: Period,
        now: DateTime<Utc>,
    ) -> Option<ProductivityInsight> {
        let active_ms = active_ms_within(sessions, today, now);
        let min_ms = self.config.recommend_after_active_minutes.saturating_mul(60_000);
        if active_ms == 0 || active_ms < min_ms {
            return None;
        }
        if self.focus_count(sessions, now) > 0 {
            return None;
        }
        Some(ProductivityInsight::new(
            InsightType::Recommendation,
            "Try a focus block",
            format!(
                "You have been active for {} today without staying in one app for {}. \
                 Consider blocking out time for deep work.",
                format_duration(Duration::milliseconds(active_ms as i64)),
                format_duration(self.analyzer.focus_threshold())
            ),
            Some(today),
            now,
        ))
    }

    fn productivity_trend(
        &self,
        previous_ms: u64,
        latest_ms: u64,
        latest_day: Period,
        now: DateTime<Utc>,
    ) -> Option<ProductivityInsight> {
        let change = trend_percent(previous_ms, latest_ms)?;
        if change.abs() < self.config.trend_change_percent {
            return None;
        }
        let (title, direction) = if change > 0.0 {
            ("Active time is up", "more")
        } else {
            ("Active time is down", "less")
        };
        Some(ProductivityInsight::new(
            InsightType::ProductivityTrend,
            title,
            format!(
                "Yesterday you were active for {}, {:.0}% {direction} than the day before.",
                format_duration(Duration::milliseconds(latest_ms as i64)),
                change.abs()
            ),
            Some(latest_day),
            now,
        ))
    }

    fn project_progress(
        &self,
        counts: &[(String, u64)],
        today: Period,
        now: DateTime<Utc>,
    ) -> Option<ProductivityInsight> {
        let active: Vec<String> = counts
            .iter()
            .filter(|(_, files)| *files >= self.config.min_project_files_changed.max(1))
            .map(|(project, files)| format!("{} ({files} files)", project_name(project)))
            .collect();
        if active.is_empty() {
            return None;
        }
        Some(ProductivityInsight::new(
            InsightType::ProjectProgress,
            "Project progress",
            format!("Files changed today in: {}.", active.join(", ")),
            Some(today),
            now,
        ))
    }
}

/// Uninterrupted stays on one bundle, with flicker folded away: sessions
/// shorter than `min_dwell` are dropped, and a bundle resumed less than
/// `min_dwell` after it was left continues its earlier span. Expects
/// sessions ordered by start time; open ones run up to `now`.
pub fn focus_spans(
    sessions: &[AppSession],
    min_dwell: Duration,
    now: DateTime<Utc>,
) -> Vec<(String, Period)> {
    let min_dwell_ms = min_dwell.num_milliseconds().max(0) as u64;
    let mut spans: Vec<(String, Period)> = Vec::new();
    for session in sessions
        .iter()
        .filter(|session| session.elapsed_ms(now) >= min_dwell_ms)
    {
        let end = session.end_time.unwrap_or(now);
        match spans.last_mut() {
            Some((bundle, span))
                if *bundle == session.app_bundle_id
                    && session.start_time - span.1 < min_dwell =>
            {
                span.1 = span.1.max(end);
            }
            _ => spans.push((session.app_bundle_id.clone(), (session.start_time, end))),
        }
    }
    spans
}

/// Focus spans at least `threshold` long.
pub fn focus_length_count(
    sessions: &[AppSession],
    min_dwell: Duration,
    threshold: Duration,
    now: DateTime<Utc>,
) -> u32 {
    focus_spans(sessions, min_dwell, now)
        .iter()
        .filter(|(_, (start, end))| *end - *start >= threshold)
        .count() as u32
}

/// Foreground time inside `period`, open sessions measured up to `now`.
pub fn active_ms_within(sessions: &[AppSession], period: Period, now: DateTime<Utc>) -> u64 {
    sessions
        .iter()
        .map(|session| {
            let end = session.end_time.unwrap_or(now);
            duration_ms(session.start_time.max(period.0), end.min(period.1))
        })
        .sum()
}

/// Bundle changes starting inside `period` between consecutive sessions that
/// each lasted at least `min_dwell`.
pub fn count_switches(
    sessions: &[AppSession],
    period: Period,
    min_dwell: Duration,
    now: DateTime<Utc>,
) -> u32 {
    let min_dwell_ms = min_dwell.num_milliseconds().max(0) as u64;
    let mut previous: Option<&AppSession> = None;
    let mut switches = 0;
    for session in sessions
        .iter()
        .filter(|session| session.elapsed_ms(now) >= min_dwell_ms)
    {
        if let Some(before) = previous {
            if before.app_bundle_id != session.app_bundle_id
                && session.start_time >= period.0
                && session.start_time < period.1
            {
                switches += 1;
            }
        }
        previous = Some(session);
    }
    switches
}

/// Percent change from `previous_ms` to `latest_ms`; `None` without a baseline.
pub fn trend_percent(previous_ms: u64, latest_ms: u64) -> Option<f64> {
    if previous_ms == 0 {
        return None;
    }
    Some((latest_ms as f64 - previous_ms as f64) / previous_ms as f64 * 100.0)
}

/// The full clock hour before the one containing `now`, in `zone`.
pub fn previous_clock_hour(zone: DayZone, now: DateTime<Utc>) -> Period {
    let local = now.with_timezone(&zone.offset_at(now));
    let into_hour = Duration::seconds(i64::from(local.minute() * 60 + local.second()))
        + Duration::nanoseconds(i64::from(local.nanosecond()));
    let hour_start = now - into_hour;
    (hour_start - Duration::hours(1), hour_start)
}

fn format_duration(duration: Duration) -> String {
    let minutes = duration.num_minutes().max(0);
    match (minutes / 60, minutes % 60) {
        (0, m) => format!("{m}m"),
        (h, 0) => format!("{h}h"),
        (h, m) => format!("{h}h {m:02}m"),
    }
}

fn project_name(project_path: &str) -> &str {
    project_path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(project_path)
}
