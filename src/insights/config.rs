use serde::{Deserialize, Serialize};

/// Thresholds for the insight rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct InsightConfig {
    /// How often the generator runs
    pub interval_secs: u64,

    /// Focus-length sessions needed today for a focus pattern
    pub min_focus_sessions: u32,

    /// Context switches in one clock hour above which a warning is raised
    pub max_switches_per_hour: u32,

    /// Day-over-day change in active time worth reporting, in percent
    pub trend_change_percent: f64,

    /// Files (re)indexed today for a project to count as progressing
    pub min_project_files_changed: u64,

    pub ai_bundle_ids: Vec<String>,
    pub ai_usage_min_minutes: u64,

    /// Active time today after which a missing focus session is flagged
    pub recommend_after_active_minutes: u64,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60 * 60,
            min_focus_sessions: 2,
            max_switches_per_hour: 20,
            trend_change_percent: 20.0,
            min_project_files_changed: 5,
            ai_bundle_ids: vec![
                "com.openai.chat".into(),
                "com.anthropic.claudefordesktop".into(),
                "com.todesktop.230313mzl4w4u92".into(),
            ],
            ai_usage_min_minutes: 30,
            recommend_after_active_minutes: 120,
        }
    }
}
