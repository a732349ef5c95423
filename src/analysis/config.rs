use serde::{Deserialize, Serialize};

/// Tunable thresholds for context-switch and focus detection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzerConfig {
    /// Foreground stints shorter than this are flicker, not context switches
    pub min_dwell_ms: u64,

    /// Uninterrupted dwell on one app that counts as a focus session
    pub focus_threshold_secs: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_dwell_ms: 2_000,
            focus_threshold_secs: 15 * 60,
        }
    }
}

impl AnalyzerConfig {
    pub fn min_dwell(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.min_dwell_ms.min(i64::MAX as u64) as i64)
    }

    pub fn focus_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.focus_threshold_secs.min(i64::MAX as u64 / 1_000) as i64)
    }
}
