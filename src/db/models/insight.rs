//! Generated productivity insights.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum InsightType {
    FocusPattern,
    ContextSwitchWarning,
    ProductivityTrend,
    ProjectProgress,
    AiUsagePattern,
    Recommendation,
}

impl InsightType {
    pub const ALL: [InsightType; 6] = [
        InsightType::FocusPattern,
        InsightType::ContextSwitchWarning,
        InsightType::ProductivityTrend,
        InsightType::ProjectProgress,
        InsightType::AiUsagePattern,
        InsightType::Recommendation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InsightType::FocusPattern => "focusPattern",
            InsightType::ContextSwitchWarning => "contextSwitchWarning",
            InsightType::ProductivityTrend => "productivityTrend",
            InsightType::ProjectProgress => "projectProgress",
            InsightType::AiUsagePattern => "aiUsagePattern",
            InsightType::Recommendation => "recommendation",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductivityInsight {
    pub id: String,
    pub generated_at: DateTime<Utc>,
    pub insight_type: InsightType,
    pub title: String,
    pub body: String,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
    pub is_read: bool,
    pub is_dismissed: bool,
}

impl ProductivityInsight {
    pub fn new(
        insight_type: InsightType,
        title: impl Into<String>,
        body: impl Into<String>,
        period: Option<(DateTime<Utc>, DateTime<Utc>)>,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            generated_at,
            insight_type,
            title: title.into(),
            body: body.into(),
            period_start: period.map(|(start, _)| start),
            period_end: period.map(|(_, end)| end),
            is_read: false,
            is_dismissed: false,
        }
    }

    pub fn covers_same_period(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.period_start == Some(start) && self.period_end == Some(end)
    }
}
