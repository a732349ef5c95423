use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{parse_datetime, parse_insight_type, parse_optional_datetime},
    models::{InsightType, ProductivityInsight},
    Database,
};

const INSIGHT_COLUMNS: &str =
    "id, generated_at, insight_type, title, body, period_start, period_end, is_read, is_dismissed";

fn row_to_insight(row: &Row) -> Result<ProductivityInsight> {
    let generated_at: String = row.get("generated_at")?;
    let insight_type: String = row.get("insight_type")?;
    let period_start: Option<String> = row.get("period_start")?;
    let period_end: Option<String> = row.get("period_end")?;
    let is_read: i64 = row.get("is_read")?;
    let is_dismissed: i64 = row.get("is_dismissed")?;

    Ok(ProductivityInsight {
        id: row.get("id")?,
        generated_at: parse_datetime(&generated_at, "generated_at")?,
        insight_type: parse_insight_type(&insight_type)?,
        title: row.get("title")?,
        body: row.get("body")?,
        period_start: parse_optional_datetime(period_start, "period_start")?,
        period_end: parse_optional_datetime(period_end, "period_end")?,
        is_read: is_read != 0,
        is_dismissed: is_dismissed != 0,
    })
}

impl Database {
    pub async fn insert_insights(&self, insights: &[ProductivityInsight]) -> Result<()> {
        let records = insights.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            for record in &records {
                tx.execute(
                    "INSERT INTO productivity_insights (id, generated_at, insight_type, title, body, period_start, period_end, is_read, is_dismissed)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        record.id,
                        record.generated_at.to_rfc3339(),
                        record.insight_type.as_str(),
                        record.title,
                        record.body,
                        record.period_start.as_ref().map(|dt| dt.to_rfc3339()),
                        record.period_end.as_ref().map(|dt| dt.to_rfc3339()),
                        record.is_read as i64,
                        record.is_dismissed as i64,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Insights of `insight_type` whose period overlaps `[start, end)`,
    /// including unbounded ones.
    pub async fn find_overlapping_insights(
        &self,
        insight_type: InsightType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ProductivityInsight>> {
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {INSIGHT_COLUMNS} FROM productivity_insights
                 WHERE insight_type = ?1
                   AND (period_start IS NULL OR period_end IS NULL
                        OR (period_start < ?3 AND period_end > ?2))
                 ORDER BY generated_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![
                insight_type.as_str(),
                start.to_rfc3339(),
                end.to_rfc3339()
            ])?;
            let mut insights = Vec::new();
            while let Some(row) = rows.next()? {
                insights.push(row_to_insight(row)?);
            }
            Ok(insights)
        })
        .await
    }

    pub async fn list_insights(&self, include_dismissed: bool) -> Result<Vec<ProductivityInsight>> {
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {INSIGHT_COLUMNS} FROM productivity_insights
                 WHERE ?1 OR is_dismissed = 0
                 ORDER BY generated_at DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![include_dismissed])?;
            let mut insights = Vec::new();
            while let Some(row) = rows.next()? {
                insights.push(row_to_insight(row)?);
            }
            Ok(insights)
        })
        .await
    }

    pub async fn mark_insight_read(&self, insight_id: &str) -> Result<()> {
        self.set_insight_flag(insight_id, "is_read").await
    }

    pub async fn dismiss_insight(&self, insight_id: &str) -> Result<()> {
        self.set_insight_flag(insight_id, "is_dismissed").await
    }

    async fn set_insight_flag(&self, insight_id: &str, column: &'static str) -> Result<()> {
        let insight_id = insight_id.to_string();
        self.execute(move |conn| {
            let rows_affected = conn.execute(
                &format!("UPDATE productivity_insights SET {column} = 1 WHERE id = ?1"),
                params![insight_id],
            )?;

            if rows_affected == 0 {
                return Err(anyhow::anyhow!("Insight not found"));
            }

            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(hour: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap() + Duration::hours(hour)
    }

    #[tokio::test]
    async fn overlap_query_respects_type_and_period() {
        let db = Database::in_memory().unwrap();
        let focus = ProductivityInsight::new(
            InsightType::FocusPattern,
            "Focus",
            "body",
            Some((at(0), at(24))),
            at(12),
        );
        let warning = ProductivityInsight::new(
            InsightType::ContextSwitchWarning,
            "Switching",
            "body",
            Some((at(10), at(11))),
            at(11),
        );
        db.insert_insights(&[focus.clone(), warning]).await.unwrap();

        let hits = db
            .find_overlapping_insights(InsightType::FocusPattern, at(6), at(30))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, focus.id);

        let miss = db
            .find_overlapping_insights(InsightType::FocusPattern, at(24), at(48))
            .await
            .unwrap();
        assert!(miss.is_empty());
    }

    #[tokio::test]
    async fn read_and_dismiss_flags() {
        let db = Database::in_memory().unwrap();
        let insight =
            ProductivityInsight::new(InsightType::Recommendation, "Tip", "body", None, at(1));
        db.insert_insights(&[insight.clone()]).await.unwrap();

        db.mark_insight_read(&insight.id).await.unwrap();
        db.dismiss_insight(&insight.id).await.unwrap();
        assert!(db.dismiss_insight("missing").await.is_err());

        assert!(db.list_insights(false).await.unwrap().is_empty());
        let all = db.list_insights(true).await.unwrap();
        assert!(all[0].is_read && all[0].is_dismissed);
    }
}
