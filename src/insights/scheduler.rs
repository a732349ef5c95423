use anyhow::{bail, Context, Result};
use chrono::Utc;
use log::info;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::generator::InsightGenerator;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

/// Runs the generator on a fixed interval in its own task.
pub struct InsightScheduler {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl InsightScheduler {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start(&mut self, generator: InsightGenerator, every: Duration) -> Result<()> {
        if self.handle.is_some() {
            bail!("insight generation already running");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(insight_loop(generator, every, cancel_token.clone()));

        info!("Insight generation started (every {}s)", every.as_secs());
        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("insight loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for InsightScheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn insight_loop(generator: InsightGenerator, every: Duration, cancel_token: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log_info!("insight loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                match generator.generate(Utc::now()).await {
                    Ok(insights) if !insights.is_empty() => {
                        log_info!("generated {} insight(s)", insights.len());
                    }
                    Ok(_) => {}
                    Err(err) => log_error!("insight generation failed: {err:#}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::AnalyzerConfig;
    use crate::db::{AppSession, Database};
    use crate::insights::InsightConfig;
    use crate::utils::time::DayZone;
    use chrono::Timelike;

    #[tokio::test]
    async fn runs_immediately_and_stops() {
        let db = Database::in_memory().unwrap();
        let start = Utc::now() - chrono::Duration::minutes(50);
        let mut session = AppSession::open("com.openai.chat", "ChatGPT", start);
        session.close(start + chrono::Duration::minutes(45));
        db.save_tracking_changes(vec![session], Vec::new())
            .await
            .unwrap();

        let config = InsightConfig {
            ai_usage_min_minutes: 1,
            ..InsightConfig::default()
        };
        // Shift the day so that now is around local noon.
        let now = Utc::now();
        let minutes_into_day = (now.hour() * 60 + now.minute()) as i32;
        let zone = DayZone::FixedMinutes(12 * 60 - minutes_into_day);
        let generator = InsightGenerator::new(db.clone(), config, AnalyzerConfig::default(), zone);

        let mut scheduler = InsightScheduler::new();
        scheduler
            .start(generator.clone(), Duration::from_secs(3_600))
            .unwrap();
        assert!(scheduler.start(generator, Duration::from_secs(3_600)).is_err());

        let mut stored = Vec::new();
        for _ in 0..100 {
            stored = db.list_insights(false).await.unwrap();
            if !stored.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!stored.is_empty());

        scheduler.stop().await.unwrap();
        scheduler.stop().await.unwrap();
    }
}
