pub mod config;
pub mod daily;
pub mod focus;

pub use config::AnalyzerConfig;
pub use daily::{DailyStats, DailyStatsBook};
pub use focus::{FocusAnalyzer, FocusSignal};
