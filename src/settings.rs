use anyhow::{bail, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::{
    analysis::AnalyzerConfig, db::models::content_index::DEFAULT_REINDEX_THRESHOLD_SECS,
    insights::InsightConfig, utils::time::DayZone,
};

pub const DATA_DIR_ENV: &str = "WORKLENS_DATA_DIR";
const SETTINGS_FILE: &str = "settings.json";
const DATABASE_FILE: &str = "worklens.sqlite3";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackingSettings {
    pub analyzer: AnalyzerConfig,
    /// Interval of the focus check and snapshot refresh while tracking
    pub heartbeat_secs: u64,
    /// Zone in which daily stats roll over
    pub day_zone: DayZone,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            analyzer: AnalyzerConfig::default(),
            heartbeat_secs: 30,
            day_zone: DayZone::Local,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct IndexingSettings {
    pub project_roots: Vec<PathBuf>,
    /// Gitignore-style globs excluded on top of `.gitignore` files
    pub exclude_globs: Vec<String>,
    pub max_file_size_bytes: u64,
    pub reindex_threshold_secs: u64,
    pub scan_interval_secs: u64,
    /// Rescan a project shortly after files in it change
    pub watch_changes: bool,
    /// Quiet time after the last change before the rescan starts
    pub watch_settle_ms: u64,
}

impl Default for IndexingSettings {
    fn default() -> Self {
        Self {
            project_roots: Vec::new(),
            exclude_globs: vec![
                "node_modules/".into(),
                "target/".into(),
                "dist/".into(),
                "build/".into(),
                ".venv/".into(),
            ],
            max_file_size_bytes: 1024 * 1024,
            reindex_threshold_secs: DEFAULT_REINDEX_THRESHOLD_SECS,
            scan_interval_secs: 15 * 60,
            watch_changes: true,
            watch_settle_ms: 2_000,
        }
    }
}

impl IndexingSettings {
    /// Roots that are not directories right now. Scans skip them until they
    /// come back.
    pub fn unavailable_roots(&self) -> impl Iterator<Item = &PathBuf> {
        self.project_roots.iter().filter(|root| !root.is_dir())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    pub tracking: TrackingSettings,
    pub indexing: IndexingSettings,
    pub insights: InsightConfig,
}

impl AgentSettings {
    pub fn validate(&self) -> Result<()> {
        let tracking = &self.tracking;
        if tracking.heartbeat_secs == 0 {
            bail!("tracking.heartbeatSecs must be greater than zero");
        }
        if tracking.analyzer.focus_threshold_secs == 0 {
            bail!("tracking.analyzer.focusThresholdSecs must be greater than zero");
        }
        let focus_threshold_ms = tracking.analyzer.focus_threshold_secs.saturating_mul(1_000);
        if tracking.analyzer.min_dwell_ms >= focus_threshold_ms {
            bail!("tracking.analyzer.minDwellMs must be shorter than the focus threshold");
        }
        if let DayZone::FixedMinutes(minutes) = tracking.day_zone {
            if minutes.abs() >= 24 * 60 {
                bail!("tracking.dayZone offset must be within ±24h, got {minutes} minutes");
            }
        }

        let indexing = &self.indexing;
        if indexing.scan_interval_secs == 0 {
            bail!("indexing.scanIntervalSecs must be greater than zero");
        }
        if indexing.max_file_size_bytes == 0 {
            bail!("indexing.maxFileSizeBytes must be greater than zero");
        }

        let insights = &self.insights;
        if insights.interval_secs == 0 {
            bail!("insights.intervalSecs must be greater than zero");
        }
        if !insights.trend_change_percent.is_finite() || insights.trend_change_percent <= 0.0 {
            bail!("insights.trendChangePercent must be a positive number");
        }
        Ok(())
    }
}

/// `WORKLENS_DATA_DIR`, or `worklens` under the platform's local data dir.
pub fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("worklens"))
        .with_context(|| format!("no local data directory; set {DATA_DIR_ENV}"))
}

pub fn database_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DATABASE_FILE)
}

pub fn settings_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SETTINGS_FILE)
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AgentSettings>,
}

impl SettingsStore {
    /// Loads and validates the settings file, creating it with defaults when
    /// it does not exist yet.
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            read_settings(&path)?
        } else {
            let defaults = AgentSettings::default();
            write_settings(&path, &defaults)?;
            info!("Wrote default settings to {}", path.display());
            defaults
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> AgentSettings {
        self.read().clone()
    }

    pub fn tracking(&self) -> TrackingSettings {
        self.read().tracking.clone()
    }

    pub fn indexing(&self) -> IndexingSettings {
        self.read().indexing.clone()
    }

    pub fn insights(&self) -> InsightConfig {
        self.read().insights.clone()
    }

    /// Validates and persists `settings`. Running loops pick them up on restart.
    pub fn update(&self, settings: AgentSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = self.write();
        write_settings(&self.path, &settings)?;
        *guard = settings;
        Ok(())
    }

    pub fn reload(&self) -> Result<()> {
        let data = read_settings(&self.path)?;
        *self.write() = data;
        Ok(())
    }

    fn read(&self) -> RwLockReadGuard<'_, AgentSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, AgentSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn read_settings(path: &Path) -> Result<AgentSettings> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    let data: AgentSettings = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse settings in {}", path.display()))?;
    data.validate()
        .with_context(|| format!("Invalid settings in {}", path.display()))?;
    Ok(data)
}

fn write_settings(path: &Path, data: &AgentSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let serialized = serde_json::to_string_pretty(data)?;
    fs::write(path, serialized)
        .with_context(|| format!("Failed to write settings to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AgentSettings::default().validate().unwrap();
        let settings = AgentSettings::default();
        assert_eq!(settings.tracking.analyzer.min_dwell_ms, 2_000);
        assert_eq!(settings.tracking.analyzer.focus_threshold_secs, 900);
        assert_eq!(settings.indexing.max_file_size_bytes, 1_048_576);
        assert_eq!(settings.indexing.reindex_threshold_secs, 86_400);
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = settings_path(dir.path());
        let store = SettingsStore::new(path.clone()).unwrap();

        assert!(path.exists());
        assert_eq!(store.get(), AgentSettings::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = settings_path(dir.path());
        fs::write(
            &path,
            r#"{"tracking":{"heartbeatSecs":5,"dayZone":{"fixedMinutes":60}}}"#,
        )
        .unwrap();

        let store = SettingsStore::new(path).unwrap();
        let tracking = store.tracking();
        assert_eq!(tracking.heartbeat_secs, 5);
        assert_eq!(tracking.day_zone, DayZone::FixedMinutes(60));
        assert_eq!(tracking.analyzer, AnalyzerConfig::default());
        assert_eq!(store.insights(), InsightConfig::default());
    }

    #[test]
    fn invalid_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = settings_path(dir.path());
        fs::write(
            &path,
            r#"{"tracking":{"analyzer":{"minDwellMs":900000,"focusThresholdSecs":900}}}"#,
        )
        .unwrap();
        assert!(SettingsStore::new(path.clone()).is_err());

        fs::write(&path, "{not json").unwrap();
        assert!(SettingsStore::new(path).is_err());
    }

    #[test]
    fn missing_project_root_is_reported_not_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let mut settings = AgentSettings::default();
        settings.indexing.project_roots = vec![dir.path().to_path_buf(), missing.clone()];

        settings.validate().unwrap();
        let unavailable: Vec<_> = settings.indexing.unavailable_roots().collect();
        assert_eq!(unavailable, vec![&missing]);
    }

    #[test]
    fn update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = settings_path(dir.path());
        let store = SettingsStore::new(path.clone()).unwrap();

        let mut settings = store.get();
        settings.indexing.scan_interval_secs = 60;
        store.update(settings.clone()).unwrap();

        let reopened = SettingsStore::new(path).unwrap();
        assert_eq!(reopened.indexing().scan_interval_secs, 60);

        let mut invalid = settings;
        invalid.insights.interval_secs = 0;
        assert!(store.update(invalid).is_err());
        assert_eq!(store.indexing().scan_interval_secs, 60);
        store.reload().unwrap();
        assert_eq!(store.get(), reopened.get());
    }
}
