//! Indexed project files.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_REINDEX_THRESHOLD_SECS: u64 = 86_400;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Code,
    Documentation,
    Configuration,
    Other,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Code => "code",
            FileType::Documentation => "documentation",
            FileType::Configuration => "configuration",
            FileType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentIndex {
    pub id: String,
    pub file_path: String,
    pub project_path: String,
    pub relative_path: String,
    pub file_name: String,
    pub file_extension: Option<String>,
    pub content: String,
    pub content_hash: String,
    pub line_count: u64,
    pub file_size: u64,
    pub file_type: FileType,
    pub language: Option<String>,
    pub last_modified: DateTime<Utc>,
    pub last_indexed: DateTime<Utc>,
    pub is_stale: bool,
    pub indexing_failed: bool,
    pub failure_reason: Option<String>,
}

impl ContentIndex {
    /// True when the entry was invalidated or is older than `threshold_secs`.
    pub fn needs_reindex(&self, now: DateTime<Utc>, threshold_secs: u64) -> bool {
        if self.is_stale {
            return true;
        }
        i64::try_from(threshold_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .is_some_and(|threshold| now - self.last_indexed > threshold)
    }
}

/// Strips `project_path` (and the separator after it) from `file_path`.
/// Paths outside the project are returned unchanged.
pub fn relative_path(project_path: &str, file_path: &str) -> String {
    let project = project_path.trim_end_matches('/');
    match file_path.strip_prefix(project) {
        Some(rest) if !project.is_empty() && rest.starts_with('/') => {
            rest.trim_start_matches('/').to_string()
        }
        _ => file_path.to_string(),
    }
}

/// The extension used for classification. Dotfiles such as `.gitignore` or
/// `.env` have no other dot, so the name after the leading dot is used.
pub fn file_extension(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if let Some(rest) = name.strip_prefix('.') {
        if !rest.is_empty() && !rest.contains('.') {
            return Some(rest.to_string());
        }
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(str::to_string)
}
