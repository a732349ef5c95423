use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    db::{
        models::content_index::{file_extension, relative_path},
        ContentIndex, Database,
    },
    settings::IndexingSettings,
};

use super::{
    classify::{file_type_for, is_known_binary, language_for},
    fingerprint::{content_hash, line_count},
    source::{FileEntry, FileSource},
};

/// Bytes inspected for a NUL when deciding whether a file is binary.
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Indexed,
    Unchanged,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScanSummary {
    pub files_seen: u64,
    pub indexed: u64,
    pub unchanged: u64,
    pub skipped: u64,
    pub failed: u64,
    pub marked_stale: u64,
}

impl ScanSummary {
    fn count(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Indexed => self.indexed += 1,
            FileOutcome::Unchanged => self.unchanged += 1,
            FileOutcome::Skipped => self.skipped += 1,
            FileOutcome::Failed => self.failed += 1,
        }
    }

    fn merge(&mut self, other: &ScanSummary) {
        self.files_seen += other.files_seen;
        self.indexed += other.indexed;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.marked_stale += other.marked_stale;
    }
}

enum Loaded {
    Text { content: String, hash: String },
    Binary,
    Unreadable(String),
}

/// Keeps `content_index` in sync with the configured project roots.
#[derive(Clone)]
pub struct ContentIndexer {
    db: Database,
    source: Arc<dyn FileSource>,
    settings: IndexingSettings,
    cancel: CancellationToken,
}

impl ContentIndexer {
    pub fn new(db: Database, source: Arc<dyn FileSource>, settings: IndexingSettings) -> Self {
        Self {
            db,
            source,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Scans stop between files once `cancel` fires.
    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn settings(&self) -> &IndexingSettings {
        &self.settings
    }

    /// Scans every configured root.
    pub async fn scan_all(&self, now: DateTime<Utc>) -> Result<ScanSummary> {
        self.scan_roots(&self.settings.project_roots, now).await
    }

    /// Scans `roots`. A root that cannot be listed is logged and skipped;
    /// store errors and cancellation abort the scan.
    pub async fn scan_roots(&self, roots: &[PathBuf], now: DateTime<Utc>) -> Result<ScanSummary> {
        let mut total = ScanSummary::default();
        for root in roots {
            match self.list(root).await {
                Ok(files) => {
                    let summary = self.scan_files(root, files, now).await?;
                    total.merge(&summary);
                }
                Err(err) => warn!("Skipping project {}: {err:#}", root.display()),
            }
        }
        info!(
            "Scan finished: {} seen, {} indexed, {} unchanged, {} skipped, {} failed, {} stale",
            total.files_seen,
            total.indexed,
            total.unchanged,
            total.skipped,
            total.failed,
            total.marked_stale
        );
        Ok(total)
    }

    /// Explicit invalidation; the next scan re-reads the file.
    pub async fn mark_stale(&self, file_path: &Path) -> Result<bool> {
        self.db
            .mark_content_stale(&file_path.to_string_lossy())
            .await
    }

    pub async fn index_file(
        &self,
        project_root: &Path,
        file: &FileEntry,
        now: DateTime<Utc>,
    ) -> Result<FileOutcome> {
        let extension = file_extension(&file.path);
        if file.size > self.settings.max_file_size_bytes || is_known_binary(extension.as_deref())
        {
            return self.skip(&file.path).await;
        }

        let file_path = file.path.to_string_lossy().into_owned();
        let project_path = project_root.to_string_lossy().into_owned();

        let (content, hash) = match self.load(&file.path).await? {
            Loaded::Text { content, hash } => (content, hash),
            Loaded::Binary => return self.skip(&file.path).await,
            Loaded::Unreadable(reason) => {
                self.record_failure(&project_path, &file_path, file, &reason, now)
                    .await?;
                return Ok(FileOutcome::Failed);
            }
        };

        let existing = self.db.get_content_index(&file_path).await?;
        if let Some(entry) = &existing {
            if entry.content_hash == hash
                && !entry.indexing_failed
                && !entry.needs_reindex(now, self.settings.reindex_threshold_secs)
            {
                return Ok(FileOutcome::Unchanged);
            }
        }

        let entry = ContentIndex {
            id: existing
                .map(|entry| entry.id)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            relative_path: relative_path(&project_path, &file_path),
            file_name: file_name(&file.path),
            file_type: file_type_for(extension.as_deref()),
            language: language_for(extension.as_deref()).map(str::to_string),
            file_extension: extension,
            line_count: line_count(&content),
            content,
            content_hash: hash,
            file_size: file.size,
            last_modified: file.modified,
            last_indexed: now,
            is_stale: false,
            indexing_failed: false,
            failure_reason: None,
            file_path,
            project_path,
        };
        self.db.upsert_content_index(&entry).await?;
        Ok(FileOutcome::Indexed)
    }

    async fn scan_files(
        &self,
        root: &Path,
        files: Vec<FileEntry>,
        now: DateTime<Utc>,
    ) -> Result<ScanSummary> {
        let mut summary = ScanSummary::default();
        let mut seen = HashSet::with_capacity(files.len());

        for file in &files {
            if self.cancel.is_cancelled() {
                bail!("scan of {} cancelled", root.display());
            }
            summary.files_seen += 1;
            seen.insert(file.path.to_string_lossy().into_owned());
            let outcome = self
                .index_file(root, file, now)
                .await
                .with_context(|| format!("failed to index {}", file.path.display()))?;
            summary.count(outcome);
        }

        summary.marked_stale = self
            .db
            .mark_unseen_stale(&root.to_string_lossy(), seen)
            .await?;
        Ok(summary)
    }

    /// An entry left from when the file was indexable stays queryable but is
    /// flagged stale.
    async fn skip(&self, path: &Path) -> Result<FileOutcome> {
        self.db.mark_content_stale(&path.to_string_lossy()).await?;
        Ok(FileOutcome::Skipped)
    }

    async fn list(&self, root: &Path) -> Result<Vec<FileEntry>> {
        let source = self.source.clone();
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || source.list_files(&root))
            .await
            .context("file listing task panicked")?
    }

    async fn load(&self, path: &Path) -> Result<Loaded> {
        let source = self.source.clone();
        let path = path.to_path_buf();
        let loaded = tokio::task::spawn_blocking(move || match source.read(&path) {
            Ok(bytes) => {
                let sniff = &bytes[..bytes.len().min(BINARY_SNIFF_BYTES)];
                if sniff.contains(&0) {
                    return Loaded::Binary;
                }
                let hash = content_hash(&bytes);
                match String::from_utf8(bytes) {
                    Ok(content) => Loaded::Text { content, hash },
                    Err(_) => Loaded::Binary,
                }
            }
            Err(err) => Loaded::Unreadable(format!("{err:#}")),
        })
        .await
        .context("file read task panicked")?;
        Ok(loaded)
    }

    /// Flags the existing entry, keeping its last good content. A path seen
    /// for the first time gets an empty, stale failure row.
    async fn record_failure(
        &self,
        project_path: &str,
        file_path: &str,
        file: &FileEntry,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        warn!("Indexing failed for {file_path}: {reason}");
        if self.db.mark_index_failure(file_path, reason).await? {
            return Ok(());
        }

        let extension = file_extension(&file.path);
        let entry = ContentIndex {
            id: uuid::Uuid::new_v4().to_string(),
            file_path: file_path.to_string(),
            project_path: project_path.to_string(),
            relative_path: relative_path(project_path, file_path),
            file_name: file_name(&file.path),
            file_type: file_type_for(extension.as_deref()),
            language: language_for(extension.as_deref()).map(str::to_string),
            file_extension: extension,
            content: String::new(),
            content_hash: String::new(),
            line_count: 0,
            file_size: file.size,
            last_modified: file.modified,
            last_indexed: now,
            is_stale: true,
            indexing_failed: true,
            failure_reason: Some(reason.to_string()),
        };
        self.db.upsert_content_index(&entry).await
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
