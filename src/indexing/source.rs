//! Enumerating and reading project files.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use ignore::{overrides::OverrideBuilder, WalkBuilder};
use log::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub path: PathBuf,
    pub size: u64,
    pub modified: DateTime<Utc>,
}

/// Read-only access to project files. Implementations may block; callers
/// run them on the blocking pool.
pub trait FileSource: Send + Sync {
    fn list_files(&self, root: &Path) -> Result<Vec<FileEntry>>;
    fn read(&self, path: &Path) -> Result<Vec<u8>>;
}

/// Walks the real file system. Honors `.gitignore` files (inside or outside
/// a git repository) plus the configured exclude globs, and always skips the
/// `.git` directory. Hidden files are included.
#[derive(Debug, Clone, Default)]
pub struct DiskFileSource {
    exclude_globs: Vec<String>,
}

impl DiskFileSource {
    pub fn new(exclude_globs: Vec<String>) -> Self {
        Self { exclude_globs }
    }

    fn walker(&self, root: &Path) -> Result<ignore::Walk> {
        let mut builder = WalkBuilder::new(root);
        builder.hidden(false).require_git(false);

        if !self.exclude_globs.is_empty() {
            let mut overrides = OverrideBuilder::new(root);
            for glob in &self.exclude_globs {
                overrides
                    .add(&format!("!{glob}"))
                    .with_context(|| format!("invalid exclude pattern {glob}"))?;
            }
            builder.overrides(overrides.build().context("failed to build exclude patterns")?);
        }

        builder.filter_entry(|entry| {
            !(entry.file_name() == ".git" && entry.file_type().is_some_and(|ft| ft.is_dir()))
        });
        Ok(builder.build())
    }
}

impl FileSource for DiskFileSource {
    fn list_files(&self, root: &Path) -> Result<Vec<FileEntry>> {
        if !root.is_dir() {
            bail!("project root {} is not a directory", root.display());
        }

        let mut files = Vec::new();
        for result in self.walker(root)? {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry under {}: {err}", root.display());
                    continue;
                }
            };
            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!("Skipping {}: {err}", entry.path().display());
                    continue;
                }
            };
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            files.push(FileEntry {
                path: entry.into_path(),
                size: metadata.len(),
                modified,
            });
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(files: &[FileEntry], root: &Path) -> Vec<String> {
        files
            .iter()
            .map(|file| {
                file.path
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn lists_files_respecting_gitignore_and_excludes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("src")).unwrap();
        fs::create_dir_all(root.join("node_modules/lib")).unwrap();
        fs::create_dir_all(root.join("target")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::write(root.join("src/main.rs"), "fn main() {}\n").unwrap();
        fs::write(root.join("node_modules/lib/index.js"), "x").unwrap();
        fs::write(root.join("target/out.txt"), "x").unwrap();
        fs::write(root.join(".git/HEAD"), "ref").unwrap();
        fs::write(root.join(".gitignore"), "target/\n").unwrap();

        let source = DiskFileSource::new(vec!["node_modules/".into()]);
        let files = source.list_files(root).unwrap();

        assert_eq!(names(&files, root), vec![".gitignore", "src/main.rs"]);
        assert_eq!(files[1].size, 13);
    }

    #[test]
    fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = DiskFileSource::default();
        assert!(source.list_files(&dir.path().join("missing")).is_err());
    }

    #[test]
    fn invalid_glob_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let source = DiskFileSource::new(vec!["a[".into()]);
        assert!(source.list_files(dir.path()).is_err());
    }
}
