//! File-system notifications that point rescans at the projects that changed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::settings::IndexingSettings;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Maps changed paths to the project roots they belong to, ignoring `.git`
/// internals and paths under the configured exclude globs.
pub struct ChangeFilter {
    roots: Vec<(PathBuf, Gitignore)>,
}

impl ChangeFilter {
    pub fn new(roots: &[PathBuf], exclude_globs: &[String]) -> Result<Self> {
        let mut matchers = Vec::with_capacity(roots.len());
        for root in roots {
            let mut builder = GitignoreBuilder::new(root);
            builder
                .add_line(None, ".git/")
                .context("failed to build change filter")?;
            for glob in exclude_globs {
                builder
                    .add_line(None, glob)
                    .with_context(|| format!("invalid exclude pattern {glob}"))?;
            }
            let matcher = builder.build().context("failed to build change filter")?;
            matchers.push((root.clone(), matcher));
        }
        Ok(Self { roots: matchers })
    }

    /// Roots containing at least one relevant path, in configuration order.
    pub fn affected_roots<'a>(&self, paths: impl IntoIterator<Item = &'a Path>) -> Vec<PathBuf> {
        let paths: Vec<&Path> = paths.into_iter().collect();
        self.roots
            .iter()
            .filter(|(root, matcher)| {
                paths.iter().any(|path| {
                    path.starts_with(root)
                        && !matcher
                            .matched_path_or_any_parents(path, path.is_dir())
                            .is_ignore()
                })
            })
            .map(|(root, _)| root.clone())
            .collect()
    }
}

fn is_content_change(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

/// Watches every available project root recursively and sends the root of
/// each relevant change to `changed_roots`. Dropping it stops the watch.
pub struct ProjectWatcher {
    _watcher: RecommendedWatcher,
    watched: Vec<PathBuf>,
}

impl ProjectWatcher {
    pub fn start(
        settings: &IndexingSettings,
        changed_roots: mpsc::UnboundedSender<PathBuf>,
    ) -> Result<Self> {
        let filter = ChangeFilter::new(&settings.project_roots, &settings.exclude_globs)?;

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) if is_content_change(&event.kind) => {
                    for root in filter.affected_roots(event.paths.iter().map(PathBuf::as_path)) {
                        if changed_roots.send(root).is_err() {
                            log_debug!("change receiver gone, dropping event");
                            return;
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => log_warn!("file watcher error: {err}"),
            },
            Config::default(),
        )
        .context("failed to create file watcher")?;

        let mut watched = Vec::new();
        for root in &settings.project_roots {
            if !root.is_dir() {
                log_warn!("not watching {}: not a directory", root.display());
                continue;
            }
            match watcher.watch(root, RecursiveMode::Recursive) {
                Ok(()) => {
                    log_info!("watching {}", root.display());
                    watched.push(root.clone());
                }
                Err(err) => log_warn!("failed to watch {}: {err}", root.display()),
            }
        }

        Ok(Self {
            _watcher: watcher,
            watched,
        })
    }

    pub fn watched(&self) -> &[PathBuf] {
        &self.watched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn maps_changes_to_their_roots() {
        let dir = tempfile::tempdir().unwrap();
        let app = dir.path().join("app");
        let lib = dir.path().join("lib");
        fs::create_dir_all(app.join("src")).unwrap();
        fs::create_dir_all(lib.join("target/debug")).unwrap();

        let filter = ChangeFilter::new(&[app.clone(), lib.clone()], &["target/".into()]).unwrap();

        let changed = [app.join("src/main.rs")];
        assert_eq!(
            filter.affected_roots(changed.iter().map(PathBuf::as_path)),
            vec![app.clone()]
        );

        let noise = [
            lib.join("target/debug/out.o"),
            app.join(".git/index"),
            dir.path().join("elsewhere.txt"),
        ];
        assert!(filter.affected_roots(noise.iter().map(PathBuf::as_path)).is_empty());

        let both = [lib.join("README.md"), app.join("Cargo.toml")];
        assert_eq!(
            filter.affected_roots(both.iter().map(PathBuf::as_path)),
            vec![app, lib]
        );
    }

    #[test]
    fn invalid_exclude_glob_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ChangeFilter::new(&[dir.path().to_path_buf()], &["a[".into()]).is_err());
    }

    #[test]
    fn watches_only_available_roots() {
        let dir = tempfile::tempdir().unwrap();
        let settings = IndexingSettings {
            project_roots: vec![dir.path().to_path_buf(), dir.path().join("missing")],
            ..IndexingSettings::default()
        };
        let (tx, _rx) = mpsc::unbounded_channel();

        let watcher = ProjectWatcher::start(&settings, tx).unwrap();
        assert_eq!(watcher.watched(), [dir.path().to_path_buf()]);
    }
}
