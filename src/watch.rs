//! Reload trigger driven by file system notifications.

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Calls `on_change` whenever a configured list file or anything under a
/// configured list directory is created, modified or removed. The callback
/// runs on the watcher's own thread. Dropping the watcher stops it.
pub struct ListWatcher {
    _watcher: RecommendedWatcher,
}

impl ListWatcher {
    pub fn start<P, F>(paths: &[P], on_change: F) -> notify::Result<Self>
    where
        P: AsRef<Path>,
        F: Fn() + Send + 'static,
    {
        let mut targets = Vec::with_capacity(paths.len());
        let mut watched: BTreeMap<PathBuf, RecursiveMode> = BTreeMap::new();
        for path in paths {
            let path = path.as_ref().canonicalize()?;
            if path.is_dir() {
                watched.insert(path.clone(), RecursiveMode::Recursive);
            } else if let Some(parent) = path.parent() {
                // Files are watched through their directory so that a file
                // replaced by rename keeps being tracked
                watched
                    .entry(parent.to_path_buf())
                    .or_insert(RecursiveMode::NonRecursive);
            }
            targets.push(path);
        }

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            match result {
                Ok(event) => {
                    if is_list_change(&event, &targets) {
                        log::debug!("List change: {:?} {:?}", event.kind, event.paths);
                        on_change();
                    }
                }
                Err(e) => log::warn!("List watcher error: {}", e),
            }
        })?;

        for (path, mode) in &watched {
            watcher.watch(path, *mode)?;
            log::info!("Watching {} for list changes", path.display());
        }

        Ok(ListWatcher { _watcher: watcher })
    }
}

fn is_list_change(event: &Event, targets: &[PathBuf]) -> bool {
    let relevant_kind = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    relevant_kind
        && event
            .paths
            .iter()
            .any(|changed| targets.iter().any(|target| changed.starts_with(target)))
}
