//! Block and allow lists shared by every call.
//!
//! Both lists live in one immutable [`ListSnapshot`] behind a read-write lock.
//! Lookups clone the current `Arc` under the read lock and search without
//! holding it. A reload parses every file with no lock held and only takes
//! the write lock to swap the new snapshot in, so a lookup sees either the
//! old lists or the new ones, never a mix.

use crate::error::LoadError;
use crate::loader::{self, ListMatch, NumberListSet, ParseWarning};
use crate::stats::StatsAggregator;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct ListSnapshot {
    pub block: NumberListSet,
    pub allow: NumberListSet,
}

/// Outcome of a single lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Found on the allow list; block lists were not consulted.
    Whitelisted(ListMatch),
    Blocked(ListMatch),
    NotListed,
}

impl Verdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Verdict::Blocked(_))
    }

    pub fn on_allow_list(&self) -> bool {
        matches!(self, Verdict::Whitelisted(_))
    }

    pub fn matched(&self) -> Option<&ListMatch> {
        match self {
            Verdict::Whitelisted(m) | Verdict::Blocked(m) => Some(m),
            Verdict::NotListed => None,
        }
    }

    pub fn source(&self) -> Option<&str> {
        self.matched().map(|m| m.source.as_str())
    }

    pub fn line(&self) -> Option<usize> {
        self.matched().map(|m| m.line)
    }

    pub fn comment(&self) -> Option<&str> {
        self.matched().map(|m| m.comment.as_str())
    }
}

/// Summary of a successful reload.
#[derive(Debug, Default)]
pub struct ReloadReport {
    pub block_tables: usize,
    pub block_entries: usize,
    pub allow_tables: usize,
    pub allow_entries: usize,
    pub warnings: Vec<ParseWarning>,
}

pub struct NumberListStore {
    lists: RwLock<Arc<ListSnapshot>>,
    loader: Mutex<()>,
    stats: Arc<StatsAggregator>,
}

impl NumberListStore {
    /// Empty store; every lookup comes back `NotListed` until the first reload.
    pub fn new(stats: Arc<StatsAggregator>) -> Self {
        Self::with_lists(NumberListSet::default(), NumberListSet::default(), stats)
    }

    pub fn with_lists(
        block: NumberListSet,
        allow: NumberListSet,
        stats: Arc<StatsAggregator>,
    ) -> Self {
        Self {
            lists: RwLock::new(Arc::new(ListSnapshot { block, allow })),
            loader: Mutex::new(()),
            stats,
        }
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    /// The lists currently in use.
    pub fn snapshot(&self) -> Arc<ListSnapshot> {
        match self.lists.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Re-read both lists and install them together. Concurrent reloads queue
    /// on the loader lock. On error nothing is installed.
    pub fn reload<B, A>(&self, block_paths: &[B], allow_paths: &[A]) -> Result<ReloadReport, LoadError>
    where
        B: AsRef<Path>,
        A: AsRef<Path>,
    {
        let _loader = self.loader.lock().unwrap_or_else(|p| p.into_inner());

        let block = loader::load(block_paths)?;
        let allow = loader::load(allow_paths)?;

        let mut warnings = block.warnings;
        warnings.extend(allow.warnings);
        let report = ReloadReport {
            block_tables: block.set.tables().len(),
            block_entries: block.set.entry_count(),
            allow_tables: allow.set.tables().len(),
            allow_entries: allow.set.entry_count(),
            warnings,
        };

        let fresh = Arc::new(ListSnapshot {
            block: block.set,
            allow: allow.set,
        });
        let previous = {
            let mut guard = self.lists.write().unwrap_or_else(|p| p.into_inner());
            std::mem::replace(&mut *guard, fresh)
        };
        // Old tables are freed outside the write lock
        drop(previous);

        log::info!(
            "Lists loaded: {} block entries in {} files, {} allow entries in {} files, {} warnings",
            report.block_entries,
            report.block_tables,
            report.allow_entries,
            report.allow_tables,
            report.warnings.len()
        );
        Ok(report)
    }

    /// Classify a normalized caller id. The allow list wins over the block
    /// list. The time spent is recorded once in the stats.
    pub fn lookup(&self, number: &str) -> Verdict {
        let start = Instant::now();
        let lists = self.snapshot();

        if let Some(found) = lists.allow.find(number) {
            self.stats.add_whitelisted(start.elapsed());
            return Verdict::Whitelisted(found);
        }

        if let Some(found) = lists.block.find(number) {
            self.stats.add_blocked(start.elapsed());
            return Verdict::Blocked(found);
        }

        self.stats.add_allowed(start.elapsed());
        Verdict::NotListed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn store() -> NumberListStore {
        NumberListStore::new(Arc::new(StatsAggregator::new()))
    }

    const NONE: &[PathBuf] = &[];

    #[test]
    fn test_round_trip_with_provenance() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "block.txt", "+15551234567 # reason\n");
        let store = store();
        store.reload(&[&path], NONE).unwrap();

        let verdict = store.lookup("+15551234567");
        assert!(verdict.is_blocked());
        assert_eq!(verdict.comment(), Some("reason"));
        assert_eq!(verdict.line(), Some(1));
        assert_eq!(verdict.source(), Some(path.display().to_string().as_str()));
    }

    #[test]
    fn test_allow_list_takes_precedence() {
        let dir = TempDir::new().unwrap();
        let block = write(&dir, "block.txt", "+441111 # spam\n");
        let allow = write(&dir, "allow.txt", "+441111 # my gp\n");
        let store = store();
        store.reload(&[&block], &[&allow]).unwrap();

        let verdict = store.lookup("+441111");
        assert!(verdict.on_allow_list());
        assert!(!verdict.is_blocked());
        assert_eq!(verdict.comment(), Some("my gp"));

        let summary = store.stats().snapshot();
        assert_eq!(summary.whitelisted, 1);
        assert_eq!(summary.blocked, 0);
    }

    #[test]
    fn test_lookup_records_each_outcome_once() {
        let dir = TempDir::new().unwrap();
        let block = write(&dir, "block.txt", "+1\n");
        let allow = write(&dir, "allow.txt", "+2\n");
        let store = store();
        store.reload(&[&block], &[&allow]).unwrap();

        assert_eq!(store.lookup("+1").source(), Some(block.display().to_string().as_str()));
        store.lookup("+2");
        store.lookup("+3");
        store.lookup("+3");

        let summary = store.stats().snapshot();
        assert_eq!((summary.blocked, summary.whitelisted, summary.allowed), (1, 1, 2));
    }

    #[test]
    fn test_reload_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let block = write(&dir, "block.txt", "+1 # a\n+2 # b\n0300 # bare\n");
        let store = store();
        let probes = ["+1", "+2", "0300", "+3"];

        store.reload(&[&block], NONE).unwrap();
        let before: Vec<Verdict> = probes.iter().map(|p| store.lookup(p)).collect();
        store.reload(&[&block], NONE).unwrap();
        let after: Vec<Verdict> = probes.iter().map(|p| store.lookup(p)).collect();

        assert_eq!(before, after);
    }

    #[test]
    fn test_failed_reload_keeps_previous_lists() {
        let dir = TempDir::new().unwrap();
        let block = write(&dir, "block.txt", "+1\n");
        let store = store();
        store.reload(&[&block], NONE).unwrap();

        // Block side fine, allow side missing: nothing may be installed
        let replacement = write(&dir, "other.txt", "+9\n");
        let missing = dir.path().join("nope");
        assert!(store.reload(&[&replacement], &[&missing]).is_err());

        assert!(store.lookup("+1").is_blocked());
        assert_eq!(store.lookup("+9"), Verdict::NotListed);
    }

    #[test]
    fn test_reload_report_counts() {
        let dir = TempDir::new().unwrap();
        let block = write(&dir, "block.txt", "+1\n+1\n2\n");
        let allow = write(&dir, "allow.txt", "+3\n");
        let store = store();

        let report = store.reload(&[&block], &[&allow]).unwrap();
        assert_eq!(report.block_tables, 1);
        assert_eq!(report.block_entries, 2);
        assert_eq!(report.allow_entries, 1);
        assert_eq!(report.warnings.len(), 2);
    }

    #[test]
    fn test_reload_swap_is_atomic() {
        // Snapshot A: a.txt holds +1..+50. Snapshot B: b.txt holds +25..+75.
        let dir = TempDir::new().unwrap();
        let a_content: String = (1..=50).map(|n| format!("+{n}\n")).collect();
        let b_content: String = (25..=75).map(|n| format!("+{n}\n")).collect();
        let a = write(&dir, "a.txt", &a_content);
        let b = write(&dir, "b.txt", &b_content);
        let a_name = a.display().to_string();
        let b_name = b.display().to_string();

        let store = Arc::new(store());
        store.reload(&[&a], NONE).unwrap();
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                let done = done.clone();
                let (a_name, b_name) = (a_name.clone(), b_name.clone());
                std::thread::spawn(move || {
                    let mut checked = 0u64;
                    while !done.load(Ordering::Relaxed) || checked < 2000 {
                        let lists = store.snapshot();
                        let sources: Vec<&str> =
                            lists.block.tables().iter().map(|t| t.source.as_str()).collect();
                        assert!(
                            sources == [a_name.as_str()] || sources == [b_name.as_str()],
                            "mixed snapshot: {sources:?}"
                        );

                        let n = checked % 80;
                        let verdict = store.lookup(&format!("+{n}"));
                        let explained_by_a = if (1..=50).contains(&n) {
                            verdict.source() == Some(a_name.as_str())
                        } else {
                            verdict == Verdict::NotListed
                        };
                        let explained_by_b = if (25..=75).contains(&n) {
                            verdict.source() == Some(b_name.as_str())
                        } else {
                            verdict == Verdict::NotListed
                        };
                        assert!(explained_by_a || explained_by_b, "+{n} -> {verdict:?}");
                        checked += 1;
                    }
                })
            })
            .collect();

        for i in 0..200 {
            let next = if i % 2 == 0 { &b } else { &a };
            store.reload(&[next], NONE).unwrap();
        }
        done.store(true, Ordering::Relaxed);

        for reader in readers {
            reader.join().unwrap();
        }
    }
}
