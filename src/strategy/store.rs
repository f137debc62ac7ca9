// SPDX-FileCopyrightText: 2026 PANGOLIN Project Team
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Persisted per-problem results (protocol files)
//!
//! A protocol file holds `#` comment lines followed by one result record
//! per line. Syncing always rewrites the whole file (comments first, data
//! sorted by problem name) through a temp file, so a reader never sees a
//! partial snapshot.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::core::ProofResult;

/// Mapping problem name → result, with dirty tracking and an optional
/// backing file.
#[derive(Debug)]
pub struct ResultStore {
    path: Option<PathBuf>,
    comments: Vec<String>,
    results: BTreeMap<String, ProofResult>,
    dirty: bool,
}

impl ResultStore {
    /// A store with no backing file; `sync()` only clears the dirty flag.
    pub fn in_memory() -> ResultStore {
        ResultStore {
            path: None,
            comments: vec![],
            results: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Bind a store to a file, reading whatever partial contents exist.
    /// A missing file yields an empty store bound to that path.
    pub fn load(path: &Path) -> Result<ResultStore> {
        let mut store = ResultStore {
            path: Some(path.to_path_buf()),
            comments: vec![],
            results: BTreeMap::new(),
            dirty: false,
        };
        if !path.exists() {
            return Ok(store);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read protocol file {}", path.display()))?;
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if line.starts_with('#') {
                store.comments.push(line.to_string());
                continue;
            }
            match ProofResult::parse(line) {
                Ok(result) => {
                    store.results.insert(result.problem.clone(), result);
                }
                Err(e) => warn!("skipping bad line in {}: {}", path.display(), e),
            }
        }
        Ok(store)
    }

    /// Insert or overwrite the entry for the result's problem.
    pub fn add(&mut self, result: ProofResult) {
        self.results.insert(result.problem.clone(), result);
        self.dirty = true;
    }

    pub fn contains(&self, problem: &str) -> bool {
        self.results.contains_key(problem)
    }

    pub fn get(&self, problem: &str) -> Option<&ProofResult> {
        self.results.get(problem)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    /// Write the full snapshot back to the backing file. No-op unless
    /// dirty. The write goes through a temp file in the same directory and
    /// is renamed into place.
    pub fn sync(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        let Some(path) = self.path.clone() else {
            self.dirty = false;
            return Ok(());
        };
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, self.to_string())
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        self.dirty = false;
        Ok(())
    }
}

impl fmt::Display for ResultStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for comment in &self.comments {
            writeln!(f, "{}", comment)?;
        }
        for result in self.results.values() {
            writeln!(f, "{}", result)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FailureReason, ProofStatus};
    use tempfile::tempdir;

    fn result(problem: &str, status: ProofStatus, reason: FailureReason) -> ProofResult {
        ProofResult {
            problem: problem.to_string(),
            status,
            time: 1.5,
            reason,
            extras: vec![],
        }
    }

    #[test]
    fn add_marks_dirty_and_overwrites() {
        let mut store = ResultStore::in_memory();
        assert!(!store.is_dirty());
        store.add(result("p1", ProofStatus::Failure, FailureReason::MaxTime));
        assert!(store.is_dirty());
        assert_eq!(store.len(), 1);

        // Overwrite keeps the key unique.
        store.add(result("p1", ProofStatus::Theorem, FailureReason::Success));
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get("p1").map(|r| r.status),
            Some(ProofStatus::Theorem)
        );
    }

    #[test]
    fn load_parses_comments_and_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("protokoll_x");
        std::fs::write(
            &path,
            "# c\nprobA T 12.500 success\nprobB F 300.000 maxtime\n",
        )
        .unwrap();

        let store = ResultStore::load(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.comments(), ["# c"]);
        assert_eq!(
            store.get("probA").map(|r| r.status),
            Some(ProofStatus::Theorem)
        );
        assert_eq!(
            store.get("probB").map(|r| (r.status, r.reason)),
            Some((ProofStatus::Failure, FailureReason::MaxTime))
        );
    }

    #[test]
    fn sync_rewrites_sorted_with_comments_first() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("protokoll_x");
        std::fs::write(&path, "# c\n").unwrap();

        let mut store = ResultStore::load(&path).unwrap();
        store.add(result("probB", ProofStatus::Failure, FailureReason::MaxTime));
        store.add(result("probA", ProofStatus::Theorem, FailureReason::Success));
        store.sync().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "# c");
        assert!(lines[1].starts_with("probA"));
        assert!(lines[2].starts_with("probB"));

        // Round-trip: the rewritten file loads back to the same entries.
        let reloaded = ResultStore::load(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get("probA"), store.get("probA"));
    }

    #[test]
    fn sync_is_noop_when_clean() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("protokoll_x");

        let mut store = ResultStore::load(&path).unwrap();
        store.add(result("probA", ProofStatus::Theorem, FailureReason::Success));
        store.sync().unwrap();
        let modified_after_first = std::fs::metadata(&path).unwrap().modified().unwrap();

        // Second sync with nothing new must not touch the file.
        std::thread::sleep(std::time::Duration::from_millis(20));
        store.sync().unwrap();
        let modified_after_second = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(modified_after_first, modified_after_second);
    }
}
