// SPDX-FileCopyrightText: 2026 PANGOLIN Project Team
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Strategy queue and job generation
//!
//! The scheduler owns the master's view of test work: a queue of
//! not-yet-activated strategies, the currently active ones, and a shared
//! queue of undispatched jobs. Strategies are activated lazily, one at a
//! time, whenever the job queue runs dry.

use anyhow::Result;
use std::collections::{HashMap, VecDeque};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::core::{Job, ProofResult};
use crate::strategy::Strategy;

/// A strategy waiting to be activated.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingStrategy {
    pub name: String,
    /// Directory holding the spec file named after the strategy.
    pub spec_dir: PathBuf,
    /// Directory holding the protocol file named after the strategy.
    pub result_dir: PathBuf,
}

impl PendingStrategy {
    pub fn new(name: &str, spec_dir: &Path, result_dir: &Path) -> PendingStrategy {
        PendingStrategy {
            name: name.to_string(),
            spec_dir: spec_dir.to_path_buf(),
            result_dir: result_dir.to_path_buf(),
        }
    }

    fn spec_path(&self) -> PathBuf {
        self.spec_dir.join(&self.name)
    }

    fn store_path(&self) -> PathBuf {
        self.result_dir.join(&self.name)
    }
}

/// An active strategy together with its activation record, so it can be
/// requeued on deactivation.
#[derive(Debug)]
struct ActiveStrategy {
    origin: PendingStrategy,
    strategy: Strategy,
}

/// Queue of test strategies with lazy job generation.
#[derive(Debug, Default)]
pub struct TestSetScheduler {
    pending: VecDeque<PendingStrategy>,
    active: HashMap<String, ActiveStrategy>,
    queue: VecDeque<Job>,
}

impl TestSetScheduler {
    pub fn new() -> TestSetScheduler {
        TestSetScheduler::default()
    }

    /// Queue a strategy at the back.
    pub fn add_strat(&mut self, pending: PendingStrategy) {
        self.pending.push_back(pending);
    }

    /// Queue a strategy at the front, ahead of everything pending.
    pub fn sneak_strat(&mut self, pending: PendingStrategy) {
        self.pending.push_front(pending);
    }

    /// Pop the next undispatched job, activating pending strategies one at
    /// a time until a job is available or the pending queue is exhausted.
    pub fn next_job(&mut self) -> Option<Job> {
        loop {
            if let Some(job) = self.queue.pop_front() {
                return Some(job);
            }
            let pending = self.pending.pop_front()?;
            match Strategy::activate(&pending.spec_path(), &pending.store_path()) {
                Ok(strategy) => {
                    if strategy.complete() {
                        info!("strategy {} is already complete", pending.name);
                        continue;
                    }
                    info!(
                        "activated strategy {} ({} problems open)",
                        pending.name,
                        strategy.find_missing().len()
                    );
                    self.queue.extend(strategy.generate_jobs());
                    self.active.insert(
                        pending.name.clone(),
                        ActiveStrategy {
                            origin: pending,
                            strategy,
                        },
                    );
                }
                Err(e) => warn!("cannot activate strategy {}: {:#}", pending.name, e),
            }
        }
    }

    /// Route a result to the active strategy of that name. Completing a
    /// strategy syncs and retires it. Returns false (and discards the
    /// result) if the name is unrecognized.
    pub fn add_result(&mut self, name: &str, result: ProofResult) -> bool {
        let Some(active) = self.active.get_mut(name) else {
            return false;
        };
        active.strategy.add_result(result);
        if active.strategy.complete() {
            if let Err(e) = active.strategy.sync() {
                warn!("sync of completed strategy {} failed: {:#}", name, e);
            }
            self.active.remove(name);
            info!("strategy {} complete", name);
        }
        true
    }

    /// Deactivate an active strategy: prune its undispatched jobs, sync its
    /// store, and requeue it (front or back) unless it is complete.
    pub fn deactivate_strat(&mut self, name: &str, requeue_front: bool) {
        let Some(mut active) = self.active.remove(name) else {
            return;
        };
        self.queue.retain(|job| job.key != name);
        if let Err(e) = active.strategy.sync() {
            warn!("sync of deactivated strategy {} failed: {:#}", name, e);
        }
        if !active.strategy.complete() {
            if requeue_front {
                self.pending.push_front(active.origin);
            } else {
                self.pending.push_back(active.origin);
            }
        }
    }

    /// Drop the entire undispatched job queue. Active strategies and stored
    /// results are untouched; dropped jobs regenerate on reactivation.
    pub fn purge_jobs(&mut self) -> usize {
        let dropped = self.queue.len();
        self.queue.clear();
        dropped
    }

    /// Names of active strategies idle longer than `timeout`.
    pub fn stale_strategies(&self, timeout: Duration) -> Vec<String> {
        self.active
            .iter()
            .filter(|(_, a)| a.strategy.idle_for() > timeout)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Sync every active strategy's store to disk.
    pub fn sync_all(&mut self) -> Result<()> {
        for active in self.active.values_mut() {
            active.strategy.sync()?;
        }
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn queued_jobs(&self) -> usize {
        self.queue.len()
    }

    /// Human-readable status for the control channel.
    pub fn status_dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "strategies: {} active, {} pending, {} queued jobs",
            self.active.len(),
            self.pending.len(),
            self.queue.len()
        );
        for (name, active) in &self.active {
            let total = active.strategy.spec().problems.len();
            let done = total - active.strategy.find_missing().len();
            let _ = writeln!(out, "  active  {} {}/{}", name, done, total);
        }
        for pending in &self.pending {
            let _ = writeln!(out, "  pending {}", pending.name);
        }
        out.trim_end().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FailureReason, ProofStatus};
    use tempfile::tempdir;

    fn write_spec(dir: &std::path::Path, name: &str, problems: &[&str]) {
        let mut content = String::from("Executable: eprover\nArguments: --auto\nTime limit: 300\n");
        for p in problems {
            content.push_str(p);
            content.push('\n');
        }
        std::fs::write(dir.join(name), content).unwrap();
    }

    fn result(problem: &str) -> ProofResult {
        ProofResult {
            problem: problem.to_string(),
            status: ProofStatus::Theorem,
            time: 0.5,
            reason: FailureReason::Success,
            extras: vec![],
        }
    }

    fn scheduler_with(names: &[(&str, &[&str])]) -> (TestSetScheduler, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let spec_dir = dir.path().join("specs");
        let result_dir = dir.path().join("results");
        std::fs::create_dir_all(&spec_dir).unwrap();
        std::fs::create_dir_all(&result_dir).unwrap();
        let mut scheduler = TestSetScheduler::new();
        for (name, problems) in names {
            write_spec(&spec_dir, name, problems);
            scheduler.add_strat(PendingStrategy::new(name, &spec_dir, &result_dir));
        }
        (scheduler, dir)
    }

    #[test]
    fn activation_is_lazy_and_ordered() {
        let (mut scheduler, _dir) =
            scheduler_with(&[("strat_a", &["p1", "p2"]), ("strat_b", &["q1"])]);
        assert_eq!(scheduler.active_count(), 0);

        let first = scheduler.next_job().unwrap();
        assert_eq!(first.key, "strat_a");
        // Only the first strategy was activated to satisfy the pop.
        assert_eq!(scheduler.active_count(), 1);
        assert_eq!(scheduler.pending_count(), 1);

        scheduler.next_job().unwrap();
        let third = scheduler.next_job().unwrap();
        assert_eq!(third.key, "strat_b");
        assert_eq!(scheduler.active_count(), 2);
        assert!(scheduler.next_job().is_none());
    }

    #[test]
    fn unknown_result_names_are_rejected() {
        let (mut scheduler, _dir) = scheduler_with(&[("strat_a", &["p1"])]);
        scheduler.next_job().unwrap();
        assert!(!scheduler.add_result("nonesuch", result("p1")));
        assert!(scheduler.add_result("strat_a", result("p1")));
    }

    #[test]
    fn completion_retires_and_syncs() {
        let (mut scheduler, dir) = scheduler_with(&[("strat_a", &["p1", "p2"])]);
        scheduler.next_job().unwrap();
        scheduler.next_job().unwrap();

        scheduler.add_result("strat_a", result("p1"));
        assert_eq!(scheduler.active_count(), 1);
        scheduler.add_result("strat_a", result("p2"));
        assert_eq!(scheduler.active_count(), 0);

        let written = std::fs::read_to_string(dir.path().join("results/strat_a")).unwrap();
        assert_eq!(written.lines().count(), 2);
    }

    #[test]
    fn deactivation_prunes_and_requeues() {
        let (mut scheduler, _dir) =
            scheduler_with(&[("strat_a", &["p1", "p2", "p3"]), ("strat_b", &["q1"])]);
        scheduler.next_job().unwrap();
        assert_eq!(scheduler.queued_jobs(), 2);

        scheduler.deactivate_strat("strat_a", false);
        assert_eq!(scheduler.active_count(), 0);
        assert_eq!(scheduler.queued_jobs(), 0);
        // Requeued at the back: strat_b activates first now.
        assert_eq!(scheduler.next_job().unwrap().key, "strat_b");
    }

    #[test]
    fn deactivation_to_front_takes_priority() {
        let (mut scheduler, _dir) =
            scheduler_with(&[("strat_a", &["p1"]), ("strat_b", &["q1"])]);
        scheduler.next_job().unwrap();
        scheduler.deactivate_strat("strat_a", true);
        assert_eq!(scheduler.next_job().unwrap().key, "strat_a");
    }

    #[test]
    fn resumed_strategy_skips_stored_problems() {
        let dir = tempdir().unwrap();
        let spec_dir = dir.path().join("specs");
        let result_dir = dir.path().join("results");
        std::fs::create_dir_all(&spec_dir).unwrap();
        std::fs::create_dir_all(&result_dir).unwrap();
        write_spec(&spec_dir, "strat_a", &["p1", "p2", "p3"]);
        std::fs::write(result_dir.join("strat_a"), "p2 T 1.000 success\n").unwrap();

        let mut scheduler = TestSetScheduler::new();
        scheduler.add_strat(PendingStrategy::new("strat_a", &spec_dir, &result_dir));

        let mut problems = vec![];
        while let Some(job) = scheduler.next_job() {
            problems.push(job.problem);
        }
        assert_eq!(problems, vec!["p1", "p3"]);
    }

    #[test]
    fn purge_drops_queue_only() {
        let (mut scheduler, _dir) = scheduler_with(&[("strat_a", &["p1", "p2", "p3"])]);
        scheduler.next_job().unwrap();
        assert_eq!(scheduler.purge_jobs(), 2);
        assert_eq!(scheduler.queued_jobs(), 0);
        assert_eq!(scheduler.active_count(), 1);
        // Results still route to the active strategy.
        assert!(scheduler.add_result("strat_a", result("p1")));
    }

    #[test]
    fn missing_spec_file_is_skipped() {
        let dir = tempdir().unwrap();
        let mut scheduler = TestSetScheduler::new();
        scheduler.add_strat(PendingStrategy::new("missing", dir.path(), dir.path()));
        assert!(scheduler.next_job().is_none());
        assert_eq!(scheduler.active_count(), 0);
    }
}
