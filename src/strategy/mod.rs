// SPDX-FileCopyrightText: 2026 PANGOLIN Project Team
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Test strategies
//!
//! A strategy is a named prover configuration (executable, arguments, time
//! limit) over an ordered problem list, together with the results collected
//! so far. Jobs are generated lazily for whatever the store does not yet
//! cover, so interrupted runs resume from disk.

pub mod scheduler;
pub mod store;

pub use store::ResultStore;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::core::{Job, ProofResult, TimeBudget};

/// Parsed strategy spec file: `Key: value` headers, then one problem name
/// per line. Unknown header keys are hard errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategySpec {
    pub name: String,
    pub executable: String,
    pub args: String,
    pub time_limit: TimeBudget,
    pub problems: Vec<String>,
}

impl StrategySpec {
    pub fn parse(name: &str, content: &str) -> Result<StrategySpec> {
        let mut executable = "eprover".to_string();
        let mut args = String::new();
        let mut time_limit = TimeBudget::Normalized(300.0);
        let mut problems = vec![];

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once(':') {
                let (key, value) = (key.trim(), value.trim());
                match key {
                    "Executable" => executable = value.to_string(),
                    "Arguments" => args = value.to_string(),
                    "Time limit" => {
                        time_limit = TimeBudget::parse(value).ok_or_else(|| {
                            anyhow::anyhow!("bad time limit '{}' in strategy {}", value, name)
                        })?;
                    }
                    _ => bail!("unknown key '{}' in strategy {}", key, name),
                }
            } else {
                problems.push(line.to_string());
            }
        }

        Ok(StrategySpec {
            name: name.to_string(),
            executable,
            args,
            time_limit,
            problems,
        })
    }

    pub fn load(path: &Path) -> Result<StrategySpec> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unnamed")
            .to_string();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read strategy spec {}", path.display()))?;
        Self::parse(&name, &content)
    }
}

/// An activated strategy with its collected results.
#[derive(Debug)]
pub struct Strategy {
    spec: StrategySpec,
    store: ResultStore,
    last_activity: Instant,
}

impl Strategy {
    pub fn new(spec: StrategySpec, store: ResultStore) -> Strategy {
        Strategy {
            spec,
            store,
            last_activity: Instant::now(),
        }
    }

    /// Activate from disk: parse the spec file and whatever partial
    /// protocol file already exists.
    pub fn activate(spec_path: &Path, store_path: &Path) -> Result<Strategy> {
        let spec = StrategySpec::load(spec_path)?;
        let store = ResultStore::load(store_path)?;
        Ok(Strategy::new(spec, store))
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &StrategySpec {
        &self.spec
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Problems in the spec with no store entry yet, in spec order.
    pub fn find_missing(&self) -> Vec<&str> {
        self.spec
            .problems
            .iter()
            .map(String::as_str)
            .filter(|p| !self.store.contains(p))
            .collect()
    }

    /// True iff every spec problem has a store entry.
    pub fn complete(&self) -> bool {
        self.find_missing().is_empty()
    }

    /// One job per problem still missing from the store. Restartable:
    /// reflects the store's current contents on every call.
    pub fn generate_jobs(&self) -> Vec<Job> {
        self.find_missing()
            .into_iter()
            .map(|problem| Job {
                key: self.spec.name.clone(),
                executable: self.spec.executable.clone(),
                args: self.spec.args.clone(),
                problem: problem.to_string(),
                budget: self.spec.time_limit,
                extra_fields: vec![],
            })
            .collect()
    }

    /// Record a result (overwriting any previous entry for the problem)
    /// and refresh the activity timestamp.
    pub fn add_result(&mut self, result: ProofResult) {
        self.store.add(result);
        self.last_activity = Instant::now();
    }

    /// Write the store back to disk if it changed.
    pub fn sync(&mut self) -> Result<()> {
        self.store.sync()
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }
}
