// SPDX-FileCopyrightText: 2026 PANGOLIN Project Team
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Daemon configuration files
//!
//! Both daemons are configured through plain `Key: value` files. Unknown
//! keys are hard errors so that typos in a config never pass silently.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::core::REFERENCE_MARK;

/// Default TCP port a slave listens on for job records.
pub const DEFAULT_SLAVE_PORT: u16 = 26841;

/// Default UDP port a master listens on for announces.
pub const DEFAULT_ANNOUNCE_PORT: u16 = 26842;

/// Default TCP port a master accepts slave connections on.
pub const DEFAULT_MASTER_SLAVE_PORT: u16 = 26843;

/// Default TCP port for the operator control channel.
pub const DEFAULT_CONTROL_PORT: u16 = 26844;

/// Configuration for a slave daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlaveConfig {
    /// TCP port to accept job records on.
    pub port: u16,
    /// Name announced to masters.
    pub name: String,
    /// Directory holding prover binaries.
    pub binaries_dir: PathBuf,
    /// Directory holding problem files.
    pub problem_dir: PathBuf,
    /// Performance mark of this machine.
    pub mark: f64,
    /// Memory limit handed to the prover, in MB.
    pub memory_limit: Option<u64>,
    /// Maximum number of concurrently running jobs.
    pub job_limit: usize,
    /// Nice level for spawned provers.
    pub nice: Option<i32>,
    /// Master addresses (`host` or `host:udp-port`) to announce to.
    pub masters: Vec<String>,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        SlaveConfig {
            port: DEFAULT_SLAVE_PORT,
            name: "eslave".to_string(),
            binaries_dir: PathBuf::from("."),
            problem_dir: PathBuf::from("."),
            mark: REFERENCE_MARK,
            memory_limit: None,
            job_limit: 2,
            nice: None,
            masters: vec![],
        }
    }
}

impl SlaveConfig {
    /// Load a slave configuration file.
    pub fn load(path: &Path) -> Result<SlaveConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<SlaveConfig> {
        let mut config = SlaveConfig::default();
        for (key, value) in kv_lines(content)? {
            match key.as_str() {
                "Port" => config.port = parse_value(&key, &value)?,
                "Name" => config.name = value,
                "Binaries directory" => config.binaries_dir = PathBuf::from(value),
                "Problem directory" => config.problem_dir = PathBuf::from(value),
                "E-Mark" => config.mark = parse_value(&key, &value)?,
                "Memory limit" => config.memory_limit = Some(parse_value(&key, &value)?),
                "Job limit" => config.job_limit = parse_value(&key, &value)?,
                "Nice" => config.nice = Some(parse_value(&key, &value)?),
                "Master" => config.masters.push(value),
                _ => bail!("unknown configuration key '{}'", key),
            }
        }
        Ok(config)
    }
}

/// Configuration for the master daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// UDP port to listen on for slave announces.
    pub announce_port: u16,
    /// TCP port to accept slave connections on.
    pub slave_port: u16,
    /// TCP port for the operator control channel.
    pub control_port: u16,
    /// Directory holding strategy spec files.
    pub strategy_dir: PathBuf,
    /// Directory holding protocol (result) files.
    pub result_dir: PathBuf,
    /// Seconds of inactivity after which an active strategy is deactivated
    /// and requeued.
    pub strategy_timeout: u64,
    /// Strategies queued at startup, in order.
    pub strategies: Vec<String>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            announce_port: DEFAULT_ANNOUNCE_PORT,
            slave_port: DEFAULT_MASTER_SLAVE_PORT,
            control_port: DEFAULT_CONTROL_PORT,
            strategy_dir: PathBuf::from("."),
            result_dir: PathBuf::from("."),
            strategy_timeout: 600,
            strategies: vec![],
        }
    }
}

impl MasterConfig {
    /// Load a master configuration file.
    pub fn load(path: &Path) -> Result<MasterConfig> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<MasterConfig> {
        let mut config = MasterConfig::default();
        for (key, value) in kv_lines(content)? {
            match key.as_str() {
                "Announce port" => config.announce_port = parse_value(&key, &value)?,
                "Slave port" => config.slave_port = parse_value(&key, &value)?,
                "Control port" => config.control_port = parse_value(&key, &value)?,
                "Strategy directory" => config.strategy_dir = PathBuf::from(value),
                "Result directory" => config.result_dir = PathBuf::from(value),
                "Strategy timeout" => config.strategy_timeout = parse_value(&key, &value)?,
                "Strategies" => config
                    .strategies
                    .extend(value.split(',').map(|s| s.trim().to_string())),
                _ => bail!("unknown configuration key '{}'", key),
            }
        }
        Ok(config)
    }
}

/// Split a config file into trimmed `(key, value)` pairs, skipping blank
/// lines and `#` comments.
fn kv_lines(content: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = vec![];
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            bail!("malformed configuration line '{}'", line);
        };
        pairs.push((key.trim().to_string(), value.trim().to_string()));
    }
    Ok(pairs)
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("bad value '{}' for key '{}'", value, key))
}
