// SPDX-FileCopyrightText: 2026 PANGOLIN Project Team
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Wire records, parsed once at the connection boundary
//!
//! Every inbound record is turned into a tagged variant exactly once;
//! daemons dispatch on the tag and never re-parse command text. Malformed
//! records parse to `None` and are dropped by the caller.

use serde::{Deserialize, Serialize};

use crate::core::{Job, TimeBudget};

/// Commands a slave daemon accepts on its job channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SlaveCommand {
    /// Enqueue a proof job.
    Run(Job),
    /// Dump queue/runner status.
    Ls,
    /// Warm restart: drop in-flight work, relaunch clean.
    Restart,
    /// Report the daemon version.
    Version,
}

impl SlaveCommand {
    pub fn parse(record: &str) -> Option<SlaveCommand> {
        let tokens: Vec<&str> = record.split_whitespace().collect();
        match tokens.first().copied()? {
            "run" => parse_run(&tokens).map(SlaveCommand::Run),
            "ls" if tokens.len() == 1 => Some(SlaveCommand::Ls),
            "restart" if tokens.len() == 1 => Some(SlaveCommand::Restart),
            "version" if tokens.len() == 1 => Some(SlaveCommand::Version),
            _ => None,
        }
    }
}

/// `run <key> <prover> <args...> <problem> <time>[r] [<extras-csv>]`
///
/// The budget is the last token that parses as one; a trailing token after
/// it is the comma-separated extra-field list. Anything between the prover
/// and the problem is the argument string.
fn parse_run(tokens: &[&str]) -> Option<Job> {
    if tokens.len() < 5 {
        return None;
    }
    let last = tokens.len() - 1;
    let (budget_idx, budget) = match TimeBudget::parse(tokens[last]) {
        Some(budget) => (last, budget),
        None => (last - 1, TimeBudget::parse(tokens[last - 1])?),
    };
    // run key prover [args...] problem budget
    if budget_idx < 4 {
        return None;
    }
    let extra_fields = if budget_idx == last {
        vec![]
    } else {
        tokens[last].split(',').map(str::to_string).collect()
    };
    Some(Job {
        key: tokens[1].to_string(),
        executable: tokens[2].to_string(),
        args: tokens[3..budget_idx - 1].join(" "),
        problem: tokens[budget_idx - 1].to_string(),
        budget,
        extra_fields,
    })
}

/// Identity record a slave sends first on every connection it accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    pub name: String,
    pub mark: f64,
}

impl Handshake {
    pub fn parse(record: &str) -> Option<Handshake> {
        let tokens: Vec<&str> = record.split_whitespace().collect();
        match tokens.as_slice() {
            ["eserver", name, mark] => Some(Handshake {
                name: name.to_string(),
                mark: mark.parse().ok()?,
            }),
            _ => None,
        }
    }

    pub fn to_record(&self) -> String {
        format!("eserver {} {}", self.name, self.mark)
    }
}

/// Operator commands on the master's control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlCommand {
    /// Status dump.
    Ls,
    /// Queue strategies at the back.
    Add(Vec<String>),
    /// Queue strategies at the front.
    Sneak(Vec<String>),
    /// Broadcast a restart directive to every slave.
    RestartSlaves,
    /// Shut the master down.
    TerminateMaster,
    /// Close this control connection.
    Quit,
    /// Drop the entire undispatched job queue.
    Purge,
}

impl ControlCommand {
    pub fn parse(record: &str) -> Option<ControlCommand> {
        let tokens: Vec<&str> = record.split_whitespace().collect();
        match tokens.split_first()? {
            (&"ls", []) => Some(ControlCommand::Ls),
            (&"add", names) if !names.is_empty() => {
                Some(ControlCommand::Add(names.iter().map(|s| s.to_string()).collect()))
            }
            (&"sneak", names) if !names.is_empty() => {
                Some(ControlCommand::Sneak(names.iter().map(|s| s.to_string()).collect()))
            }
            (&"restart", ["slaves"]) => Some(ControlCommand::RestartSlaves),
            (&"terminate", ["master"]) => Some(ControlCommand::TerminateMaster),
            (&"quit", []) => Some(ControlCommand::Quit),
            (&"purge", []) => Some(ControlCommand::Purge),
            _ => None,
        }
    }
}
