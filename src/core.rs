// SPDX-FileCopyrightText: 2026 PANGOLIN Project Team
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Core types for the proof-attempt grid

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Performance mark of the reference machine. One abstract time unit is one
/// second of CPU time on a machine with this mark.
pub const REFERENCE_MARK: f64 = 100.0;

/// Time budget for one proof attempt.
///
/// A raw budget is wall-clock seconds, used as-is on every machine. A
/// normalized budget is in abstract units and is scaled by the executing
/// machine's performance mark before it reaches the prover.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TimeBudget {
    /// Concrete seconds, machine-independent.
    Raw(f64),
    /// Abstract units, relative to [`REFERENCE_MARK`].
    Normalized(f64),
}

impl TimeBudget {
    /// Parse a wire token: a number, with an `r` suffix marking raw seconds.
    pub fn parse(token: &str) -> Option<TimeBudget> {
        if let Some(raw) = token.strip_suffix('r') {
            raw.parse().ok().map(TimeBudget::Raw)
        } else {
            token.parse().ok().map(TimeBudget::Normalized)
        }
    }

    /// Concrete seconds on a machine with the given mark.
    pub fn concrete_seconds(&self, mark: f64) -> f64 {
        match *self {
            TimeBudget::Raw(secs) => secs,
            TimeBudget::Normalized(units) => units * REFERENCE_MARK / mark,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, TimeBudget::Raw(_))
    }

    pub fn value(&self) -> f64 {
        match *self {
            TimeBudget::Raw(v) | TimeBudget::Normalized(v) => v,
        }
    }
}

impl fmt::Display for TimeBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeBudget::Raw(v) => write!(f, "{}r", v),
            TimeBudget::Normalized(v) => write!(f, "{}", v),
        }
    }
}

/// Convert measured concrete seconds to abstract units for a machine mark.
pub fn normalize_seconds(secs: f64, mark: f64) -> f64 {
    secs * mark / REFERENCE_MARK
}

/// One-letter proof outcome classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProofStatus {
    /// Theorem-class success (proof found / unsatisfiable).
    Theorem,
    /// Model-class success (countersatisfiable / satisfiable).
    NonTheorem,
    /// No conclusive answer.
    Failure,
}

impl ProofStatus {
    pub fn letter(&self) -> char {
        match self {
            ProofStatus::Theorem => 'T',
            ProofStatus::NonTheorem => 'N',
            ProofStatus::Failure => 'F',
        }
    }

    pub fn from_letter(c: char) -> Option<ProofStatus> {
        match c {
            'T' => Some(ProofStatus::Theorem),
            'N' => Some(ProofStatus::NonTheorem),
            'F' => Some(ProofStatus::Failure),
            _ => None,
        }
    }
}

impl fmt::Display for ProofStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Why a proof attempt ended the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureReason {
    /// The attempt succeeded.
    Success,
    /// The prover ran out of its CPU time allowance.
    MaxTime,
    /// The prover ran out of memory.
    MaxMemory,
    /// The search space was exhausted without an answer.
    Incomplete,
    /// Anything else, including crashes.
    Unknown,
}

impl FailureReason {
    pub fn tag(&self) -> &'static str {
        match self {
            FailureReason::Success => "success",
            FailureReason::MaxTime => "maxtime",
            FailureReason::MaxMemory => "maxmem",
            FailureReason::Incomplete => "incomplete",
            FailureReason::Unknown => "unknown",
        }
    }

    pub fn from_tag(tag: &str) -> Option<FailureReason> {
        match tag {
            "success" => Some(FailureReason::Success),
            "maxtime" => Some(FailureReason::MaxTime),
            "maxmem" => Some(FailureReason::MaxMemory),
            "incomplete" => Some(FailureReason::Incomplete),
            "unknown" => Some(FailureReason::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// One dispatched (strategy, problem) unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Strategy key this job belongs to.
    pub key: String,
    /// Prover executable name, resolved against the slave's binaries dir.
    pub executable: String,
    /// Prover argument string (whitespace-separated).
    pub args: String,
    /// Problem identifier, resolved against the slave's problem dir.
    pub problem: String,
    /// Time budget for the attempt.
    pub budget: TimeBudget,
    /// Extra statistic field names to extract from the prover output.
    /// Single tokens on the wire; underscores stand for spaces in the
    /// prover's statistic labels.
    pub extra_fields: Vec<String>,
}

impl Job {
    /// Identifier used to track the job while it is outstanding.
    pub fn id(&self) -> String {
        format!("{}:{}", self.key, self.problem)
    }

    /// Wire form: `run <key> <prover> <args...> <problem> <time>[r] [<extras>]`.
    pub fn to_record(&self) -> String {
        let mut parts: Vec<String> =
            vec!["run".into(), self.key.clone(), self.executable.clone()];
        parts.extend(self.args.split_whitespace().map(str::to_string));
        parts.push(self.problem.clone());
        parts.push(self.budget.to_string());
        if !self.extra_fields.is_empty() {
            parts.push(self.extra_fields.join(","));
        }
        parts.join(" ")
    }
}

/// Outcome of one proof attempt. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProofResult {
    /// Problem the attempt ran on.
    pub problem: String,
    /// One-letter outcome class.
    pub status: ProofStatus,
    /// Elapsed time, in the same unit domain as the job's budget.
    pub time: f64,
    /// Reason tag for the outcome.
    pub reason: FailureReason,
    /// Extracted extra statistic fields, in request order.
    pub extras: Vec<String>,
}

impl ProofResult {
    /// Parse the textual record form produced by [`Display`](fmt::Display).
    pub fn parse(line: &str) -> Result<ProofResult> {
        let mut tokens = line.split_whitespace();
        let problem = tokens
            .next()
            .ok_or_else(|| anyhow!("empty result record"))?
            .to_string();
        let status_tok = tokens
            .next()
            .ok_or_else(|| anyhow!("result record for {} lacks a status", problem))?;
        let mut chars = status_tok.chars();
        let status = match (chars.next().and_then(ProofStatus::from_letter), chars.next()) {
            (Some(s), None) => s,
            _ => bail!("bad status '{}' in result for {}", status_tok, problem),
        };
        let time: f64 = tokens
            .next()
            .ok_or_else(|| anyhow!("result record for {} lacks a time", problem))?
            .parse()
            .map_err(|_| anyhow!("bad time in result for {}", problem))?;
        let reason_tok = tokens
            .next()
            .ok_or_else(|| anyhow!("result record for {} lacks a reason", problem))?;
        let reason = FailureReason::from_tag(reason_tok)
            .ok_or_else(|| anyhow!("bad reason '{}' in result for {}", reason_tok, problem))?;
        let extras = tokens.map(str::to_string).collect();
        Ok(ProofResult {
            problem,
            status,
            time,
            reason,
            extras,
        })
    }
}

impl fmt::Display for ProofResult {
    /// Fixed-column form for the first four fields, then free extras.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut line = format!(
            "{:<28} {} {:8.3} {:<10}",
            self.problem,
            self.status.letter(),
            self.time,
            self.reason.tag()
        );
        for extra in &self.extras {
            line.push(' ');
            line.push_str(extra);
        }
        write!(f, "{}", line.trim_end())
    }
}
