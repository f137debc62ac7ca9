// SPDX-FileCopyrightText: 2026 PANGOLIN Project Team
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Subprocess execution of one proof job
//!
//! A [`JobRunner`] wraps one running prover process as a pollable task: the
//! owning event loop drains its output non-blockingly and never waits on
//! the child, so a slow or hung prover cannot stall the loop. Time limits
//! are the prover's own business (its cpu-limit flag); the runner never
//! kills on timeout.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::debug;

use crate::core::{normalize_seconds, FailureReason, Job, ProofResult, ProofStatus, TimeBudget};

/// Ambient settings a slave applies to every prover it spawns.
#[derive(Debug, Clone)]
pub struct RunnerContext {
    /// Directory prover executables live in.
    pub binaries_dir: PathBuf,
    /// Directory problem files live in.
    pub problem_dir: PathBuf,
    /// Performance mark of this machine.
    pub mark: f64,
    /// Memory limit handed to the prover, in MB.
    pub memory_limit: Option<u64>,
    /// Nice level for the child process.
    pub nice: Option<i32>,
}

/// One prover subprocess, pollable for its eventual [`ProofResult`].
pub struct JobRunner {
    job: Job,
    mark: f64,
    child: Child,
    stdout: ChildStdout,
    buf: Vec<u8>,
    eof: bool,
    result: Option<ProofResult>,
}

impl JobRunner {
    /// Start the prover for one job. The cpu limit comes from the job's
    /// budget scaled to this machine; memory limit and niceness come from
    /// the context.
    pub fn spawn(job: Job, ctx: &RunnerContext) -> Result<JobRunner> {
        let executable = ctx.binaries_dir.join(&job.executable);
        let cpu_limit = job.budget.concrete_seconds(ctx.mark).ceil() as u64;

        let mut cmd = match ctx.nice {
            Some(level) => {
                let mut cmd = Command::new("nice");
                cmd.arg("-n").arg(level.to_string()).arg(&executable);
                cmd
            }
            None => Command::new(&executable),
        };
        for arg in job.args.split_whitespace() {
            cmd.arg(arg);
        }
        cmd.arg(format!("--cpu-limit={}", cpu_limit));
        if let Some(mb) = ctx.memory_limit {
            cmd.arg(format!("--memory-limit={}", mb));
        }
        cmd.arg(ctx.problem_dir.join(&job.problem));
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn {}", executable.display()))?;
        let stdout = child
            .stdout
            .take()
            .context("child stdout was not piped")?;
        Ok(JobRunner {
            mark: ctx.mark,
            job,
            child,
            stdout,
            buf: Vec::new(),
            eof: false,
            result: None,
        })
    }

    pub fn job(&self) -> &Job {
        &self.job
    }

    /// Drive the subprocess to completion and return its result.
    ///
    /// Output is drained incrementally into an internal buffer, so the
    /// future is cancel-safe: dropping it mid-way loses nothing, and the
    /// next call picks up where the last one stopped. Once the stream hits
    /// EOF and the child is reaped, the buffer is parsed exactly once; any
    /// later call returns the cached result.
    pub async fn collect(&mut self) -> ProofResult {
        if let Some(result) = &self.result {
            return result.clone();
        }
        while !self.eof {
            let mut chunk = [0u8; 4096];
            match self.stdout.read(&mut chunk).await {
                Ok(0) => self.eof = true,
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    debug!("output of job {} unreadable: {}", self.job.id(), e);
                    self.eof = true;
                }
            }
        }
        if let Err(e) = self.child.wait().await {
            debug!("waiting for job {} failed: {}", self.job.id(), e);
        }
        let output = String::from_utf8_lossy(&self.buf).into_owned();
        let result = parse_prover_output(&output, &self.job, self.mark);
        self.result = Some(result.clone());
        result
    }
}

/// Result reported when a job could not even be started.
pub fn failed_result(job: &Job) -> ProofResult {
    ProofResult {
        problem: job.problem.clone(),
        status: ProofStatus::Failure,
        time: 0.0,
        reason: FailureReason::Unknown,
        extras: job.extra_fields.iter().map(|_| "-".to_string()).collect(),
    }
}

/// Parse prover output into a result.
///
/// Scans for the SZS status line, the total-time line, the failure line,
/// and any requested extra statistic lines. Reported times are converted
/// back into the unit domain of the job's budget.
pub fn parse_prover_output(output: &str, job: &Job, mark: f64) -> ProofResult {
    let mut status = ProofStatus::Failure;
    let mut seconds = 0.0f64;
    let mut reason = FailureReason::Unknown;

    for line in output.lines() {
        if let Some(rest) = line.strip_prefix("# SZS status ") {
            let word = rest.split_whitespace().next().unwrap_or("");
            status = match word {
                "Theorem" | "Unsatisfiable" | "ContradictoryAxioms" => ProofStatus::Theorem,
                "CounterSatisfiable" | "Satisfiable" => ProofStatus::NonTheorem,
                _ => ProofStatus::Failure,
            };
        } else if let Some(rest) = line.strip_prefix("# Total time") {
            if let Some(value) = rest.split(':').nth(1) {
                if let Ok(v) = value.trim().trim_end_matches('s').trim().parse() {
                    seconds = v;
                }
            }
        } else if let Some(rest) = line.strip_prefix("# Failure:") {
            let text = rest.trim();
            reason = if text.contains("memory") {
                FailureReason::MaxMemory
            } else if text.contains("time") {
                FailureReason::MaxTime
            } else if text.contains("incomplete") || text.contains("unprocessed clauses") {
                FailureReason::Incomplete
            } else {
                FailureReason::Unknown
            };
        }
    }

    if status != ProofStatus::Failure {
        reason = FailureReason::Success;
    }

    let extras = job
        .extra_fields
        .iter()
        .map(|field| {
            let label = field.replace('_', " ");
            output
                .lines()
                .find_map(|line| {
                    let stat = line.strip_prefix('#')?.trim_start();
                    if !stat.starts_with(&label) {
                        return None;
                    }
                    stat.split(':').nth(1).map(|v| v.trim().to_string())
                })
                .unwrap_or_else(|| "-".to_string())
        })
        .collect();

    let time = match job.budget {
        TimeBudget::Raw(_) => seconds,
        TimeBudget::Normalized(_) => normalize_seconds(seconds, mark),
    };

    ProofResult {
        problem: job.problem.clone(),
        status,
        time,
        reason,
        extras,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::REFERENCE_MARK;

    fn job(budget: TimeBudget, extra_fields: Vec<String>) -> Job {
        Job {
            key: "auto_a".into(),
            executable: "eprover".into(),
            args: "--auto".into(),
            problem: "PUZ031+1.p".into(),
            budget,
            extra_fields,
        }
    }

    const PROOF_OUTPUT: &str = "\
# Preprocessing time       : 0.018 s
# SZS status Theorem
# Proof found!
# Processed clauses        : 1042
# Generated clauses        : 5310
# Total time               : 0.042 s
";

    #[test]
    fn success_output_parses() {
        let r = parse_prover_output(PROOF_OUTPUT, &job(TimeBudget::Raw(300.0), vec![]), 100.0);
        assert_eq!(r.status, ProofStatus::Theorem);
        assert_eq!(r.reason, FailureReason::Success);
        assert!((r.time - 0.042).abs() < 1e-9);
    }

    #[test]
    fn countersatisfiable_is_model_class() {
        let out = "# SZS status CounterSatisfiable\n# Total time : 1.5 s\n";
        let r = parse_prover_output(out, &job(TimeBudget::Raw(300.0), vec![]), 100.0);
        assert_eq!(r.status, ProofStatus::NonTheorem);
        assert_eq!(r.reason, FailureReason::Success);
    }

    #[test]
    fn resource_out_maps_to_reason_tags() {
        let out = "\
# SZS status ResourceOut
# Failure: Resource limit exceeded (time)
# Total time               : 300.001 s
";
        let r = parse_prover_output(out, &job(TimeBudget::Raw(300.0), vec![]), 100.0);
        assert_eq!(r.status, ProofStatus::Failure);
        assert_eq!(r.reason, FailureReason::MaxTime);

        let out = "# SZS status ResourceOut\n# Failure: Resource limit exceeded (memory)\n";
        let r = parse_prover_output(out, &job(TimeBudget::Raw(300.0), vec![]), 100.0);
        assert_eq!(r.reason, FailureReason::MaxMemory);

        let out = "# SZS status GaveUp\n# Failure: Out of unprocessed clauses!\n";
        let r = parse_prover_output(out, &job(TimeBudget::Raw(300.0), vec![]), 100.0);
        assert_eq!(r.reason, FailureReason::Incomplete);
    }

    #[test]
    fn empty_output_is_unknown_failure() {
        let r = parse_prover_output("", &job(TimeBudget::Raw(300.0), vec![]), 100.0);
        assert_eq!(r.status, ProofStatus::Failure);
        assert_eq!(r.reason, FailureReason::Unknown);
        assert_eq!(r.time, 0.0);
    }

    #[test]
    fn extras_extract_in_request_order() {
        let fields = vec!["Generated_clauses".to_string(), "Processed_clauses".to_string(),
                          "No_such_stat".to_string()];
        let r = parse_prover_output(PROOF_OUTPUT, &job(TimeBudget::Raw(300.0), fields), 100.0);
        assert_eq!(r.extras, vec!["5310", "1042", "-"]);
    }

    #[test]
    fn normalized_budget_normalizes_reported_time() {
        // Machine twice as fast as reference: 0.042 concrete seconds are
        // 0.084 abstract units.
        let r = parse_prover_output(
            PROOF_OUTPUT,
            &job(TimeBudget::Normalized(300.0), vec![]),
            2.0 * REFERENCE_MARK,
        );
        assert!((r.time - 0.084).abs() < 1e-9);
    }

    #[test]
    fn failed_result_shape() {
        let j = job(TimeBudget::Raw(10.0), vec!["Processed_clauses".into()]);
        let r = failed_result(&j);
        assert_eq!(r.status, ProofStatus::Failure);
        assert_eq!(r.reason, FailureReason::Unknown);
        assert_eq!(r.extras, vec!["-"]);
    }
}
