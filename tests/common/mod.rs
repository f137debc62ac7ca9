// SPDX-FileCopyrightText: 2026 PANGOLIN Project Team
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Common fixtures for the grid test suite

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use pangolin::core::{FailureReason, ProofResult, ProofStatus};

/// Write an executable shell script into `dir`.
pub fn write_executable(dir: &Path, name: &str, script: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, script).unwrap();
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();
    path
}

/// A stand-in prover that sleeps, then prints an SZS status block the way
/// the real thing does.
pub fn fake_prover(
    dir: &Path,
    name: &str,
    status: &str,
    total_time: &str,
    sleep_secs: u32,
) -> PathBuf {
    let script = format!(
        "#!/bin/sh\n\
         sleep {}\n\
         echo \"# SZS status {}\"\n\
         echo \"# Processed clauses        : 1042\"\n\
         echo \"# Total time               : {} s\"\n",
        sleep_secs, status, total_time
    );
    write_executable(dir, name, &script)
}

/// Write a strategy spec file named after the strategy.
pub fn write_strategy_spec(dir: &Path, name: &str, problems: &[&str]) {
    let mut content = String::from("Executable: eprover\nArguments: --auto\nTime limit: 10r\n");
    for problem in problems {
        content.push_str(problem);
        content.push('\n');
    }
    fs::write(dir.join(name), content).unwrap();
}

pub fn sample_result(problem: &str, status: ProofStatus) -> ProofResult {
    ProofResult {
        problem: problem.to_string(),
        status,
        time: 0.5,
        reason: if status == ProofStatus::Failure {
            FailureReason::MaxTime
        } else {
            FailureReason::Success
        },
        extras: vec![],
    }
}
