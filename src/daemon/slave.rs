// SPDX-FileCopyrightText: 2026 PANGOLIN Project Team
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Slave daemon
//!
//! Accepts connections, queues incoming proof jobs, and runs them under
//! the configured admission cap. Finished results go back to the
//! originating connection; if that connection died in the meantime the
//! result is simply undeliverable -- the job still ran to completion.

use anyhow::{Context, Result};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::SlaveConfig;
use crate::core::{Job, ProofResult};
use crate::net::announce::Announcer;
use crate::net::command::{Handshake, SlaveCommand};
use crate::net::connection::accept;
use crate::net::{Connection, Received, Terminator};
use crate::runner::{failed_result, JobRunner, RunnerContext};

use super::{next_conn_event, LoopExit, ANNOUNCE_TICKS, LOOP_TICK};

/// A job waiting for a free runner slot.
#[derive(Debug)]
struct QueuedJob {
    job: Job,
    origin: SocketAddr,
}

/// A job currently executing.
struct RunningJob {
    runner: JobRunner,
    origin: SocketAddr,
}

/// Single-node daemon running proof jobs under an admission cap.
pub struct SlaveDaemon {
    config: SlaveConfig,
    ctx: RunnerContext,
    listener: TcpListener,
    announcer: Announcer,
    connections: HashMap<SocketAddr, Connection>,
    waiting: VecDeque<QueuedJob>,
    running: HashMap<String, RunningJob>,
}

impl SlaveDaemon {
    /// Bind the listening socket and prepare the announcer.
    pub async fn bind(config: SlaveConfig) -> Result<SlaveDaemon> {
        let listener = TcpListener::bind(("0.0.0.0", config.port))
            .await
            .with_context(|| format!("Failed to bind slave port {}", config.port))?;
        let port = listener
            .local_addr()
            .context("Failed to read listener address")?
            .port();
        let announcer =
            Announcer::new(port, &config.name, config.mark, &config.masters).await?;
        let ctx = RunnerContext {
            binaries_dir: config.binaries_dir.clone(),
            problem_dir: config.problem_dir.clone(),
            mark: config.mark,
            memory_limit: config.memory_limit,
            nice: config.nice,
        };
        Ok(SlaveDaemon {
            config,
            ctx,
            listener,
            announcer,
            connections: HashMap::new(),
            waiting: VecDeque::new(),
            running: HashMap::new(),
        })
    }

    /// Actual listening address (useful when bound to port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Run the event loop until a restart or termination is requested.
    pub async fn run(mut self) -> Result<LoopExit> {
        info!(
            "slave '{}' listening on port {} (cap {}, mark {})",
            self.config.name,
            self.local_addr()?.port(),
            self.config.job_limit,
            self.config.mark
        );

        // First announce right away; the tick keeps the cadence afterwards.
        self.announcer.announce().await;

        let mut tick = tokio::time::interval(LOOP_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks: u64 = 0;

        loop {
            let event = tokio::select! {
                _ = tick.tick() => SlaveEvent::Tick,
                accepted = accept(&self.listener, Terminator::Newline) => {
                    SlaveEvent::Accepted(accepted)
                }
                (addr, received) = next_conn_event(&mut self.connections) => {
                    SlaveEvent::Conn(addr, received)
                }
                (id, result) = next_finished_job(&mut self.running) => {
                    SlaveEvent::JobDone(id, result)
                }
            };

            match event {
                SlaveEvent::Tick => {
                    ticks += 1;
                    if ticks % ANNOUNCE_TICKS == 0 {
                        self.announcer.announce().await;
                    }
                }
                SlaveEvent::Accepted(Some(mut conn)) => {
                    let addr = conn.peer();
                    debug!("accepted connection from {}", addr);
                    let handshake = Handshake {
                        name: self.config.name.clone(),
                        mark: self.config.mark,
                    };
                    conn.send(&handshake.to_record());
                    self.connections.insert(addr, conn);
                }
                SlaveEvent::Accepted(None) => {}
                SlaveEvent::Conn(addr, Received::Closed) => {
                    debug!("connection from {} closed", addr);
                    self.connections.remove(&addr);
                }
                SlaveEvent::Conn(addr, Received::Records(records)) => {
                    if let Some(exit) = self.handle_records(addr, records) {
                        return Ok(exit);
                    }
                }
                SlaveEvent::JobDone(id, result) => self.report_result(&id, result),
            }

            self.start_waiting_jobs();
            self.flush_connections();
        }
    }

    /// Dispatch parsed command records from one connection. `Some` exits
    /// the loop.
    fn handle_records(&mut self, addr: SocketAddr, records: Vec<String>) -> Option<LoopExit> {
        for record in records {
            if record.is_empty() {
                continue;
            }
            match SlaveCommand::parse(&record) {
                Some(SlaveCommand::Run(job)) => {
                    debug!("queued job {} from {}", job.id(), addr);
                    self.waiting.push_back(QueuedJob { job, origin: addr });
                }
                Some(SlaveCommand::Ls) => {
                    let dump = self.status_dump();
                    if let Some(conn) = self.connections.get_mut(&addr) {
                        conn.send(&dump);
                    }
                }
                Some(SlaveCommand::Restart) => {
                    warn!("restart requested by {}, dropping in-flight work", addr);
                    return Some(LoopExit::Restart);
                }
                Some(SlaveCommand::Version) => {
                    if let Some(conn) = self.connections.get_mut(&addr) {
                        conn.send(&format!("pangolin slave {}", env!("CARGO_PKG_VERSION")));
                    }
                }
                None => warn!("dropping malformed record from {}: {:?}", addr, record),
            }
        }
        None
    }

    /// Deliver a finished result to its originating connection.
    fn report_result(&mut self, id: &str, result: ProofResult) {
        let Some(done) = self.running.remove(id) else {
            return;
        };
        debug!("job {} finished: {} {}", id, result.status, result.reason);
        match self.connections.get_mut(&done.origin) {
            Some(conn) => conn.send(&result.to_string()),
            None => debug!("origin of job {} is gone, result dropped", id),
        }
    }

    /// Start waiting jobs FIFO while below the admission cap.
    fn start_waiting_jobs(&mut self) {
        while self.running.len() < self.config.job_limit {
            let Some(next) = self.waiting.pop_front() else {
                break;
            };
            let id = next.job.id();
            if self.running.contains_key(&id) {
                warn!("job {} is already running, duplicate dropped", id);
                continue;
            }
            match JobRunner::spawn(next.job.clone(), &self.ctx) {
                Ok(runner) => {
                    debug!("started job {}", id);
                    self.running.insert(
                        id,
                        RunningJob {
                            runner,
                            origin: next.origin,
                        },
                    );
                }
                Err(e) => {
                    warn!("failed to start job {}: {:#}", id, e);
                    let result = failed_result(&next.job);
                    if let Some(conn) = self.connections.get_mut(&next.origin) {
                        conn.send(&result.to_string());
                    }
                }
            }
        }
    }

    /// Flush writable connections and forget the ones that died writing.
    fn flush_connections(&mut self) {
        for conn in self.connections.values_mut() {
            conn.try_flush();
        }
        self.connections.retain(|_, conn| !conn.is_closed());
    }

    fn status_dump(&self) -> String {
        let mut out = format!(
            "jobs: {} running, {} waiting (cap {})",
            self.running.len(),
            self.waiting.len(),
            self.config.job_limit
        );
        for id in self.running.keys() {
            out.push_str("\nrunning ");
            out.push_str(id);
        }
        for queued in &self.waiting {
            out.push_str("\nwaiting ");
            out.push_str(&queued.job.id());
        }
        out
    }
}

enum SlaveEvent {
    Tick,
    Accepted(Option<Connection>),
    Conn(SocketAddr, Received),
    JobDone(String, ProofResult),
}

/// Resolves with the next finished job, or never if nothing is running.
/// Cancel-safe because `JobRunner::collect` is.
async fn next_finished_job(
    running: &mut HashMap<String, RunningJob>,
) -> (String, ProofResult) {
    if running.is_empty() {
        return futures::future::pending().await;
    }
    let collects: Vec<_> = running
        .iter_mut()
        .map(|(id, job)| {
            let id = id.clone();
            Box::pin(async move { (id, job.runner.collect().await) })
        })
        .collect();
    futures::future::select_all(collects).await.0
}
