// SPDX-FileCopyrightText: 2026 PANGOLIN Project Team
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Master daemon
//!
//! Discovers slaves via UDP announces, keeps every initialized slave
//! loaded up to its open-job budget from the strategy scheduler, collects
//! and persists results, and exposes a line-based operator control
//! channel. A slave that disconnects just disappears from the map; its
//! unanswered jobs regenerate from the store gaps the next time their
//! strategy is activated.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::MasterConfig;
use crate::core::{Job, ProofResult};
use crate::net::announce::parse_announce;
use crate::net::command::{ControlCommand, Handshake};
use crate::net::connection::accept;
use crate::net::{Connection, Received, Terminator};
use crate::strategy::scheduler::{PendingStrategy, TestSetScheduler};

use super::{
    next_conn_event, LoopExit, CONNECT_TIMEOUT, LOOP_TICK, SLAVE_OPEN_JOB_LIMIT,
};

/// Master-side view of one slave.
struct Slave {
    addr: SocketAddr,
    conn: Connection,
    name: Option<String>,
    mark: f64,
    jobs: HashMap<String, Job>,
    last_active: Instant,
}

impl Slave {
    fn new(addr: SocketAddr, conn: Connection) -> Slave {
        Slave {
            addr,
            conn,
            name: None,
            mark: crate::core::REFERENCE_MARK,
            jobs: HashMap::new(),
            last_active: Instant::now(),
        }
    }

    /// A slave is uninitialized until its handshake record arrives and
    /// receives no jobs before that.
    fn initialized(&self) -> bool {
        self.name.is_some()
    }

    /// Match an incoming result against the outstanding jobs.
    fn take_job_for_problem(&mut self, problem: &str) -> Option<Job> {
        let id = self
            .jobs
            .iter()
            .find(|(_, job)| job.problem == problem)
            .map(|(id, _)| id.clone())?;
        self.jobs.remove(&id)
    }
}

/// Grid coordinator: discovery, dispatch, collection, operator control.
pub struct MasterDaemon {
    config: MasterConfig,
    udp: UdpSocket,
    slave_listener: TcpListener,
    control_listener: TcpListener,
    slaves: HashMap<IpAddr, Slave>,
    controls: HashMap<SocketAddr, Connection>,
    scheduler: TestSetScheduler,
}

impl MasterDaemon {
    /// Bind all three sockets and queue the configured strategies.
    pub async fn bind(config: MasterConfig) -> Result<MasterDaemon> {
        let udp = UdpSocket::bind(("0.0.0.0", config.announce_port))
            .await
            .with_context(|| format!("Failed to bind announce port {}", config.announce_port))?;
        let slave_listener = TcpListener::bind(("0.0.0.0", config.slave_port))
            .await
            .with_context(|| format!("Failed to bind slave port {}", config.slave_port))?;
        let control_listener = TcpListener::bind(("0.0.0.0", config.control_port))
            .await
            .with_context(|| format!("Failed to bind control port {}", config.control_port))?;

        let mut scheduler = TestSetScheduler::new();
        for name in &config.strategies {
            scheduler.add_strat(PendingStrategy::new(
                name,
                &config.strategy_dir,
                &config.result_dir,
            ));
        }

        Ok(MasterDaemon {
            config,
            udp,
            slave_listener,
            control_listener,
            slaves: HashMap::new(),
            controls: HashMap::new(),
            scheduler,
        })
    }

    /// Actual bound addresses (useful when configured with port 0).
    pub fn announce_addr(&self) -> Result<SocketAddr> {
        self.udp.local_addr().context("Failed to read announce address")
    }

    pub fn control_addr(&self) -> Result<SocketAddr> {
        self.control_listener
            .local_addr()
            .context("Failed to read control address")
    }

    pub fn slave_addr(&self) -> Result<SocketAddr> {
        self.slave_listener
            .local_addr()
            .context("Failed to read slave-listener address")
    }

    /// Run the event loop until the operator terminates the master.
    pub async fn run(mut self) -> Result<LoopExit> {
        info!(
            "master up: announce port {}, slave port {}, control port {}",
            self.announce_addr()?.port(),
            self.slave_addr()?.port(),
            self.control_addr()?.port()
        );

        let mut tick = tokio::time::interval(LOOP_TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stale_after = Duration::from_secs(self.config.strategy_timeout);

        loop {
            let event = tokio::select! {
                _ = tick.tick() => MasterEvent::Tick,
                datagram = recv_datagram(&self.udp) => MasterEvent::Datagram(datagram),
                accepted = accept(&self.slave_listener, Terminator::Newline) => {
                    MasterEvent::SlaveAccepted(accepted)
                }
                accepted = accept(&self.control_listener, Terminator::Newline) => {
                    MasterEvent::ControlAccepted(accepted)
                }
                (ip, received) = next_slave_event(&mut self.slaves) => {
                    MasterEvent::Slave(ip, received)
                }
                (addr, received) = next_conn_event(&mut self.controls) => {
                    MasterEvent::Control(addr, received)
                }
            };

            match event {
                MasterEvent::Tick => {
                    for name in self.scheduler.stale_strategies(stale_after) {
                        info!("strategy {} is stale, deactivating", name);
                        self.scheduler.deactivate_strat(&name, false);
                    }
                }
                MasterEvent::Datagram(Ok((msg, from))) => {
                    self.handle_announce(&msg, from).await;
                }
                MasterEvent::Datagram(Err(e)) => debug!("announce recv failed: {}", e),
                MasterEvent::SlaveAccepted(Some(conn)) => {
                    let addr = conn.peer();
                    if self.slaves.contains_key(&addr.ip()) {
                        debug!("dropping duplicate slave connection from {}", addr);
                    } else {
                        debug!("slave connected from {}", addr);
                        self.slaves.insert(addr.ip(), Slave::new(addr, conn));
                    }
                }
                MasterEvent::SlaveAccepted(None) => {}
                MasterEvent::ControlAccepted(Some(mut conn)) => {
                    let addr = conn.peer();
                    debug!("operator connected from {}", addr);
                    conn.send_raw(b"> ");
                    self.controls.insert(addr, conn);
                }
                MasterEvent::ControlAccepted(None) => {}
                MasterEvent::Slave(ip, Received::Closed) => {
                    if let Some(slave) = self.slaves.remove(&ip) {
                        info!(
                            "slave {} ({}) disconnected, {} jobs outstanding",
                            slave.name.as_deref().unwrap_or("?"),
                            ip,
                            slave.jobs.len()
                        );
                    }
                }
                MasterEvent::Slave(ip, Received::Records(records)) => {
                    self.handle_slave_records(ip, records);
                }
                MasterEvent::Control(addr, Received::Closed) => {
                    debug!("operator at {} disconnected", addr);
                    self.controls.remove(&addr);
                }
                MasterEvent::Control(addr, Received::Records(records)) => {
                    if let Some(exit) = self.handle_control(addr, records) {
                        if let Err(e) = self.scheduler.sync_all() {
                            warn!("final sync failed: {:#}", e);
                        }
                        return Ok(exit);
                    }
                }
            }

            self.top_up_slaves();
            self.flush_connections();
        }
    }

    /// Validate an announce and, for a fresh source address, connect to
    /// the announced TCP port and register an uninitialized slave.
    /// Connect failures are dropped.
    async fn handle_announce(&mut self, msg: &str, from: SocketAddr) {
        let Some(announce) = parse_announce(msg) else {
            debug!("ignoring malformed announce from {}: {:?}", from, msg);
            return;
        };
        if self.slaves.contains_key(&from.ip()) {
            return;
        }
        let target = SocketAddr::new(from.ip(), announce.port);
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                debug!("connected to announced slave at {}", target);
                let conn = Connection::new(stream, Terminator::Newline);
                self.slaves.insert(from.ip(), Slave::new(target, conn));
            }
            Ok(Err(e)) => debug!("connect to announced slave {} failed: {}", target, e),
            Err(_) => debug!("connect to announced slave {} timed out", target),
        }
    }

    /// First record from a slave is its handshake; everything after that
    /// is a result record.
    fn handle_slave_records(&mut self, ip: IpAddr, records: Vec<String>) {
        for record in records {
            if record.is_empty() {
                continue;
            }
            let routed = {
                let Some(slave) = self.slaves.get_mut(&ip) else {
                    return;
                };
                if !slave.initialized() {
                    match Handshake::parse(&record) {
                        Some(handshake) => {
                            info!(
                                "slave {} at {} online (mark {})",
                                handshake.name, slave.addr, handshake.mark
                            );
                            slave.mark = handshake.mark;
                            slave.name = Some(handshake.name);
                            slave.last_active = Instant::now();
                        }
                        None => {
                            warn!("expected handshake from {}, dropped {:?}", ip, record)
                        }
                    }
                    continue;
                }
                match ProofResult::parse(&record) {
                    Ok(result) => {
                        slave.last_active = Instant::now();
                        match slave.take_job_for_problem(&result.problem) {
                            Some(job) => Some((job, result)),
                            None => {
                                warn!("unsolicited result for {} from {}", result.problem, ip);
                                None
                            }
                        }
                    }
                    Err(e) => {
                        warn!("bad record from slave {}: {:#}", ip, e);
                        None
                    }
                }
            };
            if let Some((job, result)) = routed {
                debug!("result for {} via strategy {}", result.problem, job.key);
                if !self.scheduler.add_result(&job.key, result) {
                    warn!(
                        "discarding result for {}: strategy {} is not active",
                        job.problem, job.key
                    );
                }
            }
        }
    }

    /// Dispatch operator commands. `Some` exits the loop.
    fn handle_control(&mut self, addr: SocketAddr, records: Vec<String>) -> Option<LoopExit> {
        for record in records {
            if record.is_empty() {
                self.send_control(addr, None);
                continue;
            }
            let mut exit = None;
            let reply = match ControlCommand::parse(&record) {
                Some(ControlCommand::Ls) => Some(self.status_dump()),
                Some(ControlCommand::Add(names)) => {
                    for name in &names {
                        let pending = self.pending_for(name);
                        self.scheduler.add_strat(pending);
                    }
                    Some(format!("queued {} strategies", names.len()))
                }
                Some(ControlCommand::Sneak(names)) => {
                    // Reverse keeps the listed order at the queue front.
                    for name in names.iter().rev() {
                        let pending = self.pending_for(name);
                        self.scheduler.sneak_strat(pending);
                    }
                    Some(format!("queued {} strategies at the front", names.len()))
                }
                Some(ControlCommand::RestartSlaves) => {
                    for slave in self.slaves.values_mut() {
                        slave.conn.send("restart");
                    }
                    Some(format!("restart sent to {} slaves", self.slaves.len()))
                }
                Some(ControlCommand::TerminateMaster) => {
                    exit = Some(LoopExit::Terminate);
                    Some("terminating".to_string())
                }
                Some(ControlCommand::Quit) => {
                    self.controls.remove(&addr);
                    None
                }
                Some(ControlCommand::Purge) => {
                    let dropped = self.scheduler.purge_jobs();
                    Some(format!("purged {} queued jobs", dropped))
                }
                None => Some("Unknown command".to_string()),
            };
            if let Some(reply) = reply {
                self.send_control(addr, Some(reply.as_str()));
            }
            if exit.is_some() {
                return exit;
            }
        }
        None
    }

    fn send_control(&mut self, addr: SocketAddr, reply: Option<&str>) {
        if let Some(conn) = self.controls.get_mut(&addr) {
            if let Some(reply) = reply {
                conn.send(reply);
            }
            conn.send_raw(b"> ");
        }
    }

    fn pending_for(&self, name: &str) -> PendingStrategy {
        PendingStrategy::new(name, &self.config.strategy_dir, &self.config.result_dir)
    }

    /// Keep every initialized slave loaded up to the open-job budget.
    fn top_up_slaves(&mut self) {
        for slave in self.slaves.values_mut() {
            if !slave.initialized() || slave.conn.is_closed() {
                continue;
            }
            while slave.jobs.len() < SLAVE_OPEN_JOB_LIMIT {
                let Some(job) = self.scheduler.next_job() else {
                    return;
                };
                debug!(
                    "dispatching {} to {}",
                    job.id(),
                    slave.name.as_deref().unwrap_or("?")
                );
                slave.conn.send(&job.to_record());
                slave.jobs.insert(job.id(), job);
            }
        }
    }

    fn flush_connections(&mut self) {
        for slave in self.slaves.values_mut() {
            slave.conn.try_flush();
        }
        for conn in self.controls.values_mut() {
            conn.try_flush();
        }
        self.controls.retain(|_, conn| !conn.is_closed());
    }

    fn status_dump(&self) -> String {
        let mut out = format!("slaves: {}", self.slaves.len());
        for (ip, slave) in &self.slaves {
            out.push_str(&format!(
                "\n  {} {} mark {} ({} open jobs{})",
                ip,
                slave.name.as_deref().unwrap_or("<uninitialized>"),
                slave.mark,
                slave.jobs.len(),
                if slave.initialized() { "" } else { ", no handshake yet" },
            ));
        }
        out.push('\n');
        out.push_str(&self.scheduler.status_dump());
        out
    }
}

enum MasterEvent {
    Tick,
    Datagram(std::io::Result<(String, SocketAddr)>),
    SlaveAccepted(Option<Connection>),
    ControlAccepted(Option<Connection>),
    Slave(IpAddr, Received),
    Control(SocketAddr, Received),
}

/// One announce datagram, decoded lossily. Cancel-safe: a datagram is
/// either fully received or not at all.
async fn recv_datagram(udp: &UdpSocket) -> std::io::Result<(String, SocketAddr)> {
    let mut buf = [0u8; 512];
    let (n, from) = udp.recv_from(&mut buf).await?;
    Ok((String::from_utf8_lossy(&buf[..n]).into_owned(), from))
}

/// Readiness over the slave map; never resolves while it is empty.
async fn next_slave_event(slaves: &mut HashMap<IpAddr, Slave>) -> (IpAddr, Received) {
    if slaves.is_empty() {
        return futures::future::pending().await;
    }
    let recvs: Vec<_> = slaves
        .iter_mut()
        .map(|(ip, slave)| {
            let ip = *ip;
            Box::pin(async move { (ip, slave.conn.recv().await) })
        })
        .collect();
    futures::future::select_all(recvs).await.0
}
