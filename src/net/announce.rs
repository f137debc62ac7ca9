// SPDX-FileCopyrightText: 2026 PANGOLIN Project Team
// SPDX-License-Identifier: PMPL-1.0-or-later

//! UDP service discovery
//!
//! A slave periodically announces itself to every configured master with a
//! datagram of the form `eserver:<tcp-port>:<name>:<mark>`. Masters listen
//! on a fixed UDP port, validate the message shape, and open an outbound
//! TCP connection to previously unknown slaves.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use tokio::net::{lookup_host, UdpSocket};
use tracing::debug;

use crate::config::DEFAULT_ANNOUNCE_PORT;

/// Message prefix shared by all announce datagrams.
pub const ANNOUNCE_PREFIX: &str = "eserver";

/// Announced TCP ports below this are rejected as implausible. Inherited
/// sanity check, not a policy.
pub const MIN_ANNOUNCE_PORT: u16 = 1000;

/// A validated announce datagram.
#[derive(Debug, Clone, PartialEq)]
pub struct Announce {
    /// TCP port the slave accepts job records on.
    pub port: u16,
    pub name: Option<String>,
    pub mark: Option<f64>,
}

/// Parse and validate an announce datagram. Returns `None` for anything
/// that does not look like a well-formed announce.
pub fn parse_announce(msg: &str) -> Option<Announce> {
    let mut parts = msg.trim().split(':');
    if parts.next()? != ANNOUNCE_PREFIX {
        return None;
    }
    let port: u16 = parts.next()?.parse().ok()?;
    if port < MIN_ANNOUNCE_PORT {
        return None;
    }
    let name = parts.next().map(str::to_string);
    let mark = match parts.next() {
        Some(tok) => Some(tok.parse().ok()?),
        None => None,
    };
    if parts.next().is_some() {
        return None;
    }
    Some(Announce { port, name, mark })
}

/// Slave-side announcer: broadcasts this slave's identity to each
/// configured master on a fixed cadence.
pub struct Announcer {
    socket: UdpSocket,
    masters: Vec<SocketAddr>,
    payload: String,
}

impl Announcer {
    /// Resolve the master addresses and prepare the announce payload.
    /// Master entries are `host` or `host:udp-port`.
    pub async fn new(
        tcp_port: u16,
        name: &str,
        mark: f64,
        masters: &[String],
    ) -> Result<Announcer> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .context("Failed to bind announce socket")?;
        let mut resolved = vec![];
        for master in masters {
            let target = if master.contains(':') {
                master.clone()
            } else {
                format!("{}:{}", master, DEFAULT_ANNOUNCE_PORT)
            };
            let lookup = lookup_host(&target).await;
            match lookup {
                Ok(mut addrs) => {
                    if let Some(addr) = addrs.next() {
                        resolved.push(addr);
                    }
                }
                Err(e) => debug!("cannot resolve master '{}': {}", master, e),
            }
        }
        Ok(Announcer {
            socket,
            masters: resolved,
            payload: format!("{}:{}:{}:{}", ANNOUNCE_PREFIX, tcp_port, name, mark),
        })
    }

    /// Send one announce round. Send failures are dropped; discovery is
    /// best-effort.
    pub async fn announce(&self) {
        for master in &self.masters {
            if let Err(e) = self.socket.send_to(self.payload.as_bytes(), master).await {
                debug!("announce to {} failed: {}", master, e);
            }
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn master_count(&self) -> usize {
        self.masters.len()
    }
}
