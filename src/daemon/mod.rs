// SPDX-FileCopyrightText: 2026 PANGOLIN Project Team
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Grid daemons
//!
//! Both daemons are single-task cooperative event loops: one `select!`
//! per iteration over every readiness source, bounded by a short tick so
//! housekeeping runs even when idle. All state is owned by the loop task;
//! nothing is shared or locked.

pub mod master;
pub mod slave;

pub use master::MasterDaemon;
pub use slave::SlaveDaemon;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use crate::net::{Connection, Received};

/// Why a daemon loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Warm restart: relaunch on the same configuration, dropping
    /// in-flight work.
    Restart,
    /// Orderly shutdown.
    Terminate,
}

/// Housekeeping tick; the upper bound on loop suspension.
pub(crate) const LOOP_TICK: Duration = Duration::from_secs(1);

/// Announce cadence, in loop ticks.
pub(crate) const ANNOUNCE_TICKS: u64 = 10;

/// Maximum jobs the master keeps outstanding on one slave.
pub const SLAVE_OPEN_JOB_LIMIT: usize = 10;

/// Bound on the outbound connect the master makes towards an announced
/// slave, so a black-holed address cannot stall the loop for long.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Readiness over a dynamic connection set: resolves with the next event
/// from any connection, or never if the set is empty. Cancel-safe because
/// `Connection::recv` is.
pub(crate) async fn next_conn_event(
    conns: &mut HashMap<SocketAddr, Connection>,
) -> (SocketAddr, Received) {
    if conns.is_empty() {
        return futures::future::pending().await;
    }
    let recvs: Vec<_> = conns
        .iter_mut()
        .map(|(addr, conn)| {
            let addr = *addr;
            Box::pin(async move { (addr, conn.recv().await) })
        })
        .collect();
    futures::future::select_all(recvs).await.0
}
