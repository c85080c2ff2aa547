//! Listening-port allocation for supervised instances.
//!
//! A candidate port is claimed in a process-wide reservation set and then
//! bound on the target host. The listener is held until just before the child
//! is spawned, and the reservation until the supervisor releases it, so two
//! supervisors in one process never receive the same port.

use std::net::TcpListener;
use std::ops::Range;
use std::sync::OnceLock;

use color_eyre::eyre::eyre;
use dashmap::DashSet;
use tracing::debug;

use crate::error::{SupervisorError, SupervisorResult};
use crate::observability::SUPERVISOR_TARGET;

/// Ports probed when no port is configured.
pub const DEFAULT_PORT_RANGE: Range<u16> = 27017..28000;

fn reserved_ports() -> &'static DashSet<u16> {
    static RESERVED: OnceLock<DashSet<u16>> = OnceLock::new();
    RESERVED.get_or_init(DashSet::new)
}

/// A port assigned to one supervisor.
#[derive(Debug)]
pub(crate) struct PortReservation {
    port: u16,
    listener: Option<TcpListener>,
    claimed: bool,
}

impl PortReservation {
    /// Uses a caller-configured port without probing or reserving it.
    pub(crate) const fn fixed(port: u16) -> Self {
        Self {
            port,
            listener: None,
            claimed: false,
        }
    }

    /// Claims the first port in `range` that is unreserved in this process and
    /// bindable on `host`.
    pub(crate) fn allocate(host: &str, range: Range<u16>) -> SupervisorResult<Self> {
        let reserved = reserved_ports();
        for port in range.clone() {
            if !reserved.insert(port) {
                continue;
            }
            match TcpListener::bind((host, port)) {
                Ok(listener) => {
                    debug!(target: SUPERVISOR_TARGET, host, port, "reserved listening port");
                    return Ok(Self {
                        port,
                        listener: Some(listener),
                        claimed: true,
                    });
                }
                Err(_) => {
                    reserved.remove(&port);
                }
            }
        }
        Err(SupervisorError::from(eyre!(
            "no free port available on {host} in {}..{}",
            range.start,
            range.end
        )))
    }

    pub(crate) const fn port(&self) -> u16 {
        self.port
    }

    /// Closes the placeholder listener so the child can bind the port.
    pub(crate) fn release_listener(&mut self) {
        self.listener = None;
    }
}

impl Drop for PortReservation {
    fn drop(&mut self) {
        if self.claimed {
            reserved_ports().remove(&self.port);
        }
    }
}
