//! Single-shot wait for a newly established outbound TCP connection.

use std::{fmt, net::Ipv4Addr};

use log::{debug, info};
use netmonpf_common::TcpConnectEvent;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TelemetryError};
use crate::probes::ConnectionEvents;

/// Decoded connection record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub comm: String,
    pub saddr: Ipv4Addr,
    pub sport: u16,
    pub daddr: Ipv4Addr,
    pub dport: u16,
}

impl ConnectionEvent {
    pub fn decode(record: &[u8]) -> Result<Self> {
        if record.len() < std::mem::size_of::<TcpConnectEvent>() {
            return Err(TelemetryError::read(format!(
                "malformed connection record: {} bytes, expected {}",
                record.len(),
                std::mem::size_of::<TcpConnectEvent>()
            )));
        }
        let raw = unsafe { std::ptr::read_unaligned(record.as_ptr() as *const TcpConnectEvent) };
        Ok(raw.into())
    }
}

impl From<TcpConnectEvent> for ConnectionEvent {
    fn from(raw: TcpConnectEvent) -> Self {
        let len = raw.comm.iter().position(|&b| b == 0).unwrap_or(raw.comm.len());
        Self {
            comm: String::from_utf8_lossy(&raw.comm[..len]).into_owned(),
            saddr: Ipv4Addr::from(raw.saddr),
            sport: raw.sport,
            daddr: Ipv4Addr::from(raw.daddr),
            dport: raw.dport,
        }
    }
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let line = format!(
            "{:<16} {:<15} {:<6} -> {:<15} {:<6}",
            self.comm,
            self.saddr.to_string(),
            self.sport,
            self.daddr.to_string(),
            self.dport,
        );
        f.write_str(line.trim_end())
    }
}

/// Wait for the first record from `events` and decode it.
///
/// Only one record is taken; later ones stay queued on the source.
pub async fn await_connection<E: ConnectionEvents>(
    events: &mut E,
    cancel: &CancellationToken,
) -> Result<ConnectionEvent> {
    let record = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("Connection watch cancelled");
            return Err(TelemetryError::Cancelled);
        }
        record = events.next_event() => record?,
    };

    let record = record.ok_or_else(|| TelemetryError::read("connection event channel closed"))?;
    let event = ConnectionEvent::decode(&record)?;
    debug!("Observed connection {event}");
    Ok(event)
}
