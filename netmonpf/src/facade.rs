use std::{fmt, str::FromStr, time::Duration};

use log::info;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TelemetryError};
use crate::probes::{ProbeHandle, ProbeLoader};
use crate::sampler::{DEFAULT_WINDOW_SECS, sample_rate};
use crate::watcher::{ConnectionEvent, await_connection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Inbound packets per second on an interface.
    Incoming,
    /// First newly established outbound TCP connection.
    Outgoing,
}

impl Operation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Incoming => "incoming",
            Operation::Outgoing => "outgoing",
        }
    }
}

impl FromStr for Operation {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "incoming" => Ok(Operation::Incoming),
            "outgoing" => Ok(Operation::Outgoing),
            other => Err(TelemetryError::UnknownOperation(other.to_string())),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryReport {
    Rate(f32),
    Connection(ConnectionEvent),
}

impl fmt::Display for TelemetryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryReport::Rate(rate) => write!(f, "{rate:.2}"),
            TelemetryReport::Connection(event) => fmt::Display::fmt(event, f),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FacadeConfig {
    /// Used when a request leaves the interface empty.
    pub default_interface: Option<String>,
    /// Used when a request leaves the duration unset.
    pub default_window_secs: Option<u64>,
    /// Upper bound on an `outgoing` wait. Unbounded when unset.
    pub connect_timeout: Option<Duration>,
}

/// Entry point for tool invocations. Each call owns its probe from attach
/// to release.
pub struct TelemetryFacade<L> {
    loader: L,
    config: FacadeConfig,
}

impl<L: ProbeLoader> TelemetryFacade<L> {
    pub fn new(loader: L, config: FacadeConfig) -> Self {
        Self { loader, config }
    }

    pub async fn invoke(
        &self,
        operation: &str,
        interface: &str,
        duration_secs: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<TelemetryReport> {
        let operation: Operation = operation.parse()?;
        let interface = self.resolve_interface_name(interface)?;
        info!("{operation} on {interface}");

        match operation {
            Operation::Incoming => {
                let window = duration_secs
                    .or(self.config.default_window_secs)
                    .unwrap_or(DEFAULT_WINDOW_SECS);
                if window == 0 {
                    return Err(TelemetryError::InvalidWindow(window));
                }

                let mut counter = self.loader.attach_packet_counter(interface)?;
                info!("Sampling incoming packets on {interface} for {window}s");
                let result = sample_rate(&mut counter, window, cancel).await;
                counter.release();
                result.map(TelemetryReport::Rate)
            }
            Operation::Outgoing => {
                let mut events = self.loader.attach_connection_watch(interface)?;
                info!("Waiting for an outbound TCP connection");
                let result = match self.config.connect_timeout {
                    Some(limit) => {
                        tokio::time::timeout(limit, await_connection(&mut events, cancel))
                            .await
                            .unwrap_or(Err(TelemetryError::Timeout(limit)))
                    }
                    None => await_connection(&mut events, cancel).await,
                };
                events.release();
                result.map(TelemetryReport::Connection)
            }
        }
    }

    fn resolve_interface_name<'a>(&'a self, requested: &'a str) -> Result<&'a str> {
        let requested = requested.trim();
        if !requested.is_empty() {
            return Ok(requested);
        }
        self.config
            .default_interface
            .as_deref()
            .filter(|name| !name.is_empty())
            .ok_or(TelemetryError::MissingInterface)
    }
}
