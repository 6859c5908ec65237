use std::time::Duration;

use thiserror::Error;

/// Every way a telemetry request can fail. None of these abort the process.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("interface '{0}' not found")]
    InterfaceNotFound(String),

    #[error("no interface given and no default interface configured")]
    MissingInterface,

    #[error("failed to load probe program: {0}")]
    ProbeLoad(String),

    #[error("failed to attach probe to {interface}: {reason}")]
    Attach { interface: String, reason: String },

    #[error("telemetry read failed: {0}")]
    TelemetryRead(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("invalid sampling window: {0}s (must be at least 1s)")]
    InvalidWindow(u64),

    #[error("connection watch cancelled")]
    Cancelled,

    #[error("no connection observed within {0:?}")]
    Timeout(Duration),
}

impl TelemetryError {
    pub(crate) fn load(err: impl std::fmt::Display) -> Self {
        Self::ProbeLoad(err.to_string())
    }

    pub(crate) fn attach(interface: &str, err: impl std::fmt::Display) -> Self {
        Self::Attach {
            interface: interface.to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn read(err: impl std::fmt::Display) -> Self {
        Self::TelemetryRead(err.to_string())
    }
}

pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;
