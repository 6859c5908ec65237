//! Host network telemetry from kernel probes: inbound packet rate on an
//! interface and newly established outbound TCP connections.

pub mod error;
pub mod facade;
pub mod probes;
pub mod sampler;
pub mod settings;
pub mod tool;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use error::TelemetryError;
pub use facade::{FacadeConfig, Operation, TelemetryFacade, TelemetryReport};
pub use probes::AyaProbeLoader;
pub use tool::{ToolRequest, ToolResponse};
pub use watcher::ConnectionEvent;
