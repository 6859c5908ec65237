//! Request and response shapes at the tool-invocation boundary.

use log::warn;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::facade::{TelemetryFacade, TelemetryReport};
use crate::probes::ProbeLoader;

pub const TOOL_NAME: &str = "network-monitor";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ToolRequest {
    pub operation: String,
    /// Empty means the configured default interface.
    #[serde(default)]
    pub interface: String,
    /// Seconds to sample for `incoming`; ignored by `outgoing`.
    #[serde(default)]
    pub duration: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ToolResponse {
    pub text: String,
    #[serde(default)]
    pub is_error: bool,
}

impl From<Result<TelemetryReport>> for ToolResponse {
    fn from(result: Result<TelemetryReport>) -> Self {
        match result {
            Ok(report) => Self {
                text: report.to_string(),
                is_error: false,
            },
            Err(e) => Self {
                text: e.to_string(),
                is_error: true,
            },
        }
    }
}

impl<L: ProbeLoader> TelemetryFacade<L> {
    pub async fn handle_request(
        &self,
        request: &ToolRequest,
        cancel: &CancellationToken,
    ) -> ToolResponse {
        let result = self
            .invoke(
                &request.operation,
                &request.interface,
                request.duration,
                cancel,
            )
            .await;
        if let Err(e) = &result {
            warn!("{TOOL_NAME} {} failed: {e}", request.operation);
        }
        result.into()
    }
}
