use aya::{
    Ebpf,
    maps::{MapData, RingBuf},
    programs::{TracePoint, trace_point::TracePointLinkId},
};
use log::{info, warn};
use netmonpf_common::{TCP_CONNECT_EVENTS_MAP, TCP_STATE_PROGRAM};
use tokio::io::unix::AsyncFd;

use crate::error::{Result, TelemetryError};
use crate::probes::{ConnectionEvents, ProbeHandle, load_object, resolve_interface};

const TRACEPOINT_CATEGORY: &str = "sock";
const TRACEPOINT_NAME: &str = "inet_sock_set_state";

/// Tracepoint on TCP state transitions, reporting outbound IPv4 connections
/// when they reach ESTABLISHED.
///
/// The hook is host-wide: the interface is validated but does not filter.
pub struct TcpConnectEvents {
    interface: String,
    events: Option<AsyncFd<RingBuf<MapData>>>,
    link: Option<TracePointLinkId>,
    bpf: Option<Ebpf>,
}

impl TcpConnectEvents {
    pub(crate) fn attach(bytecode: &[u8], interface: &str) -> Result<Self> {
        resolve_interface(interface)?;
        let mut bpf = load_object(bytecode)?;

        let program: &mut TracePoint = bpf
            .program_mut(TCP_STATE_PROGRAM)
            .ok_or_else(|| TelemetryError::load(format!("program {TCP_STATE_PROGRAM} not found")))?
            .try_into()
            .map_err(TelemetryError::load)?;
        program.load().map_err(TelemetryError::load)?;

        let link = program
            .attach(TRACEPOINT_CATEGORY, TRACEPOINT_NAME)
            .map_err(|e| TelemetryError::attach(interface, e))?;

        let map = bpf.take_map(TCP_CONNECT_EVENTS_MAP).ok_or_else(|| {
            TelemetryError::load(format!("map {TCP_CONNECT_EVENTS_MAP} not found"))
        })?;
        let ring_buf = RingBuf::try_from(map).map_err(TelemetryError::load)?;
        // SAFETY: the ring buffer owns its map fd for as long as it lives.
        let events = unsafe { AsyncFd::register(ring_buf) }
            .map_err(|e| TelemetryError::attach(interface, e))?;

        info!("Attached tracepoint {TRACEPOINT_CATEGORY}:{TRACEPOINT_NAME} for {interface}");

        Ok(Self {
            interface: interface.to_string(),
            events: Some(events),
            link: Some(link),
            bpf: Some(bpf),
        })
    }
}

impl ConnectionEvents for TcpConnectEvents {
    async fn next_event(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(events) = self.events.as_mut() else {
            return Ok(None);
        };

        loop {
            let mut guard = events.readable_mut().await.map_err(TelemetryError::read)?;
            // One record per call; anything behind it stays in the ring.
            if let Some(item) = guard.get_inner_mut().next() {
                return Ok(Some(item.to_vec()));
            }
            guard.clear_ready();
        }
    }
}

impl ProbeHandle for TcpConnectEvents {
    fn release(&mut self) {
        let Some(mut bpf) = self.bpf.take() else {
            return;
        };
        self.events = None;

        if let Some(link) = self.link.take() {
            let program = bpf
                .program_mut(TCP_STATE_PROGRAM)
                .and_then(|p| <&mut TracePoint>::try_from(p).ok());
            match program {
                Some(program) => {
                    if let Err(e) = program.detach(link) {
                        warn!("Failed to detach {TRACEPOINT_NAME} tracepoint: {e}");
                    }
                }
                None => warn!("Tracepoint program vanished before detach"),
            }
        }

        drop(bpf);
        info!("Released TCP connect watch for {}", self.interface);
    }

    fn is_released(&self) -> bool {
        self.bpf.is_none()
    }
}

impl Drop for TcpConnectEvents {
    fn drop(&mut self) {
        self.release();
    }
}
