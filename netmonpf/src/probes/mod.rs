//! Kernel probe attachment.
//!
//! A probe is attached per session and owns everything it loaded into the
//! kernel. Sessions only see the capabilities below, so the sampling and
//! watching logic never touches aya directly.

use std::{ffi::CString, future::Future};

use aya::Ebpf;
use log::warn;

use crate::error::{Result, TelemetryError};

pub mod packet_counter;
pub mod tcp_connect;

pub use packet_counter::XdpPacketCounter;
pub use tcp_connect::TcpConnectEvents;

/// Anything holding kernel-side hooks. `release` is idempotent and also runs on drop.
pub trait ProbeHandle {
    fn release(&mut self);

    fn is_released(&self) -> bool;
}

/// Cumulative packet counter maintained by the kernel probe.
pub trait PacketCounter: ProbeHandle {
    fn read_counter(&mut self) -> Result<u64>;
}

/// Raw connection records pushed by the kernel probe.
///
/// Resolves to `Ok(None)` once the channel is closed. Must be cancel-safe:
/// dropping the future before it resolves loses no record.
pub trait ConnectionEvents: ProbeHandle {
    fn next_event(&mut self) -> impl Future<Output = Result<Option<Vec<u8>>>>;
}

pub trait ProbeLoader {
    type Counter: PacketCounter;
    type Events: ConnectionEvents;

    fn attach_packet_counter(&self, interface: &str) -> Result<Self::Counter>;

    fn attach_connection_watch(&self, interface: &str) -> Result<Self::Events>;
}

/// Loads the embedded probe object once per attachment.
#[derive(Clone, Copy)]
pub struct AyaProbeLoader {
    bytecode: &'static [u8],
}

impl AyaProbeLoader {
    pub fn new(bytecode: &'static [u8]) -> Self {
        Self { bytecode }
    }
}

impl ProbeLoader for AyaProbeLoader {
    type Counter = XdpPacketCounter;
    type Events = TcpConnectEvents;

    fn attach_packet_counter(&self, interface: &str) -> Result<Self::Counter> {
        XdpPacketCounter::attach(self.bytecode, interface)
    }

    fn attach_connection_watch(&self, interface: &str) -> Result<Self::Events> {
        TcpConnectEvents::attach(self.bytecode, interface)
    }
}

/// Resolve an interface name to its index.
pub fn resolve_interface(name: &str) -> Result<u32> {
    let c_name =
        CString::new(name).map_err(|_| TelemetryError::InterfaceNotFound(name.to_string()))?;
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        return Err(TelemetryError::InterfaceNotFound(name.to_string()));
    }
    Ok(index)
}

pub(crate) fn load_object(bytecode: &[u8]) -> Result<Ebpf> {
    Ebpf::load(bytecode).map_err(TelemetryError::load)
}

/// eBPF maps are stored in locked kernel memory. Older kernels without memcg
/// accounting refuse to create them under the default RLIMIT_MEMLOCK.
pub fn bump_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!("Failed to increase rlimit");
    }
}
