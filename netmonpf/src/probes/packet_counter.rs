use aya::{
    Ebpf,
    maps::{Array, MapData},
    programs::{Xdp, XdpFlags, xdp::XdpLinkId},
};
use log::{debug, info, warn};
use netmonpf_common::{COUNT_PACKETS_PROGRAM, PKT_COUNT_KEY, PKT_COUNT_MAP};

use crate::error::{Result, TelemetryError};
use crate::probes::{PacketCounter, ProbeHandle, load_object, resolve_interface};

/// XDP program counting ingress packets on one interface.
pub struct XdpPacketCounter {
    interface: String,
    counter: Option<Array<MapData, u64>>,
    link: Option<XdpLinkId>,
    bpf: Option<Ebpf>,
}

impl XdpPacketCounter {
    pub(crate) fn attach(bytecode: &[u8], interface: &str) -> Result<Self> {
        let if_index = resolve_interface(interface)?;
        let mut bpf = load_object(bytecode)?;

        let program: &mut Xdp = bpf
            .program_mut(COUNT_PACKETS_PROGRAM)
            .ok_or_else(|| {
                TelemetryError::load(format!("program {COUNT_PACKETS_PROGRAM} not found"))
            })?
            .try_into()
            .map_err(TelemetryError::load)?;
        program.load().map_err(TelemetryError::load)?;

        // Dropping `bpf` on any error below detaches and unloads what was set up.
        let link = program
            .attach_to_if_index(if_index, XdpFlags::default())
            .map_err(|e| TelemetryError::attach(interface, e))?;

        let map = bpf
            .take_map(PKT_COUNT_MAP)
            .ok_or_else(|| TelemetryError::load(format!("map {PKT_COUNT_MAP} not found")))?;
        let counter = Array::try_from(map).map_err(TelemetryError::load)?;

        info!("Attached XDP packet counter to {interface} (ifindex {if_index})");

        Ok(Self {
            interface: interface.to_string(),
            counter: Some(counter),
            link: Some(link),
            bpf: Some(bpf),
        })
    }
}

impl PacketCounter for XdpPacketCounter {
    fn read_counter(&mut self) -> Result<u64> {
        let counter = self
            .counter
            .as_ref()
            .ok_or_else(|| TelemetryError::read("packet counter already released"))?;
        let count = counter
            .get(&PKT_COUNT_KEY, 0)
            .map_err(TelemetryError::read)?;
        debug!("{PKT_COUNT_MAP}[{PKT_COUNT_KEY}] = {count}");
        Ok(count)
    }
}

impl ProbeHandle for XdpPacketCounter {
    fn release(&mut self) {
        let Some(mut bpf) = self.bpf.take() else {
            return;
        };
        self.counter = None;

        if let Some(link) = self.link.take() {
            let program = bpf
                .program_mut(COUNT_PACKETS_PROGRAM)
                .and_then(|p| <&mut Xdp>::try_from(p).ok());
            match program {
                Some(program) => {
                    if let Err(e) = program.detach(link) {
                        warn!("Failed to detach XDP program from {}: {}", self.interface, e);
                    }
                }
                None => warn!("XDP program vanished before detach on {}", self.interface),
            }
        }

        drop(bpf);
        info!("Released XDP packet counter on {}", self.interface);
    }

    fn is_released(&self) -> bool {
        self.bpf.is_none()
    }
}

impl Drop for XdpPacketCounter {
    fn drop(&mut self) {
        self.release();
    }
}
