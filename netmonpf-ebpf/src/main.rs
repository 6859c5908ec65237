#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU64, Ordering};

use aya_ebpf::{
    bindings::xdp_action,
    helpers::bpf_get_current_comm,
    macros::{map, tracepoint, xdp},
    maps::{Array, HashMap, RingBuf},
    programs::{TracePointContext, XdpContext},
};
use netmonpf_common::{PKT_COUNT_KEY, TASK_COMM_LEN, TcpConnectEvent};

const AF_INET: u16 = 2;
const IPPROTO_TCP: u16 = 6;

const TCP_ESTABLISHED: i32 = 1;
const TCP_SYN_SENT: i32 = 2;
const TCP_CLOSE: i32 = 7;

const MAX_PENDING_CONNECTS: u32 = 4096;
const EVENTS_RINGBUF_SIZE: u32 = 256 * 1024;

#[map]
static PKT_COUNT: Array<u64> = Array::with_max_entries(1, 0);

/// Process name captured at connect() time, keyed by socket address.
/// The SYN-ACK completing the handshake arrives in softirq context where the
/// current task is unrelated to the socket owner.
#[map]
static PENDING_CONNECTS: HashMap<u64, [u8; TASK_COMM_LEN]> =
    HashMap::with_max_entries(MAX_PENDING_CONNECTS, 0);

#[map]
static TCP_CONNECT_EVENTS: RingBuf = RingBuf::with_byte_size(EVENTS_RINGBUF_SIZE, 0);

#[xdp]
pub fn count_packets(_ctx: XdpContext) -> u32 {
    if let Some(count) = PKT_COUNT.get_ptr_mut(PKT_COUNT_KEY) {
        unsafe { AtomicU64::from_ptr(count) }.fetch_add(1, Ordering::Relaxed);
    }
    xdp_action::XDP_PASS
}

// Layout of sock/inet_sock_set_state after the 8 byte common header:
// skaddr (8) oldstate (16) newstate (20) sport (24) dport (26)
// family (28) protocol (30) saddr[4] (32) daddr[4] (36)
#[tracepoint]
pub fn tcp_state_change(ctx: TracePointContext) -> u32 {
    match try_tcp_state_change(&ctx) {
        Ok(()) => 0,
        Err(ret) => ret,
    }
}

fn try_tcp_state_change(ctx: &TracePointContext) -> Result<(), u32> {
    let family: u16 = unsafe { ctx.read_at(28).map_err(|_| 1u32)? };
    let protocol: u16 = unsafe { ctx.read_at(30).map_err(|_| 1u32)? };
    if family != AF_INET || protocol != IPPROTO_TCP {
        return Ok(());
    }

    let skaddr: u64 = unsafe { ctx.read_at(8).map_err(|_| 1u32)? };
    let oldstate: i32 = unsafe { ctx.read_at(16).map_err(|_| 1u32)? };
    let newstate: i32 = unsafe { ctx.read_at(20).map_err(|_| 1u32)? };

    match (oldstate, newstate) {
        (TCP_CLOSE, TCP_SYN_SENT) => {
            if let Ok(comm) = bpf_get_current_comm() {
                let _ = PENDING_CONNECTS.insert(&skaddr, &comm, 0);
            }
        }
        (TCP_SYN_SENT, TCP_ESTABLISHED) => {
            let comm = unsafe { PENDING_CONNECTS.get(&skaddr) }
                .copied()
                .unwrap_or([0; TASK_COMM_LEN]);
            let _ = PENDING_CONNECTS.remove(&skaddr);

            let sport: u16 = unsafe { ctx.read_at(24).map_err(|_| 1u32)? };
            let dport: u16 = unsafe { ctx.read_at(26).map_err(|_| 1u32)? };
            let saddr: [u8; 4] = unsafe { ctx.read_at(32).map_err(|_| 1u32)? };
            let daddr: [u8; 4] = unsafe { ctx.read_at(36).map_err(|_| 1u32)? };

            if let Some(mut entry) = TCP_CONNECT_EVENTS.reserve::<TcpConnectEvent>(0) {
                entry.write(TcpConnectEvent {
                    comm,
                    saddr: u32::from_be_bytes(saddr),
                    daddr: u32::from_be_bytes(daddr),
                    sport,
                    dport,
                });
                entry.submit(0);
            }
        }
        (TCP_SYN_SENT, TCP_CLOSE) => {
            let _ = PENDING_CONNECTS.remove(&skaddr);
        }
        _ => {}
    }

    Ok(())
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}

#[unsafe(link_section = "license")]
#[unsafe(no_mangle)]
static LICENSE: [u8; 13] = *b"Dual MIT/GPL\0";
