#![no_std]

/// XDP program counting every packet seen on the interface ingress hook.
pub const COUNT_PACKETS_PROGRAM: &str = "count_packets";
/// Tracepoint program reporting outbound IPv4 TCP connections once established.
pub const TCP_STATE_PROGRAM: &str = "tcp_state_change";

pub const PKT_COUNT_MAP: &str = "PKT_COUNT";
pub const TCP_CONNECT_EVENTS_MAP: &str = "TCP_CONNECT_EVENTS";

/// The packet counter lives in a single-slot array at this index.
pub const PKT_COUNT_KEY: u32 = 0;

pub const TASK_COMM_LEN: usize = 16;

/// Emitted once per outbound TCP connection that reaches ESTABLISHED.
///
/// Addresses hold the first octet in the most significant byte, so
/// `Ipv4Addr::from(saddr)` yields the dotted form directly. Ports are host order.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TcpConnectEvent {
    pub comm: [u8; TASK_COMM_LEN],
    pub saddr: u32,
    pub daddr: u32,
    pub sport: u16,
    pub dport: u16,
}

#[cfg(feature = "user")]
unsafe impl aya::Pod for TcpConnectEvent {}
