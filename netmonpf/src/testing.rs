//! Deterministic stand-ins for kernel probes.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TelemetryError};
use crate::probes::{ConnectionEvents, PacketCounter, ProbeHandle, ProbeLoader};
use netmonpf_common::{TASK_COMM_LEN, TcpConnectEvent};

#[derive(Default)]
pub struct ProbeStats {
    pub attached: AtomicUsize,
    pub released: AtomicUsize,
    pub reads: Mutex<Vec<Instant>>,
}

impl ProbeStats {
    pub fn attached(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn read_times(&self) -> Vec<Instant> {
        self.reads.lock().unwrap().clone()
    }
}

/// Plays back cumulative counter readings; `None` is a failed read.
pub struct ScriptedCounter {
    readings: VecDeque<Option<u64>>,
    cancel_after: Option<(usize, CancellationToken)>,
    stats: Arc<ProbeStats>,
    released: bool,
}

impl ScriptedCounter {
    pub fn new(readings: impl IntoIterator<Item = Option<u64>>) -> Self {
        Self::with_stats(readings, Arc::default())
    }

    pub fn with_stats(
        readings: impl IntoIterator<Item = Option<u64>>,
        stats: Arc<ProbeStats>,
    ) -> Self {
        stats.attached.fetch_add(1, Ordering::SeqCst);
        Self {
            readings: readings.into_iter().collect(),
            cancel_after: None,
            stats,
            released: false,
        }
    }

    /// Constant rate: cumulative readings k, 2k, 3k, ...
    pub fn constant(per_second: u64, ticks: u64) -> Self {
        Self::new((1..=ticks).map(|i| Some(i * per_second)))
    }

    /// Fire `token` right after the `reads`-th read.
    pub fn cancel_after(mut self, reads: usize, token: CancellationToken) -> Self {
        self.cancel_after = Some((reads, token));
        self
    }

    pub fn stats(&self) -> Arc<ProbeStats> {
        self.stats.clone()
    }
}

impl PacketCounter for ScriptedCounter {
    fn read_counter(&mut self) -> Result<u64> {
        let reads = {
            let mut reads = self.stats.reads.lock().unwrap();
            reads.push(Instant::now());
            reads.len()
        };
        if let Some((after, token)) = &self.cancel_after {
            if reads == *after {
                token.cancel();
            }
        }
        match self.readings.pop_front() {
            Some(Some(value)) => Ok(value),
            Some(None) => Err(TelemetryError::read("scripted read failure")),
            None => Err(TelemetryError::read("script exhausted")),
        }
    }
}

impl ProbeHandle for ScriptedCounter {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.stats.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for ScriptedCounter {
    fn drop(&mut self) {
        self.release();
    }
}

/// Event source backed by a channel; the test keeps the sender.
pub struct ChannelEvents {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    stats: Arc<ProbeStats>,
    released: bool,
}

impl ChannelEvents {
    pub fn new() -> (mpsc::UnboundedSender<Vec<u8>>, Self) {
        Self::with_stats(Arc::default())
    }

    pub fn with_stats(stats: Arc<ProbeStats>) -> (mpsc::UnboundedSender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self::from_receiver(rx, stats))
    }

    fn from_receiver(rx: mpsc::UnboundedReceiver<Vec<u8>>, stats: Arc<ProbeStats>) -> Self {
        stats.attached.fetch_add(1, Ordering::SeqCst);
        Self {
            rx,
            stats,
            released: false,
        }
    }

    pub fn pending(&self) -> usize {
        self.rx.len()
    }
}

impl ConnectionEvents for ChannelEvents {
    async fn next_event(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.rx.recv().await)
    }
}

impl ProbeHandle for ChannelEvents {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.rx.close();
            self.stats.released.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_released(&self) -> bool {
        self.released
    }
}

impl Drop for ChannelEvents {
    fn drop(&mut self) {
        self.release();
    }
}

/// Hands out scripted probes for a fixed set of interface names.
pub struct FakeLoader {
    interfaces: Vec<String>,
    readings: Vec<Option<u64>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    pub stats: Arc<ProbeStats>,
}

impl FakeLoader {
    pub fn new(interfaces: &[&str]) -> Self {
        Self {
            interfaces: interfaces.iter().map(|s| s.to_string()).collect(),
            readings: Vec::new(),
            events: Mutex::new(None),
            stats: Arc::default(),
        }
    }

    pub fn with_readings(mut self, readings: impl IntoIterator<Item = Option<u64>>) -> Self {
        self.readings = readings.into_iter().collect();
        self
    }

    /// Returns the sender feeding the next connection watch.
    pub fn with_events(self) -> (mpsc::UnboundedSender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events.lock().unwrap() = Some(rx);
        (tx, self)
    }

    fn check_interface(&self, interface: &str) -> Result<()> {
        if self.interfaces.iter().any(|i| i == interface) {
            Ok(())
        } else {
            Err(TelemetryError::InterfaceNotFound(interface.to_string()))
        }
    }
}

impl ProbeLoader for FakeLoader {
    type Counter = ScriptedCounter;
    type Events = ChannelEvents;

    fn attach_packet_counter(&self, interface: &str) -> Result<Self::Counter> {
        self.check_interface(interface)?;
        Ok(ScriptedCounter::with_stats(
            self.readings.clone(),
            self.stats.clone(),
        ))
    }

    fn attach_connection_watch(&self, interface: &str) -> Result<Self::Events> {
        self.check_interface(interface)?;
        let rx = self
            .events
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| TelemetryError::attach(interface, "no scripted event source"))?;
        Ok(ChannelEvents::from_receiver(rx, self.stats.clone()))
    }
}

pub fn comm(name: &str) -> [u8; TASK_COMM_LEN] {
    let mut comm = [0u8; TASK_COMM_LEN];
    comm[..name.len()].copy_from_slice(name.as_bytes());
    comm
}

/// Raw record exactly as the kernel probe lays it out.
pub fn encode_event(event: &TcpConnectEvent) -> Vec<u8> {
    let ptr = event as *const TcpConnectEvent as *const u8;
    unsafe { std::slice::from_raw_parts(ptr, std::mem::size_of::<TcpConnectEvent>()) }.to_vec()
}

pub fn curl_event() -> TcpConnectEvent {
    TcpConnectEvent {
        comm: comm("curl"),
        saddr: 0x0A00_0001,
        daddr: 0x0808_0808,
        sport: 443,
        dport: 51000,
    }
}
