//! Inbound packet rate over a bounded window of one-second ticks.

use std::time::Duration;

use log::{debug, info};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TelemetryError};
use crate::probes::PacketCounter;

pub const DEFAULT_WINDOW_SECS: u64 = 5;

const TICK: Duration = Duration::from_secs(1);

/// Aggregation state for one `incoming` request.
#[derive(Debug)]
pub struct SamplingSession {
    target_ticks: u64,
    ticks: u64,
    total_packets: u64,
    last_reading: u64,
}

impl SamplingSession {
    pub fn new(window_secs: u64) -> Result<Self> {
        if window_secs == 0 {
            return Err(TelemetryError::InvalidWindow(window_secs));
        }
        Ok(Self {
            target_ticks: window_secs,
            ticks: 0,
            total_packets: 0,
            // The counter map starts zeroed when the probe is attached.
            last_reading: 0,
        })
    }

    /// Attribute the packets seen since the previous tick to this tick.
    pub fn record(&mut self, reading: u64) -> Result<u64> {
        let delta = reading.checked_sub(self.last_reading).ok_or_else(|| {
            TelemetryError::read(format!(
                "packet counter went backwards ({} -> {reading})",
                self.last_reading
            ))
        })?;
        self.last_reading = reading;
        self.total_packets += delta;
        self.ticks += 1;
        Ok(delta)
    }

    pub fn is_complete(&self) -> bool {
        self.ticks >= self.target_ticks
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets
    }

    /// Packets per second over the requested window, even if cut short.
    pub fn rate(&self) -> f32 {
        if self.ticks == 0 {
            return 0.0;
        }
        self.total_packets as f32 / self.target_ticks as f32
    }
}

/// Sample `counter` once per second for `window_secs` ticks.
///
/// Cancellation wins over a tick that becomes ready at the same time and
/// yields the rate from the ticks completed so far. A failed read ends the
/// session with an error.
pub async fn sample_rate<C: PacketCounter>(
    counter: &mut C,
    window_secs: u64,
    cancel: &CancellationToken,
) -> Result<f32> {
    let mut session = SamplingSession::new(window_secs)?;

    let mut ticker = interval_at(Instant::now() + TICK, TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !session.is_complete() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(
                    "Sampling cancelled after {}/{} ticks",
                    session.ticks(),
                    window_secs
                );
                break;
            }
            _ = ticker.tick() => {
                let reading = counter.read_counter()?;
                let delta = session.record(reading)?;
                debug!("tick {}: +{} packets (cumulative {})", session.ticks(), delta, reading);
            }
        }
    }

    Ok(session.rate())
}
