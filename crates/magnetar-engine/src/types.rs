//! Tunables for the simulated transfer.

use std::time::Duration;

/// Pace and shape of a simulated download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationConfig {
    /// Time between progress steps.
    pub tick: Duration,
    /// Bytes fetched per step.
    pub bytes_per_tick: u64,
    /// Steps spent resolving metadata.
    pub metadata_ticks: u32,
    /// Peer count reported with progress.
    pub peers: u32,
    /// Largest chunk handed to a reader.
    pub chunk_size: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(250),
            bytes_per_tick: 2 * 1024 * 1024,
            metadata_ticks: 4,
            peers: 12,
            chunk_size: 64 * 1024,
        }
    }
}

impl SimulationConfig {
    /// Fast pace for tests and demos.
    #[must_use]
    pub const fn quick() -> Self {
        Self {
            tick: Duration::from_millis(5),
            bytes_per_tick: 4096,
            metadata_ticks: 1,
            peers: 3,
            chunk_size: 1024,
        }
    }

    pub(crate) fn speed(&self) -> u64 {
        let tick_ms = u64::try_from(self.tick.as_millis()).unwrap_or(u64::MAX).max(1);
        self.bytes_per_tick.saturating_mul(1000) / tick_ms
    }
}
