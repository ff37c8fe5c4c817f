//! Engine tuning knobs.

use std::time::Duration;

/// Settings applied to every torrent started by [`crate::RqbitEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RqbitConfig {
    /// Period between statistics samples.
    pub poll_interval: Duration,
}

impl Default for RqbitConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}
