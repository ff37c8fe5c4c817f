//! Conversions from librqbit statistics and metadata into engine vocabulary.

use std::path::{Component, Path};

use librqbit::TorrentStats;
use magnetar_core::{EngineEvent, ProgressSample};

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;

/// The parts of a librqbit statistics sample Magnetar cares about.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct StatsView {
    pub(crate) downloaded: u64,
    pub(crate) total: u64,
    pub(crate) download_mib_s: f64,
    pub(crate) upload_mib_s: f64,
    pub(crate) peers: u32,
    pub(crate) finished: bool,
    pub(crate) error: Option<String>,
}

impl StatsView {
    pub(crate) fn from_stats(stats: &TorrentStats) -> Self {
        let (download_mib_s, upload_mib_s, peers) =
            stats.live.as_ref().map_or((0.0, 0.0, 0), |live| {
                (
                    live.download_speed.mbps,
                    live.upload_speed.mbps,
                    u32::try_from(live.snapshot.peer_stats.live).unwrap_or(u32::MAX),
                )
            });
        Self {
            downloaded: stats.progress_bytes,
            total: stats.total_bytes,
            download_mib_s,
            upload_mib_s,
            peers,
            finished: stats.finished,
            error: stats.error.clone(),
        }
    }

    pub(crate) fn sample(&self) -> ProgressSample {
        ProgressSample {
            downloaded: self.downloaded,
            total: self.total,
            download_speed: bytes_per_second(self.download_mib_s),
            upload_speed: bytes_per_second(self.upload_mib_s),
            peers: self.peers,
        }
    }
}

/// Events for one statistics sample, and whether polling should stop.
pub(crate) fn poll_events(view: &StatsView) -> (Vec<EngineEvent>, bool) {
    if let Some(message) = &view.error {
        return (
            vec![EngineEvent::Error {
                message: message.clone(),
            }],
            true,
        );
    }
    let mut events = vec![EngineEvent::Progress(view.sample())];
    if view.finished {
        events.push(EngineEvent::Completed);
    }
    (events, view.finished)
}

/// librqbit reports speeds in MiB/s.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
pub(crate) fn bytes_per_second(mib_per_second: f64) -> u64 {
    if !mib_per_second.is_finite() || mib_per_second <= 0.0 {
        return 0;
    }
    let bytes = (mib_per_second * BYTES_PER_MIB).round();
    if bytes >= u64::MAX as f64 {
        u64::MAX
    } else {
        bytes as u64
    }
}

/// `/`-separated form of a torrent-relative path.
pub(crate) fn relative_path(path: &Path) -> String {
    path.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
