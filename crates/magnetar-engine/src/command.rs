//! Messages from a session handle to its worker task.

use anyhow::Result;
use magnetar_core::ReleaseOptions;
use tokio::sync::oneshot;

/// Commands accepted by a simulated session worker.
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    /// Move a file to the front of the download order.
    Prioritize {
        /// File to fetch first.
        file_index: usize,
    },
    /// Stop the worker, optionally deleting its data.
    Release {
        /// Release behaviour.
        options: ReleaseOptions,
        /// Completion signal.
        respond_to: oneshot::Sender<Result<()>>,
    },
}

/// What the worker has fetched so far, shared with readers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Transfer {
    /// Metadata has been delivered.
    pub(crate) metadata: bool,
    /// Contiguous bytes available at the start of each file.
    pub(crate) downloaded: Vec<u64>,
    /// The worker has stopped; no more bytes will arrive.
    pub(crate) released: bool,
}

impl Transfer {
    pub(crate) fn available(&self, file_index: usize) -> u64 {
        self.downloaded.get(file_index).copied().unwrap_or_default()
    }
}
