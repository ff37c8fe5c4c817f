//! `SwarmEngine` implementation over the simulated swarm.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use bytes::Bytes;
use magnetar_core::{
    ByteStream, EVENT_CHANNEL_CAPACITY, EngineHandle, EngineSession, EngineStart, Locator,
    ReleaseOptions, SourceError, SourceResponse, SwarmEngine, respond_with_range,
};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

use crate::catalog::{SimulatedTorrent, fill};
use crate::command::{Transfer, WorkerCommand};
use crate::types::SimulationConfig;
use crate::worker::{self, Worker};

const COMMAND_BUFFER: usize = 16;

#[derive(Debug, Clone)]
enum CatalogEntry {
    Torrent(Arc<SimulatedTorrent>),
    Unreachable(String),
}

/// Engine that resolves locators against an in-memory catalog and fakes the transfer.
#[derive(Debug, Default)]
pub struct SimulatedEngine {
    config: SimulationConfig,
    catalog: Mutex<HashMap<String, CatalogEntry>>,
    generate_unknown: bool,
}

impl SimulatedEngine {
    /// Engine pacing transfers with `config`.
    #[must_use]
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            catalog: Mutex::new(HashMap::new()),
            generate_unknown: false,
        }
    }

    /// Serve generated stand-in content for locators missing from the catalog.
    ///
    /// Without this, starting an unknown locator fails.
    #[must_use]
    pub const fn with_generated_content(mut self) -> Self {
        self.generate_unknown = true;
        self
    }

    /// Serve `torrent` for the session id `session_id`.
    #[must_use]
    pub fn with_torrent(self, session_id: &str, torrent: SimulatedTorrent) -> Self {
        self.insert(session_id, CatalogEntry::Torrent(Arc::new(torrent)));
        self
    }

    /// Fail to start sessions for `session_id` with `reason`.
    #[must_use]
    pub fn with_start_failure(self, session_id: &str, reason: impl Into<String>) -> Self {
        self.insert(session_id, CatalogEntry::Unreachable(reason.into()));
        self
    }

    fn insert(&self, session_id: &str, entry: CatalogEntry) {
        self.catalog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_ascii_lowercase(), entry);
    }

    fn lookup(&self, request: &EngineStart) -> Result<Arc<SimulatedTorrent>> {
        let entry = self
            .catalog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&request.session_id)
            .cloned();
        match entry {
            Some(CatalogEntry::Torrent(torrent)) => Ok(torrent),
            Some(CatalogEntry::Unreachable(reason)) => bail!("{reason}"),
            None if !self.generate_unknown => {
                bail!("torrent {} is not in the simulated catalog", request.session_id)
            }
            None => {
                let display_name = Locator::parse(&request.locator)
                    .ok()
                    .and_then(|locator| locator.display_name().map(str::to_string));
                Ok(Arc::new(SimulatedTorrent::generated(
                    &request.session_id,
                    display_name.as_deref(),
                )))
            }
        }
    }
}

#[async_trait]
impl SwarmEngine for SimulatedEngine {
    async fn start(&self, request: EngineStart) -> Result<EngineSession> {
        let torrent = self.lookup(&request)?;
        let data_dir = request.download_dir.join(&request.session_id);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (progress_tx, progress_rx) = watch::channel(Transfer::default());

        worker::spawn(
            Worker::new(
                request.session_id.clone(),
                Arc::clone(&torrent),
                self.config,
                data_dir.clone(),
                events_tx,
                progress_tx,
            ),
            commands_rx,
        );
        info!(session_id = %request.session_id, files = torrent.files.len(), "simulated session started");

        Ok(EngineSession {
            handle: Arc::new(SimulatedHandle {
                session_id: request.session_id,
                torrent,
                chunk_size: self.config.chunk_size.max(1),
                data_dir,
                commands: commands_tx,
                progress: progress_rx,
                released: AtomicBool::new(false),
            }),
            events: events_rx,
        })
    }
}

/// Control handle for one simulated session.
#[derive(Debug)]
pub struct SimulatedHandle {
    session_id: String,
    torrent: Arc<SimulatedTorrent>,
    chunk_size: usize,
    data_dir: PathBuf,
    commands: mpsc::Sender<WorkerCommand>,
    progress: watch::Receiver<Transfer>,
    released: AtomicBool,
}

impl SimulatedHandle {
    async fn send_command(&self, command: WorkerCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|err| anyhow!("failed to enqueue simulated session command: {err}"))
    }
}

#[async_trait]
impl EngineHandle for SimulatedHandle {
    async fn open_file(
        &self,
        file_index: usize,
        range: Option<&str>,
    ) -> Result<SourceResponse, SourceError> {
        let (metadata, released, available) = {
            let transfer = self.progress.borrow();
            (transfer.metadata, transfer.released, transfer.available(file_index))
        };
        if released {
            return Err(SourceError::Failed {
                operation: "simulated.open_file",
                source: anyhow!("session already released"),
            });
        }
        if !metadata {
            return Err(SourceError::NotReady);
        }
        let file = self
            .torrent
            .files
            .get(file_index)
            .ok_or(SourceError::UnknownFile { file_index })?;
        if available == 0 {
            return Err(SourceError::NotReady);
        }
        let progress = self.progress.clone();
        let chunk_size = self.chunk_size;
        Ok(respond_with_range(file.size, range, move |start, len| {
            read_file(progress, file_index, start, len, chunk_size)
        }))
    }

    async fn prioritize(&self, file_index: usize) -> Result<()> {
        if file_index >= self.torrent.files.len() {
            bail!("file index {file_index} is outside the torrent");
        }
        self.send_command(WorkerCommand::Prioritize { file_index })
            .await
    }

    async fn release(&self, options: ReleaseOptions) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            debug!(session_id = %self.session_id, "simulated session already released");
            return Ok(());
        }
        let (respond_to, rx) = oneshot::channel();
        if self
            .send_command(WorkerCommand::Release {
                options,
                respond_to,
            })
            .await
            .is_err()
        {
            if options.delete_files {
                worker::remove_data(&self.data_dir).await?;
            }
            return Ok(());
        }
        rx.await
            .map_err(|err| anyhow!("simulated session release response dropped: {err}"))?
    }
}

/// Stream `len` bytes of `file_index` from `start`, waiting for bytes still in flight.
fn read_file(
    mut progress: watch::Receiver<Transfer>,
    file_index: usize,
    start: u64,
    len: u64,
    chunk_size: usize,
) -> ByteStream {
    Box::pin(async_stream::try_stream! {
        let end = start + len;
        let mut position = start;
        while position < end {
            let available = progress
                .wait_for(|t| t.released || t.available(file_index) > position)
                .await
                .map(|transfer| transfer.available(file_index));
            let available = available.map_err(io::Error::other)?;
            if available <= position {
                Err::<(), _>(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "session released before the file was fetched",
                ))?;
            }
            let upto = end.min(available).min(position + chunk_size as u64);
            let mut buf = vec![0_u8; usize::try_from(upto - position).unwrap_or(chunk_size)];
            fill(file_index, position, &mut buf);
            position = upto;
            yield Bytes::from(buf);
        }
    })
}
