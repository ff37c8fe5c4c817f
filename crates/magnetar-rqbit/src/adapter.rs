//! `SwarmEngine` implementation over a librqbit session.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use futures_util::StreamExt;
use librqbit::api::TorrentIdOrHash;
use librqbit::{AddTorrent, AddTorrentOptions, ManagedTorrent, Session, SessionOptions};
use magnetar_core::{
    ByteStream, EVENT_CHANNEL_CAPACITY, EngineEvent, EngineHandle, EngineSession, EngineStart,
    FileEntry, ReleaseOptions, SourceError, SourceResponse, SwarmEngine, respond_with_range,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use crate::convert::{StatsView, poll_events, relative_path};
use crate::types::RqbitConfig;

/// Torrent whose metadata is resolved.
#[derive(Clone)]
struct Resolved {
    torrent: Arc<ManagedTorrent>,
    files: Arc<[FileEntry]>,
}

/// Engine adding every session to one shared librqbit session.
pub struct RqbitEngine {
    session: Arc<Session>,
    config: RqbitConfig,
}

impl std::fmt::Debug for RqbitEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RqbitEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RqbitEngine {
    /// Start a librqbit session writing below `download_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error when librqbit cannot initialise its session (DHT, listeners).
    pub async fn new(download_dir: &Path, config: RqbitConfig) -> Result<Self> {
        let session = Session::new_with_opts(download_dir.to_path_buf(), SessionOptions::default())
            .await
            .context("failed to start librqbit session")?;
        info!(
            download_dir = %download_dir.display(),
            poll_interval_ms = u64::try_from(config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            "librqbit session started"
        );
        Ok(Self { session, config })
    }
}

#[async_trait]
impl SwarmEngine for RqbitEngine {
    async fn start(&self, request: EngineStart) -> Result<EngineSession> {
        let output = request.download_dir.join(&request.session_id);
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (resolved_tx, resolved_rx) = watch::channel(None);
        let session_id = request.session_id.clone();

        let driver = tokio::spawn(drive(
            Arc::clone(&self.session),
            request,
            output.clone(),
            self.config.poll_interval,
            events_tx,
            resolved_tx,
        ));
        debug!(session_id = %session_id, "librqbit torrent driver spawned");

        Ok(EngineSession {
            handle: Arc::new(RqbitHandle {
                session_id,
                session: Arc::clone(&self.session),
                output,
                resolved: resolved_rx,
                driver: Mutex::new(Some(driver)),
                released: AtomicBool::new(false),
            }),
            events: events_rx,
        })
    }
}

async fn drive(
    session: Arc<Session>,
    request: EngineStart,
    output: PathBuf,
    poll_interval: Duration,
    events: mpsc::Sender<EngineEvent>,
    resolved: watch::Sender<Option<Resolved>>,
) {
    let session_id = request.session_id.clone();
    let (torrent, name, files) = match add_torrent(&session, &request, &output).await {
        Ok(added) => added,
        Err(err) => {
            warn!(session_id = %session_id, error = %format!("{err:#}"), "librqbit failed to add torrent");
            let _ = events
                .send(EngineEvent::Error {
                    message: format!("{err:#}"),
                })
                .await;
            return;
        }
    };
    info!(session_id = %session_id, files = files.len(), "torrent metadata resolved");

    resolved.send_replace(Some(Resolved {
        torrent: Arc::clone(&torrent),
        files: files.clone().into(),
    }));
    if events
        .send(EngineEvent::MetadataReady { name, files })
        .await
        .is_err()
    {
        return;
    }

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let view = StatsView::from_stats(&torrent.stats());
        let (batch, done) = poll_events(&view);
        for event in batch {
            if events.send(event).await.is_err() {
                debug!(session_id = %session_id, "event receiver dropped; driver stopping");
                return;
            }
        }
        if done {
            info!(session_id = %session_id, finished = view.finished, "torrent driver finished");
            return;
        }
    }
}

async fn add_torrent(
    session: &Arc<Session>,
    request: &EngineStart,
    output: &Path,
) -> Result<(Arc<ManagedTorrent>, String, Vec<FileEntry>)> {
    let options = AddTorrentOptions {
        output_folder: Some(output.to_string_lossy().into_owned()),
        overwrite: true,
        ..Default::default()
    };
    let response = session
        .add_torrent(AddTorrent::from_url(request.locator.clone()), Some(options))
        .await
        .context("failed to add torrent")?;
    let torrent = response
        .into_handle()
        .ok_or_else(|| anyhow!("torrent was listed but not added"))?;
    torrent
        .wait_until_initialized()
        .await
        .context("torrent failed to initialise")?;
    let files = torrent
        .with_metadata(|metadata| {
            metadata
                .file_infos
                .iter()
                .map(|file| FileEntry {
                    path: relative_path(&file.relative_filename),
                    size: file.len,
                })
                .collect::<Vec<_>>()
        })
        .context("torrent metadata unavailable")?;
    let name = torrent
        .name()
        .unwrap_or_else(|| request.session_id.clone());
    Ok((torrent, name, files))
}

/// Control handle for one librqbit torrent.
pub struct RqbitHandle {
    session_id: String,
    session: Arc<Session>,
    output: PathBuf,
    resolved: watch::Receiver<Option<Resolved>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    released: AtomicBool,
}

impl std::fmt::Debug for RqbitHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RqbitHandle")
            .field("session_id", &self.session_id)
            .field("output", &self.output)
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl RqbitHandle {
    fn resolved(&self) -> Option<Resolved> {
        self.resolved.borrow().clone()
    }
}

#[async_trait]
impl EngineHandle for RqbitHandle {
    async fn open_file(
        &self,
        file_index: usize,
        range: Option<&str>,
    ) -> Result<SourceResponse, SourceError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(SourceError::Failed {
                operation: "rqbit.open_file",
                source: anyhow!("torrent already released"),
            });
        }
        let resolved = self.resolved().ok_or(SourceError::NotReady)?;
        let size = resolved
            .files
            .get(file_index)
            .map(|file| file.size)
            .ok_or(SourceError::UnknownFile { file_index })?;
        let available = resolved
            .torrent
            .stats()
            .file_progress
            .get(file_index)
            .copied()
            .unwrap_or(0);
        if available == 0 {
            return Err(SourceError::NotReady);
        }
        let file = resolved
            .torrent
            .stream(file_index)
            .map_err(|source| SourceError::Failed {
                operation: "rqbit.stream",
                source,
            })?;
        Ok(respond_with_range(size, range, move |start, len| {
            read_range(file, start, len)
        }))
    }

    async fn prioritize(&self, file_index: usize) -> Result<()> {
        let resolved = self
            .resolved()
            .ok_or_else(|| anyhow!("torrent metadata is not resolved yet"))?;
        if file_index >= resolved.files.len() {
            bail!("file index {file_index} is outside the torrent");
        }
        // librqbit raises the priority of pieces under every open file stream.
        debug!(session_id = %self.session_id, file_index, "stream reads drive piece priority");
        Ok(())
    }

    async fn release(&self, options: ReleaseOptions) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            debug!(session_id = %self.session_id, "librqbit torrent already released");
            return Ok(());
        }
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(driver) = driver {
            driver.abort();
            let _ = driver.await;
        }

        if let Some(resolved) = self.resolved() {
            self.session
                .delete(
                    TorrentIdOrHash::Id(resolved.torrent.id()),
                    options.delete_files,
                )
                .await
                .with_context(|| format!("failed to remove torrent {}", self.session_id))?;
        }
        if options.delete_files {
            remove_output(&self.output).await?;
        }
        info!(
            session_id = %self.session_id,
            delete_files = options.delete_files,
            "librqbit torrent released"
        );
        Ok(())
    }
}

async fn remove_output(output: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(output).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("failed to remove {}", output.display()))
        }
    }
}

/// Stream `len` bytes of `reader` starting at `start`.
fn read_range<R>(reader: R, start: u64, len: u64) -> ByteStream
where
    R: AsyncRead + AsyncSeek + Send + 'static,
{
    Box::pin(async_stream::try_stream! {
        let mut reader = Box::pin(reader);
        reader.seek(SeekFrom::Start(start)).await?;
        let mut chunks = ReaderStream::new(reader.take(len));
        while let Some(chunk) = chunks.next().await {
            yield chunk?;
        }
    })
}
