//! Background task that drives one simulated session.
//!
//! # Design
//! - One task per session selects over handle commands and a transfer tick, so events
//!   leave in a single ordered stream.
//! - Progress is published through a watch channel that readers wait on.
//! - Completed content is written below the session's data directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use magnetar_core::{EngineEvent, ProgressSample, ReleaseOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::catalog::{SimulatedTorrent, fill};
use crate::command::{Transfer, WorkerCommand};
use crate::types::SimulationConfig;

const WRITE_CHUNK: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Resolving { ticks_left: u32 },
    Downloading,
    Seeding,
    Failed,
}

pub(crate) struct Worker {
    session_id: String,
    torrent: Arc<SimulatedTorrent>,
    config: SimulationConfig,
    data_dir: PathBuf,
    events: mpsc::Sender<EngineEvent>,
    progress: watch::Sender<Transfer>,
    order: Vec<usize>,
    phase: Phase,
}

pub(crate) fn spawn(worker: Worker, commands: mpsc::Receiver<WorkerCommand>) {
    tokio::spawn(worker.run(commands));
}

impl Worker {
    pub(crate) fn new(
        session_id: String,
        torrent: Arc<SimulatedTorrent>,
        config: SimulationConfig,
        data_dir: PathBuf,
        events: mpsc::Sender<EngineEvent>,
        progress: watch::Sender<Transfer>,
    ) -> Self {
        let order = (0..torrent.files.len()).collect();
        Self {
            session_id,
            torrent,
            phase: Phase::Resolving {
                ticks_left: config.metadata_ticks,
            },
            config,
            data_dir,
            events,
            progress,
            order,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<WorkerCommand>) {
        let mut ticker = tokio::time::interval(self.config.tick);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(WorkerCommand::Prioritize { file_index }) => self.prioritize(file_index),
                    Some(WorkerCommand::Release { options, respond_to }) => {
                        let outcome = self.release(options).await;
                        let _ = respond_to.send(outcome);
                        return;
                    }
                    None => break,
                },
                _ = ticker.tick() => self.step().await,
            }
        }
        self.mark_released();
        debug!(session_id = %self.session_id, "simulated session dropped by its handle");
    }

    fn prioritize(&mut self, file_index: usize) {
        if let Some(position) = self.order.iter().position(|index| *index == file_index) {
            let index = self.order.remove(position);
            self.order.insert(0, index);
            debug!(session_id = %self.session_id, file_index, "file moved to the front");
        }
    }

    async fn release(&mut self, options: ReleaseOptions) -> Result<()> {
        self.mark_released();
        if options.delete_files {
            remove_data(&self.data_dir).await?;
            info!(session_id = %self.session_id, path = %self.data_dir.display(), "downloaded data deleted");
        }
        Ok(())
    }

    fn mark_released(&self) {
        self.progress.send_modify(|transfer| transfer.released = true);
    }

    async fn step(&mut self) {
        match self.phase {
            Phase::Resolving { ticks_left } if ticks_left > 1 => {
                self.phase = Phase::Resolving {
                    ticks_left: ticks_left - 1,
                };
            }
            Phase::Resolving { .. } => self.deliver_metadata().await,
            Phase::Downloading => self.download().await,
            Phase::Seeding | Phase::Failed => {}
        }
    }

    async fn deliver_metadata(&mut self) {
        self.progress.send_modify(|transfer| {
            transfer.metadata = true;
            transfer.downloaded = vec![0; self.torrent.files.len()];
        });
        self.emit(EngineEvent::MetadataReady {
            name: self.torrent.name.clone(),
            files: self.torrent.entries(),
        })
        .await;
        if let Some(message) = self.torrent.failure.clone() {
            self.fail(message).await;
        } else {
            self.phase = Phase::Downloading;
        }
    }

    async fn download(&mut self) {
        let mut budget = self.config.bytes_per_tick;
        let mut fetched = 0;
        let sizes: Vec<u64> = self.torrent.files.iter().map(|file| file.size).collect();
        self.progress.send_modify(|transfer| {
            for &index in &self.order {
                let Some(done) = transfer.downloaded.get_mut(index) else {
                    continue;
                };
                let take = sizes[index].saturating_sub(*done).min(budget);
                *done += take;
                budget -= take;
                fetched += take;
                if budget == 0 {
                    break;
                }
            }
        });

        let downloaded: u64 = self.progress.borrow().downloaded.iter().sum();
        let total = self.torrent.total_size();
        let speed = if fetched == 0 { 0 } else { self.config.speed() };
        self.emit(EngineEvent::Progress(ProgressSample {
            downloaded,
            total,
            download_speed: speed,
            upload_speed: speed / 8,
            peers: self.config.peers,
        }))
        .await;

        if downloaded >= total {
            match write_content(&self.data_dir, &self.torrent).await {
                Ok(()) => {
                    info!(session_id = %self.session_id, bytes = total, "simulated download complete");
                    self.phase = Phase::Seeding;
                    self.emit(EngineEvent::Completed).await;
                }
                Err(err) => self.fail(format!("failed to store downloaded data: {err:#}")).await,
            }
        }
    }

    async fn fail(&mut self, message: String) {
        warn!(session_id = %self.session_id, error = %message, "simulated session failed");
        self.phase = Phase::Failed;
        self.emit(EngineEvent::Error { message }).await;
    }

    async fn emit(&self, event: EngineEvent) {
        if self.events.send(event).await.is_err() {
            debug!(session_id = %self.session_id, "event consumer gone");
        }
    }
}

async fn write_content(data_dir: &Path, torrent: &SimulatedTorrent) -> Result<()> {
    for (index, file) in torrent.files.iter().enumerate() {
        let path = data_dir.join(&file.path);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut out = tokio::fs::File::create(&path)
            .await
            .with_context(|| format!("creating {}", path.display()))?;
        let mut buf = vec![0_u8; WRITE_CHUNK];
        let mut position = 0;
        while position < file.size {
            let len = usize::try_from(file.size - position)
                .unwrap_or(WRITE_CHUNK)
                .min(WRITE_CHUNK);
            fill(index, position, &mut buf[..len]);
            out.write_all(&buf[..len])
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            position += len as u64;
        }
        out.flush().await?;
    }
    Ok(())
}

pub(crate) async fn remove_data(data_dir: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(data_dir).await {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("removing {}", data_dir.display())),
    }
}
