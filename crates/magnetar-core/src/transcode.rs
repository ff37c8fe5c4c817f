//! Remuxing through an external transcoder process.
//!
//! # Design
//! - The child is spawned with `kill_on_drop`, and the task feeding its stdin is
//!   aborted when the output stream is dropped, so a client disconnect tears down
//!   the process and the upstream read together.
//! - A non-zero exit or a failed input read surfaces as an error at the end of the
//!   output stream.

use std::io;
use std::process::{ExitStatus, Stdio};

use futures_util::StreamExt;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::source::ByteStream;

/// Arguments for copying video, re-encoding audio to AAC and writing fragmented MP4.
pub const FFMPEG_REMUX_ARGS: [&str; 14] = [
    "-hide_banner",
    "-loglevel",
    "error",
    "-i",
    "pipe:0",
    "-c:v",
    "copy",
    "-c:a",
    "aac",
    "-movflags",
    "frag_keyframe+empty_moov+default_base_moof",
    "-f",
    "mp4",
    "pipe:1",
];

/// Failures starting a transcoder or before it produced output.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The executable could not be started.
    #[error("failed to spawn transcoder")]
    Spawn {
        /// Executable that was attempted.
        program: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// A standard stream was not captured.
    #[error("transcoder pipe unavailable")]
    Pipe {
        /// Which stream was missing.
        stream: &'static str,
    },
    /// The transcoder failed before emitting its first byte.
    #[error("transcoder failed before producing output")]
    Output {
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
}

/// Turns an arbitrary media byte stream into a browser-playable one.
pub trait Transcoder: Send + Sync {
    /// Start remuxing `input`.
    ///
    /// # Errors
    ///
    /// Returns [`TranscodeError`] when the transcoder cannot be started.
    fn remux(&self, input: ByteStream) -> Result<ByteStream, TranscodeError>;
}

/// Transcoder backed by a child process reading stdin and writing stdout.
#[derive(Debug, Clone)]
pub struct ProcessTranscoder {
    program: String,
    args: Vec<String>,
}

impl ProcessTranscoder {
    /// `program` invoked with [`FFMPEG_REMUX_ARGS`].
    #[must_use]
    pub fn ffmpeg(program: impl Into<String>) -> Self {
        Self::new(program, FFMPEG_REMUX_ARGS)
    }

    /// Arbitrary filter program.
    #[must_use]
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Executable name or path.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Whether the executable answers `-version`.
    pub async fn probe(&self) -> bool {
        let available = Command::new(&self.program)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|status| status.success());
        if available {
            info!(program = %self.program, "transcoder detected; remuxing enabled");
        } else {
            info!(program = %self.program, "transcoder not found; remux requests will fail");
        }
        available
    }
}

impl Transcoder for ProcessTranscoder {
    fn remux(&self, input: ByteStream) -> Result<ByteStream, TranscodeError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::Spawn {
                program: self.program.clone(),
                source,
            })?;
        let stdin = child
            .stdin
            .take()
            .ok_or(TranscodeError::Pipe { stream: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(TranscodeError::Pipe { stream: "stdout" })?;
        debug!(program = %self.program, pid = ?child.id(), "transcoder started");

        let pump = tokio::spawn(pump_input(input, stdin));
        let guard = ProcessGuard {
            child,
            pump: Some(pump),
        };
        Ok(Box::pin(output_stream(guard, stdout)))
    }
}

struct ProcessGuard {
    child: Child,
    pump: Option<JoinHandle<io::Result<()>>>,
}

impl ProcessGuard {
    async fn finish(&mut self) -> io::Result<()> {
        if let Some(pump) = self.pump.take() {
            pump.await.map_err(io::Error::other)??;
        }
        let status = self.child.wait().await?;
        check_exit(status)
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

fn check_exit(status: ExitStatus) -> io::Result<()> {
    if status.success() {
        Ok(())
    } else {
        Err(io::Error::other(format!("transcoder exited with {status}")))
    }
}

async fn pump_input(mut input: ByteStream, mut stdin: ChildStdin) -> io::Result<()> {
    while let Some(chunk) = input.next().await {
        let chunk = chunk?;
        if let Err(err) = stdin.write_all(&chunk).await {
            if err.kind() == io::ErrorKind::BrokenPipe {
                debug!("transcoder closed its input early");
                return Ok(());
            }
            return Err(err);
        }
    }
    stdin.shutdown().await.or_else(|err| {
        if err.kind() == io::ErrorKind::BrokenPipe {
            Ok(())
        } else {
            Err(err)
        }
    })
}

fn output_stream(
    guard: ProcessGuard,
    stdout: ChildStdout,
) -> impl futures_util::Stream<Item = io::Result<bytes::Bytes>> + Send {
    async_stream::try_stream! {
        let mut guard = guard;
        let mut output = ReaderStream::new(stdout);
        while let Some(chunk) = output.next().await {
            yield chunk?;
        }
        guard.finish().await?;
    }
}
