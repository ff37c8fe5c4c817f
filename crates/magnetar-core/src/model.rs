//! Session records, their state machine, and the serialisable snapshot view.
//!
//! # Design
//! - `Session` is the registry-owned record; engine handles live beside it, never inside.
//! - Every mutation goes through a method that enforces the status transition table.
//! - `SessionSnapshot` is the only shape that leaves the process.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::engine::{FileEntry, ProgressSample};
use crate::error::SessionError;

/// Extensions recognised as video, lowercase without the dot.
pub const VIDEO_EXTENSIONS: [&str; 8] = ["mp4", "avi", "mkv", "mov", "wmv", "flv", "webm", "m4v"];
/// Extensions recognised as audio, lowercase without the dot.
pub const AUDIO_EXTENSIONS: [&str; 7] = ["mp3", "flac", "wav", "aac", "ogg", "wma", "m4a"];

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Record created; engine not constructed yet.
    Adding,
    /// Engine constructed; waiting for metadata.
    Connecting,
    /// File list known; transfer in progress.
    Downloading,
    /// Every byte has been acquired.
    Completed,
    /// The engine reported a failure.
    Error,
    /// The record has been deleted.
    Removed,
}

impl SessionStatus {
    /// Stable lowercase label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Adding => "adding",
            Self::Connecting => "connecting",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Removed => "removed",
        }
    }

    /// Whether engine events can no longer change the session.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Removed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Adding, Self::Connecting)
            | (Self::Connecting, Self::Downloading)
            | (Self::Downloading, Self::Completed)
            | (Self::Adding | Self::Connecting | Self::Downloading, Self::Error) => true,
            (current, Self::Removed) => !matches!(current, Self::Removed),
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file inside a session's content layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionFile {
    /// Position in the engine's file list.
    pub index: usize,
    /// Last path component.
    pub name: String,
    /// Path relative to the content root.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Byte offset within the concatenated layout.
    pub offset: u64,
    /// Extension is a known video type.
    pub is_video: bool,
    /// Extension is a known audio type.
    pub is_audio: bool,
}

impl SessionFile {
    /// Lay out engine-reported entries, assigning indexes and cumulative offsets.
    #[must_use]
    pub fn layout(entries: &[FileEntry]) -> Vec<Self> {
        let mut offset = 0_u64;
        entries
            .iter()
            .enumerate()
            .map(|(index, entry)| {
                let path = entry.path.replace('\\', "/");
                let name = path.rsplit('/').next().unwrap_or(&path).to_string();
                let extension = extension_of(&name);
                let file = Self {
                    index,
                    is_video: extension
                        .as_deref()
                        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext)),
                    is_audio: extension
                        .as_deref()
                        .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext)),
                    name,
                    path,
                    size: entry.size,
                    offset,
                };
                offset = offset.saturating_add(entry.size);
                file
            })
            .collect()
    }

    /// Lowercase extension without the dot.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        extension_of(&self.name)
    }
}

/// Lowercase extension of a file name, without the dot.
#[must_use]
pub fn extension_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Percentage of `downloaded` over `total`, rounded half up and clamped to 100.
///
/// An unknown (`0`) total reports 0%.
#[must_use]
pub fn progress_percent(downloaded: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let done = u128::from(downloaded.min(total));
    let total = u128::from(total);
    let percent = (done * 100 + total / 2) / total;
    u8::try_from(percent.min(100)).unwrap_or(100)
}

/// Registry-owned session record.
#[derive(Debug, Clone)]
pub struct Session {
    /// Stable identifier derived from the locator.
    pub id: String,
    /// Opaque locator handed to the engine.
    pub locator: String,
    /// Display name.
    pub name: String,
    /// The caller chose the name; metadata must not overwrite it.
    pub name_pinned: bool,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Integer percentage, monotonic until a terminal status.
    pub progress: u8,
    /// Bytes per second received.
    pub download_speed: u64,
    /// Bytes per second sent.
    pub upload_speed: u64,
    /// Connected peers.
    pub peer_count: u32,
    /// File layout, empty until metadata arrives.
    pub files: Vec<SessionFile>,
    /// Creation time.
    pub added_at: DateTime<Utc>,
    /// Time of the most recent stream request.
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// Failure reported by the engine.
    pub error: Option<String>,
    /// HTTP endpoint the engine serves file bytes from, when it runs one.
    pub stream_endpoint: Option<Url>,
}

impl Session {
    /// Create a record in the `adding` state.
    #[must_use]
    pub fn new(draft: NewSession, added_at: DateTime<Utc>) -> Self {
        Self {
            id: draft.id,
            locator: draft.locator,
            name: draft.name,
            name_pinned: draft.name_pinned,
            status: SessionStatus::Adding,
            progress: 0,
            download_speed: 0,
            upload_speed: 0,
            peer_count: 0,
            files: Vec::new(),
            added_at,
            last_accessed_at: None,
            error: None,
            stream_endpoint: None,
        }
    }

    /// Move to `next`, enforcing the transition table.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidTransition`] for illegal moves.
    pub fn transition(&mut self, next: SessionStatus) -> Result<(), SessionError> {
        if !self.status.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                session_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Record the file layout and move to `downloading`.
    ///
    /// # Errors
    ///
    /// Fails when files were already recorded or the session is not `connecting`.
    pub fn record_metadata(&mut self, name: &str, entries: &[FileEntry]) -> Result<(), SessionError> {
        if !self.files.is_empty() {
            return Err(SessionError::FilesAlreadySet {
                session_id: self.id.clone(),
            });
        }
        self.transition(SessionStatus::Downloading)?;
        self.files = SessionFile::layout(entries);
        let name = name.trim();
        if !self.name_pinned && !name.is_empty() {
            self.name = name.to_string();
        }
        Ok(())
    }

    /// Fold a progress sample into the record. Returns `false` when ignored.
    pub fn record_progress(&mut self, sample: &ProgressSample) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let percent = progress_percent(sample.downloaded, sample.total);
        self.progress = self.progress.max(percent);
        self.download_speed = sample.download_speed;
        self.upload_speed = sample.upload_speed;
        self.peer_count = sample.peers;
        true
    }

    /// Mark every byte acquired.
    ///
    /// # Errors
    ///
    /// Fails unless the session is `downloading`.
    pub fn record_completed(&mut self) -> Result<(), SessionError> {
        self.transition(SessionStatus::Completed)?;
        self.progress = 100;
        self.download_speed = 0;
        Ok(())
    }

    /// Record an engine failure.
    ///
    /// # Errors
    ///
    /// Fails when the session is already terminal.
    pub fn record_error(&mut self, message: impl Into<String>) -> Result<(), SessionError> {
        self.transition(SessionStatus::Error)?;
        self.error = Some(message.into());
        self.download_speed = 0;
        self.upload_speed = 0;
        Ok(())
    }

    /// Time of the last observable activity.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_accessed_at.unwrap_or(self.added_at)
    }

    /// Project the record into its serialisable view.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status,
            progress: self.progress,
            download_speed: self.download_speed,
            upload_speed: self.upload_speed,
            peer_count: self.peer_count,
            files: self.files.clone(),
            added_at: self.added_at,
            last_accessed_at: self.last_accessed_at,
            error: self.error.clone(),
            stream_endpoint: self.stream_endpoint.clone(),
        }
    }
}

/// Inputs for creating a session record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    /// Derived identifier.
    pub id: String,
    /// Locator handed to the engine.
    pub locator: String,
    /// Initial display name.
    pub name: String,
    /// The caller supplied `name`.
    pub name_pinned: bool,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Stable identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Integer percentage.
    pub progress: u8,
    /// Bytes per second received.
    pub download_speed: u64,
    /// Bytes per second sent.
    pub upload_speed: u64,
    /// Connected peers.
    pub peer_count: u32,
    /// File layout.
    pub files: Vec<SessionFile>,
    /// Creation time.
    pub added_at: DateTime<Utc>,
    /// Time of the most recent stream request.
    pub last_accessed_at: Option<DateTime<Utc>>,
    /// Failure reported by the engine.
    pub error: Option<String>,
    /// Engine HTTP endpoint used for byte reads; internal only.
    #[serde(skip)]
    pub stream_endpoint: Option<Url>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            NewSession {
                id: "abc".into(),
                locator: "magnet:?xt=urn:btih:abc".into(),
                name: "Torrent abc".into(),
                name_pinned: false,
            },
            Utc::now(),
        )
    }

    fn entry(path: &str, size: u64) -> FileEntry {
        FileEntry {
            path: path.into(),
            size,
        }
    }

    fn sample(downloaded: u64, total: u64) -> ProgressSample {
        ProgressSample {
            downloaded,
            total,
            download_speed: 10,
            upload_speed: 5,
            peers: 3,
        }
    }

    #[test]
    fn transition_table_allows_only_forward_moves() {
        use SessionStatus::*;
        assert!(Adding.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Completed));
        assert!(Connecting.can_transition_to(Error));
        assert!(Completed.can_transition_to(Removed));
        assert!(Error.can_transition_to(Removed));

        assert!(!Error.can_transition_to(Downloading));
        assert!(!Completed.can_transition_to(Error));
        assert!(!Connecting.can_transition_to(Completed));
        assert!(!Downloading.can_transition_to(Connecting));
        assert!(!Removed.can_transition_to(Removed));
    }

    #[test]
    fn layout_assigns_offsets_and_media_flags() {
        let files = SessionFile::layout(&[
            entry("Show/S01E01.MKV", 700),
            entry("Show\\cover.jpg", 20),
            entry("Show/theme.flac", 80),
        ]);
        assert_eq!(files.len(), 3);
        assert_eq!(files[0].name, "S01E01.MKV");
        assert!(files[0].is_video);
        assert_eq!(files[1].path, "Show/cover.jpg");
        assert_eq!(files[1].offset, 700);
        assert!(!files[1].is_video && !files[1].is_audio);
        assert_eq!(files[2].offset, 720);
        assert!(files[2].is_audio);
    }

    #[test]
    fn extension_requires_stem_and_suffix() {
        assert_eq!(extension_of("movie.MP4").as_deref(), Some("mp4"));
        assert_eq!(extension_of(".hidden"), None);
        assert_eq!(extension_of("README"), None);
        assert_eq!(extension_of("trailing."), None);
    }

    #[test]
    fn progress_percent_rounds_and_clamps() {
        assert_eq!(progress_percent(0, 0), 0);
        assert_eq!(progress_percent(500, 0), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(5, 1000), 1);
        assert_eq!(progress_percent(4, 1000), 0);
        assert_eq!(progress_percent(2000, 1000), 100);
        assert_eq!(progress_percent(u64::MAX, u64::MAX), 100);
    }

    #[test]
    fn progress_is_monotonic_until_terminal() -> Result<(), SessionError> {
        let mut session = session();
        session.transition(SessionStatus::Connecting)?;
        assert!(session.record_progress(&sample(60, 100)));
        assert!(session.record_progress(&sample(40, 100)));
        assert_eq!(session.progress, 60);
        assert_eq!(session.peer_count, 3);

        session.record_metadata("Movie", &[entry("movie.mp4", 100)])?;
        session.record_completed()?;
        assert_eq!(session.progress, 100);
        assert!(!session.record_progress(&sample(10, 100)));
        assert_eq!(session.progress, 100);
        Ok(())
    }

    #[test]
    fn metadata_is_recorded_once_and_respects_pinned_names() -> Result<(), SessionError> {
        let mut session = session();
        session.transition(SessionStatus::Connecting)?;
        session.record_metadata("Engine Name", &[entry("a.mp4", 1)])?;
        assert_eq!(session.name, "Engine Name");
        assert_eq!(session.status, SessionStatus::Downloading);
        assert!(matches!(
            session.record_metadata("Other", &[entry("b.mp4", 1)]),
            Err(SessionError::FilesAlreadySet { .. })
        ));

        let mut pinned = Session::new(
            NewSession {
                id: "def".into(),
                locator: "magnet:?xt=urn:btih:def".into(),
                name: "Mine".into(),
                name_pinned: true,
            },
            Utc::now(),
        );
        pinned.transition(SessionStatus::Connecting)?;
        pinned.record_metadata("Engine Name", &[entry("a.mp4", 1)])?;
        assert_eq!(pinned.name, "Mine");
        Ok(())
    }

    #[test]
    fn error_is_terminal() -> Result<(), SessionError> {
        let mut session = session();
        session.transition(SessionStatus::Connecting)?;
        session.record_error("tracker unreachable")?;
        assert_eq!(session.status, SessionStatus::Error);
        assert_eq!(session.error.as_deref(), Some("tracker unreachable"));
        assert!(session.record_metadata("x", &[entry("a.mp4", 1)]).is_err());
        assert!(session.record_error("again").is_err());
        assert_eq!(session.error.as_deref(), Some("tracker unreachable"));
        Ok(())
    }

    #[test]
    fn snapshot_serialises_camel_case_without_internal_fields() -> Result<(), serde_json::Error> {
        let mut session = session();
        session.stream_endpoint = Url::parse("http://127.0.0.1:9000/").ok();
        let value = serde_json::to_value(session.snapshot())?;
        assert_eq!(value["status"], "adding");
        assert_eq!(value["downloadSpeed"], 0);
        assert_eq!(value["peerCount"], 0);
        assert!(value["lastAccessedAt"].is_null());
        assert!(value.get("streamEndpoint").is_none());
        assert!(value.get("locator").is_none());
        Ok(())
    }
}
