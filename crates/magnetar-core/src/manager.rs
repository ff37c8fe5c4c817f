//! Session lifecycle operations: add, query, remove and shutdown.
//!
//! # Design
//! - `add` is idempotent; only the call that creates the record starts an engine,
//!   and it does so on a background task.
//! - An engine that finishes starting after its session was removed is released
//!   instead of attached.
//! - Release failures are logged and swallowed; the record is gone either way.

use std::path::PathBuf;
use std::sync::Arc;

use magnetar_telemetry::Metrics;
use tracing::{info, warn};

use crate::engine::{EngineSession, EngineStart, ReleaseOptions, SwarmEngine};
use crate::error::SessionResult;
use crate::ingestor::EventIngestor;
use crate::locator::{Locator, normalize_session_id};
use crate::model::SessionSnapshot;
use crate::registry::{Detached, Insertion, SessionRegistry};

/// Result of [`SessionManager::add`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOutcome {
    /// Current view of the session.
    pub snapshot: SessionSnapshot,
    /// Whether this call created it.
    pub created: bool,
}

/// Front door for session lifecycle operations.
pub struct SessionManager {
    registry: Arc<SessionRegistry>,
    engine: Arc<dyn SwarmEngine>,
    download_dir: PathBuf,
    metrics: Metrics,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("registry", &self.registry)
            .field("download_dir", &self.download_dir)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Build a manager that starts engines through `engine`.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        engine: Arc<dyn SwarmEngine>,
        download_dir: PathBuf,
        metrics: Metrics,
    ) -> Self {
        Self {
            registry,
            engine,
            download_dir,
            metrics,
        }
    }

    /// Shared registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Add a session for `locator`, or return the existing one unchanged.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SessionError::InvalidLocator`] when the locator is rejected;
    /// nothing is created in that case.
    pub fn add(&self, locator: &str, name: Option<&str>) -> SessionResult<AddOutcome> {
        let locator = Locator::parse(locator)?;
        let engine_locator = locator.as_str().to_string();
        match self.registry.insert_if_absent(locator.into_draft(name)) {
            Insertion::Existing(snapshot) => Ok(AddOutcome {
                snapshot,
                created: false,
            }),
            Insertion::Created(snapshot) => {
                info!(session_id = %snapshot.id, name = %snapshot.name, "session added");
                self.metrics.inc_session_added();
                self.metrics.set_active_sessions(self.registry.len());
                self.spawn_engine(EngineStart {
                    session_id: snapshot.id.clone(),
                    locator: engine_locator,
                    download_dir: self.download_dir.clone(),
                });
                Ok(AddOutcome {
                    snapshot,
                    created: true,
                })
            }
        }
    }

    fn spawn_engine(&self, request: EngineStart) {
        let registry = Arc::clone(&self.registry);
        let engine = Arc::clone(&self.engine);
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let session_id = request.session_id.clone();
            match engine.start(request).await {
                Ok(EngineSession { handle, events }) => {
                    match registry.attach_engine(&session_id, Arc::clone(&handle)) {
                        Ok(()) => {
                            let task = EventIngestor::new(Arc::clone(&registry), &session_id, handle)
                                .spawn(events);
                            registry.attach_ingestor(&session_id, task);
                        }
                        Err(orphan) => {
                            info!(%session_id, "session removed while its engine was starting");
                            if let Err(err) = orphan.release(ReleaseOptions::default()).await {
                                warn!(%session_id, error = %err, "failed to release orphaned engine");
                            }
                        }
                    }
                }
                Err(err) => {
                    metrics.inc_engine_failure();
                    warn!(%session_id, error = %err, "engine failed to start");
                    let message = format!("failed to start engine: {err:#}");
                    registry.update(&session_id, |session| {
                        if let Err(err) = session.record_error(message) {
                            warn!(%session_id, error = %err, "could not record engine failure");
                        }
                    });
                }
            }
        });
    }

    /// Snapshot of one session.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<SessionSnapshot> {
        self.registry.get(&normalize_session_id(id))
    }

    /// Snapshots of every session, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<SessionSnapshot> {
        self.registry.list()
    }

    /// Remove a session and release its engine. Returns `false` if it did not exist.
    pub async fn remove(&self, id: &str, options: ReleaseOptions) -> bool {
        let id = normalize_session_id(id);
        let Some(detached) = self.registry.remove(&id) else {
            return false;
        };
        self.metrics.set_active_sessions(self.registry.len());
        info!(session_id = %id, delete_files = options.delete_files, "session removed");
        release_logged(detached, options).await;
        true
    }

    /// Remove every session and release every engine.
    pub async fn shutdown(&self) {
        let detached = self.registry.drain();
        self.metrics.set_active_sessions(0);
        info!(sessions = detached.len(), "releasing all sessions");
        for session in detached {
            release_logged(session, ReleaseOptions::default()).await;
        }
    }
}

/// Release a detached session, logging instead of propagating failures.
pub async fn release_logged(detached: Detached, options: ReleaseOptions) {
    let session_id = detached.snapshot.id.clone();
    if let Err(err) = detached.release(options).await {
        warn!(%session_id, error = %err, "engine release failed");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::engine::{EVENT_CHANNEL_CAPACITY, EngineEvent, EngineHandle, FileEntry};
    use crate::model::SessionStatus;
    use crate::source::{SourceError, SourceResponse};
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{Notify, mpsc};

    const HASH: &str = "0123456789abcdef0123456789abcdef01234567";

    #[derive(Default)]
    pub(crate) struct CountingHandle {
        pub(crate) releases: AtomicUsize,
    }

    #[async_trait]
    impl EngineHandle for CountingHandle {
        async fn open_file(
            &self,
            _file_index: usize,
            _range: Option<&str>,
        ) -> Result<SourceResponse, SourceError> {
            Err(SourceError::NotReady)
        }

        async fn release(&self, _options: ReleaseOptions) -> Result<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Engine whose instances stay silent unless events are pushed through `senders`.
    #[derive(Default)]
    pub(crate) struct CountingEngine {
        pub(crate) starts: AtomicUsize,
        pub(crate) handles: Mutex<Vec<Arc<CountingHandle>>>,
        pub(crate) senders: Mutex<Vec<mpsc::Sender<EngineEvent>>>,
        pub(crate) gate: Option<Arc<Notify>>,
        pub(crate) fail: bool,
    }

    #[async_trait]
    impl SwarmEngine for CountingEngine {
        async fn start(&self, _request: EngineStart) -> Result<EngineSession> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail {
                bail!("tracker rejected the request");
            }
            let handle = Arc::new(CountingHandle::default());
            let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
            self.handles.lock().expect("handles lock").push(handle.clone());
            self.senders.lock().expect("senders lock").push(tx);
            Ok(EngineSession { handle, events: rx })
        }
    }

    pub(crate) fn manager_with(engine: Arc<CountingEngine>) -> SessionManager {
        SessionManager::new(
            Arc::new(SessionRegistry::new(Arc::new(SystemClock))),
            engine,
            PathBuf::from("downloads"),
            Metrics::new().expect("metrics"),
        )
    }

    async fn wait_for_status(manager: &SessionManager, id: &str, status: SessionStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if manager.get(id).map(|s| s.status) == Some(status) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("status reached in time");
    }

    fn magnet() -> String {
        format!("magnet:?xt=urn:btih:{HASH}&dn=Sintel")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_construct_one_engine() -> SessionResult<()> {
        let engine = Arc::new(CountingEngine::default());
        let manager = Arc::new(manager_with(engine.clone()));
        let upper = format!("magnet:?xt=urn:btih:{}", HASH.to_uppercase());
        let tasks: Vec<_> = [magnet(), upper, magnet(), magnet()]
            .into_iter()
            .map(|link| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.add(&link, None) })
            })
            .collect();
        let mut outcomes = Vec::new();
        for task in tasks {
            outcomes.push(task.await.expect("add task")?);
        }
        assert!(outcomes.iter().all(|o| o.snapshot.id == HASH));
        assert_eq!(outcomes.iter().filter(|o| o.created).count(), 1);

        wait_for_status(&manager, HASH, SessionStatus::Connecting).await;
        assert_eq!(engine.starts.load(Ordering::SeqCst), 1);
        assert_eq!(manager.list().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn repeated_add_returns_existing_session_unchanged() -> SessionResult<()> {
        let manager = manager_with(Arc::new(CountingEngine::default()));
        let first = manager.add(&magnet(), Some("Mine"))?;
        let second = manager.add(&magnet(), Some("Other"))?;
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(second.snapshot.name, "Mine");
        Ok(())
    }

    #[tokio::test]
    async fn invalid_locator_creates_nothing() {
        let engine = Arc::new(CountingEngine::default());
        let manager = manager_with(engine.clone());
        assert!(manager.add("   ", None).is_err());
        assert!(manager.add("magnet:?dn=only-a-name", None).is_err());
        assert!(manager.list().is_empty());
        tokio::task::yield_now().await;
        assert_eq!(engine.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn double_remove_releases_once() -> SessionResult<()> {
        let engine = Arc::new(CountingEngine::default());
        let manager = manager_with(engine.clone());
        manager.add(&magnet(), None)?;
        wait_for_status(&manager, HASH, SessionStatus::Connecting).await;

        assert!(manager.remove(&HASH.to_uppercase(), ReleaseOptions::default()).await);
        assert!(!manager.remove(HASH, ReleaseOptions::default()).await);
        assert!(manager.get(HASH).is_none());

        let handles = engine.handles.lock().expect("handles lock").clone();
        assert_eq!(handles.len(), 1);
        assert_eq!(handles[0].releases.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn engine_started_after_removal_is_released() -> SessionResult<()> {
        let gate = Arc::new(Notify::new());
        let engine = Arc::new(CountingEngine {
            gate: Some(gate.clone()),
            ..CountingEngine::default()
        });
        let manager = manager_with(engine.clone());
        manager.add(&magnet(), None)?;
        assert_eq!(manager.get(HASH).map(|s| s.status), Some(SessionStatus::Adding));
        assert!(manager.remove(HASH, ReleaseOptions::default()).await);
        gate.notify_one();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let released = engine
                    .handles
                    .lock()
                    .expect("handles lock")
                    .first()
                    .is_some_and(|handle| handle.releases.load(Ordering::SeqCst) == 1);
                if released {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("orphaned engine released");
        assert!(manager.get(HASH).is_none());
        Ok(())
    }

    #[tokio::test]
    async fn engine_start_failure_marks_the_session_failed() -> SessionResult<()> {
        let engine = Arc::new(CountingEngine {
            fail: true,
            ..CountingEngine::default()
        });
        let manager = manager_with(engine);
        manager.add(&magnet(), None)?;
        wait_for_status(&manager, HASH, SessionStatus::Error).await;
        let error = manager.get(HASH).and_then(|s| s.error).unwrap_or_default();
        assert!(error.contains("tracker rejected"));
        Ok(())
    }

    #[tokio::test]
    async fn engine_events_reach_the_session() -> SessionResult<()> {
        let engine = Arc::new(CountingEngine::default());
        let manager = manager_with(engine.clone());
        manager.add(&magnet(), None)?;
        wait_for_status(&manager, HASH, SessionStatus::Connecting).await;

        let sender = engine.senders.lock().expect("senders lock")[0].clone();
        sender
            .send(EngineEvent::MetadataReady {
                name: "Sintel (2010)".into(),
                files: vec![FileEntry {
                    path: "sintel.mkv".into(),
                    size: 42,
                }],
            })
            .await
            .expect("send metadata");
        wait_for_status(&manager, HASH, SessionStatus::Downloading).await;
        let snapshot = manager.get(HASH).expect("session");
        assert_eq!(snapshot.name, "Sintel (2010)");
        assert_eq!(snapshot.files.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_releases_every_engine() -> SessionResult<()> {
        let engine = Arc::new(CountingEngine::default());
        let manager = manager_with(engine.clone());
        manager.add(&magnet(), None)?;
        manager.add("https://example.org/other.torrent", None)?;
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.handles.lock().expect("handles lock").len() < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("both engines started");
        tokio::time::timeout(Duration::from_secs(5), async {
            while manager
                .list()
                .iter()
                .any(|s| s.status == SessionStatus::Adding)
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("both engines attached");

        manager.shutdown().await;
        assert!(manager.list().is_empty());
        let handles = engine.handles.lock().expect("handles lock").clone();
        assert!(handles.iter().all(|h| h.releases.load(Ordering::SeqCst) == 1));
        Ok(())
    }
}
