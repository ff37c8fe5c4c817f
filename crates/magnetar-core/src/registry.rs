//! Concurrency-safe store of session records and their engine handles.
//!
//! # Design
//! - One mutex guards the whole map; critical sections never await.
//! - Insert-if-absent is atomic so concurrent adds for one locator create one record.
//! - Removal moves the engine handle out under the lock, so it can be released once.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::engine::{EngineHandle, ReleaseOptions};
use crate::model::{NewSession, Session, SessionSnapshot, SessionStatus};

struct Entry {
    session: Session,
    engine: Option<Arc<dyn EngineHandle>>,
    ingestor: Option<JoinHandle<()>>,
}

/// Outcome of [`SessionRegistry::insert_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insertion {
    /// A new record was created; the caller must start its engine.
    Created(SessionSnapshot),
    /// A record already existed and was left untouched.
    Existing(SessionSnapshot),
}

impl Insertion {
    /// Snapshot of the stored record.
    #[must_use]
    pub const fn snapshot(&self) -> &SessionSnapshot {
        match self {
            Self::Created(snapshot) | Self::Existing(snapshot) => snapshot,
        }
    }

    /// Whether this call created the record.
    #[must_use]
    pub const fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// A record taken out of the registry together with the resources it owned.
pub struct Detached {
    /// Final view of the record, with status `removed`.
    pub snapshot: SessionSnapshot,
    engine: Option<Arc<dyn EngineHandle>>,
    ingestor: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Detached {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detached")
            .field("snapshot", &self.snapshot)
            .field("has_engine", &self.engine.is_some())
            .finish_non_exhaustive()
    }
}

impl Detached {
    /// Stop the event consumer and release the engine handle.
    ///
    /// # Errors
    ///
    /// Propagates the engine's release failure.
    pub async fn release(mut self, options: ReleaseOptions) -> Result<()> {
        if let Some(ingestor) = self.ingestor.take() {
            ingestor.abort();
        }
        match self.engine.take() {
            Some(engine) => engine.release(options).await,
            None => Ok(()),
        }
    }
}

/// Keyed store of sessions.
pub struct SessionRegistry {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Create an empty registry reading time from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current time according to the injected clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Create a record for `draft` unless one with the same id exists.
    pub fn insert_if_absent(&self, draft: NewSession) -> Insertion {
        let now = self.clock.now();
        let mut entries = self.lock();
        if let Some(existing) = entries.get(&draft.id) {
            return Insertion::Existing(existing.session.snapshot());
        }
        let session = Session::new(draft, now);
        let snapshot = session.snapshot();
        entries.insert(
            session.id.clone(),
            Entry {
                session,
                engine: None,
                ingestor: None,
            },
        );
        Insertion::Created(snapshot)
    }

    /// Snapshot of one session.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<SessionSnapshot> {
        self.lock().get(id).map(|entry| entry.session.snapshot())
    }

    /// Snapshot of one session together with its engine handle, taken atomically.
    #[must_use]
    pub fn get_with_engine(
        &self,
        id: &str,
    ) -> Option<(SessionSnapshot, Option<Arc<dyn EngineHandle>>)> {
        self.lock()
            .get(id)
            .map(|entry| (entry.session.snapshot(), entry.engine.clone()))
    }

    /// Snapshots of every session, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<_> = self
            .lock()
            .values()
            .map(|entry| entry.session.snapshot())
            .collect();
        sessions.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.id.cmp(&b.id)));
        sessions
    }

    /// Number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the registry holds no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Attach a freshly started engine and move the session to `connecting`.
    ///
    /// # Errors
    ///
    /// Hands the engine back when the session is gone or already has one, so the
    /// caller can release it.
    pub fn attach_engine(
        &self,
        id: &str,
        engine: Arc<dyn EngineHandle>,
    ) -> Result<(), Arc<dyn EngineHandle>> {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(id) else {
            return Err(engine);
        };
        if entry.engine.is_some() || entry.session.transition(SessionStatus::Connecting).is_err() {
            return Err(engine);
        }
        entry.engine = Some(engine);
        Ok(())
    }

    /// Remember the task consuming the session's engine events.
    ///
    /// The task is aborted immediately when the session no longer exists.
    pub fn attach_ingestor(&self, id: &str, task: JoinHandle<()>) {
        let mut entries = self.lock();
        match entries.get_mut(id) {
            Some(entry) => {
                if let Some(previous) = entry.ingestor.replace(task) {
                    previous.abort();
                }
            }
            None => task.abort(),
        }
    }

    /// Apply `mutate` to a session under the lock.
    pub fn update<R>(&self, id: &str, mutate: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.lock().get_mut(id).map(|entry| mutate(&mut entry.session))
    }

    /// Record a stream request against the session.
    pub fn touch(&self, id: &str) -> Option<DateTime<Utc>> {
        let now = self.clock.now();
        self.update(id, |session| {
            session.last_accessed_at = Some(now);
            now
        })
    }

    /// Take a session out of the registry.
    pub fn remove(&self, id: &str) -> Option<Detached> {
        self.lock().remove(id).map(detach)
    }

    /// Identifiers of sessions with no activity since `cutoff`.
    #[must_use]
    pub fn stale_ids(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        self.lock()
            .values()
            .filter(|entry| entry.session.last_activity() < cutoff)
            .map(|entry| entry.session.id.clone())
            .collect()
    }

    /// Take a session out only if it is still inactive since `cutoff`.
    pub fn remove_if_stale(&self, id: &str, cutoff: DateTime<Utc>) -> Option<Detached> {
        let mut entries = self.lock();
        let stale = entries
            .get(id)
            .is_some_and(|entry| entry.session.last_activity() < cutoff);
        if stale { entries.remove(id).map(detach) } else { None }
    }

    /// Take every session out of the registry.
    pub fn drain(&self) -> Vec<Detached> {
        self.lock().drain().map(|(_, entry)| detach(entry)).collect()
    }
}

fn detach(entry: Entry) -> Detached {
    let Entry {
        mut session,
        engine,
        ingestor,
    } = entry;
    session.status = SessionStatus::Removed;
    Detached {
        snapshot: session.snapshot(),
        engine,
        ingestor,
    }
}
