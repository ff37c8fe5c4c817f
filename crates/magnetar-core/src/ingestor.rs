//! Per-session consumer that folds engine events into the session record.
//!
//! # Design
//! - Exactly one task per session drains that session's channel, so events apply in
//!   emission order.
//! - State-machine violations drop the event with a warning; they never fail the session.
//! - Prioritising the selected file happens outside the registry lock.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::{EngineEvent, EngineHandle};
use crate::error::SessionResult;
use crate::model::Session;
use crate::registry::SessionRegistry;
use crate::selector::select_best_file;

/// Apply one engine event to `session`.
///
/// Returns the index of the file to prioritise after metadata arrives.
///
/// # Errors
///
/// Returns the state-machine violation when the event does not fit the current status.
pub fn apply_event(session: &mut Session, event: EngineEvent) -> SessionResult<Option<usize>> {
    match event {
        EngineEvent::MetadataReady { name, files } => {
            session.record_metadata(&name, &files)?;
            Ok(select_best_file(&session.files).map(|file| file.index))
        }
        EngineEvent::Progress(sample) => {
            session.record_progress(&sample);
            Ok(None)
        }
        EngineEvent::Completed => {
            session.record_completed()?;
            Ok(None)
        }
        EngineEvent::Error { message } => {
            session.record_error(message)?;
            Ok(None)
        }
        EngineEvent::ServerReady { endpoint } => {
            session.stream_endpoint = Some(endpoint);
            Ok(None)
        }
    }
}

/// Drains one session's engine events into the registry.
pub struct EventIngestor {
    registry: Arc<SessionRegistry>,
    session_id: String,
    engine: Arc<dyn EngineHandle>,
}

impl EventIngestor {
    /// Bind an ingestor to `session_id` and its engine.
    #[must_use]
    pub fn new(
        registry: Arc<SessionRegistry>,
        session_id: impl Into<String>,
        engine: Arc<dyn EngineHandle>,
    ) -> Self {
        Self {
            registry,
            session_id: session_id.into(),
            engine,
        }
    }

    /// Run the consumer loop on a new task.
    #[must_use]
    pub fn spawn(self, events: mpsc::Receiver<EngineEvent>) -> JoinHandle<()> {
        tokio::spawn(self.run(events))
    }

    /// Consume events until the channel closes or the session disappears.
    pub async fn run(self, mut events: mpsc::Receiver<EngineEvent>) {
        while let Some(event) = events.recv().await {
            if !self.ingest(event).await {
                debug!(session_id = %self.session_id, "session gone; stopping event ingestion");
                return;
            }
        }
        debug!(session_id = %self.session_id, "engine event channel closed");
    }

    /// Apply one event. Returns `false` once the session no longer exists.
    pub async fn ingest(&self, event: EngineEvent) -> bool {
        let kind = event.kind();
        let outcome = self
            .registry
            .update(&self.session_id, |session| apply_event(session, event));
        match outcome {
            None => false,
            Some(Err(err)) => {
                warn!(
                    session_id = %self.session_id,
                    event = kind,
                    error = %err,
                    "dropping engine event that does not fit the session state"
                );
                true
            }
            Some(Ok(prioritize)) => {
                if kind != "progress" {
                    info!(session_id = %self.session_id, event = kind, "engine event applied");
                }
                if let Some(file_index) = prioritize
                    && let Err(err) = self.engine.prioritize(file_index).await
                {
                    debug!(
                        session_id = %self.session_id,
                        file_index,
                        error = %err,
                        "file prioritisation skipped"
                    );
                }
                true
            }
        }
    }
}
