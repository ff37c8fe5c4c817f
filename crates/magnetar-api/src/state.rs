//! Shared state handed to every handler.

use std::sync::Arc;

use magnetar_core::{SessionManager, StreamPipeline};
use magnetar_telemetry::Metrics;

/// Handler dependencies.
pub struct ApiState {
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) pipeline: Arc<StreamPipeline>,
    pub(crate) telemetry: Metrics,
}

impl std::fmt::Debug for ApiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiState")
            .field("sessions", &self.sessions)
            .field("telemetry", &self.telemetry)
            .finish_non_exhaustive()
    }
}

impl ApiState {
    /// Bundle the session manager, stream pipeline and metrics registry.
    #[must_use]
    pub const fn new(
        sessions: Arc<SessionManager>,
        pipeline: Arc<StreamPipeline>,
        telemetry: Metrics,
    ) -> Self {
        Self {
            sessions,
            pipeline,
            telemetry,
        }
    }
}
