//! Span and task-local context for the process and for HTTP requests.
//!
//! # Design
//! - A leaked process span carries the service name and build id for every event.
//! - Request identifiers and matched routes live in task-local storage for the
//!   duration of one request future.

use std::future::Future;
use std::sync::Arc;

use tracing::{Span, span::Entered};

use crate::init::build_sha;

/// Keeps the process-level span entered for as long as the guard lives.
pub struct GlobalContextGuard {
    _guard: Entered<'static>,
}

impl GlobalContextGuard {
    /// Enter the process span for `service`.
    #[must_use]
    pub fn new(service: impl Into<String>) -> Self {
        let service = service.into();
        let span: &'static Span = Box::leak(Box::new(tracing::info_span!(
            "app",
            service = %service,
            build_sha = %build_sha()
        )));
        Self {
            _guard: span.enter(),
        }
    }
}

/// Request identifier of the request currently being served, if any.
#[must_use]
pub fn current_request_id() -> Option<String> {
    ACTIVE_REQUEST
        .try_with(|ctx| ctx.request_id.to_string())
        .ok()
}

/// Matched route of the request currently being served, if any.
#[must_use]
pub fn current_route() -> Option<String> {
    ACTIVE_REQUEST.try_with(|ctx| ctx.route.to_string()).ok()
}

/// Run `fut` with the request identifier and route available to downstream code.
pub async fn with_request_context<Fut, T>(
    request_id: impl Into<String>,
    route: impl Into<String>,
    fut: Fut,
) -> T
where
    Fut: Future<Output = T>,
{
    let context = RequestContext {
        request_id: Arc::from(request_id.into()),
        route: Arc::from(route.into()),
    };
    ACTIVE_REQUEST.scope(context, fut).await
}

#[derive(Clone)]
struct RequestContext {
    request_id: Arc<str>,
    route: Arc<str>,
}

tokio::task_local! {
    static ACTIVE_REQUEST: RequestContext;
}
