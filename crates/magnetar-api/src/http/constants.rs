//! Shared HTTP constants (headers, problem URIs).

pub(crate) const CACHE_CONTROL_NO_STORE: &str = "no-cache, no-store, must-revalidate";
pub(crate) const ACCEPT_RANGES_BYTES: &str = "bytes";
pub(crate) const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";
pub(crate) const STATUS_TOO_EARLY: u16 = 425;

pub(crate) const PROBLEM_INTERNAL: &str = "https://magnetar.dev/problems/internal";
pub(crate) const PROBLEM_BAD_REQUEST: &str = "https://magnetar.dev/problems/bad-request";
pub(crate) const PROBLEM_NOT_FOUND: &str = "https://magnetar.dev/problems/not-found";
pub(crate) const PROBLEM_NOT_YET_AVAILABLE: &str =
    "https://magnetar.dev/problems/not-yet-available";
