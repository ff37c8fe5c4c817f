//! HTTP surface: routing, handlers and response shaping.

pub(crate) mod constants;
pub(crate) mod errors;
pub(crate) mod health;
pub mod router;
pub(crate) mod sessions;
pub(crate) mod stream;
pub(crate) mod telemetry;
#[cfg(test)]
pub(crate) mod test_support;
