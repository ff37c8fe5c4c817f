//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges the session and streaming services report.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    streams_started_total: IntCounterVec,
    sessions_active: IntGauge,
    sessions_added_total: IntCounter,
    sessions_evicted_total: IntCounter,
    engine_failures_total: IntCounter,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Sessions currently held by the registry.
    pub sessions_active: i64,
    /// Sessions created since start-up.
    pub sessions_added_total: u64,
    /// Sessions evicted for inactivity since start-up.
    pub sessions_evicted_total: u64,
    /// Engine start-up failures since start-up.
    pub engine_failures_total: u64,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").field("snapshot", &self.snapshot()).finish()
    }
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any collector cannot be built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = counter_vec(
            "http_requests_total",
            "Total HTTP requests received",
            &["route", "code"],
        )?;
        let streams_started_total = counter_vec(
            "streams_started_total",
            "Media streams started by delivery mode",
            &["mode"],
        )?;
        let sessions_active = IntGauge::with_opts(Opts::new(
            "sessions_active",
            "Sessions currently held by the registry",
        ))
        .map_err(|source| TelemetryError::MetricsCollector {
            name: "sessions_active",
            source,
        })?;
        let sessions_added_total = counter("sessions_added_total", "Sessions created")?;
        let sessions_evicted_total =
            counter("sessions_evicted_total", "Sessions evicted for inactivity")?;
        let engine_failures_total =
            counter("engine_failures_total", "Swarm engine start-up failures")?;

        register(&registry, "http_requests_total", &http_requests_total)?;
        register(&registry, "streams_started_total", &streams_started_total)?;
        register(&registry, "sessions_active", &sessions_active)?;
        register(&registry, "sessions_added_total", &sessions_added_total)?;
        register(&registry, "sessions_evicted_total", &sessions_evicted_total)?;
        register(&registry, "engine_failures_total", &engine_failures_total)?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                http_requests_total,
                streams_started_total,
                sessions_active,
                sessions_added_total,
                sessions_evicted_total,
                engine_failures_total,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        self.inner
            .http_requests_total
            .with_label_values(&[route, &status.to_string()])
            .inc();
    }

    /// Count a stream that started with the given delivery mode.
    pub fn inc_stream(&self, mode: &str) {
        self.inner
            .streams_started_total
            .with_label_values(&[mode])
            .inc();
    }

    /// Set the active session gauge.
    pub fn set_active_sessions(&self, count: usize) {
        self.inner
            .sessions_active
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Count a newly created session.
    pub fn inc_session_added(&self) {
        self.inner.sessions_added_total.inc();
    }

    /// Count a session evicted for inactivity.
    pub fn inc_session_evicted(&self) {
        self.inner.sessions_evicted_total.inc();
    }

    /// Count an engine that failed to start.
    pub fn inc_engine_failure(&self) {
        self.inner.engine_failures_total.inc();
    }

    /// Render the registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the output is not UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.inner.registry.gather(), &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Capture the current gauge and counter values.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_active: self.inner.sessions_active.get(),
            sessions_added_total: self.inner.sessions_added_total.get(),
            sessions_evicted_total: self.inner.sessions_evicted_total.get(),
            engine_failures_total: self.inner.engine_failures_total.get(),
        }
    }
}

fn counter(name: &'static str, help: &str) -> Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help))
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn counter_vec(name: &'static str, help: &str, labels: &[&str]) -> Result<IntCounterVec> {
    IntCounterVec::new(Opts::new(name, help), labels)
        .map_err(|source| TelemetryError::MetricsCollector { name, source })
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_includes_registered_collectors() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_http_request("/torrents", 200);
        metrics.inc_stream("remux");
        metrics.set_active_sessions(3);
        metrics.inc_session_added();
        metrics.inc_session_evicted();
        metrics.inc_engine_failure();

        let rendered = metrics.render()?;
        assert!(rendered.contains("http_requests_total"));
        assert!(rendered.contains("streams_started_total{mode=\"remux\"} 1"));
        assert!(rendered.contains("sessions_active 3"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_active, 3);
        assert_eq!(snapshot.sessions_added_total, 1);
        assert_eq!(snapshot.sessions_evicted_total, 1);
        assert_eq!(snapshot.engine_failures_total, 1);
        Ok(())
    }

    #[test]
    fn registries_are_independent() -> Result<()> {
        let first = Metrics::new()?;
        let second = Metrics::new()?;
        first.inc_session_added();
        assert_eq!(second.snapshot().sessions_added_total, 0);
        Ok(())
    }
}
