//! Metrics collection and exposition.
//!
//! # Metrics
//! - `feed_ingress_nginx_connections` (gauge): active client connections
//! - `feed_ingress_nginx_accepts` / `_handled` / `_requests` (gauge): lifetime counters
//! - `feed_ingress_nginx_{reading,writing,waiting}_connections` (gauge)
//! - `feed_ingress_gclb_registered_frontends` (gauge)

use metrics::{Gauge, Key, Level, Metadata, Recorder};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};

/// A Prometheus registry scoped to one owner.
///
/// Gauges registered here are invisible to the global `metrics` recorder,
/// so independent frontends never share or overwrite each other's values.
pub struct MetricsRegistry {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self { recorder, handle }
    }

    /// Register (or look up) a gauge by name.
    pub fn gauge(&self, name: &'static str) -> Gauge {
        let metadata = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));
        self.recorder.register_gauge(&Key::from_static_name(name), &metadata)
    }

    /// Render every metric in Prometheus text exposition format.
    pub fn render(&self) -> String {
        self.handle.render()
    }

    /// Current value of an unlabelled gauge, if it has been registered.
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.render().lines().find_map(|line| {
            let rest = line.strip_prefix(name)?.strip_prefix(' ')?;
            rest.trim().parse().ok()
        })
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}
