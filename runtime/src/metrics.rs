//! Prometheus metrics for the correlation core.
//!
//! These are health counters of the instrumentation itself (how many
//! contexts were opened, how often a boundary was re-entered, how many
//! listeners failed), not an export of the observed events.
//!
//! # Example
//!
//! ```rust,no_run
//! use tripwire_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! if let Some(text) = server.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tripwire_core::{ContextOrigin, EventKind};

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder.
///
/// Installs the global recorder; the host exposes [`render`](Self::render)
/// on whatever endpoint it serves.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address the host serves the metrics endpoint on
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the metrics endpoint is served on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g., in tests), this logs a
    /// warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.000_001, 0.000_005, 0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005,
                    0.01, 0.05,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Tripwire metrics recorder installed"
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this instance did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Transaction contexts
    describe_counter!(
        "tripwire_contexts_created_total",
        "Transaction contexts created, by origin"
    );
    describe_counter!(
        "tripwire_contexts_destroyed_total",
        "Transaction contexts destroyed after their last release"
    );

    // Interception guard
    describe_counter!(
        "tripwire_guard_entries_total",
        "Boundary crossings, by boundary and position (outermost or reentrant)"
    );
    describe_gauge!(
        "tripwire_guard_active_markers",
        "Outermost crossings currently in progress"
    );

    // Event bus
    describe_counter!(
        "tripwire_events_published_total",
        "Events published, by kind"
    );
    describe_counter!(
        "tripwire_listener_deliveries_total",
        "Successful listener deliveries"
    );
    describe_counter!(
        "tripwire_listener_failures_total",
        "Listener deliveries that returned an error or panicked"
    );
    describe_histogram!(
        "tripwire_publish_duration_seconds",
        "Time taken to deliver one event to all listeners"
    );

    // Contained errors
    describe_counter!(
        "tripwire_errors_total",
        "Errors contained by the runtime, by class"
    );
}

/// Transaction context metrics recorder.
pub struct ContextMetrics;

impl ContextMetrics {
    /// Record a context creation.
    pub fn record_created(origin: ContextOrigin) {
        let origin = match origin {
            ContextOrigin::Explicit => "explicit",
            ContextOrigin::Implicit => "implicit",
        };
        counter!("tripwire_contexts_created_total", "origin" => origin).increment(1);
    }

    /// Record a context destruction.
    pub fn record_destroyed() {
        counter!("tripwire_contexts_destroyed_total").increment(1);
    }
}

/// Interception guard metrics recorder.
pub struct GuardMetrics;

impl GuardMetrics {
    /// Record a boundary entry.
    pub fn record_enter(boundary: &'static str, outermost: bool) {
        let position = if outermost { "outermost" } else { "reentrant" };
        counter!(
            "tripwire_guard_entries_total",
            "boundary" => boundary,
            "position" => position
        )
        .increment(1);
    }

    /// Record an outermost crossing setting its marker.
    pub fn record_marker_set() {
        gauge!("tripwire_guard_active_markers").increment(1.0);
    }

    /// Record `count` markers being cleared.
    #[allow(clippy::cast_precision_loss)] // marker counts stay far below 2^52
    pub fn record_markers_cleared(count: usize) {
        gauge!("tripwire_guard_active_markers").decrement(count as f64);
    }
}

/// Event bus metrics recorder.
pub struct BusMetrics;

impl BusMetrics {
    /// Record one publish.
    pub fn record_publish(kind: EventKind, delivered: usize, duration: Duration) {
        counter!("tripwire_events_published_total", "kind" => kind.name()).increment(1);
        counter!("tripwire_listener_deliveries_total").increment(delivered as u64);
        histogram!("tripwire_publish_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record listener failures observed during one publish.
    pub fn record_listener_failures(count: usize) {
        counter!("tripwire_listener_failures_total").increment(count as u64);
    }
}

/// Contained error recorder.
pub struct ErrorMetrics;

impl ErrorMetrics {
    /// Record one contained error of class `label`.
    pub fn record(label: &'static str) {
        counter!("tripwire_errors_total", "class" => label).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:9090".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
        assert_eq!(server.addr(), addr);
    }

    #[test]
    fn test_metrics_server_render() {
        let addr = "127.0.0.1:9090".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        ContextMetrics::record_created(ContextOrigin::Explicit);
        ContextMetrics::record_destroyed();
        GuardMetrics::record_enter("servlet.service", true);
        GuardMetrics::record_marker_set();
        GuardMetrics::record_markers_cleared(1);
        BusMetrics::record_publish(EventKind::Request, 2, Duration::from_micros(3));
        ErrorMetrics::record("guard_imbalance");

        // handle is None if another test installed the recorder first
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("tripwire_contexts_created_total"));
            assert!(rendered.contains("tripwire_guard_entries_total"));
            assert!(rendered.contains("tripwire_guard_active_markers"));
            assert!(rendered.contains("tripwire_events_published_total"));
            assert!(rendered.contains("tripwire_errors_total"));
        }
    }

    #[test]
    fn test_recorders_without_recorder_are_no_ops() {
        // the metrics facade discards samples when no recorder is installed
        ContextMetrics::record_created(ContextOrigin::Implicit);
        GuardMetrics::record_marker_set();
        GuardMetrics::record_markers_cleared(3);
        BusMetrics::record_listener_failures(1);
    }
}
