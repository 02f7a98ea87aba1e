//! Containment of correlation errors.
//!
//! Nothing that goes wrong inside the instrumentation may change the
//! behaviour of the instrumented call. The [`Reporter`] is where such errors
//! end up: they are logged (at the configured [`ReportLevel`]), counted in
//! metrics, and otherwise swallowed.

use crate::config::ReportLevel;
use crate::metrics::ErrorMetrics;
use std::sync::atomic::{AtomicU64, Ordering};
use tripwire_core::{ContextId, CorrelationError};

/// Logs and counts contained [`CorrelationError`]s.
#[derive(Debug, Default)]
pub struct Reporter {
    level: ReportLevel,
    no_active_context: AtomicU64,
    listener_failure: AtomicU64,
    guard_imbalance: AtomicU64,
    adapter_failure: AtomicU64,
}

impl Reporter {
    /// Create a reporter logging at `level`.
    #[must_use]
    pub fn new(level: ReportLevel) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    /// Configured level.
    #[must_use]
    pub const fn level(&self) -> ReportLevel {
        self.level
    }

    /// Contain `error`, raised while `context` (if any) was active.
    pub fn report(&self, error: &CorrelationError, context: Option<ContextId>) {
        self.counter(error).fetch_add(1, Ordering::Relaxed);
        ErrorMetrics::record(error.label());

        let context_id = context.map(tracing::field::display);
        match (self.level, error) {
            (ReportLevel::Off, _) => {}
            (ReportLevel::Warn, CorrelationError::ListenerFailure { listener, .. }) => {
                tracing::warn!(
                    error.class = error.label(),
                    context_id,
                    listener = %listener,
                    "{error}"
                );
            }
            (ReportLevel::Warn, _) => {
                tracing::warn!(error.class = error.label(), context_id, "{error}");
            }
            (ReportLevel::Debug, _) => {
                tracing::debug!(error.class = error.label(), context_id, "{error}");
            }
        }
    }

    /// Number of contained errors of the same class as `error`.
    #[must_use]
    pub fn count_of(&self, error: &CorrelationError) -> u64 {
        self.counter(error).load(Ordering::Relaxed)
    }

    /// Number of contained errors whose [`label`](CorrelationError::label)
    /// is `label`; unknown labels count zero.
    #[must_use]
    pub fn count(&self, label: &str) -> u64 {
        let counter = match label {
            "no_active_context" => &self.no_active_context,
            "listener_failure" => &self.listener_failure,
            "guard_imbalance" => &self.guard_imbalance,
            "adapter_failure" => &self.adapter_failure,
            _ => return 0,
        };
        counter.load(Ordering::Relaxed)
    }

    /// Total contained errors.
    #[must_use]
    pub fn total(&self) -> u64 {
        [
            &self.no_active_context,
            &self.listener_failure,
            &self.guard_imbalance,
            &self.adapter_failure,
        ]
        .iter()
        .map(|c| c.load(Ordering::Relaxed))
        .sum()
    }

    fn counter(&self, error: &CorrelationError) -> &AtomicU64 {
        match error {
            CorrelationError::NoActiveContext { .. } => &self.no_active_context,
            CorrelationError::ListenerFailure { .. } => &self.listener_failure,
            CorrelationError::GuardImbalance { .. } => &self.guard_imbalance,
            CorrelationError::AdapterFailure { .. } => &self.adapter_failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripwire_core::BoundaryKind;

    #[test]
    fn test_reports_are_counted_per_class() {
        let reporter = Reporter::new(ReportLevel::Off);
        let imbalance = CorrelationError::GuardImbalance {
            kind: BoundaryKind::SERVICE,
        };

        reporter.report(&imbalance, None);
        reporter.report(&imbalance, Some(ContextId::from_raw(7)));
        reporter.report(&CorrelationError::no_active_context(), None);

        assert_eq!(reporter.count_of(&imbalance), 2);
        assert_eq!(reporter.count("guard_imbalance"), 2);
        assert_eq!(reporter.count("no_active_context"), 1);
        assert_eq!(reporter.count("listener_failure"), 0);
        assert_eq!(reporter.count("unknown"), 0);
        assert_eq!(reporter.total(), 3);
    }

    #[test]
    fn test_every_level_counts() {
        for level in [ReportLevel::Warn, ReportLevel::Debug, ReportLevel::Off] {
            let reporter = Reporter::new(level);
            reporter.report(
                &CorrelationError::ListenerFailure {
                    listener: "exporter".to_string(),
                    message: "boom".to_string(),
                },
                Some(ContextId::from_raw(1)),
            );
            assert_eq!(reporter.level(), level);
            assert_eq!(reporter.total(), 1);
        }
    }
}
