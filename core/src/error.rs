//! Error taxonomy for the correlation core.
//!
//! None of these errors are fatal. Every operation that can fail leaves the
//! core's state untouched, so callers are free to report the error and carry
//! on as if instrumentation were absent.
//!
//! Failures of the instrumented call itself are deliberately *not* part of
//! this taxonomy: they belong to the host application and travel through the
//! core unchanged, captured on the response event as a
//! [`CapturedFailure`](crate::event::CapturedFailure).

use crate::boundary::BoundaryKind;
use crate::event::{CaptureFailure, CapturedFailure};
use thiserror::Error;

/// Errors raised by the correlation core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorrelationError {
    /// A context operation was invoked on a thread without an active
    /// transaction context.
    #[error("No active transaction context on thread {thread}")]
    NoActiveContext {
        /// Debug rendering of the calling thread's id
        thread: String,
    },

    /// A registered listener failed (returned an error or panicked) while
    /// handling an event. Delivery to other listeners was not affected.
    #[error("Listener '{listener}' failed: {message}")]
    ListenerFailure {
        /// Name of the failing listener
        listener: String,
        /// Failure description
        message: String,
    },

    /// An interception guard exit had no matching outermost entry.
    #[error("Guard exit for '{kind}' without a matching entry")]
    GuardImbalance {
        /// The boundary kind that was exited
        kind: BoundaryKind,
    },

    /// A boundary adapter failed while describing a request or response.
    /// The instrumented call itself was not affected.
    #[error("Adapter for '{kind}' failed: {message}")]
    AdapterFailure {
        /// The boundary kind being described
        kind: BoundaryKind,
        /// Failure description
        message: String,
    },
}

impl CorrelationError {
    /// Build a [`CorrelationError::NoActiveContext`] for the calling thread.
    #[must_use]
    pub fn no_active_context() -> Self {
        Self::NoActiveContext {
            thread: format!("{:?}", std::thread::current().id()),
        }
    }

    /// Short, stable label for the error class (used as a metrics label).
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::NoActiveContext { .. } => "no_active_context",
            Self::ListenerFailure { .. } => "listener_failure",
            Self::GuardImbalance { .. } => "guard_imbalance",
            Self::AdapterFailure { .. } => "adapter_failure",
        }
    }
}

/// Error returned by a [`Listener`](crate::event_bus::Listener) that could not
/// handle an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    /// Create a listener error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl CaptureFailure for CorrelationError {
    fn capture(&self) -> CapturedFailure {
        CapturedFailure::from_shared_error(self)
    }
}

impl CaptureFailure for ListenerError {
    fn capture(&self) -> CapturedFailure {
        CapturedFailure::from_shared_error(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        assert_eq!(
            CorrelationError::no_active_context().label(),
            "no_active_context"
        );
        assert_eq!(
            CorrelationError::GuardImbalance {
                kind: BoundaryKind::SERVICE
            }
            .label(),
            "guard_imbalance"
        );
        assert_eq!(
            CorrelationError::ListenerFailure {
                listener: "l".to_string(),
                message: "m".to_string()
            }
            .label(),
            "listener_failure"
        );
    }

    #[test]
    fn test_display_names_the_listener() {
        let error = CorrelationError::ListenerFailure {
            listener: "exporter".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(error.to_string(), "Listener 'exporter' failed: boom");
    }

    #[test]
    fn test_listener_error_capture_keeps_the_value() {
        let error = ListenerError::new("exporter offline");
        let failure = error.capture();
        assert_eq!(failure.downcast_error::<ListenerError>(), Some(&error));
        assert_eq!(failure.message(), "exporter offline");
    }
}
