//! # Tripwire Runtime
//!
//! Runtime side of Tripwire: the boundary adapter protocol on top of
//! `tripwire-core`, plus the ambient pieces a host needs to run it.
//!
//! ## Core Components
//!
//! - **Instrumentation**: drives one boundary crossing through the context
//!   registry, interception guard and event bus, see [`instrumentation`]
//! - **Adapters**: generic service and client adapters, see [`adapters`]
//! - **Reporter**: contains correlation errors (log + count), see [`report`]
//! - **Observability**: [`metrics`], [`logging`] and [`config`], wired up
//!   together by [`init`]
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tripwire_core::{Event, Listener, ListenerError};
//! use tripwire_runtime::Instrumentation;
//!
//! struct Printer;
//!
//! impl Listener for Printer {
//!     fn listen(&self, event: &Event) -> Result<(), ListenerError> {
//!         println!("{} #{}", event.kind(), event.sequence());
//!         Ok(())
//!     }
//! }
//!
//! let instrumentation = Instrumentation::new();
//! instrumentation.add_listener(Arc::new(Printer));
//!
//! let scope = instrumentation.transaction();
//! assert!(scope.opened());
//! drop(scope);
//! ```

pub mod adapters;
pub mod config;
pub mod instrumentation;
pub mod logging;
pub mod metrics;
pub mod report;

pub use adapters::{
    ClientAdapter, InboundRequest, InboundResponse, OutboundRequest, OutboundResponse,
    ServiceAdapter,
};
pub use instrumentation::{
    Crossing, Instrumentation, InstrumentationBuilder, ResponseDetails, TransactionScope,
};
pub use report::Reporter;

use crate::config::{ConfigError, TripwireConfig};
use crate::metrics::{MetricsError, MetricsServer};
use thiserror::Error;

/// Errors raised while setting up the host's observability stack.
#[derive(Error, Debug)]
pub enum InitError {
    /// The configuration did not validate
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The metrics recorder could not be installed
    #[error(transparent)]
    Metrics(#[from] MetricsError),
}

/// Set up logging and, when `config` enables them, metrics.
///
/// Installs the log subscriber (a no-op if the host already has one) and
/// starts a [`MetricsServer`] on `metrics_addr`. The returned server renders
/// the Prometheus output; it is `None` when metrics are disabled.
///
/// # Errors
///
/// Returns [`InitError::Config`] if `config` does not validate, and
/// [`InitError::Metrics`] if the recorder cannot be installed.
pub fn init(config: &TripwireConfig) -> Result<Option<MetricsServer>, InitError> {
    config.validate()?;
    let installed = logging::init(&config.observability);
    tracing::debug!(
        subscriber_installed = installed,
        environment = ?config.environment,
        "Tripwire logging initialized"
    );

    if !config.observability.metrics_enabled {
        return Ok(None);
    }
    let mut server = MetricsServer::new(config.observability.metrics_addr);
    server.start()?;
    Ok(Some(server))
}

/// Health check status levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Component is fully operational
    Healthy,

    /// Component is operational but has contained errors
    Degraded,
}

impl HealthStatus {
    /// Check if status is healthy
    #[must_use]
    pub const fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// Check if status is degraded
    #[must_use]
    pub const fn is_degraded(self) -> bool {
        matches!(self, Self::Degraded)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// Health check result for a component
#[derive(Debug, Clone)]
pub struct HealthCheck {
    /// Name of the component being checked
    pub component: String,

    /// Current health status
    pub status: HealthStatus,

    /// Optional message providing details
    pub message: Option<String>,

    /// Metadata such as live context and listener counts
    pub metadata: Vec<(String, String)>,
}

impl HealthCheck {
    /// Create a healthy check result
    #[must_use]
    pub fn healthy(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Healthy,
            message: None,
            metadata: Vec::new(),
        }
    }

    /// Create a degraded check result
    #[must_use]
    pub fn degraded(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: HealthStatus::Degraded,
            message: Some(message.into()),
            metadata: Vec::new(),
        }
    }

    /// Add metadata to the health check
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }
}
