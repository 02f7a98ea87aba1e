//! Fake servlets exercising the service adapter's re-entrancy handling.
//!
//! Each servlet's `service` is instrumented, and so is [`base_service`],
//! the stand-in for the framework's inherited implementation. Servlets that
//! delegate to it therefore re-enter the service boundary on the same thread.
//!
//! Requests and responses are passed as `Arc`s so the adapter can attach
//! them to the published events.

use crate::http::{FakeInboundRequest, FakeInboundResponse};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tripwire_core::{CaptureFailure, CapturedFailure};
use tripwire_runtime::{Instrumentation, ServiceAdapter};

/// Failure raised by a fake servlet.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Servlet failed: {0}")]
pub struct ServletError(pub String);

impl CaptureFailure for ServletError {
    fn capture(&self) -> CapturedFailure {
        CapturedFailure::from_shared_error(self)
    }
}

/// Instrumented base implementation: answers `200`.
///
/// # Errors
///
/// Never fails; the signature matches the servlets that do.
pub fn base_service(
    instrumentation: &Instrumentation,
    request: &Arc<FakeInboundRequest>,
    response: &Arc<FakeInboundResponse>,
) -> Result<(), ServletError> {
    ServiceAdapter::new(instrumentation).service(request, response, || {
        response.set_status(200);
        Ok(())
    })
}

/// Servlet without its own `service`: it only has the base one.
#[derive(Debug, Clone, Copy)]
pub struct DefaultServiceServlet<'a> {
    instrumentation: &'a Instrumentation,
}

impl<'a> DefaultServiceServlet<'a> {
    /// Create the servlet.
    #[must_use]
    pub const fn new(instrumentation: &'a Instrumentation) -> Self {
        Self { instrumentation }
    }

    /// Handle a request.
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn service(
        &self,
        request: &Arc<FakeInboundRequest>,
        response: &Arc<FakeInboundResponse>,
    ) -> Result<(), ServletError> {
        base_service(self.instrumentation, request, response)
    }
}

/// Servlet whose `service` replaces the base one entirely.
#[derive(Debug)]
pub struct OverriddenServlet<'a> {
    instrumentation: &'a Instrumentation,
    ran: AtomicBool,
}

impl<'a> OverriddenServlet<'a> {
    /// Create the servlet.
    #[must_use]
    pub const fn new(instrumentation: &'a Instrumentation) -> Self {
        Self {
            instrumentation,
            ran: AtomicBool::new(false),
        }
    }

    /// Handle a request without delegating.
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn service(
        &self,
        request: &Arc<FakeInboundRequest>,
        response: &Arc<FakeInboundResponse>,
    ) -> Result<(), ServletError> {
        ServiceAdapter::new(self.instrumentation).service(request, response, || {
            self.ran.store(true, Ordering::SeqCst);
            response.set_status(204);
            Ok(())
        })
    }

    /// Whether the overriding `service` ran.
    #[must_use]
    pub fn did_run_service(&self) -> bool {
        self.ran.load(Ordering::SeqCst)
    }
}

/// Servlet whose `service` goes through an overload chain before reaching
/// the base implementation.
#[derive(Debug)]
pub struct ChainedServiceCallServlet<'a> {
    instrumentation: &'a Instrumentation,
    indicator: Mutex<Vec<String>>,
}

impl<'a> ChainedServiceCallServlet<'a> {
    /// Create the servlet.
    #[must_use]
    pub const fn new(instrumentation: &'a Instrumentation) -> Self {
        Self {
            instrumentation,
            indicator: Mutex::new(Vec::new()),
        }
    }

    /// Handle a request through the overload chain.
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn service(
        &self,
        request: &Arc<FakeInboundRequest>,
        response: &Arc<FakeInboundResponse>,
    ) -> Result<(), ServletError> {
        ServiceAdapter::new(self.instrumentation).service(request, response, || {
            self.service_with(request, response, [1, 2, 3, 4])
        })
    }

    /// The overload `service` delegates to.
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn service_with(
        &self,
        request: &Arc<FakeInboundRequest>,
        response: &Arc<FakeInboundResponse>,
        args: [u8; 4],
    ) -> Result<(), ServletError> {
        ServiceAdapter::new(self.instrumentation).service(request, response, || {
            self.indicator.lock().push(format!("{args:?}"));
            base_service(self.instrumentation, request, response)
        })
    }

    /// One entry per run of the overload chain.
    #[must_use]
    pub fn indicator(&self) -> Vec<String> {
        self.indicator.lock().clone()
    }
}

/// Servlet whose `service` always fails.
#[derive(Debug, Clone, Copy)]
pub struct ThrowingServlet<'a> {
    instrumentation: &'a Instrumentation,
}

impl<'a> ThrowingServlet<'a> {
    /// Message of the error the servlet fails with.
    pub const MESSAGE: &'static str = "handler exploded";

    /// Create the servlet.
    #[must_use]
    pub const fn new(instrumentation: &'a Instrumentation) -> Self {
        Self { instrumentation }
    }

    /// Fail to handle a request.
    ///
    /// # Errors
    ///
    /// Always returns [`ServletError`] with [`Self::MESSAGE`].
    pub fn service(
        &self,
        request: &Arc<FakeInboundRequest>,
        response: &Arc<FakeInboundResponse>,
    ) -> Result<(), ServletError> {
        ServiceAdapter::new(self.instrumentation).service(request, response, || {
            response.set_status(500);
            Err(ServletError(Self::MESSAGE.to_string()))
        })
    }
}

/// Servlet that forwards to another servlet instance from its `service`.
#[derive(Debug)]
pub struct NestedServlet<'a> {
    instrumentation: &'a Instrumentation,
    throw: AtomicBool,
}

impl<'a> NestedServlet<'a> {
    /// Create the servlet.
    #[must_use]
    pub const fn new(instrumentation: &'a Instrumentation) -> Self {
        Self {
            instrumentation,
            throw: AtomicBool::new(false),
        }
    }

    /// Make the inner servlet fail.
    pub fn set_throw(&self) {
        self.throw.store(true, Ordering::SeqCst);
    }

    /// Handle a request by forwarding it.
    ///
    /// # Errors
    ///
    /// Returns the inner servlet's error after [`set_throw`](Self::set_throw).
    pub fn service(
        &self,
        request: &Arc<FakeInboundRequest>,
        response: &Arc<FakeInboundResponse>,
    ) -> Result<(), ServletError> {
        ServiceAdapter::new(self.instrumentation).service(request, response, || {
            if self.throw.load(Ordering::SeqCst) {
                ThrowingServlet::new(self.instrumentation).service(request, response)
            } else {
                DefaultServiceServlet::new(self.instrumentation).service(request, response)
            }
        })
    }
}
