//! The boundary adapter protocol.
//!
//! [`Instrumentation`] ties the core's pieces together: it owns (shared
//! handles to) a context registry, an interception guard and an event bus,
//! and drives them through one boundary crossing:
//!
//! 1. acquire the thread's context and enter the guard for the boundary kind
//! 2. if outermost: publish `TransactionBegin` (only when this crossing
//!    opened the transaction) and `Request`
//! 3. run the real call, capturing its error or panic
//! 4. if outermost: publish `Response`, with the failure attached
//! 5. if this crossing opened the transaction: publish `TransactionEnd`
//! 6. exit the guard and release the context, on every path
//!
//! Errors raised by the core along the way are contained by the
//! [`Reporter`]; the instrumented call always sees its own result.
//!
//! # Example
//!
//! ```
//! use tripwire_core::{BoundaryKind, Direction, Protocol, RequestEvent};
//! use tripwire_runtime::{Instrumentation, ResponseDetails};
//!
//! let instrumentation = Instrumentation::new();
//!
//! let result: Result<u16, std::io::Error> = instrumentation.intercept(
//!     BoundaryKind::SERVICE,
//!     || {
//!         RequestEvent::new(Protocol::Http, Direction::Inbound, "demo")
//!             .with_method("GET")
//!             .with_target("/health")
//!     },
//!     || Ok(200_u16),
//!     |status| ResponseDetails::new().with_status(status.copied().unwrap_or(500)),
//! );
//!
//! assert_eq!(result.unwrap(), 200);
//! assert!(!instrumentation.is_active());
//! ```

use crate::config::{ReportLevel, TripwireConfig};
use crate::metrics::{BusMetrics, ContextMetrics, GuardMetrics};
use crate::report::Reporter;
use crate::{HealthCheck, HealthStatus};
use once_cell::sync::Lazy;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tripwire_core::environment::{Clock, SystemClock};
use tripwire_core::{
    Acquisition, BoundaryKind, CaptureFailure, CapturedFailure, ContextId, ContextOrigin,
    CorrelationError, Event, EventBus, EventPayload, GuardTicket, Headers, InterceptionGuard,
    Listener, NativeHandle, PublishReport, Release, RequestEvent, ResponseEvent,
    TransactionContexts,
};

static GLOBAL: Lazy<Instrumentation> = Lazy::new(|| {
    let level = match TripwireConfig::from_env() {
        Ok(config) => config.reporting.level,
        Err(error) => {
            tracing::warn!(error = %error, "Invalid Tripwire configuration, using defaults");
            ReportLevel::default()
        }
    };
    Instrumentation::builder()
        .contexts(TransactionContexts::global())
        .guard(InterceptionGuard::global())
        .bus(EventBus::global())
        .report_level(level)
        .build()
});

/// Status and headers describing the outcome of a crossing.
#[derive(Debug, Clone, Default)]
pub struct ResponseDetails {
    /// Protocol status code, if the protocol has one
    pub status: Option<u16>,
    /// Response headers
    pub headers: Headers,
    /// The host's response object, handed to listeners as is
    pub native: Option<NativeHandle>,
}

impl ResponseDetails {
    /// Empty details.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            status: None,
            headers: Headers::new(),
            native: None,
        }
    }

    /// Set the status code.
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Attach the host's response object.
    #[must_use]
    pub fn with_native(mut self, native: NativeHandle) -> Self {
        self.native = Some(native);
        self
    }
}

/// Entry point of the boundary adapter protocol.
///
/// Most hosts use [`Instrumentation::global`]. Private instances (see
/// [`Instrumentation::new`] and [`Instrumentation::builder`]) keep their own
/// registry, guard and bus, which is what tests want.
pub struct Instrumentation {
    contexts: Arc<TransactionContexts>,
    guard: Arc<InterceptionGuard>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    reporter: Reporter,
}

impl Instrumentation {
    /// Instance with a private registry, guard and bus.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Start building an instance.
    #[must_use]
    pub fn builder() -> InstrumentationBuilder {
        InstrumentationBuilder::default()
    }

    /// Process-wide instance over the process-wide registry, guard and bus.
    ///
    /// The report level is read from the environment on first use (see
    /// [`TripwireConfig::from_env`]).
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Process-wide registry, guard and bus, reported at the level `config`
    /// asks for.
    #[must_use]
    pub fn from_config(config: &TripwireConfig) -> Self {
        Self::builder()
            .contexts(TransactionContexts::global())
            .guard(InterceptionGuard::global())
            .bus(EventBus::global())
            .report_level(config.reporting.level)
            .build()
    }

    /// Context registry.
    #[must_use]
    pub fn contexts(&self) -> &TransactionContexts {
        &self.contexts
    }

    /// Interception guard.
    #[must_use]
    pub fn guard(&self) -> &InterceptionGuard {
        &self.guard
    }

    /// Event bus.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Error reporter.
    #[must_use]
    pub const fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    // ----- contexts -----

    /// Acquire the calling thread's context (explicit if created).
    pub fn acquire(&self) -> Acquisition {
        self.acquire_with(ContextOrigin::Explicit)
    }

    fn acquire_with(&self, origin: ContextOrigin) -> Acquisition {
        let acquisition = self.contexts.acquire_with(origin);
        if acquisition.created {
            ContextMetrics::record_created(acquisition.origin);
        }
        acquisition
    }

    /// Release one acquisition of the calling thread's context.
    ///
    /// Without an active context this is a reported no-op returning `None`.
    pub fn release(&self) -> Option<Release> {
        match self.contexts.release() {
            Ok(release) => {
                if release.destroyed {
                    ContextMetrics::record_destroyed();
                }
                Some(release)
            }
            Err(error) => {
                self.reporter.report(&error, None);
                None
            }
        }
    }

    /// Whether the calling thread has a context.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.contexts.is_active()
    }

    /// Identifier of the calling thread's context.
    #[must_use]
    ///
    /// Asking without an active context is reported and returns `None`.
    pub fn identifier(&self) -> Option<ContextId> {
        match self.contexts.identifier() {
            Ok(id) => Some(id),
            Err(error) => {
                self.reporter.report(&error, None);
                None
            }
        }
    }

    /// Forcibly destroy the calling thread's context along with its guard
    /// markers. For recovering from leaked acquisitions.
    pub fn destroy(&self) -> Option<ContextId> {
        let id = self.contexts.destroy()?;
        let markers = self.guard.clear_context(id);
        GuardMetrics::record_markers_cleared(markers);
        ContextMetrics::record_destroyed();
        tracing::debug!(context_id = %id, markers, "Transaction context destroyed");
        Some(id)
    }

    // ----- guard -----

    /// Enter `kind` on the calling thread.
    pub fn enter(&self, kind: BoundaryKind) -> GuardTicket {
        let ticket = self.guard.enter(&self.contexts, kind);
        if ticket.owns_context() {
            ContextMetrics::record_created(ContextOrigin::Implicit);
        }
        GuardMetrics::record_enter(kind.name(), ticket.is_outermost());
        if ticket.is_outermost() {
            GuardMetrics::record_marker_set();
        }
        ticket
    }

    /// Exit a guard entry; imbalances are reported.
    pub fn exit(&self, ticket: GuardTicket) {
        let context_id = ticket.context_id();
        let owned = ticket.owns_context();
        let outermost = ticket.is_outermost();
        match self.guard.exit(&self.contexts, ticket) {
            Ok(()) => {
                if outermost {
                    GuardMetrics::record_markers_cleared(1);
                }
                if owned && !self.contexts.is_active() {
                    ContextMetrics::record_destroyed();
                }
            }
            Err(error) => self.reporter.report(&error, Some(context_id)),
        }
    }

    // ----- bus -----

    /// Register `listener` on this instance's bus.
    pub fn add_listener(&self, listener: Arc<dyn Listener>) -> bool {
        self.bus.add_listener(listener)
    }

    /// Deregister `listener` from this instance's bus.
    pub fn remove_listener<L: Listener + ?Sized>(&self, listener: &Arc<L>) -> bool {
        self.bus.remove_listener(listener)
    }

    /// Publish `event`, reporting listener failures.
    pub fn publish(&self, event: &Event) -> PublishReport {
        let started = Instant::now();
        let report = self.bus.publish(event);
        BusMetrics::record_publish(event.kind(), report.delivered, started.elapsed());
        if !report.failures.is_empty() {
            BusMetrics::record_listener_failures(report.failures.len());
            for failure in &report.failures {
                self.reporter.report(failure, Some(event.context_id()));
            }
        }
        report
    }

    /// Stamp `payload` with the calling thread's context and next sequence
    /// number, then publish it.
    ///
    /// Without an active context nothing is published and the error is
    /// reported.
    pub fn emit(&self, payload: EventPayload) -> Option<PublishReport> {
        let stamped = self.contexts.identifier().and_then(|id| {
            self.contexts
                .next_sequence()
                .map(|sequence| (id, sequence))
        });
        match stamped {
            Ok((id, sequence)) => {
                let event = Event::new(id, sequence, self.clock.now(), payload);
                Some(self.publish(&event))
            }
            Err(error) => {
                self.reporter.report(&error, None);
                None
            }
        }
    }

    // ----- protocol -----

    /// Open (or join) a transaction on the calling thread.
    ///
    /// `TransactionBegin` is published if the scope created the context,
    /// and `TransactionEnd` when that scope is dropped.
    pub fn transaction(&self) -> TransactionScope<'_> {
        TransactionScope::new(self)
    }

    /// Start a crossing of `kind`. Prefer [`intercept`](Self::intercept)
    /// unless the call cannot be expressed as a closure.
    pub fn cross(&self, kind: BoundaryKind) -> Crossing<'_> {
        Crossing::new(self, kind)
    }

    /// Run `call` as one crossing of `kind`.
    ///
    /// `request` is only evaluated for the outermost crossing. `respond`
    /// receives the call's value when it succeeded. A failing or panicking
    /// adapter closure is reported and never affects `call`. An error
    /// returned by `call` reaches listeners through [`CaptureFailure`].
    ///
    /// Returns `call`'s result unchanged; a panic in `call` is resumed after
    /// the response and lifecycle events are published.
    pub fn intercept<T, E, Q, C, R>(
        &self,
        kind: BoundaryKind,
        request: Q,
        call: C,
        respond: R,
    ) -> Result<T, E>
    where
        E: CaptureFailure,
        Q: FnOnce() -> RequestEvent,
        C: FnOnce() -> Result<T, E>,
        R: FnOnce(Option<&T>) -> ResponseDetails,
    {
        let mut crossing = self.cross(kind);

        if crossing.is_outermost() {
            match panic::catch_unwind(AssertUnwindSafe(request)) {
                Ok(event) => {
                    crossing.publish_request(event);
                }
                Err(payload) => {
                    self.report_adapter_panic(kind, crossing.context_id(), payload.as_ref());
                }
            }
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(call));

        if crossing.request().is_some() {
            let value = match &outcome {
                Ok(Ok(value)) => Some(value),
                _ => None,
            };
            let details = panic::catch_unwind(AssertUnwindSafe(|| respond(value)))
                .unwrap_or_else(|payload| {
                    self.report_adapter_panic(kind, crossing.context_id(), payload.as_ref());
                    ResponseDetails::default()
                });
            let failure = match &outcome {
                Ok(Ok(_)) => None,
                Ok(Err(error)) => Some(error.capture()),
                Err(payload) => Some(CapturedFailure::from_panic(payload.as_ref())),
            };
            crossing.publish_response(details, failure);
        }

        crossing.finish();

        match outcome {
            Ok(result) => result,
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    fn report_adapter_panic(
        &self,
        kind: BoundaryKind,
        context_id: ContextId,
        payload: &(dyn Any + Send),
    ) {
        let error = CorrelationError::AdapterFailure {
            kind,
            message: CapturedFailure::from_panic(payload).message().to_string(),
        };
        self.reporter.report(&error, Some(context_id));
    }

    /// Health of this instance: degraded once any error has been contained.
    #[must_use]
    pub fn health(&self) -> HealthCheck {
        let errors = self.reporter.total();
        let check = if errors == 0 {
            HealthCheck::healthy("tripwire")
        } else {
            HealthCheck::degraded("tripwire", format!("{errors} contained errors"))
        };
        check
            .with_metadata("active_contexts", self.contexts.active_count().to_string())
            .with_metadata("guard_markers", self.guard.len().to_string())
            .with_metadata("listeners", self.bus.listener_count().to_string())
    }

    /// Shorthand for `self.health().status`.
    #[must_use]
    pub fn health_status(&self) -> HealthStatus {
        self.health().status
    }
}

impl Default for Instrumentation {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumentation")
            .field("contexts", &self.contexts)
            .field("guard", &self.guard)
            .field("bus", &self.bus)
            .field("reporter", &self.reporter)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Instrumentation`]. Unset parts are created fresh.
#[derive(Default)]
pub struct InstrumentationBuilder {
    contexts: Option<Arc<TransactionContexts>>,
    guard: Option<Arc<InterceptionGuard>>,
    bus: Option<Arc<EventBus>>,
    clock: Option<Arc<dyn Clock>>,
    report_level: ReportLevel,
}

impl InstrumentationBuilder {
    /// Use `contexts` as the context registry.
    #[must_use]
    pub fn contexts(mut self, contexts: Arc<TransactionContexts>) -> Self {
        self.contexts = Some(contexts);
        self
    }

    /// Use `guard` as the interception guard.
    #[must_use]
    pub fn guard(mut self, guard: Arc<InterceptionGuard>) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Use `bus` as the event bus.
    #[must_use]
    pub fn bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Stamp events using `clock`.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Report contained errors at `level`.
    #[must_use]
    pub const fn report_level(mut self, level: ReportLevel) -> Self {
        self.report_level = level;
        self
    }

    /// Build the instance.
    #[must_use]
    pub fn build(self) -> Instrumentation {
        Instrumentation {
            contexts: self.contexts.unwrap_or_default(),
            guard: self.guard.unwrap_or_default(),
            bus: self.bus.unwrap_or_default(),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            reporter: Reporter::new(self.report_level),
        }
    }
}

fn opens_transaction(acquisition: &Acquisition) -> bool {
    acquisition.created && acquisition.origin == ContextOrigin::Explicit
}

/// An open (or joined) transaction; see [`Instrumentation::transaction`].
#[must_use = "dropping the scope ends the transaction immediately"]
#[derive(Debug)]
pub struct TransactionScope<'a> {
    instrumentation: &'a Instrumentation,
    acquisition: Acquisition,
}

impl<'a> TransactionScope<'a> {
    fn new(instrumentation: &'a Instrumentation) -> Self {
        let acquisition = instrumentation.acquire();
        if opens_transaction(&acquisition) {
            tracing::debug!(context_id = %acquisition.id, "Transaction began");
            instrumentation.emit(EventPayload::TransactionBegin);
        }
        Self {
            instrumentation,
            acquisition,
        }
    }

    /// Context the scope holds.
    #[must_use]
    pub const fn context_id(&self) -> ContextId {
        self.acquisition.id
    }

    /// Whether this scope opened the transaction (and will end it).
    #[must_use]
    pub fn opened(&self) -> bool {
        opens_transaction(&self.acquisition)
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if self.opened() {
            self.instrumentation.emit(EventPayload::TransactionEnd);
            tracing::debug!(context_id = %self.acquisition.id, "Transaction ended");
        }
        self.instrumentation.release();
    }
}

/// One boundary crossing in progress; see [`Instrumentation::cross`].
///
/// Dropping the crossing (or calling [`finish`](Self::finish)) publishes
/// `TransactionEnd` if the crossing opened the transaction, then exits the
/// guard and releases the context. This also happens while unwinding.
#[must_use = "dropping a crossing ends it immediately"]
#[derive(Debug)]
pub struct Crossing<'a> {
    instrumentation: &'a Instrumentation,
    kind: BoundaryKind,
    acquisition: Acquisition,
    ticket: Option<GuardTicket>,
    request: Option<Arc<RequestEvent>>,
    responded: bool,
}

impl<'a> Crossing<'a> {
    fn new(instrumentation: &'a Instrumentation, kind: BoundaryKind) -> Self {
        let origin = if kind.opens_transaction() {
            ContextOrigin::Explicit
        } else {
            ContextOrigin::Implicit
        };
        let acquisition = instrumentation.acquire_with(origin);
        let ticket = instrumentation.enter(kind);

        if opens_transaction(&acquisition) {
            tracing::debug!(
                context_id = %acquisition.id,
                boundary = kind.name(),
                "Transaction began"
            );
            instrumentation.emit(EventPayload::TransactionBegin);
        }

        Self {
            instrumentation,
            kind,
            acquisition,
            ticket: Some(ticket),
            request: None,
            responded: false,
        }
    }

    /// Boundary kind being crossed.
    #[must_use]
    pub const fn kind(&self) -> BoundaryKind {
        self.kind
    }

    /// Context the crossing runs in.
    #[must_use]
    pub const fn context_id(&self) -> ContextId {
        self.acquisition.id
    }

    /// Whether this is the outermost crossing of its kind.
    #[must_use]
    pub fn is_outermost(&self) -> bool {
        self.ticket.as_ref().is_some_and(GuardTicket::is_outermost)
    }

    /// Whether this crossing opened the transaction.
    #[must_use]
    pub fn opened_transaction(&self) -> bool {
        opens_transaction(&self.acquisition)
    }

    /// The published request, if any.
    #[must_use]
    pub const fn request(&self) -> Option<&Arc<RequestEvent>> {
        self.request.as_ref()
    }

    /// Publish the request. Ignored (returning `None`) unless this crossing
    /// is outermost and has not published a request yet.
    pub fn publish_request(&mut self, request: RequestEvent) -> Option<Arc<RequestEvent>> {
        if !self.is_outermost() || self.request.is_some() {
            return None;
        }
        let request = Arc::new(request);
        self.instrumentation
            .emit(EventPayload::Request(Arc::clone(&request)));
        self.request = Some(Arc::clone(&request));
        Some(request)
    }

    /// Publish the response to the published request. Returns `false`
    /// (publishing nothing) if there is no request or a response was already
    /// published.
    pub fn publish_response(
        &mut self,
        details: ResponseDetails,
        failure: Option<CapturedFailure>,
    ) -> bool {
        if self.responded {
            return false;
        }
        let Some(request) = self.request.clone() else {
            return false;
        };
        self.responded = true;

        let mut response = ResponseEvent::new(request).with_headers(details.headers);
        if let Some(status) = details.status {
            response = response.with_status(status);
        }
        if let Some(failure) = failure {
            response = response.with_failure(failure);
        }
        if let Some(native) = details.native {
            response = response.with_native(native);
        }
        self.instrumentation
            .emit(EventPayload::Response(Arc::new(response)));
        true
    }

    /// End the crossing.
    pub fn finish(self) {
        drop(self);
    }
}

impl Drop for Crossing<'_> {
    fn drop(&mut self) {
        let Some(ticket) = self.ticket.take() else {
            return;
        };
        if self.opened_transaction() {
            self.instrumentation.emit(EventPayload::TransactionEnd);
            tracing::debug!(
                context_id = %self.acquisition.id,
                boundary = self.kind.name(),
                "Transaction ended"
            );
        }
        self.instrumentation.exit(ticket);
        self.instrumentation.release();
    }
}
