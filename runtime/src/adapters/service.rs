//! Inbound (service-side) adapter.

use crate::instrumentation::{Instrumentation, ResponseDetails};
use std::net::SocketAddr;
use std::sync::Arc;
use tripwire_core::{
    BoundaryKind, CaptureFailure, Direction, Headers, NativeHandle, Protocol, RequestEvent,
};

/// Read access to an inbound request.
pub trait InboundRequest {
    /// Request method, e.g. `GET`.
    fn method(&self) -> &str;

    /// Full request URL.
    fn url(&self) -> &str;

    /// Request headers.
    fn headers(&self) -> Headers;

    /// Address the request was received on.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Address of the caller.
    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Protocol version, e.g. `HTTP/1.1`.
    fn protocol_version(&self) -> Option<&str> {
        None
    }
}

/// Read access to the response of an inbound request, after the call.
pub trait InboundResponse {
    /// Status code, if one was set.
    fn status(&self) -> Option<u16>;

    /// Response headers.
    fn headers(&self) -> Headers;
}

/// Instruments an inbound service entry point.
///
/// Every call through [`service`](Self::service) is a crossing of
/// [`BoundaryKind::SERVICE`] (or the kind set with
/// [`with_kind`](Self::with_kind)). Overriding chains that call `service`
/// again on the same thread produce no additional events.
#[derive(Debug, Clone, Copy)]
pub struct ServiceAdapter<'a> {
    instrumentation: &'a Instrumentation,
    kind: BoundaryKind,
    origin: &'static str,
}

impl<'a> ServiceAdapter<'a> {
    /// Default origin reported on request events.
    pub const ORIGIN: &'static str = "servlet";

    /// Adapter for [`BoundaryKind::SERVICE`].
    #[must_use]
    pub const fn new(instrumentation: &'a Instrumentation) -> Self {
        Self {
            instrumentation,
            kind: BoundaryKind::SERVICE,
            origin: Self::ORIGIN,
        }
    }

    /// Use another boundary kind.
    #[must_use]
    pub const fn with_kind(mut self, kind: BoundaryKind) -> Self {
        self.kind = kind;
        self
    }

    /// Report `origin` on request events.
    #[must_use]
    pub const fn with_origin(mut self, origin: &'static str) -> Self {
        self.origin = origin;
        self
    }

    /// Run `call` as the handling of `request`, reporting `response` once
    /// it returns. Both are attached to their events as native objects.
    ///
    /// # Errors
    ///
    /// Returns whatever `call` returns; the error is also attached to the
    /// response event.
    pub fn service<Req, Resp, T, E, F>(
        &self,
        request: &Arc<Req>,
        response: &Arc<Resp>,
        call: F,
    ) -> Result<T, E>
    where
        Req: InboundRequest + Send + Sync + 'static,
        Resp: InboundResponse + Send + Sync + 'static,
        E: CaptureFailure,
        F: FnOnce() -> Result<T, E>,
    {
        self.instrumentation.intercept(
            self.kind,
            || describe(self.origin, request),
            call,
            |_| ResponseDetails {
                status: response.status(),
                headers: response.headers(),
                native: Some(Arc::<Resp>::clone(response) as NativeHandle),
            },
        )
    }
}

fn describe<Req>(origin: &'static str, request: &Arc<Req>) -> RequestEvent
where
    Req: InboundRequest + Send + Sync + 'static,
{
    let mut event = RequestEvent::new(Protocol::Http, Direction::Inbound, origin)
        .with_method(request.method())
        .with_target(request.url())
        .with_headers(request.headers())
        .with_native(Arc::<Req>::clone(request));
    if let Some(addr) = request.local_addr() {
        event = event.with_local_addr(addr);
    }
    if let Some(addr) = request.remote_addr() {
        event = event.with_remote_addr(addr);
    }
    if let Some(version) = request.protocol_version() {
        event = event.with_protocol_version(version);
    }
    event
}
