//! Outbound (client-side) adapter.

use crate::instrumentation::{Instrumentation, ResponseDetails};
use std::net::SocketAddr;
use std::sync::Arc;
use tripwire_core::{
    BoundaryKind, CaptureFailure, Direction, HeaderReplaceable, Headers, NativeHandle, Protocol,
    RequestEvent,
};

/// Read access to an outbound request.
///
/// The request must also accept header replacement: listeners replace
/// headers on the request event, and the change is written through to the
/// real request before it is sent.
pub trait OutboundRequest: HeaderReplaceable + 'static {
    /// Request method, e.g. `POST`.
    fn method(&self) -> &str;

    /// Request URI.
    fn uri(&self) -> &str;

    /// Request headers.
    fn headers(&self) -> Headers;

    /// Address of the remote peer, if known before sending.
    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Protocol version, e.g. `HTTP/1.1`.
    fn protocol_version(&self) -> Option<&str> {
        None
    }
}

/// Read access to the response of an outbound request.
pub trait OutboundResponse {
    /// Status code.
    fn status(&self) -> u16;

    /// Response headers.
    fn headers(&self) -> Headers {
        Headers::new()
    }

    /// The response object handed to listeners, if it can be shared.
    fn native(&self) -> Option<NativeHandle> {
        None
    }
}

/// Instruments an outbound client call.
///
/// Client calls do not open transactions: outside of one, the crossing runs
/// in an implicit context that publishes only `Request` and `Response`.
/// Wrappers and delegating clients that call back into
/// [`execute`](Self::execute) on the same thread are silent.
#[derive(Debug, Clone, Copy)]
pub struct ClientAdapter<'a> {
    instrumentation: &'a Instrumentation,
    kind: BoundaryKind,
    origin: &'static str,
}

impl<'a> ClientAdapter<'a> {
    /// Default origin reported on request events.
    pub const ORIGIN: &'static str = "http-client";

    /// Adapter for [`BoundaryKind::HTTP_CLIENT`].
    #[must_use]
    pub const fn new(instrumentation: &'a Instrumentation) -> Self {
        Self {
            instrumentation,
            kind: BoundaryKind::HTTP_CLIENT,
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

    /// Send `request` through `call`, reporting the response's status and
    /// headers.
    ///
    /// # Errors
    ///
    /// Returns `call`'s error unchanged.
    pub fn execute<Req, Resp, E, F>(&self, request: &Arc<Req>, call: F) -> Result<Resp, E>
    where
        Req: OutboundRequest,
        Resp: OutboundResponse,
        E: CaptureFailure,
        F: FnOnce() -> Result<Resp, E>,
    {
        self.instrumentation.intercept(
            self.kind,
            || describe(self.origin, request),
            call,
            |response| {
                response.map_or_else(ResponseDetails::new, |response| {
                    let details = ResponseDetails::new()
                        .with_status(response.status())
                        .with_headers(response.headers());
                    match response.native() {
                        Some(native) => details.with_native(native),
                        None => details,
                    }
                })
            },
        )
    }

    /// Send `request` through a handler-style `call` whose result is not a
    /// response object; the response event carries no status.
    ///
    /// # Errors
    ///
    /// Returns `call`'s error unchanged.
    pub fn execute_with<Req, T, E, F>(&self, request: &Arc<Req>, call: F) -> Result<T, E>
    where
        Req: OutboundRequest,
        E: CaptureFailure,
        F: FnOnce() -> Result<T, E>,
    {
        self.instrumentation.intercept(
            self.kind,
            || describe(self.origin, request),
            call,
            |_| ResponseDetails::new(),
        )
    }
}

fn describe<Req: OutboundRequest>(origin: &'static str, request: &Arc<Req>) -> RequestEvent {
    let sink: Arc<dyn HeaderReplaceable> = Arc::<Req>::clone(request);
    let mut event = RequestEvent::new(Protocol::Http, Direction::Outbound, origin)
        .with_method(request.method())
        .with_target(request.uri())
        .with_headers(request.headers())
        .with_header_sink(sink)
        .with_native(Arc::<Req>::clone(request));
    if let Some(addr) = request.remote_addr() {
        event = event.with_remote_addr(addr);
    }
    if let Some(version) = request.protocol_version() {
        event = event.with_protocol_version(version);
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Post {
        headers: Mutex<Headers>,
    }

    impl HeaderReplaceable for Post {
        fn replace_header(&self, name: &str, value: &str) {
            self.headers.lock().replace(name, value);
        }
    }

    impl OutboundRequest for Post {
        fn method(&self) -> &str {
            "POST"
        }
        fn uri(&self) -> &str {
            "http://backend/orders"
        }
        fn headers(&self) -> Headers {
            self.headers.lock().clone()
        }
    }

    #[test]
    fn test_describe_wires_request_as_sink_and_native() {
        let request = Arc::new(Post::default());
        let event = describe("http-client", &request);

        assert_eq!(event.method(), "POST");
        assert_eq!(event.direction(), Direction::Outbound);
        assert!(event.has_header_sink());
        assert!(Arc::ptr_eq(&event.native_as::<Post>().unwrap(), &request));

        event.replace_header("traceparent", "00-abc-01");
        assert_eq!(
            request.headers().get("traceparent"),
            Some("00-abc-01")
        );
    }
}
