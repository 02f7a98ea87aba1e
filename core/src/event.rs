//! Event model.
//!
//! Events form two correlated pairs: the transaction lifecycle pair
//! ([`EventPayload::TransactionBegin`] / [`EventPayload::TransactionEnd`]) and
//! the protocol-call pair ([`EventPayload::Request`] /
//! [`EventPayload::Response`]).
//!
//! Every [`Event`] carries the identity of the transaction that produced it,
//! a logical timestamp that increases monotonically within that transaction,
//! and a wall-clock timestamp taken from the injected
//! [`Clock`](crate::environment::Clock).
//!
//! Request and response payloads are shared behind [`Arc`] so that a response
//! can hold its request (and listeners can keep either) without copying. The
//! request never points back to its response.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tripwire_core::event::{Direction, Protocol, RequestEvent, ResponseEvent};
//! use tripwire_core::event::HeaderReplaceable;
//!
//! let request = Arc::new(
//!     RequestEvent::new(Protocol::Http, Direction::Outbound, "example-client")
//!         .with_method("GET")
//!         .with_target("http://example.com/")
//!         .with_header("accept", "*/*"),
//! );
//! request.replace_header("accept", "application/json");
//!
//! let response = ResponseEvent::new(Arc::clone(&request)).with_status(200);
//! assert!(Arc::ptr_eq(response.request(), &request));
//! assert_eq!(request.header("accept").as_deref(), Some("application/json"));
//! ```

use crate::context::ContextId;
use crate::headers::Headers;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::any::Any;
use std::error::Error;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

/// Shared handle to the host's own request or response object.
pub type NativeHandle = Arc<dyn Any + Send + Sync>;

/// Capability to overwrite a header of an in-flight request.
///
/// Replacement is total: after `replace_header(name, value)` the request
/// holds exactly one value for `name`, equal to `value`.
pub trait HeaderReplaceable: Send + Sync {
    /// Replace every value of `name` with `value`.
    fn replace_header(&self, name: &str, value: &str);
}

/// Wire protocol of a request/response pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// HTTP
    Http,
    /// Generic service/RPC call
    Rpc,
}

/// Direction of a request relative to the instrumented process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// A call entering this process (service side)
    Inbound,
    /// A call leaving this process (client side)
    Outbound,
}

/// Request half of a protocol call.
pub struct RequestEvent {
    protocol: Protocol,
    direction: Direction,
    origin: String,
    method: String,
    target: String,
    service: Option<String>,
    operation: Option<String>,
    protocol_version: Option<String>,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    headers: RwLock<Headers>,
    sink: Option<Arc<dyn HeaderReplaceable>>,
    native: Option<NativeHandle>,
}

impl RequestEvent {
    /// Create a request event. `origin` names the adapter that produced it.
    #[must_use]
    pub fn new(protocol: Protocol, direction: Direction, origin: impl Into<String>) -> Self {
        Self {
            protocol,
            direction,
            origin: origin.into(),
            method: String::new(),
            target: String::new(),
            service: None,
            operation: None,
            protocol_version: None,
            local_addr: None,
            remote_addr: None,
            headers: RwLock::new(Headers::new()),
            sink: None,
            native: None,
        }
    }

    /// Set the request method (`GET`, `POST`, an RPC operation verb, ...).
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Set the request target (URL or address).
    #[must_use]
    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    /// Set the logical service name.
    #[must_use]
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Set the logical operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Set the protocol version (`HTTP/1.1`, ...).
    #[must_use]
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = Some(version.into());
        self
    }

    /// Set the local (destination) address.
    #[must_use]
    pub const fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Set the remote (source) address.
    #[must_use]
    pub const fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Append one header value.
    #[must_use]
    pub fn with_header(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.write().append(name, value);
        self
    }

    /// Replace the header map.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = RwLock::new(headers);
        self
    }

    /// Wire header replacement through to the real request object.
    #[must_use]
    pub fn with_header_sink(mut self, sink: Arc<dyn HeaderReplaceable>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Attach the host's request object.
    #[must_use]
    pub fn with_native(mut self, native: NativeHandle) -> Self {
        self.native = Some(native);
        self
    }

    /// Wire protocol.
    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Call direction.
    #[must_use]
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Name of the adapter that produced this event.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request target (URL).
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Logical service name, if known.
    #[must_use]
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    /// Logical operation name, if known.
    #[must_use]
    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }

    /// Protocol version, if known.
    #[must_use]
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// Local address.
    #[must_use]
    pub const fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Remote address.
    #[must_use]
    pub const fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Port the request arrived on (local port).
    #[must_use]
    pub fn destination_port(&self) -> Option<u16> {
        self.local_addr.map(|addr| addr.port())
    }

    /// Port the request came from (remote port).
    #[must_use]
    pub fn source_port(&self) -> Option<u16> {
        self.remote_addr.map(|addr| addr.port())
    }

    /// First value of header `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers.read().get(name).map(str::to_owned)
    }

    /// Snapshot of all headers.
    #[must_use]
    pub fn headers(&self) -> Headers {
        self.headers.read().clone()
    }

    /// Whether header replacement reaches a real request object.
    #[must_use]
    pub fn has_header_sink(&self) -> bool {
        self.sink.is_some()
    }

    /// The host's request object, if the adapter attached one.
    #[must_use]
    pub const fn native(&self) -> Option<&NativeHandle> {
        self.native.as_ref()
    }

    /// The host's request object, if it is a `T`.
    #[must_use]
    pub fn native_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.native.clone()?.downcast::<T>().ok()
    }
}

impl HeaderReplaceable for RequestEvent {
    fn replace_header(&self, name: &str, value: &str) {
        self.headers.write().replace(name, value);
        if let Some(sink) = &self.sink {
            sink.replace_header(name, value);
        }
    }
}

impl fmt::Debug for RequestEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestEvent")
            .field("protocol", &self.protocol)
            .field("direction", &self.direction)
            .field("origin", &self.origin)
            .field("method", &self.method)
            .field("target", &self.target)
            .field("service", &self.service)
            .field("operation", &self.operation)
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("headers", &*self.headers.read())
            .field("sink", &self.sink.is_some())
            .field("native", &self.native.is_some())
            .finish_non_exhaustive()
    }
}

/// Description of a failure of the instrumented call.
///
/// The failure itself is returned to the caller untouched; this is only what
/// listeners get to see of it.
///
/// Error types whose value can be shared keep it as well (see
/// [`from_shared_error`](Self::from_shared_error)); equality only compares
/// type name and message.
#[derive(Clone, Debug)]
pub struct CapturedFailure {
    type_name: &'static str,
    message: String,
    error: Option<Arc<dyn Error + Send + Sync>>,
}

impl CapturedFailure {
    /// Type name used for failures captured from a panic.
    pub const PANIC: &'static str = "panic";

    /// Capture an error value.
    #[must_use]
    pub fn from_error<E: fmt::Display + ?Sized>(error: &E) -> Self {
        Self {
            type_name: std::any::type_name::<E>(),
            message: error.to_string(),
            error: None,
        }
    }

    /// Capture an error value, keeping a clone of it for listeners.
    #[must_use]
    pub fn from_shared_error<E>(error: &E) -> Self
    where
        E: Error + Clone + Send + Sync + 'static,
    {
        Self::from_error(error).with_error(Arc::new(error.clone()))
    }

    /// Keep `error` as the failure value.
    #[must_use]
    pub fn with_error(mut self, error: Arc<dyn Error + Send + Sync>) -> Self {
        self.error = Some(error);
        self
    }

    /// Capture a panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "<non-string panic payload>".to_string());
        Self {
            type_name: Self::PANIC,
            message,
            error: None,
        }
    }

    /// Fully qualified type name of the failure.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Rendered failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether the failure was a panic rather than an error value.
    #[must_use]
    pub fn is_panic(&self) -> bool {
        self.type_name == Self::PANIC
    }

    /// The failure value, when its type could share it.
    #[must_use]
    pub fn error(&self) -> Option<&(dyn Error + Send + Sync + 'static)> {
        self.error.as_deref()
    }

    /// The failure value, if it is a `T`.
    #[must_use]
    pub fn downcast_error<T: Error + 'static>(&self) -> Option<&T> {
        self.error()?.downcast_ref::<T>()
    }
}

impl PartialEq for CapturedFailure {
    fn eq(&self, other: &Self) -> bool {
        self.type_name == other.type_name && self.message == other.message
    }
}

impl Eq for CapturedFailure {}

/// Describes a failure of the instrumented call to listeners.
///
/// The provided [`capture`](Self::capture) keeps the type name and rendered
/// message. Cloneable error types should override it with
/// [`CapturedFailure::from_shared_error`] so listeners get the value itself:
///
/// ```
/// use tripwire_core::event::{CaptureFailure, CapturedFailure};
///
/// #[derive(Debug, Clone, PartialEq)]
/// struct Timeout(u32);
///
/// impl std::fmt::Display for Timeout {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "timed out after {}ms", self.0)
///     }
/// }
///
/// impl std::error::Error for Timeout {}
///
/// impl CaptureFailure for Timeout {
///     fn capture(&self) -> CapturedFailure {
///         CapturedFailure::from_shared_error(self)
///     }
/// }
///
/// let failure = Timeout(250).capture();
/// assert_eq!(failure.downcast_error::<Timeout>(), Some(&Timeout(250)));
/// ```
pub trait CaptureFailure: fmt::Display {
    /// Describe `self`.
    fn capture(&self) -> CapturedFailure {
        CapturedFailure::from_error(self)
    }
}

impl CaptureFailure for String {}

impl CaptureFailure for &str {}

impl CaptureFailure for fmt::Error {}

impl CaptureFailure for Box<dyn Error + Send + Sync> {}

impl CaptureFailure for io::Error {
    /// Keeps an equivalent error: same kind, and same OS code or message.
    fn capture(&self) -> CapturedFailure {
        let copy = self.raw_os_error().map_or_else(
            || io::Error::new(self.kind(), self.to_string()),
            io::Error::from_raw_os_error,
        );
        CapturedFailure::from_error(self).with_error(Arc::new(copy))
    }
}

impl fmt::Display for CapturedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

/// Response half of a protocol call.
#[derive(Debug)]
pub struct ResponseEvent {
    request: Arc<RequestEvent>,
    status: Option<u16>,
    headers: Headers,
    failure: Option<CapturedFailure>,
    native: Option<NativeHandle>,
}

impl ResponseEvent {
    /// Create a response paired with `request`. The pairing is permanent.
    #[must_use]
    pub const fn new(request: Arc<RequestEvent>) -> Self {
        Self {
            request,
            status: None,
            headers: Headers::new(),
            failure: None,
            native: None,
        }
    }

    /// Set the status/result code.
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Set the response headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    /// Attach the failure of the underlying call.
    #[must_use]
    pub fn with_failure(mut self, failure: CapturedFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Attach the host's response object.
    #[must_use]
    pub fn with_native(mut self, native: NativeHandle) -> Self {
        self.native = Some(native);
        self
    }

    /// The request this response answers.
    #[must_use]
    pub const fn request(&self) -> &Arc<RequestEvent> {
        &self.request
    }

    /// Status/result code, if the call produced one.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    /// Response headers.
    #[must_use]
    pub const fn headers(&self) -> &Headers {
        &self.headers
    }

    /// First value of header `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Failure of the underlying call, if it did not complete normally.
    #[must_use]
    pub const fn failure(&self) -> Option<&CapturedFailure> {
        self.failure.as_ref()
    }

    /// The host's response object, if the adapter attached one.
    #[must_use]
    pub const fn native(&self) -> Option<&NativeHandle> {
        self.native.as_ref()
    }

    /// The host's response object, if it is a `T`.
    #[must_use]
    pub fn native_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.native.clone()?.downcast::<T>().ok()
    }
}

/// Discriminator over event payloads.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Start of a transaction
    TransactionBegin,
    /// End of a transaction
    TransactionEnd,
    /// Protocol request
    Request,
    /// Protocol response
    Response,
}

impl EventKind {
    /// Stable name of the kind.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TransactionBegin => "transaction.begin",
            Self::TransactionEnd => "transaction.end",
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Kind-specific event payload.
#[derive(Clone, Debug)]
pub enum EventPayload {
    /// Outer lifecycle boundary opened
    TransactionBegin,
    /// Outer lifecycle boundary closed
    TransactionEnd,
    /// A protocol request
    Request(Arc<RequestEvent>),
    /// A protocol response
    Response(Arc<ResponseEvent>),
}

impl EventPayload {
    /// Discriminator of this payload.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::TransactionBegin => EventKind::TransactionBegin,
            Self::TransactionEnd => EventKind::TransactionEnd,
            Self::Request(_) => EventKind::Request,
            Self::Response(_) => EventKind::Response,
        }
    }
}

/// A published event.
///
/// Cloning is cheap: payloads are reference counted.
#[derive(Clone, Debug)]
pub struct Event {
    context_id: ContextId,
    sequence: u64,
    timestamp: DateTime<Utc>,
    payload: EventPayload,
}

impl Event {
    /// Create an event.
    #[must_use]
    pub const fn new(
        context_id: ContextId,
        sequence: u64,
        timestamp: DateTime<Utc>,
        payload: EventPayload,
    ) -> Self {
        Self {
            context_id,
            sequence,
            timestamp,
            payload,
        }
    }

    /// Identity of the owning transaction context.
    #[must_use]
    pub const fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Logical timestamp within the owning transaction.
    #[must_use]
    pub const fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Wall-clock creation time.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Payload.
    #[must_use]
    pub const fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Discriminator.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// The request payload, if this is a request event.
    #[must_use]
    pub const fn as_request(&self) -> Option<&Arc<RequestEvent>> {
        match &self.payload {
            EventPayload::Request(request) => Some(request),
            _ => None,
        }
    }

    /// The response payload, if this is a response event.
    #[must_use]
    pub const fn as_response(&self) -> Option<&Arc<ResponseEvent>> {
        match &self.payload {
            EventPayload::Response(response) => Some(response),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RealRequest {
        headers: Mutex<Headers>,
    }

    impl HeaderReplaceable for RealRequest {
        fn replace_header(&self, name: &str, value: &str) {
            self.headers.lock().replace(name, value);
        }
    }

    #[test]
    fn test_replace_header_writes_through_to_sink() {
        let real = Arc::new(RealRequest::default());
        real.headers.lock().append("foo", "bar");
        real.headers.lock().append("foo", "bar2");

        let event = RequestEvent::new(Protocol::Http, Direction::Outbound, "test")
            .with_headers(real.headers.lock().clone())
            .with_header_sink(Arc::clone(&real) as Arc<dyn HeaderReplaceable>);

        event.replace_header("foo", "bar3");

        assert_eq!(real.headers.lock().get_all("foo"), ["bar3".to_string()]);
        assert_eq!(event.header("foo").as_deref(), Some("bar3"));
    }

    #[test]
    fn test_replace_header_without_sink_updates_event_only() {
        let event = RequestEvent::new(Protocol::Http, Direction::Inbound, "test")
            .with_header("foo", "bar");
        event.replace_header("foo", "baz");
        assert_eq!(event.headers().get_all("foo"), ["baz".to_string()]);
        assert!(!event.has_header_sink());
    }

    #[test]
    fn test_ports_come_from_addresses() {
        let event = RequestEvent::new(Protocol::Http, Direction::Inbound, "test")
            .with_local_addr("0.0.0.0:80".parse().unwrap())
            .with_remote_addr("1.1.1.1:100".parse().unwrap());
        assert_eq!(event.destination_port(), Some(80));
        assert_eq!(event.source_port(), Some(100));
    }

    #[test]
    fn test_captured_failure_from_error() {
        let error = std::io::Error::other("connection reset");
        let failure = CapturedFailure::from_error(&error);
        assert_eq!(failure.type_name(), "std::io::error::Error");
        assert_eq!(failure.message(), "connection reset");
        assert!(!failure.is_panic());
    }

    #[test]
    fn test_captured_failure_from_panic_payloads() {
        let static_payload: Box<dyn Any + Send> = Box::new("static message");
        let owned_payload: Box<dyn Any + Send> = Box::new("owned".to_string());
        let opaque_payload: Box<dyn Any + Send> = Box::new(42_u8);

        assert_eq!(
            CapturedFailure::from_panic(static_payload.as_ref()).message(),
            "static message"
        );
        assert_eq!(
            CapturedFailure::from_panic(owned_payload.as_ref()).message(),
            "owned"
        );
        assert!(CapturedFailure::from_panic(opaque_payload.as_ref()).is_panic());
    }

    #[test]
    fn test_io_error_capture_keeps_kind() {
        let error = std::io::Error::new(std::io::ErrorKind::TimedOut, "read timed out");
        let failure = error.capture();

        let kept = failure.downcast_error::<std::io::Error>().unwrap();
        assert_eq!(kept.kind(), std::io::ErrorKind::TimedOut);
        assert_eq!(kept.to_string(), "read timed out");
        assert_eq!(failure, CapturedFailure::from_error(&error));
    }

    #[test]
    fn test_default_capture_keeps_only_the_message() {
        let failure = "plain".to_string().capture();
        assert_eq!(failure.message(), "plain");
        assert!(failure.error().is_none());
        assert!(failure.type_name().ends_with("String"));
    }

    #[test]
    fn test_native_handles_downcast_to_host_types() {
        let real = Arc::new(RealRequest::default());
        let request = Arc::new(
            RequestEvent::new(Protocol::Http, Direction::Outbound, "test")
                .with_native(Arc::clone(&real) as NativeHandle),
        );
        let response = ResponseEvent::new(Arc::clone(&request)).with_native(Arc::new(204_u16));

        assert!(Arc::ptr_eq(&request.native_as::<RealRequest>().unwrap(), &real));
        assert!(request.native_as::<String>().is_none());
        assert_eq!(response.native_as::<u16>().as_deref(), Some(&204));
        assert!(ResponseEvent::new(request).native().is_none());
    }

    #[test]
    fn test_response_keeps_its_request() {
        let request = Arc::new(RequestEvent::new(Protocol::Rpc, Direction::Outbound, "rpc"));
        let response = ResponseEvent::new(Arc::clone(&request))
            .with_failure(CapturedFailure::from_error("timed out"));
        assert!(Arc::ptr_eq(response.request(), &request));
        assert_eq!(response.status(), None);
        assert_eq!(response.failure().map(CapturedFailure::message), Some("timed out"));
    }

    #[test]
    fn test_event_kind_accessors() {
        let request = Arc::new(RequestEvent::new(Protocol::Http, Direction::Inbound, "t"));
        let event = Event::new(
            ContextId::from_raw(7),
            2,
            Utc::now(),
            EventPayload::Request(Arc::clone(&request)),
        );
        assert_eq!(event.kind(), EventKind::Request);
        assert!(event.as_request().is_some());
        assert!(event.as_response().is_none());
        assert_eq!(event.context_id(), ContextId::from_raw(7));
        assert_eq!(event.sequence(), 2);
        assert_eq!(EventKind::TransactionBegin.to_string(), "transaction.begin");
    }
}
