//! In-memory request and response objects implementing the adapter traits.

use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use tripwire_core::{HeaderReplaceable, Headers, NativeHandle};
use tripwire_runtime::{InboundRequest, InboundResponse, OutboundRequest, OutboundResponse};

/// Inbound request with fixed contents.
#[derive(Debug, Clone, Default)]
pub struct FakeInboundRequest {
    method: String,
    url: String,
    headers: Headers,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
    protocol_version: Option<String>,
}

impl FakeInboundRequest {
    /// `GET url` over `HTTP/1.1`.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            protocol_version: Some("HTTP/1.1".to_string()),
            ..Self::default()
        }
    }

    /// Use another method.
    #[must_use]
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Add a header value.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Set the local address.
    #[must_use]
    pub const fn with_local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Set the remote address.
    #[must_use]
    pub const fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// First value of `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }
}

impl InboundRequest for FakeInboundRequest {
    fn method(&self) -> &str {
        &self.method
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn headers(&self) -> Headers {
        self.headers.clone()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }
}

/// Inbound response written by the handler during the call.
#[derive(Debug, Default)]
pub struct FakeInboundResponse {
    status: Mutex<Option<u16>>,
    headers: Mutex<Headers>,
}

impl FakeInboundResponse {
    /// Empty response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the status code.
    pub fn set_status(&self, status: u16) {
        *self.status.lock() = Some(status);
    }

    /// Add a header value.
    pub fn add_header(&self, name: &str, value: &str) {
        self.headers.lock().append(name, value);
    }
}

impl InboundResponse for FakeInboundResponse {
    fn status(&self) -> Option<u16> {
        *self.status.lock()
    }

    fn headers(&self) -> Headers {
        self.headers.lock().clone()
    }
}

/// Outbound request whose headers can be replaced while in flight.
#[derive(Debug, Default)]
pub struct FakeOutboundRequest {
    method: String,
    uri: String,
    headers: Mutex<Headers>,
}

impl FakeOutboundRequest {
    /// `GET uri`.
    #[must_use]
    pub fn get(uri: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            uri: uri.into(),
            headers: Mutex::new(Headers::new()),
        }
    }

    /// Add a header value.
    pub fn add_header(&self, name: &str, value: &str) {
        self.headers.lock().append(name, value);
    }

    /// All values of `name`.
    #[must_use]
    pub fn header_values(&self, name: &str) -> Vec<String> {
        self.headers.lock().get_all(name).to_vec()
    }

    /// First value of `name`.
    #[must_use]
    pub fn first_header(&self, name: &str) -> Option<String> {
        self.headers.lock().get(name).map(str::to_string)
    }
}

impl HeaderReplaceable for FakeOutboundRequest {
    fn replace_header(&self, name: &str, value: &str) {
        self.headers.lock().replace(name, value);
    }
}

impl OutboundRequest for FakeOutboundRequest {
    fn method(&self) -> &str {
        &self.method
    }

    fn uri(&self) -> &str {
        &self.uri
    }

    fn headers(&self) -> Headers {
        self.headers.lock().clone()
    }

    fn protocol_version(&self) -> Option<&str> {
        Some("HTTP/1.1")
    }
}

/// Outbound response with fixed contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeOutboundResponse {
    status: u16,
    headers: Headers,
}

impl FakeOutboundResponse {
    /// Response with `status` and no headers.
    #[must_use]
    pub const fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
        }
    }

    /// Add a header value.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }
}

impl OutboundResponse for FakeOutboundResponse {
    fn status(&self) -> u16 {
        self.status
    }

    fn headers(&self) -> Headers {
        self.headers.clone()
    }

    fn native(&self) -> Option<NativeHandle> {
        Some(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_request_replacement_leaves_one_value() {
        let request = FakeOutboundRequest::get("http://example.com");
        request.add_header("foo", "bar");
        request.add_header("foo", "bar2");
        request.replace_header("FOO", "bar3");
        assert_eq!(request.header_values("foo"), vec!["bar3".to_string()]);
    }

    #[test]
    fn test_inbound_response_is_written_through_shared_reference() {
        let response = FakeInboundResponse::new();
        response.set_status(201);
        response.add_header("location", "/things/1");
        assert_eq!(InboundResponse::status(&response), Some(201));
        assert_eq!(
            InboundResponse::headers(&response).get("Location"),
            Some("/things/1")
        );
    }
}
