//! Fake HTTP client whose `execute` delegates through several instrumented
//! methods, the way real client libraries layer their overloads.

use crate::http::{FakeOutboundRequest, FakeOutboundResponse};
use parking_lot::Mutex;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tripwire_runtime::{ClientAdapter, Instrumentation};

/// Client with a three-level `execute` chain.
///
/// `execute` → `execute_in_context` → `do_execute`, each instrumented. A
/// configured failure is raised by the first level, so the chain stops at
/// depth 1.
#[derive(Debug)]
pub struct ChainedExecuteClient<'a> {
    instrumentation: &'a Instrumentation,
    response: Mutex<FakeOutboundResponse>,
    failure: Mutex<Option<String>>,
    depth: AtomicUsize,
}

impl<'a> ChainedExecuteClient<'a> {
    /// Client answering `200`.
    #[must_use]
    pub fn new(instrumentation: &'a Instrumentation) -> Self {
        Self {
            instrumentation,
            response: Mutex::new(FakeOutboundResponse::new(200)),
            failure: Mutex::new(None),
            depth: AtomicUsize::new(0),
        }
    }

    /// Answer every request with `response`.
    pub fn set_expected_response(&self, response: FakeOutboundResponse) {
        *self.response.lock() = response;
    }

    /// Fail every request with an I/O error carrying `message`.
    pub fn set_expected_failure(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    /// How many levels of the chain the last request went through.
    #[must_use]
    pub fn chain_depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    /// Send `request`.
    ///
    /// # Errors
    ///
    /// Returns the configured failure as [`io::ErrorKind::Other`].
    pub fn execute(&self, request: &Arc<FakeOutboundRequest>) -> io::Result<FakeOutboundResponse> {
        ClientAdapter::new(self.instrumentation).execute(request, || {
            self.depth.store(1, Ordering::SeqCst);
            if let Some(message) = self.failure.lock().clone() {
                return Err(io::Error::other(message));
            }
            self.execute_in_context(request)
        })
    }

    /// Send `request` and map the response through `handler`.
    ///
    /// # Errors
    ///
    /// Returns the configured failure as [`io::ErrorKind::Other`].
    pub fn execute_with_handler<T, F>(
        &self,
        request: &Arc<FakeOutboundRequest>,
        handler: F,
    ) -> io::Result<T>
    where
        F: FnOnce(FakeOutboundResponse) -> T,
    {
        ClientAdapter::new(self.instrumentation)
            .execute_with(request, || self.execute(request).map(handler))
    }

    fn execute_in_context(
        &self,
        request: &Arc<FakeOutboundRequest>,
    ) -> io::Result<FakeOutboundResponse> {
        ClientAdapter::new(self.instrumentation).execute(request, || {
            self.depth.fetch_add(1, Ordering::SeqCst);
            self.do_execute(request)
        })
    }

    fn do_execute(&self, request: &Arc<FakeOutboundRequest>) -> io::Result<FakeOutboundResponse> {
        ClientAdapter::new(self.instrumentation).execute(request, || {
            self.depth.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.lock().clone())
        })
    }
}
