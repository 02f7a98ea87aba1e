//! Listeners for asserting on published events.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tripwire_core::{
    Event, EventKind, Listener, ListenerError, RequestEvent, ResponseEvent, TransactionContexts,
};

/// Records every event it receives.
///
/// With [`within`](Self::within) it only records events published while the
/// calling thread is inside a transaction context, which filters out
/// traffic from unrelated tests sharing a bus.
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<Event>>,
    priority: i32,
    contexts: Option<Arc<TransactionContexts>>,
}

impl RecordingListener {
    /// Record everything, at priority 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record only while `contexts` has an active context on the publishing
    /// thread.
    #[must_use]
    pub fn within(contexts: Arc<TransactionContexts>) -> Self {
        Self {
            contexts: Some(contexts),
            ..Self::default()
        }
    }

    /// Register at `priority`.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Snapshot of the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    /// Kinds of the recorded events, in order.
    #[must_use]
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(Event::kind).collect()
    }

    /// Recorded request payloads, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<Arc<RequestEvent>> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| event.as_request().cloned())
            .collect()
    }

    /// Recorded response payloads, in order.
    #[must_use]
    pub fn responses(&self) -> Vec<Arc<ResponseEvent>> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| event.as_response().cloned())
            .collect()
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl Listener for RecordingListener {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn listen(&self, event: &Event) -> Result<(), ListenerError> {
        if self
            .contexts
            .as_ref()
            .is_some_and(|contexts| !contexts.is_active())
        {
            return Ok(());
        }
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Fails every delivery with the same message.
#[derive(Debug)]
pub struct FailingListener {
    message: String,
    priority: i32,
    calls: AtomicUsize,
}

impl FailingListener {
    /// Fail with `message`, at priority 0.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            priority: 0,
            calls: AtomicUsize::new(0),
        }
    }

    /// Register at `priority`.
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Number of deliveries attempted.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Listener for FailingListener {
    fn priority(&self) -> i32 {
        self.priority
    }

    fn listen(&self, _event: &Event) -> Result<(), ListenerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ListenerError::new(self.message.clone()))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Panics on every delivery.
#[derive(Debug)]
pub struct PanickingListener {
    message: &'static str,
    priority: i32,
}

impl PanickingListener {
    /// Panic with `message`, at priority 0.
    #[must_use]
    pub const fn new(message: &'static str) -> Self {
        Self {
            message,
            priority: 0,
        }
    }

    /// Register at `priority`.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Listener for PanickingListener {
    fn priority(&self) -> i32 {
        self.priority
    }

    #[allow(clippy::panic)] // Panics: that is the listener's whole purpose
    fn listen(&self, _event: &Event) -> Result<(), ListenerError> {
        panic!("{}", self.message)
    }

    fn name(&self) -> &'static str {
        "panicking"
    }
}
