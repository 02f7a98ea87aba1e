//! # Tripwire Core
//!
//! Correlation core for boundary instrumentation.
//!
//! Instrumented boundaries (an inbound service entry point, an outbound
//! client call) are frequently re-entered on the same thread: an overriding
//! method calls its base implementation, a wrapper delegates to an inner
//! client, a servlet forwards to another servlet. This crate makes sure such
//! chains still produce exactly one, correctly ordered stream of events.
//!
//! ## Core Concepts
//!
//! - **Event**: lifecycle (begin/end) and protocol (request/response) facts,
//!   see [`event`]
//! - **Transaction context**: thread-scoped, reference-counted marker for
//!   "inside one logical transaction", see [`context`]
//! - **Interception guard**: per-(context, boundary kind) outermost-call
//!   detection, see [`guard`]
//! - **Event bus**: synchronous, priority-ordered, failure-isolating fan-out,
//!   see [`event_bus`]
//!
//! ## Architecture Principles
//!
//! - Functional transparency: nothing in this crate may change the behaviour
//!   of the instrumented call. Every operation returns a `Result` and leaves
//!   state untouched on error; callers report and move on.
//! - Thread exclusivity: context and guard state is only touched by the
//!   owning thread. The listener registry is the only shared mutable state.
//! - No I/O, no blocking, no background threads.
//!
//! The boundary adapter protocol that ties these pieces together lives in the
//! `tripwire-runtime` crate.

pub mod boundary;
pub mod context;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod guard;
pub mod headers;

// Re-export commonly used types
pub use boundary::BoundaryKind;
pub use chrono::{DateTime, Utc};
pub use context::{Acquisition, ContextId, ContextOrigin, Release, TransactionContexts};
pub use error::{CorrelationError, ListenerError};
pub use event::{
    CaptureFailure, CapturedFailure, Direction, Event, EventKind, EventPayload, HeaderReplaceable,
    NativeHandle, Protocol, RequestEvent, ResponseEvent,
};
pub use event_bus::{EventBus, Listener, PublishReport};
pub use guard::{GuardTicket, InterceptionGuard};
pub use headers::Headers;

/// Environment module - injected dependencies
///
/// The only ambient dependency of the core is time: events carry a
/// wall-clock timestamp next to their logical sequence number.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use tripwire_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
