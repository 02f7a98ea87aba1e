//! Generic boundary adapters.
//!
//! An adapter turns a library's request/response objects into
//! [`RequestEvent`](tripwire_core::RequestEvent)s and response details and
//! runs the real call through [`Instrumentation::intercept`]. The library is
//! plugged in through small accessor traits, so nothing here depends on a
//! specific HTTP stack.
//!
//! - [`ServiceAdapter`]: inbound calls, opening a transaction
//! - [`ClientAdapter`]: outbound calls, joining the current transaction if
//!   there is one
//!
//! [`Instrumentation::intercept`]: crate::Instrumentation::intercept

pub mod client;
pub mod service;

pub use client::{ClientAdapter, OutboundRequest, OutboundResponse};
pub use service::{InboundRequest, InboundResponse, ServiceAdapter};
