//! # Tripwire Testing
//!
//! Testing utilities for Tripwire.
//!
//! This crate provides:
//! - A fixed [`Clock`] for deterministic timestamps
//! - Recording, failing and panicking listeners
//! - In-memory request/response objects implementing the adapter traits
//! - Fake servlets and a chained HTTP client that re-enter their boundary
//! - Property-based testing strategies for nested crossings
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use tripwire_core::EventKind;
//! use tripwire_testing::helpers::TestHarness;
//! use tripwire_testing::http::{FakeInboundRequest, FakeInboundResponse};
//! use tripwire_testing::servlets::DefaultServiceServlet;
//!
//! let harness = TestHarness::new();
//! let servlet = DefaultServiceServlet::new(&harness.instrumentation);
//!
//! servlet
//!     .service(
//!         &Arc::new(FakeInboundRequest::get("http://localhost/")),
//!         &Arc::new(FakeInboundResponse::new()),
//!     )
//!     .unwrap();
//!
//! assert_eq!(
//!     harness.recorder.kinds(),
//!     vec![
//!         EventKind::TransactionBegin,
//!         EventKind::Request,
//!         EventKind::Response,
//!         EventKind::TransactionEnd,
//!     ]
//! );
//! harness.assert_clean();
//! ```

use chrono::{DateTime, Utc};
use tripwire_core::environment::Clock;

pub mod clients;
pub mod http;
pub mod listeners;
pub mod servlets;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use tripwire_testing::mocks::FixedClock;
    /// use tripwire_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Test helpers and utilities
pub mod helpers {
    use crate::listeners::RecordingListener;
    use crate::mocks::test_clock;
    use std::sync::Arc;
    use tripwire_core::TransactionContexts;
    use tripwire_runtime::Instrumentation;

    /// A private [`Instrumentation`] with a [`RecordingListener`] that only
    /// records while a context of this harness is active.
    #[derive(Debug)]
    pub struct TestHarness {
        /// Instrumentation under test
        pub instrumentation: Instrumentation,
        /// Context registry shared with the instrumentation
        pub contexts: Arc<TransactionContexts>,
        /// Registered recorder
        pub recorder: Arc<RecordingListener>,
    }

    impl TestHarness {
        /// Fresh harness stamped by [`test_clock`].
        #[must_use]
        pub fn new() -> Self {
            let contexts = Arc::new(TransactionContexts::new());
            let instrumentation = Instrumentation::builder()
                .contexts(Arc::clone(&contexts))
                .clock(Arc::new(test_clock()))
                .build();
            let recorder = Arc::new(RecordingListener::within(Arc::clone(&contexts)));
            instrumentation.add_listener(Arc::clone(&recorder) as _);
            Self {
                instrumentation,
                contexts,
                recorder,
            }
        }

        /// Assert that no context and no guard marker is left behind.
        ///
        /// # Panics
        ///
        /// Panics if the calling thread still has a context or any boundary
        /// is still marked as entered.
        #[allow(clippy::panic)]
        pub fn assert_clean(&self) {
            if self.contexts.is_active() {
                panic!("transaction context left behind: {:?}", self.contexts);
            }
            if !self.instrumentation.guard().is_empty() {
                panic!(
                    "guard markers left behind: {:?}",
                    self.instrumentation.guard()
                );
            }
        }
    }

    impl Default for TestHarness {
        fn default() -> Self {
            Self::new()
        }
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;
    use tripwire_core::{BoundaryKind, Direction, EventKind, Protocol, RequestEvent};
    use tripwire_runtime::{Instrumentation, ResponseDetails};

    /// A boundary kind that neither opens transactions nor is predefined.
    pub const RPC: BoundaryKind = BoundaryKind::new("rpc.invoke", false);

    /// One of the service, HTTP client and RPC kinds.
    pub fn boundary_kind() -> impl Strategy<Value = BoundaryKind> {
        prop_oneof![
            Just(BoundaryKind::SERVICE),
            Just(BoundaryKind::HTTP_CLIENT),
            Just(RPC),
        ]
    }

    /// Header names: lowercase, optionally hyphenated.
    pub fn header_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{0,15}"
    }

    /// A crossing and the crossings its call makes.
    #[derive(Debug, Clone)]
    pub struct CrossingTree {
        /// Boundary crossed
        pub kind: BoundaryKind,
        /// Whether the call fails after its children ran
        pub fails: bool,
        /// Nested crossings, in call order
        pub children: Vec<CrossingTree>,
    }

    /// Trees of up to four levels.
    pub fn crossing_tree() -> impl Strategy<Value = CrossingTree> {
        let leaf = (boundary_kind(), any::<bool>()).prop_map(|(kind, fails)| CrossingTree {
            kind,
            fails,
            children: Vec::new(),
        });
        leaf.prop_recursive(4, 24, 3, |inner| {
            (
                boundary_kind(),
                any::<bool>(),
                prop::collection::vec(inner, 0..3),
            )
                .prop_map(|(kind, fails, children)| CrossingTree {
                    kind,
                    fails,
                    children,
                })
        })
    }

    impl CrossingTree {
        /// Run the tree through `instrumentation`. Children's failures are
        /// swallowed by their parent.
        ///
        /// # Errors
        ///
        /// Returns an error if this node fails.
        pub fn run(&self, instrumentation: &Instrumentation) -> Result<(), String> {
            instrumentation.intercept(
                self.kind,
                || RequestEvent::new(Protocol::Rpc, Direction::Inbound, self.kind.name()),
                || {
                    for child in &self.children {
                        let _ = child.run(instrumentation);
                    }
                    if self.fails {
                        Err(format!("{} failed", self.kind))
                    } else {
                        Ok(())
                    }
                },
                |_| ResponseDetails::new(),
            )
        }

        /// Event kinds running the tree on a thread without a context must
        /// publish.
        #[must_use]
        pub fn expected_kinds(&self) -> Vec<EventKind> {
            let opens = self.kind.opens_transaction();
            let mut kinds = Vec::new();
            if opens {
                kinds.push(EventKind::TransactionBegin);
            }
            self.collect(&mut Vec::new(), &mut kinds);
            if opens {
                kinds.push(EventKind::TransactionEnd);
            }
            kinds
        }

        /// Number of responses that must carry a failure.
        #[must_use]
        pub fn expected_failures(&self) -> usize {
            self.count_failures(&mut Vec::new())
        }

        fn collect(&self, open: &mut Vec<BoundaryKind>, kinds: &mut Vec<EventKind>) {
            let outermost = !open.contains(&self.kind);
            if outermost {
                kinds.push(EventKind::Request);
            }
            open.push(self.kind);
            for child in &self.children {
                child.collect(open, kinds);
            }
            open.pop();
            if outermost {
                kinds.push(EventKind::Response);
            }
        }

        fn count_failures(&self, open: &mut Vec<BoundaryKind>) -> usize {
            let own = usize::from(self.fails && !open.contains(&self.kind));
            open.push(self.kind);
            let nested: usize = self
                .children
                .iter()
                .map(|child| child.count_failures(open))
                .sum();
            open.pop();
            own + nested
        }
    }
}

// Re-export commonly used items
pub use helpers::TestHarness;
pub use listeners::{FailingListener, PanickingListener, RecordingListener};
pub use mocks::{FixedClock, test_clock};

#[cfg(test)]
mod tests {
    use super::*;
    use properties::{CrossingTree, RPC};
    use tripwire_core::{BoundaryKind, EventKind};

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn test_expected_kinds_skip_reentrant_nodes() {
        let tree = CrossingTree {
            kind: BoundaryKind::SERVICE,
            fails: false,
            children: vec![
                CrossingTree {
                    kind: BoundaryKind::SERVICE,
                    fails: true,
                    children: Vec::new(),
                },
                CrossingTree {
                    kind: RPC,
                    fails: true,
                    children: Vec::new(),
                },
            ],
        };

        assert_eq!(
            tree.expected_kinds(),
            vec![
                EventKind::TransactionBegin,
                EventKind::Request,
                EventKind::Request,
                EventKind::Response,
                EventKind::Response,
                EventKind::TransactionEnd,
            ]
        );
        assert_eq!(tree.expected_failures(), 1);
    }

    #[test]
    fn test_harness_starts_clean() {
        let harness = TestHarness::new();
        harness.assert_clean();
        assert!(harness.recorder.is_empty());
        assert_eq!(harness.instrumentation.bus().listener_count(), 1);
    }
}
