//! Interception guard.
//!
//! Decides, per transaction context and per boundary kind, whether a
//! boundary crossing is the *outermost* one (and must emit protocol events)
//! or a re-entrant inner one caused by an overriding chain or a wrapper (and
//! must stay silent).
//!
//! Markers are keyed by `(ContextId, BoundaryKind)`: a client call nested in
//! a service call is outermost for its own kind even though it runs inside
//! the service's transaction.

use crate::boundary::BoundaryKind;
use crate::context::{ContextId, ContextOrigin, TransactionContexts};
use crate::error::CorrelationError;
use dashmap::DashSet;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;

static GLOBAL: Lazy<Arc<InterceptionGuard>> = Lazy::new(|| Arc::new(InterceptionGuard::new()));

/// Proof of one [`InterceptionGuard::enter`], consumed by
/// [`InterceptionGuard::exit`].
///
/// Not `Clone`: each entry can be exited at most once.
#[must_use = "every guard entry must be exited"]
#[derive(Debug, PartialEq, Eq)]
pub struct GuardTicket {
    kind: BoundaryKind,
    context_id: ContextId,
    outermost: bool,
    owns_context: bool,
}

impl GuardTicket {
    /// Boundary kind that was entered.
    #[must_use]
    pub const fn kind(&self) -> BoundaryKind {
        self.kind
    }

    /// Context the entry was recorded under.
    #[must_use]
    pub const fn context_id(&self) -> ContextId {
        self.context_id
    }

    /// Whether this is the outermost crossing of its kind.
    #[must_use]
    pub const fn is_outermost(&self) -> bool {
        self.outermost
    }

    /// Whether the guard created an implicit context for this entry.
    #[must_use]
    pub const fn owns_context(&self) -> bool {
        self.owns_context
    }
}

/// In-progress markers for outermost boundary crossings.
#[derive(Default)]
pub struct InterceptionGuard {
    active: DashSet<(ContextId, BoundaryKind)>,
}

impl InterceptionGuard {
    /// Create a guard with no markers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            active: DashSet::new(),
        }
    }

    /// Process-wide guard.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Enter `kind` on the calling thread.
    ///
    /// If the thread has no context, an [`Implicit`](ContextOrigin::Implicit)
    /// one is acquired and owned by the returned ticket; [`exit`](Self::exit)
    /// releases it again.
    pub fn enter(&self, contexts: &TransactionContexts, kind: BoundaryKind) -> GuardTicket {
        let (context_id, owns_context) = match contexts.identifier() {
            Ok(id) => (id, false),
            Err(_) => (contexts.acquire_with(ContextOrigin::Implicit).id, true),
        };
        let outermost = self.active.insert((context_id, kind));
        GuardTicket {
            kind,
            context_id,
            outermost,
            owns_context,
        }
    }

    /// Exit the entry described by `ticket`: clear its marker if it was
    /// outermost, and release the implicit context it owns, if any.
    ///
    /// Safe to call from any cleanup path, including after the guarded call
    /// failed.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::GuardImbalance`] if the marker was already
    /// gone, or [`CorrelationError::NoActiveContext`] if the owned implicit
    /// context had already been destroyed. All remaining cleanup is still
    /// performed.
    pub fn exit(
        &self,
        contexts: &TransactionContexts,
        ticket: GuardTicket,
    ) -> Result<(), CorrelationError> {
        let cleared = if ticket.outermost {
            self.clear(ticket.context_id, ticket.kind)
        } else {
            Ok(())
        };
        let released = if ticket.owns_context {
            contexts.release().map(|_| ())
        } else {
            Ok(())
        };
        cleared.and(released)
    }

    /// Ticket-less form of [`exit`](Self::exit) for collaborators that only
    /// remember whether their entry was outermost.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::GuardImbalance`] if `was_outermost` is set
    /// but no marker for `kind` exists in the calling thread's context.
    pub fn exit_kind(
        &self,
        contexts: &TransactionContexts,
        kind: BoundaryKind,
        was_outermost: bool,
    ) -> Result<(), CorrelationError> {
        if !was_outermost {
            return Ok(());
        }
        let context_id = contexts
            .identifier()
            .map_err(|_| CorrelationError::GuardImbalance { kind })?;
        self.clear(context_id, kind)
    }

    fn clear(&self, context_id: ContextId, kind: BoundaryKind) -> Result<(), CorrelationError> {
        self.active
            .remove(&(context_id, kind))
            .map(|_| ())
            .ok_or(CorrelationError::GuardImbalance { kind })
    }

    /// Whether an outermost crossing of `kind` is in progress in `context_id`.
    #[must_use]
    pub fn is_entered(&self, context_id: ContextId, kind: BoundaryKind) -> bool {
        self.active.contains(&(context_id, kind))
    }

    /// Drop every marker recorded under `context_id`, returning how many were
    /// removed. Used when a context is destroyed forcibly.
    pub fn clear_context(&self, context_id: ContextId) -> usize {
        let before = self.active.len();
        self.active.retain(|(id, _)| *id != context_id);
        before.saturating_sub(self.active.len())
    }

    /// Number of in-progress markers across all contexts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no crossing is in progress anywhere.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

impl fmt::Debug for InterceptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptionGuard")
            .field("active", &self.active.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RPC: BoundaryKind = BoundaryKind::new("rpc.invoke", false);

    #[test]
    fn test_only_first_entry_is_outermost() {
        let contexts = TransactionContexts::new();
        let guard = InterceptionGuard::new();
        contexts.acquire();

        let outer = guard.enter(&contexts, BoundaryKind::SERVICE);
        let inner = guard.enter(&contexts, BoundaryKind::SERVICE);

        assert!(outer.is_outermost());
        assert!(!inner.is_outermost());
        assert_eq!(outer.context_id(), inner.context_id());

        guard.exit(&contexts, inner).unwrap();
        assert!(guard.is_entered(outer.context_id(), BoundaryKind::SERVICE));
        guard.exit(&contexts, outer).unwrap();
        assert!(guard.is_empty());
    }

    #[test]
    fn test_distinct_kinds_are_independent() {
        let contexts = TransactionContexts::new();
        let guard = InterceptionGuard::new();
        contexts.acquire();

        let service = guard.enter(&contexts, BoundaryKind::SERVICE);
        let client = guard.enter(&contexts, BoundaryKind::HTTP_CLIENT);
        let rpc = guard.enter(&contexts, RPC);

        assert!(service.is_outermost());
        assert!(client.is_outermost());
        assert!(rpc.is_outermost());
        assert_eq!(guard.len(), 3);

        guard.exit(&contexts, rpc).unwrap();
        guard.exit(&contexts, client).unwrap();
        guard.exit(&contexts, service).unwrap();
        assert!(guard.is_empty());
    }

    #[test]
    fn test_enter_without_context_creates_implicit_one() {
        let contexts = TransactionContexts::new();
        let guard = InterceptionGuard::new();

        let ticket = guard.enter(&contexts, BoundaryKind::HTTP_CLIENT);

        assert!(ticket.is_outermost());
        assert!(ticket.owns_context());
        assert_eq!(contexts.origin(), Some(ContextOrigin::Implicit));

        let nested = guard.enter(&contexts, BoundaryKind::HTTP_CLIENT);
        assert!(!nested.owns_context());
        assert!(!nested.is_outermost());

        guard.exit(&contexts, nested).unwrap();
        assert!(contexts.is_active());
        guard.exit(&contexts, ticket).unwrap();
        assert!(!contexts.is_active());
        assert!(guard.is_empty());
    }

    #[test]
    fn test_exit_kind_without_entry_reports_imbalance() {
        let contexts = TransactionContexts::new();
        let guard = InterceptionGuard::new();

        assert_eq!(
            guard.exit_kind(&contexts, RPC, true),
            Err(CorrelationError::GuardImbalance { kind: RPC })
        );
        contexts.acquire();
        assert_eq!(
            guard.exit_kind(&contexts, RPC, true),
            Err(CorrelationError::GuardImbalance { kind: RPC })
        );
        assert_eq!(guard.exit_kind(&contexts, RPC, false), Ok(()));
    }

    #[test]
    fn test_exit_kind_clears_marker() {
        let contexts = TransactionContexts::new();
        let guard = InterceptionGuard::new();
        contexts.acquire();

        let ticket = guard.enter(&contexts, RPC);
        assert!(ticket.is_outermost());
        guard.exit_kind(&contexts, RPC, true).unwrap();
        assert!(guard.is_empty());

        // the ticket's marker is already gone
        assert!(guard.exit(&contexts, ticket).is_err());
    }

    #[test]
    fn test_clear_context_drops_only_that_context() {
        let guard = InterceptionGuard::new();
        let contexts = TransactionContexts::new();
        let first = guard.enter(&contexts, RPC);
        let first_id = first.context_id();
        let _service = guard.enter(&contexts, BoundaryKind::SERVICE);
        guard.active.insert((ContextId::from_raw(u64::MAX), RPC));

        assert_eq!(guard.clear_context(first_id), 2);
        assert!(guard.is_entered(ContextId::from_raw(u64::MAX), RPC));
        assert!(!guard.is_entered(first_id, RPC));

        // the owned implicit context is still released through the ticket
        assert_eq!(
            guard.exit(&contexts, first),
            Err(CorrelationError::GuardImbalance { kind: RPC })
        );
        assert!(!contexts.is_active());
    }

    proptest! {
        #[test]
        fn prop_nested_same_kind_has_single_outermost(depth in 1_usize..32) {
            let contexts = TransactionContexts::new();
            let guard = InterceptionGuard::new();

            let tickets: Vec<GuardTicket> = (0..depth)
                .map(|_| guard.enter(&contexts, BoundaryKind::HTTP_CLIENT))
                .collect();

            prop_assert_eq!(tickets.iter().filter(|t| t.is_outermost()).count(), 1);
            prop_assert!(tickets[0].is_outermost());

            for ticket in tickets.into_iter().rev() {
                prop_assert!(guard.exit(&contexts, ticket).is_ok());
            }
            prop_assert!(guard.is_empty());
            prop_assert!(!contexts.is_active());
        }
    }
}
