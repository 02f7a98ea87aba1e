//! Thread-scoped, reference-counted transaction contexts.
//!
//! A transaction context says "the calling thread is inside one logical
//! transaction". Every boundary crossing acquires it; only the acquisition
//! that *creates* it starts the transaction, and only the release that brings
//! the counter back to zero ends it. Nested crossings caused by overriding
//! chains or wrappers therefore all share one transaction.
//!
//! Contexts are stored in a map keyed by [`ThreadId`]. A context is only ever
//! read or written by the thread it is keyed under, so the map's sharded
//! locking is never contended for the same entry.
//!
//! # Example
//!
//! ```
//! use tripwire_core::context::TransactionContexts;
//!
//! let contexts = TransactionContexts::new();
//! assert!(contexts.acquire().created);
//! assert!(!contexts.acquire().created);
//!
//! assert!(!contexts.release().unwrap().destroyed);
//! assert!(contexts.release().unwrap().destroyed);
//! assert!(!contexts.is_active());
//! assert!(contexts.release().is_err());
//! ```

use crate::error::CorrelationError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use once_cell::sync::Lazy;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

/// Value type stored in context metadata.
pub type MetadataValue = Arc<dyn Any + Send + Sync>;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

static GLOBAL: Lazy<Arc<TransactionContexts>> = Lazy::new(|| Arc::new(TransactionContexts::new()));

/// Opaque correlation identifier of a transaction context.
///
/// Unique within the process and stable for the context's lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Wrap a raw identifier (for tests and external correlation).
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx-{:016x}", self.0)
    }
}

/// How a context came into existence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ContextOrigin {
    /// Opened on purpose: by a transaction-opening boundary or by a caller
    /// establishing a transaction directly.
    Explicit,
    /// Created on behalf of a boundary that does not open transactions
    /// (e.g. a standalone outbound call). Never produces begin/end events.
    Implicit,
}

/// Result of [`TransactionContexts::acquire`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Acquisition {
    /// Identifier of the (possibly new) context
    pub id: ContextId,
    /// Whether this call created the context
    pub created: bool,
    /// Counter value after the call
    pub depth: u32,
    /// Origin of the context (fixed at creation)
    pub origin: ContextOrigin,
}

/// Result of [`TransactionContexts::release`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Release {
    /// Identifier of the released context
    pub id: ContextId,
    /// Whether the counter reached zero and the context was destroyed
    pub destroyed: bool,
    /// Counter value after the call
    pub depth: u32,
}

struct ContextState {
    id: ContextId,
    depth: u32,
    origin: ContextOrigin,
    sequence: u64,
    metadata: HashMap<String, MetadataValue>,
}

impl ContextState {
    fn new(origin: ContextOrigin) -> Self {
        Self {
            id: ContextId::next(),
            depth: 1,
            origin,
            sequence: 0,
            metadata: HashMap::new(),
        }
    }
}

/// Registry of per-thread transaction contexts.
///
/// Most code uses the process-wide registry returned by
/// [`TransactionContexts::global`]; independent registries are useful in
/// tests.
#[derive(Default)]
pub struct TransactionContexts {
    contexts: DashMap<ThreadId, ContextState>,
}

impl TransactionContexts {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            contexts: DashMap::new(),
        }
    }

    /// Process-wide registry.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Acquire the calling thread's context, creating an
    /// [`Explicit`](ContextOrigin::Explicit) one if none exists.
    pub fn acquire(&self) -> Acquisition {
        self.acquire_with(ContextOrigin::Explicit)
    }

    /// Acquire the calling thread's context. `origin` is only used when a new
    /// context has to be created.
    pub fn acquire_with(&self, origin: ContextOrigin) -> Acquisition {
        match self.contexts.entry(thread::current().id()) {
            Entry::Occupied(mut entry) => {
                let state = entry.get_mut();
                state.depth = state.depth.saturating_add(1);
                Acquisition {
                    id: state.id,
                    created: false,
                    depth: state.depth,
                    origin: state.origin,
                }
            }
            Entry::Vacant(entry) => {
                let state = entry.insert(ContextState::new(origin));
                Acquisition {
                    id: state.id,
                    created: true,
                    depth: state.depth,
                    origin: state.origin,
                }
            }
        }
    }

    /// Release one acquisition of the calling thread's context, destroying it
    /// when the counter reaches zero.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::NoActiveContext`] if the thread has no
    /// context. Nothing is changed in that case.
    pub fn release(&self) -> Result<Release, CorrelationError> {
        match self.contexts.entry(thread::current().id()) {
            Entry::Occupied(mut entry) => {
                let state = entry.get_mut();
                state.depth = state.depth.saturating_sub(1);
                let id = state.id;
                if state.depth == 0 {
                    entry.remove();
                    Ok(Release {
                        id,
                        destroyed: true,
                        depth: 0,
                    })
                } else {
                    Ok(Release {
                        id,
                        destroyed: false,
                        depth: state.depth,
                    })
                }
            }
            Entry::Vacant(_) => Err(CorrelationError::no_active_context()),
        }
    }

    /// Whether the calling thread has a context. Has no side effects.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.contexts.contains_key(&thread::current().id())
    }

    /// Identifier of the calling thread's context.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::NoActiveContext`] if the thread has no
    /// context.
    pub fn identifier(&self) -> Result<ContextId, CorrelationError> {
        self.with_state(|state| state.id)
    }

    /// Re-entrancy counter of the calling thread's context (0 if none).
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.with_state(|state| state.depth).unwrap_or(0)
    }

    /// Origin of the calling thread's context, if any.
    #[must_use]
    pub fn origin(&self) -> Option<ContextOrigin> {
        self.with_state(|state| state.origin).ok()
    }

    /// Advance and return the logical clock of the calling thread's
    /// transaction. The first value handed out is 1.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::NoActiveContext`] if the thread has no
    /// context.
    pub fn next_sequence(&self) -> Result<u64, CorrelationError> {
        self.with_state_mut(|state| {
            state.sequence += 1;
            state.sequence
        })
    }

    /// Attach a metadata value to the calling thread's transaction,
    /// returning the value it replaced.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::NoActiveContext`] if the thread has no
    /// context.
    pub fn put_metadata(
        &self,
        key: impl Into<String>,
        value: MetadataValue,
    ) -> Result<Option<MetadataValue>, CorrelationError> {
        let key = key.into();
        self.with_state_mut(move |state| state.metadata.insert(key, value))
    }

    /// Metadata value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::NoActiveContext`] if the thread has no
    /// context.
    pub fn metadata(&self, key: &str) -> Result<Option<MetadataValue>, CorrelationError> {
        self.with_state(|state| state.metadata.get(key).cloned())
    }

    /// Metadata value stored under `key`, if it has type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::NoActiveContext`] if the thread has no
    /// context.
    pub fn metadata_as<T: Any + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<Arc<T>>, CorrelationError> {
        Ok(self
            .metadata(key)?
            .and_then(|value| value.downcast::<T>().ok()))
    }

    /// Remove the metadata value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::NoActiveContext`] if the thread has no
    /// context.
    pub fn remove_metadata(&self, key: &str) -> Result<Option<MetadataValue>, CorrelationError> {
        self.with_state_mut(|state| state.metadata.remove(key))
    }

    /// Detach the calling thread's context regardless of its counter.
    ///
    /// Recovery tool for leaked acquisitions; regular code releases instead.
    pub fn destroy(&self) -> Option<ContextId> {
        self.contexts
            .remove(&thread::current().id())
            .map(|(_, state)| state.id)
    }

    /// Number of threads that currently have a context.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.contexts.len()
    }

    fn with_state<R>(&self, f: impl FnOnce(&ContextState) -> R) -> Result<R, CorrelationError> {
        self.contexts
            .get(&thread::current().id())
            .map(|state| f(&state))
            .ok_or_else(CorrelationError::no_active_context)
    }

    fn with_state_mut<R>(
        &self,
        f: impl FnOnce(&mut ContextState) -> R,
    ) -> Result<R, CorrelationError> {
        self.contexts
            .get_mut(&thread::current().id())
            .map(|mut state| f(&mut state))
            .ok_or_else(CorrelationError::no_active_context)
    }
}

impl fmt::Debug for TransactionContexts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContexts")
            .field("active", &self.contexts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_acquire_creates_context() {
        let contexts = TransactionContexts::new();
        assert!(!contexts.is_active());

        let acquisition = contexts.acquire();

        assert!(acquisition.created);
        assert_eq!(acquisition.depth, 1);
        assert_eq!(acquisition.origin, ContextOrigin::Explicit);
        assert!(contexts.is_active());
        assert_eq!(contexts.identifier(), Ok(acquisition.id));
    }

    #[test]
    fn test_nested_acquire_shares_identifier() {
        let contexts = TransactionContexts::new();
        let outer = contexts.acquire();
        let inner = contexts.acquire_with(ContextOrigin::Implicit);

        assert!(!inner.created);
        assert_eq!(inner.id, outer.id);
        assert_eq!(inner.depth, 2);
        // origin is fixed at creation
        assert_eq!(inner.origin, ContextOrigin::Explicit);
    }

    #[test]
    fn test_release_without_context_is_a_no_op() {
        let contexts = TransactionContexts::new();
        assert!(matches!(
            contexts.release(),
            Err(CorrelationError::NoActiveContext { .. })
        ));
        assert!(!contexts.is_active());
        assert!(contexts.identifier().is_err());
    }

    #[test]
    fn test_contexts_are_thread_exclusive() {
        let contexts = Arc::new(TransactionContexts::new());
        let main_id = contexts.acquire().id;

        let other = Arc::clone(&contexts);
        let (other_id, saw_main) = thread::spawn(move || {
            let saw_main = other.is_active();
            let id = other.acquire().id;
            other.release().unwrap();
            (id, saw_main)
        })
        .join()
        .unwrap();

        assert!(!saw_main);
        assert_ne!(main_id, other_id);
        assert_eq!(contexts.depth(), 1);
        assert_eq!(contexts.active_count(), 1);
    }

    #[test]
    fn test_sequence_is_monotonic_per_transaction() {
        let contexts = TransactionContexts::new();
        assert!(contexts.next_sequence().is_err());

        contexts.acquire();
        assert_eq!(contexts.next_sequence(), Ok(1));
        assert_eq!(contexts.next_sequence(), Ok(2));
        contexts.release().unwrap();

        contexts.acquire();
        assert_eq!(contexts.next_sequence(), Ok(1));
    }

    #[test]
    fn test_metadata_lives_with_the_transaction() {
        let contexts = TransactionContexts::new();
        assert!(contexts.put_metadata("k", Arc::new(1_u32)).is_err());

        contexts.acquire();
        assert!(contexts.put_metadata("k", Arc::new(5_u32)).unwrap().is_none());
        assert_eq!(contexts.metadata_as::<u32>("k").unwrap().as_deref(), Some(&5));
        assert!(contexts.metadata_as::<String>("k").unwrap().is_none());
        assert!(contexts.remove_metadata("k").unwrap().is_some());
        assert!(contexts.metadata("k").unwrap().is_none());

        contexts.put_metadata("k", Arc::new(5_u32)).unwrap();
        contexts.release().unwrap();
        contexts.acquire();
        assert!(contexts.metadata("k").unwrap().is_none());
    }

    #[test]
    fn test_destroy_ignores_the_counter() {
        let contexts = TransactionContexts::new();
        let id = contexts.acquire().id;
        contexts.acquire();

        assert_eq!(contexts.destroy(), Some(id));
        assert!(!contexts.is_active());
        assert_eq!(contexts.destroy(), None);
    }

    #[test]
    fn test_identifiers_are_unique() {
        let contexts = TransactionContexts::new();
        let first = contexts.acquire().id;
        contexts.release().unwrap();
        let second = contexts.acquire().id;
        assert_ne!(first, second);
        assert!(second.to_string().starts_with("ctx-"));
    }

    proptest! {
        #[test]
        fn prop_n_plus_one_releases_clear_the_thread(nested in 0_u32..64) {
            let contexts = TransactionContexts::new();
            prop_assert!(contexts.acquire().created);
            for _ in 0..nested {
                prop_assert!(!contexts.acquire().created);
            }
            for remaining in (0..=nested).rev() {
                let release = contexts.release().unwrap();
                prop_assert_eq!(release.depth, remaining);
                prop_assert_eq!(release.destroyed, remaining == 0);
            }
            prop_assert!(!contexts.is_active());
            prop_assert!(contexts.release().is_err());
        }
    }
}
