//! In-process event bus.
//!
//! The bus holds an ordered set of [`Listener`]s and delivers every published
//! [`Event`] to each of them, synchronously, on the publishing thread.
//!
//! # Delivery rules
//!
//! - Listeners are called in descending [`Listener::priority`]; listeners with
//!   equal priority are called in registration order.
//! - A listener that returns an error or panics is skipped over: the failure
//!   is recorded in the [`PublishReport`] and delivery continues. Publishing
//!   itself never fails.
//! - The bus never filters. Listeners that only care about events published
//!   inside a transaction must check that themselves.
//!
//! # Concurrency
//!
//! Registration changes build a new listener list and swap it in
//! (copy-on-write). `publish` iterates over the list that was current when it
//! started, so concurrent registration never disturbs an ongoing delivery and
//! listeners may (de)register from inside [`Listener::listen`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tripwire_core::event_bus::{EventBus, Listener};
//! use tripwire_core::error::ListenerError;
//! use tripwire_core::event::{Event, EventPayload};
//! use tripwire_core::context::ContextId;
//!
//! struct Printer;
//!
//! impl Listener for Printer {
//!     fn listen(&self, event: &Event) -> Result<(), ListenerError> {
//!         println!("{} #{}", event.kind(), event.sequence());
//!         Ok(())
//!     }
//! }
//!
//! let bus = EventBus::new();
//! let printer: Arc<dyn Listener> = Arc::new(Printer);
//! bus.add_listener(Arc::clone(&printer));
//!
//! let event = Event::new(ContextId::from_raw(1), 1, chrono::Utc::now(), EventPayload::TransactionBegin);
//! assert_eq!(bus.publish(&event).delivered, 1);
//! assert!(bus.remove_listener(&printer));
//! ```

use crate::error::{CorrelationError, ListenerError};
use crate::event::{CapturedFailure, Event};
use arc_swap::ArcSwap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

static GLOBAL: Lazy<Arc<EventBus>> = Lazy::new(|| Arc::new(EventBus::new()));

/// A consumer of published events.
pub trait Listener: Send + Sync {
    /// Delivery priority; higher values are called first. Read once, at
    /// registration.
    fn priority(&self) -> i32 {
        0
    }

    /// Handle one event.
    ///
    /// # Errors
    ///
    /// A returned error is reported by the bus and does not affect delivery
    /// to other listeners.
    fn listen(&self, event: &Event) -> Result<(), ListenerError>;

    /// Name used when reporting failures of this listener.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

#[derive(Clone)]
struct Registration {
    listener: Arc<dyn Listener>,
    priority: i32,
    order: u64,
}

impl Registration {
    fn is<L: Listener + ?Sized>(&self, listener: &Arc<L>) -> bool {
        same_listener(&self.listener, listener)
    }
}

fn same_listener<A: ?Sized, B: ?Sized>(a: &Arc<A>, b: &Arc<B>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}

/// Outcome of one [`EventBus::publish`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Number of listeners that handled the event successfully
    pub delivered: usize,
    /// One [`CorrelationError::ListenerFailure`] per failing listener
    pub failures: Vec<CorrelationError>,
}

impl PublishReport {
    /// Whether every listener handled the event.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Process-wide publish/subscribe dispatcher.
pub struct EventBus {
    listeners: ArcSwap<Vec<Registration>>,
    // serializes writers and hands out registration order
    next_order: Mutex<u64>,
}

impl EventBus {
    /// Create a bus with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: ArcSwap::from_pointee(Vec::new()),
            next_order: Mutex::new(0),
        }
    }

    /// Process-wide bus.
    #[must_use]
    pub fn global() -> Arc<Self> {
        Arc::clone(&GLOBAL)
    }

    /// Register `listener`. Returns `false` (and changes nothing) if this
    /// exact listener instance is already registered.
    pub fn add_listener(&self, listener: Arc<dyn Listener>) -> bool {
        let mut next_order = self.next_order.lock();
        let current = self.listeners.load();
        if current.iter().any(|registration| registration.is(&listener)) {
            return false;
        }

        let mut updated: Vec<Registration> = (**current).clone();
        updated.push(Registration {
            priority: listener.priority(),
            listener,
            order: *next_order,
        });
        *next_order += 1;
        updated.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.order.cmp(&b.order)));
        self.listeners.store(Arc::new(updated));
        true
    }

    /// Deregister `listener` (compared by identity). Returns `false` if it was
    /// not registered.
    pub fn remove_listener<L: Listener + ?Sized>(&self, listener: &Arc<L>) -> bool {
        let _writer = self.next_order.lock();
        let current = self.listeners.load();
        if !current.iter().any(|registration| registration.is(listener)) {
            return false;
        }

        let updated: Vec<Registration> = current
            .iter()
            .filter(|registration| !registration.is(listener))
            .cloned()
            .collect();
        self.listeners.store(Arc::new(updated));
        true
    }

    /// Deregister every listener.
    pub fn clear(&self) {
        let _writer = self.next_order.lock();
        self.listeners.store(Arc::new(Vec::new()));
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.load().len()
    }

    /// Deliver `event` to every registered listener, isolating failures.
    pub fn publish(&self, event: &Event) -> PublishReport {
        let snapshot = self.listeners.load_full();
        let mut report = PublishReport::default();

        for registration in snapshot.iter() {
            let listener = &registration.listener;
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| listener.listen(event)));
            let message = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(error)) => error.to_string(),
                Err(payload) => CapturedFailure::from_panic(payload.as_ref()).to_string(),
            };
            report.failures.push(CorrelationError::ListenerFailure {
                listener: listener.name().to_string(),
                message,
            });
        }

        report
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ContextId;
    use crate::event::EventPayload;
    use chrono::Utc;

    struct Tagged {
        tag: &'static str,
        priority: i32,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Listener for Tagged {
        fn priority(&self) -> i32 {
            self.priority
        }

        fn listen(&self, _event: &Event) -> Result<(), ListenerError> {
            self.log.lock().push(self.tag);
            Ok(())
        }
    }

    struct Erroring;

    impl Listener for Erroring {
        fn priority(&self) -> i32 {
            10
        }

        fn listen(&self, _event: &Event) -> Result<(), ListenerError> {
            Err(ListenerError::new("exporter offline"))
        }

        fn name(&self) -> &'static str {
            "erroring"
        }
    }

    struct Panicking;

    impl Listener for Panicking {
        fn priority(&self) -> i32 {
            5
        }

        #[allow(clippy::panic)]
        fn listen(&self, _event: &Event) -> Result<(), ListenerError> {
            panic!("listener bug");
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    fn begin() -> Event {
        Event::new(
            ContextId::from_raw(1),
            1,
            Utc::now(),
            EventPayload::TransactionBegin,
        )
    }

    fn tagged(
        tag: &'static str,
        priority: i32,
        log: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn Listener> {
        Arc::new(Tagged {
            tag,
            priority,
            log: Arc::clone(log),
        })
    }

    #[test]
    fn test_delivery_order_is_priority_then_registration() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.add_listener(tagged("low", -1, &log));
        bus.add_listener(tagged("first-zero", 0, &log));
        bus.add_listener(tagged("high", 100, &log));
        bus.add_listener(tagged("second-zero", 0, &log));

        let report = bus.publish(&begin());

        assert_eq!(report.delivered, 4);
        assert_eq!(
            *log.lock(),
            vec!["high", "first-zero", "second-zero", "low"]
        );
    }

    #[test]
    fn test_failures_are_isolated() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.add_listener(Arc::new(Erroring));
        bus.add_listener(Arc::new(Panicking));
        bus.add_listener(tagged("survivor", 0, &log));

        let report = bus.publish(&begin());

        assert_eq!(report.delivered, 1);
        assert_eq!(*log.lock(), vec!["survivor"]);
        assert_eq!(
            report.failures,
            vec![
                CorrelationError::ListenerFailure {
                    listener: "erroring".to_string(),
                    message: "exporter offline".to_string(),
                },
                CorrelationError::ListenerFailure {
                    listener: "panicking".to_string(),
                    message: "panic: listener bug".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_registration_is_by_identity() {
        let bus = EventBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let listener = tagged("a", 0, &log);
        let twin = tagged("a", 0, &log);

        assert!(bus.add_listener(Arc::clone(&listener)));
        assert!(!bus.add_listener(Arc::clone(&listener)));
        assert!(bus.add_listener(Arc::clone(&twin)));
        assert_eq!(bus.listener_count(), 2);

        assert!(bus.remove_listener(&listener));
        assert!(!bus.remove_listener(&listener));
        assert_eq!(bus.listener_count(), 1);

        bus.publish(&begin());
        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn test_publish_without_listeners() {
        let bus = EventBus::new();
        let report = bus.publish(&begin());
        assert_eq!(report, PublishReport::default());
        assert!(report.is_clean());
    }

    struct SelfRemoving {
        bus: Arc<EventBus>,
        me: Mutex<Option<Arc<dyn Listener>>>,
        calls: Mutex<u32>,
    }

    impl Listener for SelfRemoving {
        fn listen(&self, _event: &Event) -> Result<(), ListenerError> {
            *self.calls.lock() += 1;
            if let Some(me) = self.me.lock().take() {
                self.bus.remove_listener(&me);
            }
            Ok(())
        }
    }

    #[test]
    fn test_listener_may_deregister_during_delivery() {
        let bus = Arc::new(EventBus::new());
        let listener = Arc::new(SelfRemoving {
            bus: Arc::clone(&bus),
            me: Mutex::new(None),
            calls: Mutex::new(0),
        });
        let as_dyn: Arc<dyn Listener> = listener.clone();
        *listener.me.lock() = Some(Arc::clone(&as_dyn));
        bus.add_listener(as_dyn);

        assert_eq!(bus.publish(&begin()).delivered, 1);
        assert_eq!(bus.publish(&begin()).delivered, 0);
        assert_eq!(*listener.calls.lock(), 1);
    }

    #[test]
    fn test_concurrent_registration_during_publish() {
        let bus = Arc::new(EventBus::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.add_listener(tagged("stable", 0, &log));

        let writer = {
            let bus = Arc::clone(&bus);
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let transient = tagged("transient", 1, &log);
                    bus.add_listener(Arc::clone(&transient));
                    bus.remove_listener(&transient);
                }
            })
        };

        for _ in 0..200 {
            let report = bus.publish(&begin());
            assert!(report.delivered >= 1);
            assert!(report.is_clean());
        }
        writer.join().unwrap();

        assert_eq!(bus.listener_count(), 1);
        let stable = log.lock().iter().filter(|tag| **tag == "stable").count();
        assert_eq!(stable, 200);
    }
}
