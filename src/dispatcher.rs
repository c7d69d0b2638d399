//! Routes [`SessionEvent`]s to the handler registered for their name.
//!
//! One handler per name; registering again replaces the previous one.
//! Events with no registered handler are dropped, never queued.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, error};

use crate::event::SessionEvent;

/// A subscriber callback.
///
/// Handlers run on the session loop and must return promptly; hand slow work
/// off to your own task.
pub type Handler = Arc<dyn Fn(&SessionEvent) + Send + Sync + 'static>;

/// Event-name to handler table.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Mutex<HashMap<String, Handler>>,
}

impl EventDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Handler>> {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` for `event`, replacing any earlier handler.
    pub fn on<F>(&self, event: impl Into<String>, handler: F)
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        let event = event.into();
        if self.table().insert(event.clone(), Arc::new(handler)).is_some() {
            debug!(event = %event, "replaced existing handler");
        }
    }

    /// Remove the handler for `event`. No-op if none is registered.
    pub fn off(&self, event: &str) {
        self.table().remove(event);
    }

    /// Returns `true` if a handler is registered for `event`.
    pub fn is_registered(&self, event: &str) -> bool {
        self.table().contains_key(event)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    /// Returns `true` if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }

    /// Deliver `event` to its handler.
    ///
    /// Returns `true` if a handler ran to completion. The table lock is not
    /// held while the handler runs, so handlers may call [`on`](Self::on) and
    /// [`off`](Self::off). A panicking handler is logged and reported as not
    /// delivered.
    pub fn dispatch(&self, event: &SessionEvent) -> bool {
        let handler = self.table().get(event.name()).cloned();
        let Some(handler) = handler else {
            debug!(event = %event.name(), "no handler registered, dropping event");
            return false;
        };
        match catch_unwind(AssertUnwindSafe(|| handler(event))) {
            Ok(()) => true,
            Err(_) => {
                error!(event = %event.name(), "event handler panicked");
                false
            }
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self.table().keys().cloned().collect();
        names.sort();
        f.debug_struct("EventDispatcher")
            .field("events", &names)
            .finish()
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message(name: &str, payload: serde_json::Value) -> SessionEvent {
        SessionEvent::Message {
            name: name.into(),
            payload,
        }
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&SessionEvent) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&count);
        (count, move |_: &SessionEvent| {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn dispatch_reaches_registered_handler_with_payload() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatcher.on("game_update", move |event| {
            sink.lock().unwrap().push(event.payload().cloned());
        });

        assert!(dispatcher.dispatch(&message("game_update", serde_json::json!({ "round": 1 }))));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Some(serde_json::json!({ "round": 1 }))]
        );
    }

    #[test]
    fn second_registration_replaces_first() {
        let dispatcher = EventDispatcher::new();
        let (first, first_handler) = counter();
        let (second, second_handler) = counter();

        dispatcher.on("vote", first_handler);
        dispatcher.on("vote", second_handler);
        dispatcher.dispatch(&message("vote", serde_json::Value::Null));
        dispatcher.dispatch(&message("vote", serde_json::Value::Null));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 2);
        assert_eq!(dispatcher.len(), 1);
    }

    #[test]
    fn unmatched_events_are_dropped() {
        let dispatcher = EventDispatcher::new();
        let (count, handler) = counter();
        dispatcher.on("a", handler);

        assert!(!dispatcher.dispatch(&message("b", serde_json::Value::Null)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn off_removes_and_is_idempotent() {
        let dispatcher = EventDispatcher::new();
        let (count, handler) = counter();
        dispatcher.on("a", handler);
        dispatcher.off("a");
        dispatcher.off("a");
        dispatcher.off("never-registered");

        assert!(!dispatcher.is_registered("a"));
        assert!(dispatcher.is_empty());
        assert!(!dispatcher.dispatch(&message("a", serde_json::Value::Null)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn lifecycle_events_route_by_name() {
        let dispatcher = EventDispatcher::new();
        let (count, handler) = counter();
        dispatcher.on("error", handler);

        dispatcher.dispatch(&SessionEvent::Error {
            message: "boom".into(),
            terminal: true,
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_may_unregister_itself() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let weak = Arc::downgrade(&dispatcher);
        let (count, bump) = counter();
        dispatcher.on("once", move |event| {
            bump(event);
            if let Some(d) = weak.upgrade() {
                d.off("once");
            }
        });

        dispatcher.dispatch(&message("once", serde_json::Value::Null));
        dispatcher.dispatch(&message("once", serde_json::Value::Null));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_handler_does_not_poison_dispatcher() {
        let dispatcher = EventDispatcher::new();
        dispatcher.on("bad", |_| panic!("handler bug"));
        let (count, handler) = counter();
        dispatcher.on("good", handler);

        assert!(!dispatcher.dispatch(&message("bad", serde_json::Value::Null)));
        assert!(dispatcher.dispatch(&message("good", serde_json::Value::Null)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn debug_lists_event_names() {
        let dispatcher = EventDispatcher::new();
        dispatcher.on("b", |_| {});
        dispatcher.on("a", |_| {});
        assert_eq!(
            format!("{dispatcher:?}"),
            r#"EventDispatcher { events: ["a", "b"] }"#
        );
    }
}
