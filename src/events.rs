//! Synchronous, ordered event emission.
//!
//! The [`EventBus`] is how the dispatcher and the stock screens let
//! observers take part in failure handling. Listeners are attached per
//! event type with [`EventBus::on`] and run in attachment order when the
//! event is emitted. Every listener receives the event by mutable
//! reference, which is how observers change handling decisions (see
//! [`ErrorEvent::suppress`] and [`ErrorEvent::force`]).
//!
//! Emission stops at the first listener that returns an error; the error is
//! handed back to the emitter.
//!
//! ```
//! use crashguard::events::{ErrorEvent, EventBus};
//!
//! let bus = EventBus::new();
//! bus.on::<ErrorEvent, _>(|event| {
//!     if event.failure().message().starts_with("Deprecated") {
//!         event.suppress();
//!     }
//!     Ok(())
//! });
//! assert!(bus.has_listeners::<ErrorEvent>());
//! ```
//!
//! The listener list is copied before emission, so listeners may attach or
//! detach listeners on the same bus while it is emitting. Such changes take
//! effect at the next emission.

use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt,
    marker::PhantomData,
};

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use triomphe::Arc;
use unsize::CoerceUnsize;

use crate::{Failure, runtime::Termination};

/// An event that can be emitted on an [`EventBus`].
pub trait Event: 'static {
    /// The name listeners are attached under.
    const NAME: &'static str;
}

/// Identifies an attached listener, for use with [`EventBus::off`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

trait ErasedListener {
    fn call(&self, event: &mut dyn Any) -> Result<(), Failure>;
}

struct TypedListener<E, F> {
    listener: F,
    _event: PhantomData<fn(&mut E)>,
}

impl<E, F> ErasedListener for TypedListener<E, F>
where
    E: Event,
    F: Fn(&mut E) -> Result<(), Failure>,
{
    fn call(&self, event: &mut dyn Any) -> Result<(), Failure> {
        match event.downcast_mut::<E>() {
            Some(event) => (self.listener)(event),
            None => Ok(()),
        }
    }
}

struct Entry {
    id: ListenerId,
    listener: Arc<dyn ErasedListener>,
}

/// A named, synchronous publish/subscribe facility.
///
/// The bus is single threaded; it is owned by the dispatcher or screen that
/// emits on it.
#[derive(Default)]
pub struct EventBus {
    listeners: RefCell<IndexMap<&'static str, Vec<Entry>, FxBuildHasher>>,
    next_id: Cell<u64>,
}

impl EventBus {
    /// Creates an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a listener for `E`.
    pub fn on<E, F>(&self, listener: F) -> ListenerId
    where
        E: Event,
        F: Fn(&mut E) -> Result<(), Failure> + 'static,
    {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(id.0 + 1);

        let listener = Arc::new(TypedListener {
            listener,
            _event: PhantomData,
        })
        .unsize(unsize::Coercion!(to dyn ErasedListener));

        self.listeners
            .borrow_mut()
            .entry(E::NAME)
            .or_default()
            .push(Entry { id, listener });
        id
    }

    /// Detaches a listener. Returns `false` if it was not attached.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        for entries in listeners.values_mut() {
            if let Some(position) = entries.iter().position(|entry| entry.id == id) {
                entries.remove(position);
                return true;
            }
        }
        false
    }

    /// Detaches every listener for `E`.
    pub fn clear<E: Event>(&self) {
        self.listeners.borrow_mut().shift_remove(E::NAME);
    }

    /// Returns `true` if at least one listener is attached for `E`.
    pub fn has_listeners<E: Event>(&self) -> bool {
        self.listener_count::<E>() > 0
    }

    /// The number of listeners attached for `E`.
    pub fn listener_count<E: Event>(&self) -> usize {
        self.listeners
            .borrow()
            .get(E::NAME)
            .map_or(0, |entries| entries.len())
    }

    /// Emits `event` to its listeners in attachment order.
    ///
    /// Stops at the first listener that fails and returns its failure.
    pub fn emit<E: Event>(&self, event: &mut E) -> Result<(), Failure> {
        let snapshot: Vec<Arc<dyn ErasedListener>> = match self.listeners.borrow().get(E::NAME) {
            Some(entries) => entries.iter().map(|entry| entry.listener.clone()).collect(),
            None => return Ok(()),
        };

        for listener in snapshot {
            listener.call(&mut *event)?;
        }
        Ok(())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self.listeners.borrow();
        f.debug_map()
            .entries(listeners.iter().map(|(name, entries)| (name, entries.len())))
            .finish()
    }
}

/// Emitted for every runtime error notification, before the suppression
/// decision is final.
#[derive(Debug)]
pub struct ErrorEvent {
    failure: Failure,
    debug: bool,
    suppressed: bool,
}

impl Event for ErrorEvent {
    const NAME: &'static str = "error";
}

impl ErrorEvent {
    pub(crate) fn new(failure: Failure, debug: bool) -> Self {
        let suppressed = failure.is_suppressed();
        Self {
            failure,
            debug,
            suppressed,
        }
    }

    /// The failure built from the runtime error.
    pub fn failure(&self) -> &Failure {
        &self.failure
    }

    /// Whether the dispatcher is in debug mode.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// The current suppression decision.
    pub fn is_suppressed(&self) -> bool {
        self.suppressed
    }

    /// Suppresses the error regardless of the reporting mask.
    pub fn suppress(&mut self) {
        self.suppressed = true;
    }

    /// Raises the error regardless of the reporting mask.
    pub fn force(&mut self) {
        self.suppressed = false;
    }

    pub(crate) fn into_failure(self) -> Failure {
        self.failure.with_suppressed(self.suppressed)
    }
}

/// Emitted for every failure that reaches the uncaught path.
#[derive(Debug)]
pub struct ExceptionEvent {
    failure: Failure,
    debug: bool,
    termination: Termination,
}

impl Event for ExceptionEvent {
    const NAME: &'static str = "exception";
}

impl ExceptionEvent {
    pub(crate) fn new(failure: Failure, debug: bool, termination: Termination) -> Self {
        Self {
            failure,
            debug,
            termination,
        }
    }

    /// The uncaught failure.
    pub fn failure(&self) -> &Failure {
        &self.failure
    }

    /// Whether the dispatcher is in debug mode.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Why the process is about to stop.
    pub fn termination(&self) -> Termination {
        self.termination
    }
}

/// Emitted when the screen itself failed to render a failure.
///
/// The failure is a chained failure whose chain holds both the screen's
/// failure and the failure it was asked to render.
#[derive(Debug)]
pub struct FailureEvent {
    failure: Failure,
    debug: bool,
    termination: Termination,
}

impl Event for FailureEvent {
    const NAME: &'static str = "failure";
}

impl FailureEvent {
    pub(crate) fn new(failure: Failure, debug: bool, termination: Termination) -> Self {
        Self {
            failure,
            debug,
            termination,
        }
    }

    /// The chained failure.
    pub fn failure(&self) -> &Failure {
        &self.failure
    }

    /// Whether the dispatcher is in debug mode.
    pub fn debug(&self) -> bool {
        self.debug
    }

    /// Why the process is about to stop.
    pub fn termination(&self) -> Termination {
        self.termination
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    struct Ping(Vec<&'static str>);

    impl Event for Ping {
        const NAME: &'static str = "ping";
    }

    #[test]
    fn test_event_bus_not_send() {
        static_assertions::assert_not_impl_any!(EventBus: Send, Sync);
        static_assertions::assert_impl_all!(ErrorEvent: Send, Sync);
    }

    #[test]
    fn listeners_run_in_attachment_order() {
        let bus = EventBus::new();
        bus.on::<Ping, _>(|ping| {
            ping.0.push("first");
            Ok(())
        });
        bus.on::<Ping, _>(|ping| {
            ping.0.push("second");
            Ok(())
        });

        let mut ping = Ping(Vec::new());
        bus.emit(&mut ping).unwrap();
        assert_eq!(ping.0, ["first", "second"]);
    }

    #[test]
    fn first_failure_stops_emission() {
        let bus = EventBus::new();
        bus.on::<Ping, _>(|_| Err(Failure::msg("boom")));
        bus.on::<Ping, _>(|ping| {
            ping.0.push("unreachable");
            Ok(())
        });

        let mut ping = Ping(Vec::new());
        let failure = bus.emit(&mut ping).unwrap_err();
        assert_eq!(failure.message(), "boom");
        assert!(ping.0.is_empty());
    }

    #[test]
    fn off_detaches() {
        let bus = EventBus::new();
        let id = bus.on::<Ping, _>(|_| Ok(()));
        assert_eq!(bus.listener_count::<Ping>(), 1);
        assert!(bus.off(id));
        assert!(!bus.off(id));
        assert!(!bus.has_listeners::<Ping>());
    }

    #[test]
    fn listeners_may_reenter_the_bus() {
        let bus = Rc::new(EventBus::new());
        let log = Rc::new(RefCell::new(Vec::<String>::new()));

        let inner_bus = Rc::downgrade(&bus);
        let inner_log = log.clone();
        bus.on::<Ping, _>(move |_| {
            inner_log.borrow_mut().push("outer".into());
            if let Some(bus) = inner_bus.upgrade() {
                let nested_log = inner_log.clone();
                bus.on::<Ping, _>(move |_| {
                    nested_log.borrow_mut().push("added".into());
                    Ok(())
                });
            }
            Ok(())
        });

        bus.emit(&mut Ping(Vec::new())).unwrap();
        assert_eq!(*log.borrow(), ["outer"]);
        assert_eq!(bus.listener_count::<Ping>(), 2);
    }

    #[test]
    fn error_event_last_writer_wins() {
        let failure = Failure::msg("x");
        let mut event = ErrorEvent::new(failure, false);
        event.suppress();
        event.force();
        assert!(!event.into_failure().is_suppressed());
    }
}
