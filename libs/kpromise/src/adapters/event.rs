// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::cell::{Cell, RefCell};
use core::fmt;
use std::rc::Rc;

use wasmtime_slab::{Id, Slab};

use crate::promise::Promise;
use crate::value::{IntoValues, Values};

type Listener = Rc<RefCell<Box<dyn FnMut(Values)>>>;

/// A notification source a promise can wait on, see [`Promise::from_event`].
pub trait Event {
    /// Identifies one listener, for [`Event::disconnect`].
    type Connection: 'static;

    /// Starts calling `listener` with the payload of every notification.
    fn connect(&self, listener: Box<dyn FnMut(Values)>) -> Self::Connection;

    /// Stops calling the listener behind `connection`.
    fn disconnect(&self, connection: Self::Connection);
}

/// A simple multicast [`Event`] the host fires by hand.
///
/// Clones share their listeners.
#[derive(Clone, Default)]
pub struct Signal {
    listeners: Rc<RefCell<Slab<(u64, Listener)>>>,
    next_seq: Rc<Cell<u64>>,
}

/// A listener registration on a [`Signal`]. Disconnecting a stale connection does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    key: Id,
    seq: u64,
}

// === impl Promise ===

impl Promise {
    /// Returns a promise that resolves with the payload of the next notification of `event`.
    ///
    /// The listener is disconnected as soon as the promise settles or is cancelled.
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of an [`Executor`](crate::executor::Executor).
    #[track_caller]
    pub fn from_event<E>(event: E) -> Promise
    where
        E: Event + 'static,
    {
        Self::from_event_filtered(event, |_| true)
    }

    /// Like [`Promise::from_event`], but only resolves with a payload `predicate` accepts.
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of an [`Executor`](crate::executor::Executor).
    #[track_caller]
    pub fn from_event_filtered<E, P>(event: E, mut predicate: P) -> Promise
    where
        E: Event + 'static,
        P: FnMut(&Values) -> bool + 'static,
    {
        let event = Rc::new(event);

        Promise::with_resolver(|resolver| {
            let connection: Rc<RefCell<Option<E::Connection>>> = Rc::default();
            let fired = Rc::new(Cell::new(false));

            let listener = {
                let resolver = resolver.clone();
                let event = Rc::downgrade(&event);
                let connection = connection.clone();
                let fired = fired.clone();
                move |values: Values| {
                    if fired.get() || resolver.is_cancelled() || !predicate(&values) {
                        return;
                    }
                    fired.set(true);

                    // settling drops the cancel hook, the last strong reference to `event`
                    let event = event.upgrade();
                    resolver.resolve(values);

                    let connection = connection.borrow_mut().take();
                    if let (Some(connection), Some(event)) = (connection, event) {
                        event.disconnect(connection);
                    }
                }
            };

            let conn = event.connect(Box::new(listener));
            if fired.get() {
                // fired from within `connect`
                event.disconnect(conn);
                return Ok(());
            }
            *connection.borrow_mut() = Some(conn);

            resolver.on_cancel(move || {
                let connection = connection.borrow_mut().take();
                if let Some(connection) = connection {
                    event.disconnect(connection);
                }
            });
            Ok(())
        })
    }
}

// === impl Signal ===

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls every connected listener with `values`.
    ///
    /// Listeners connected or disconnected while firing take effect with the next call. A
    /// listener that fires the signal it listens on is not called recursively.
    pub fn fire(&self, values: impl IntoValues) {
        let values = values.into_values();
        let listeners: Vec<Listener> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, (_, listener))| listener.clone())
            .collect();

        for listener in listeners {
            let Ok(mut listener) = listener.try_borrow_mut() else {
                tracing::trace!("skipping a listener that is already running");
                continue;
            };
            (&mut *listener)(values.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }
}

impl Event for Signal {
    type Connection = Connection;

    fn connect(&self, listener: Box<dyn FnMut(Values)>) -> Connection {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);

        let key = self
            .listeners
            .borrow_mut()
            .alloc((seq, Rc::new(RefCell::new(listener))));
        Connection { key, seq }
    }

    fn disconnect(&self, connection: Connection) {
        let removed = {
            let mut listeners = self.listeners.borrow_mut();
            let current = listeners
                .get(connection.key)
                .is_some_and(|(seq, _)| *seq == connection.seq);
            current.then(|| listeners.dealloc(connection.key))
        };
        // the listener may own promises, drop it without holding the borrow
        drop(removed);
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("listeners", &self.listener_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Status;
    use crate::test_util::Harness;
    use crate::value::Value;

    #[test]
    fn resolves_with_the_first_notification() {
        let h = Harness::new();
        let signal = Signal::new();

        let promise = Promise::from_event(signal.clone());
        assert_eq!(signal.listener_count(), 1);

        signal.fire(("hello", 1));
        signal.fire("again");
        h.run();

        assert_eq!(promise.status(), Status::Resolved);
        assert_eq!(promise.values().as_slice(), [Value::from("hello"), Value::Int(1)]);
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn predicate_filters_notifications() {
        let h = Harness::new();
        let signal = Signal::new();

        let promise = Promise::from_event_filtered(signal.clone(), |values: &Values| {
            values.first().and_then(Value::as_int).is_some_and(|n| n > 2)
        });

        signal.fire(1);
        signal.fire(2);
        h.run();
        assert_eq!(promise.status(), Status::Pending);

        signal.fire(3);
        h.run();
        assert_eq!(promise.values()[0], Value::Int(3));
        assert_eq!(signal.listener_count(), 0);
    }

    #[test]
    fn cancel_disconnects() {
        let _h = Harness::new();
        let signal = Signal::new();

        let promise = Promise::from_event(signal.clone());
        promise.cancel();
        assert_eq!(signal.listener_count(), 0);

        signal.fire(1);
        assert_eq!(promise.status(), Status::Cancelled);
    }

    /// Fires every listener as soon as it connects.
    struct Eager {
        disconnects: Rc<Cell<usize>>,
    }

    impl Event for Eager {
        type Connection = ();

        fn connect(&self, mut listener: Box<dyn FnMut(Values)>) {
            listener(7_i64.into_values());
        }

        fn disconnect(&self, (): ()) {
            self.disconnects.set(self.disconnects.get() + 1);
        }
    }

    #[test]
    fn notification_during_connect() {
        let _h = Harness::new();
        let disconnects = Rc::new(Cell::new(0));

        let promise = Promise::from_event(Eager {
            disconnects: disconnects.clone(),
        });
        assert_eq!(promise.status(), Status::Resolved);
        assert_eq!(promise.values()[0], Value::Int(7));
        assert_eq!(disconnects.get(), 1);
    }

    #[test]
    fn stale_connections_are_ignored() {
        let signal = Signal::new();
        let first = signal.connect(Box::new(|_| {}));
        signal.disconnect(first);

        let second = signal.connect(Box::new(|_| {}));
        signal.disconnect(first);
        assert_eq!(signal.listener_count(), 1);

        signal.disconnect(second);
        assert_eq!(signal.listener_count(), 0);
    }
}
